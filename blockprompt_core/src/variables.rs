use indexmap::IndexMap;
use indexmap::map::Entry;

/// An insertion-ordered set of named string values a template renders
/// against.
///
/// Names are compared ignoring ASCII case, so `$Input` and `$input` refer to
/// the same entry. The first spelling used for a name is the one that is kept.
///
/// The distinguished input slot lives under the reserved name
/// [`ContextVariables::INPUT`]. Cloning produces an independent copy, which
/// is how each function invocation receives its own context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextVariables {
	/// Keyed by the ASCII-lowercased name. Each entry holds the first spelling
	/// of the name and its value.
	entries: IndexMap<String, (String, String)>,
}

impl ContextVariables {
	/// The reserved name of the main input variable.
	pub const INPUT: &'static str = "input";

	pub fn new() -> Self {
		Self::default()
	}

	/// Create a context whose input slot holds `input`.
	pub fn with_input(input: impl Into<String>) -> Self {
		let mut variables = Self::new();
		variables.update(input);
		variables
	}

	/// The current input value, or an empty string when unset.
	pub fn input(&self) -> &str {
		self.get(Self::INPUT).unwrap_or_default()
	}

	/// Replace the input value.
	pub fn update(&mut self, input: impl Into<String>) {
		self.set(Self::INPUT, input);
	}

	/// Set `name` to `value`, overwriting any existing value in place.
	pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
		let name = name.as_ref();
		let value = value.into();

		match self.entries.entry(name.to_ascii_lowercase()) {
			Entry::Occupied(mut entry) => entry.get_mut().1 = value,
			Entry::Vacant(entry) => {
				entry.insert((name.to_string(), value));
			}
		}
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.entries
			.get(&name.to_ascii_lowercase())
			.map(|(_, value)| value.as_str())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.entries.contains_key(&name.to_ascii_lowercase())
	}

	/// Remove `name`, returning its value if it was present. The remaining
	/// entries keep their order.
	pub fn remove(&mut self, name: &str) -> Option<String> {
		self.entries
			.shift_remove(&name.to_ascii_lowercase())
			.map(|(_, value)| value)
	}

	/// Iterate over `(name, value)` pairs in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries
			.values()
			.map(|(name, value)| (name.as_str(), value.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl<K, V> FromIterator<(K, V)> for ContextVariables
where
	K: AsRef<str>,
	V: Into<String>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut variables = Self::new();
		variables.extend(iter);
		variables
	}
}

impl<K, V> Extend<(K, V)> for ContextVariables
where
	K: AsRef<str>,
	V: Into<String>,
{
	fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
		for (name, value) in iter {
			self.set(name, value);
		}
	}
}
