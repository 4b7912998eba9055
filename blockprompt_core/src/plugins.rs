use async_trait::async_trait;

use crate::FunctionContext;
use crate::FunctionResult;
use crate::KernelFunction;
use crate::KernelPlugin;

/// The name [`text_plugin`] registers under.
pub const TEXT_PLUGIN: &str = "text";

/// String helpers that operate on the `input` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFunction {
	/// Remove leading and trailing whitespace.
	Trim,
	/// Remove leading whitespace.
	TrimStart,
	/// Remove trailing whitespace.
	TrimEnd,
	Uppercase,
	Lowercase,
	/// The number of characters in the input.
	Length,
	/// The input followed by the `input2` variable.
	Concat,
	/// The input unchanged.
	Echo,
}

impl TextFunction {
	pub const ALL: [Self; 8] = [
		Self::Trim,
		Self::TrimStart,
		Self::TrimEnd,
		Self::Uppercase,
		Self::Lowercase,
		Self::Length,
		Self::Concat,
		Self::Echo,
	];

	fn apply(self, context: &FunctionContext) -> String {
		let input = context.input();

		match self {
			Self::Trim => input.trim().to_string(),
			Self::TrimStart => input.trim_start().to_string(),
			Self::TrimEnd => input.trim_end().to_string(),
			Self::Uppercase => input.to_uppercase(),
			Self::Lowercase => input.to_lowercase(),
			Self::Length => input.chars().count().to_string(),
			Self::Concat => format!("{input}{}", context.get("input2").unwrap_or_default()),
			Self::Echo => input.to_string(),
		}
	}
}

#[async_trait]
impl KernelFunction for TextFunction {
	fn name(&self) -> &str {
		match self {
			Self::Trim => "trim",
			Self::TrimStart => "trimStart",
			Self::TrimEnd => "trimEnd",
			Self::Uppercase => "uppercase",
			Self::Lowercase => "lowercase",
			Self::Length => "length",
			Self::Concat => "concat",
			Self::Echo => "echo",
		}
	}

	fn description(&self) -> &str {
		match self {
			Self::Trim => "Trim whitespace from the start and end of the input",
			Self::TrimStart => "Trim whitespace from the start of the input",
			Self::TrimEnd => "Trim whitespace from the end of the input",
			Self::Uppercase => "Convert the input to uppercase",
			Self::Lowercase => "Convert the input to lowercase",
			Self::Length => "Count the characters in the input",
			Self::Concat => "Append `input2` to the input",
			Self::Echo => "Return the input unchanged",
		}
	}

	async fn invoke(&self, context: FunctionContext) -> FunctionResult {
		Ok(self.apply(&context))
	}
}

/// A plugin named `text` with every [`TextFunction`].
pub fn text_plugin() -> KernelPlugin {
	TextFunction::ALL.into_iter().fold(
		KernelPlugin::new(TEXT_PLUGIN).with_description("Basic string helpers"),
		|plugin, function| plugin.with_function(function),
	)
}
