use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::TemplateError;
use crate::TemplateResult;

/// The current config schema version.
pub const CONFIG_SCHEMA: u32 = 1;

/// A variable the template expects the caller to provide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputParameter {
	pub name: String,
	pub description: String,
	/// Seeded into the render context when the caller leaves the variable
	/// unset.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub default: Option<String>,
}

impl InputParameter {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();
		self
	}

	#[must_use]
	pub fn with_default(mut self, default: impl Into<String>) -> Self {
		self.default = Some(default.into());
		self
	}
}

/// Metadata describing a prompt template.
///
/// Loaded from a `.json` or `.toml` file next to the template:
///
/// ```toml
/// schema = 1
/// description = "Summarise a document"
/// inline_variables = true
///
/// [[input_variables]]
/// name = "style"
/// description = "The tone of the summary"
/// default = "neutral"
///
/// [execution_settings.default]
/// max_tokens = 256
/// ```
///
/// Everything except `input_variables` and `inline_variables` is opaque to
/// the engine and passed through to functions untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplateConfig {
	pub schema: u32,
	pub description: String,
	pub input_variables: Vec<InputParameter>,
	pub execution_settings: BTreeMap<String, serde_json::Value>,
	pub allow_unsafe_content: bool,
	/// When true a bare `$name` outside of `{{ }}` is a variable reference.
	/// When false it is literal text.
	pub inline_variables: bool,
}

impl Default for PromptTemplateConfig {
	fn default() -> Self {
		Self {
			schema: CONFIG_SCHEMA,
			description: String::new(),
			input_variables: vec![],
			execution_settings: BTreeMap::new(),
			allow_unsafe_content: false,
			inline_variables: true,
		}
	}
}

impl PromptTemplateConfig {
	pub fn from_json(content: &str) -> TemplateResult<Self> {
		serde_json::from_str(content).map_err(|e| TemplateError::ConfigParse(e.to_string()))
	}

	pub fn from_toml(content: &str) -> TemplateResult<Self> {
		toml::from_str(content).map_err(|e| TemplateError::ConfigParse(e.to_string()))
	}

	/// Load a config file, choosing the format from its extension.
	pub fn load(path: &Path) -> TemplateResult<Self> {
		let content = std::fs::read_to_string(path)?;

		match path.extension().and_then(|ext| ext.to_str()) {
			Some("json") => Self::from_json(&content),
			Some("toml") => Self::from_toml(&content),
			other => {
				Err(TemplateError::ConfigParse(format!(
					"unsupported config extension `{}` for {}",
					other.unwrap_or_default(),
					path.display()
				)))
			}
		}
	}

	#[must_use]
	pub fn with_inline_variables(mut self, inline_variables: bool) -> Self {
		self.inline_variables = inline_variables;
		self
	}

	#[must_use]
	pub fn with_input_variable(mut self, parameter: InputParameter) -> Self {
		self.input_variables.push(parameter);
		self
	}

	/// The declared parameter called `name`, compared ignoring ASCII case.
	pub fn input_variable(&self, name: &str) -> Option<&InputParameter> {
		self.input_variables
			.iter()
			.find(|parameter| parameter.name.eq_ignore_ascii_case(name))
	}
}
