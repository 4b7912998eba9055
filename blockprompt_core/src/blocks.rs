use serde::Serialize;
use tracing::warn;

use crate::ContextVariables;

/// The variable sigil.
pub const VAR_PREFIX: char = '$';
/// Separates a named argument's name from its value.
pub const NAMED_ARG_SEPARATOR: char = '=';
/// Separates the plugin name from the function name in a function identifier.
pub const PLUGIN_SEPARATOR: char = '.';

/// A typed, immutable fragment of a parsed template.
///
/// Templates are split into an ordered list of blocks by
/// [`extract_blocks`](crate::extract_blocks):
///
/// ```text
/// Hello $name, today is {{time.today}} and {{text.uppercase $mood}}.
/// ^^^^^^ Text
///       ^^^^^ Variable
///                       ^^^^^^^^^^^^^^^^ Code
/// ```
///
/// Blocks never change once created. Rendering produces new strings (or new
/// blocks via [`render_variables`](crate::render_variables)), so the same
/// block list can be rendered many times against fresh contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[non_exhaustive]
pub enum Block {
	/// Literal text emitted verbatim.
	Text { content: String },
	/// A `$name` reference.
	Variable(VarBlock),
	/// A quoted literal, e.g. `'hello'`.
	Value(ValBlock),
	/// A `name=value` argument inside a code block.
	NamedArg(NamedArgBlock),
	/// A `plugin.function` or `function` identifier.
	FunctionId(FunctionIdBlock),
	/// A `{{ ... }}` function call expression.
	Code(CodeBlock),
}

impl Block {
	pub(crate) fn text(content: impl Into<String>) -> Self {
		Self::Text {
			content: content.into(),
		}
	}

	pub fn block_type(&self) -> BlockType {
		match self {
			Self::Text { .. } => BlockType::Text,
			Self::Variable(_) => BlockType::Variable,
			Self::Value(_) => BlockType::Value,
			Self::NamedArg(_) => BlockType::NamedArg,
			Self::FunctionId(_) => BlockType::FunctionId,
			Self::Code(_) => BlockType::Code,
		}
	}

	/// The raw content of the block. Code blocks return their trimmed
	/// interior without the `{{` and `}}` delimiters.
	pub fn content(&self) -> &str {
		match self {
			Self::Text { content } => content,
			Self::Variable(block) => block.content(),
			Self::Value(block) => block.content(),
			Self::NamedArg(block) => block.content(),
			Self::FunctionId(block) => block.content(),
			Self::Code(block) => block.content(),
		}
	}

	/// Render a block that needs no function invocation. Returns `None` for
	/// code blocks, which are rendered by the async engine.
	pub fn render_text(&self, variables: &ContextVariables) -> Option<String> {
		match self {
			Self::Text { content } => Some(content.clone()),
			Self::Variable(block) => Some(block.render(variables)),
			Self::Value(block) => Some(block.value().to_string()),
			Self::NamedArg(block) => Some(block.value().render(variables)),
			Self::FunctionId(block) => Some(block.content().to_string()),
			Self::Code(_) => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum BlockType {
	Text,
	Variable,
	Value,
	NamedArg,
	FunctionId,
	Code,
}

impl std::fmt::Display for BlockType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Text => "text",
			Self::Variable => "variable",
			Self::Value => "value",
			Self::NamedArg => "namedArg",
			Self::FunctionId => "functionId",
			Self::Code => "code",
		};

		f.pad(name)
	}
}

/// A reference to a variable, written `$name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarBlock {
	content: String,
}

impl VarBlock {
	/// Build from a name that has already been checked with
	/// [`is_valid_name`].
	pub(crate) fn new(name: &str) -> Self {
		Self {
			content: format!("{VAR_PREFIX}{name}"),
		}
	}

	/// The variable name without the `$` sigil.
	pub fn name(&self) -> &str {
		&self.content[VAR_PREFIX.len_utf8()..]
	}

	pub fn content(&self) -> &str {
		&self.content
	}

	/// Look up the variable. Missing variables render as an empty string.
	pub fn render(&self, variables: &ContextVariables) -> String {
		if let Some(value) = variables.get(self.name()) {
			return value.to_string();
		}

		warn!(variable = self.name(), "variable `{}` not found", self.content);
		String::new()
	}
}

/// A quoted literal. Both `'` and `"` delimit values, and `\'`, `\"` and `\\`
/// escape the quote and backslash characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValBlock {
	content: String,
}

impl ValBlock {
	/// Build from a raw literal including its surrounding quotes, resolving
	/// escape sequences.
	pub(crate) fn from_literal(literal: &str) -> Self {
		let quote = literal.chars().next().unwrap_or('\'');
		let inner = &literal[quote.len_utf8()..literal.len() - quote.len_utf8()];
		let mut content = String::with_capacity(literal.len());
		content.push(quote);
		content.push_str(&unescape(inner));
		content.push(quote);

		Self { content }
	}

	/// The quoted literal with escapes resolved, e.g. `'Let's go'`.
	pub fn content(&self) -> &str {
		&self.content
	}

	/// The literal text without quotes.
	pub fn value(&self) -> &str {
		let quote_len = self.quote().len_utf8();
		&self.content[quote_len..self.content.len() - quote_len]
	}

	/// The quote character the literal was written with.
	pub fn quote(&self) -> char {
		self.content.chars().next().unwrap_or('\'')
	}
}

/// The value side of an argument: either a literal or a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ArgValue {
	Value(ValBlock),
	Variable(VarBlock),
}

impl ArgValue {
	pub fn content(&self) -> &str {
		match self {
			Self::Value(block) => block.content(),
			Self::Variable(block) => block.content(),
		}
	}

	/// Resolve the argument against `variables`.
	pub fn render(&self, variables: &ContextVariables) -> String {
		match self {
			Self::Value(block) => block.value().to_string(),
			Self::Variable(block) => block.render(variables),
		}
	}

	/// The referenced variable name, if this argument is a variable.
	pub fn variable_name(&self) -> Option<&str> {
		match self {
			Self::Value(_) => None,
			Self::Variable(block) => Some(block.name()),
		}
	}
}

/// A `name=value` argument passed to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedArgBlock {
	name: String,
	value: ArgValue,
	content: String,
}

impl NamedArgBlock {
	pub(crate) fn new(name: &str, value: ArgValue) -> Self {
		let content = format!("{name}{NAMED_ARG_SEPARATOR}{}", value.content());

		Self {
			name: name.to_string(),
			value,
			content,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn value(&self) -> &ArgValue {
		&self.value
	}

	/// Normalized `name=value` content, without whitespace around `=`.
	pub fn content(&self) -> &str {
		&self.content
	}
}

/// Identifies the function a code block calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionIdBlock {
	content: String,
	plugin_name: Option<String>,
	function_name: String,
}

impl FunctionIdBlock {
	pub(crate) fn new(content: &str) -> Self {
		let (plugin_name, function_name) = match content.split_once(PLUGIN_SEPARATOR) {
			Some((plugin, function)) => (Some(plugin.to_string()), function.to_string()),
			None => (None, content.to_string()),
		};

		Self {
			content: content.to_string(),
			plugin_name,
			function_name,
		}
	}

	pub fn content(&self) -> &str {
		&self.content
	}

	pub fn plugin_name(&self) -> Option<&str> {
		self.plugin_name.as_deref()
	}

	pub fn function_name(&self) -> &str {
		&self.function_name
	}
}

impl std::fmt::Display for FunctionIdBlock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.content)
	}
}

/// A `{{ ... }}` block together with its parsed expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
	content: String,
	expression: CodeExpression,
}

impl CodeBlock {
	pub(crate) fn new(content: impl Into<String>, expression: CodeExpression) -> Self {
		Self {
			content: content.into(),
			expression,
		}
	}

	/// The trimmed text between the delimiters.
	pub fn content(&self) -> &str {
		&self.content
	}

	pub fn expression(&self) -> &CodeExpression {
		&self.expression
	}
}

/// The parsed interior of a code block:
///
/// ```text
/// plugin.function $positional name='literal' other=$variable
/// ^^^^^^^^^^^^^^^ function
///                 ^^^^^^^^^^^ positional
///                             ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ named
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodeExpression {
	pub(crate) function: Option<FunctionIdBlock>,
	pub(crate) positional: Option<ArgValue>,
	pub(crate) named: Vec<NamedArgBlock>,
}

impl CodeExpression {
	pub fn function(&self) -> Option<&FunctionIdBlock> {
		self.function.as_ref()
	}

	/// The single unnamed argument, bound to the function's `input`.
	pub fn positional(&self) -> Option<&ArgValue> {
		self.positional.as_ref()
	}

	/// Named arguments in the order they were written.
	pub fn named(&self) -> &[NamedArgBlock] {
		&self.named
	}

	/// Every variable name the expression reads.
	pub fn variable_names(&self) -> impl Iterator<Item = &str> {
		self.positional
			.iter()
			.chain(self.named.iter().map(NamedArgBlock::value))
			.filter_map(ArgValue::variable_name)
	}
}

/// Variable and argument names are ASCII alphanumerics and underscores.
pub fn is_valid_name(name: &str) -> bool {
	!name.is_empty()
		&& name
			.chars()
			.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Resolve `\'`, `\"` and `\\`. A backslash before any other character is
/// kept as written.
fn unescape(inner: &str) -> String {
	let mut result = String::with_capacity(inner.len());
	let mut chars = inner.chars().peekable();

	while let Some(ch) = chars.next() {
		if ch == '\\' {
			if let Some(&next) = chars.peek() {
				if matches!(next, '\'' | '"' | '\\') {
					result.push(next);
					chars.next();
					continue;
				}
			}
		}

		result.push(ch);
	}

	result
}
