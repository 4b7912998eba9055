use miette::Diagnostic;
use miette::SourceSpan;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum TemplateError {
	#[error(transparent)]
	#[diagnostic(code(blockprompt::io_error))]
	Io(#[from] std::io::Error),

	/// The template grammar was violated. The message is surfaced verbatim.
	#[error("{message}")]
	#[diagnostic(
		code(blockprompt::syntax),
		help(
			"code blocks look like `{{{{ [plugin.]function [$var | 'value'] [name='value' | \
			 name=$var]* }}}}`"
		)
	)]
	Syntax {
		message: String,
		#[source_code]
		template: String,
		#[label("here")]
		span: SourceSpan,
	},

	#[error("function not found: `{}`", qualified_name(.plugin.as_deref(), .function))]
	#[diagnostic(
		code(blockprompt::function_not_found),
		help("register the function with a plugin before rendering the template")
	)]
	FunctionNotFound {
		plugin: Option<String>,
		function: String,
	},

	/// A failure raised by the invoked function, propagated unchanged.
	#[error(transparent)]
	#[diagnostic(code(blockprompt::function))]
	Function(#[from] FunctionError),

	#[error("template rendering was cancelled")]
	#[diagnostic(code(blockprompt::cancelled))]
	Cancelled,

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(blockprompt::config_parse),
		help("supported config formats: json, toml")
	)]
	ConfigParse(String),
}

impl TemplateError {
	pub(crate) fn syntax(
		message: impl Into<String>,
		template: &str,
		span: std::ops::Range<usize>,
	) -> Self {
		Self::Syntax {
			message: message.into(),
			template: template.to_string(),
			span: span.into(),
		}
	}

	/// Returns true when this is a grammar error in the template.
	pub fn is_syntax(&self) -> bool {
		matches!(self, Self::Syntax { .. })
	}
}

/// The error a [`KernelFunction`](crate::KernelFunction) reports. It wraps
/// whatever the function failed with and displays it unchanged.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct FunctionError(Box<dyn std::error::Error + Send + Sync>);

impl FunctionError {
	pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Self(error.into())
	}

	/// Attempt to view the wrapped error as a concrete type.
	pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
		self.0.downcast_ref::<E>()
	}

	pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync> {
		self.0
	}
}

impl From<String> for FunctionError {
	fn from(message: String) -> Self {
		Self::new(message)
	}
}

impl From<&str> for FunctionError {
	fn from(message: &str) -> Self {
		Self::new(message)
	}
}

pub(crate) fn qualified_name(plugin: Option<&str>, function: &str) -> String {
	match plugin {
		Some(plugin) => format!("{plugin}.{function}"),
		None => function.to_string(),
	}
}

pub type TemplateResult<T> = Result<T, TemplateError>;
pub type FunctionResult = Result<String, FunctionError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
