use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use blockprompt_core::ContextVariables;
use blockprompt_core::PromptTemplateConfig;
use blockprompt_core::TemplateResult;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Render prompt templates with embedded function calls.",
	long_about = "blockprompt renders prompt templates made of plain text, `$variables` and \
	              `{{ plugin.function }}` code blocks.\n\nQuick start:\n  blockprompt render \
	              prompt.txt --var name=Ann   Render a template\n  blockprompt blocks \
	              prompt.txt                  Show how a template is split\n  blockprompt \
	              params prompt.txt                  List the variables a template reads"
)]
pub struct BlockpromptCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Render a template.
	///
	/// Code blocks are resolved against the built-in `text` plugin. Press
	/// Ctrl-C to cancel a render that is waiting on a function.
	Render {
		/// Path to the template, or `-` to read it from stdin.
		template: String,

		/// Set a variable, written `name=value`. May be repeated.
		#[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_variable)]
		variables: Vec<(String, String)>,

		/// The value of the `input` variable.
		#[arg(long)]
		input: Option<String>,

		/// A `.json` or `.toml` template config.
		#[arg(long)]
		config: Option<PathBuf>,
	},
	/// Print the blocks a template is split into.
	///
	/// Shows each block's type and content without rendering anything. Useful
	/// for checking how `$variables` and code blocks are recognised.
	Blocks {
		/// Path to the template, or `-` to read it from stdin.
		template: String,

		/// Output format. Use `text` for human-readable output or `json` for
		/// programmatic consumption.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,

		/// A `.json` or `.toml` template config.
		#[arg(long)]
		config: Option<PathBuf>,
	},
	/// List the variables a template reads.
	///
	/// Declared input variables from the config come first, followed by
	/// every other variable the template references.
	Params {
		/// Path to the template, or `-` to read it from stdin.
		template: String,

		/// Output format. Use `text` for human-readable output or `json` for
		/// programmatic consumption.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,

		/// A `.json` or `.toml` template config.
		#[arg(long)]
		config: Option<PathBuf>,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	Text,
	Json,
}

/// Parse a `name=value` pair. The value may itself contain `=`.
pub fn parse_variable(raw: &str) -> Result<(String, String), String> {
	let Some((name, value)) = raw.split_once('=') else {
		return Err(format!("expected `name=value`, got `{raw}`"));
	};

	if !blockprompt_core::is_valid_name(name) {
		return Err(format!(
			"invalid variable name `{name}`: only alphanumeric chars and underscore are allowed"
		));
	}

	Ok((name.to_string(), value.to_string()))
}

/// Read the template at `source`, or stdin when `source` is `-`.
pub fn read_template(source: &str) -> std::io::Result<String> {
	if source == "-" {
		let mut template = String::new();
		std::io::stdin().read_to_string(&mut template)?;
		return Ok(template);
	}

	std::fs::read_to_string(source)
}

/// Load the config at `path`, or the default config when none is given.
pub fn load_config(path: Option<&Path>) -> TemplateResult<PromptTemplateConfig> {
	path.map_or_else(|| Ok(PromptTemplateConfig::default()), PromptTemplateConfig::load)
}

/// Build the render context from `--var` pairs and `--input`. An explicit
/// `--input` wins over `--var input=...`.
pub fn build_variables(
	variables: &[(String, String)],
	input: Option<&str>,
) -> ContextVariables {
	let mut context: ContextVariables = variables
		.iter()
		.map(|(name, value)| (name.as_str(), value.as_str()))
		.collect();

	if let Some(input) = input {
		context.update(input);
	}

	context
}
