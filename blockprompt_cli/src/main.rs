use std::path::PathBuf;
use std::process;

use blockprompt_cli::BlockpromptCli;
use blockprompt_cli::Commands;
use blockprompt_cli::OutputFormat;
use blockprompt_cli::build_variables;
use blockprompt_cli::load_config;
use blockprompt_cli::read_template;
use blockprompt_core::Block;
use blockprompt_core::PluginCollection;
use blockprompt_core::PromptTemplate;
use blockprompt_core::TemplateError;
use blockprompt_core::text_plugin;
use clap::Parser;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,cyan) => {
		if color_enabled() {
			format!("{}", $text.cyan())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,dimmed) => {
		if color_enabled() {
			format!("{}", $text.dimmed())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,bold) => {
		if color_enabled() {
			format!("{}", $text.bold())
		} else {
			format!("{}", $text)
		}
	};
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
	let args = match BlockpromptCli::try_parse() {
		Ok(args) => args,
		Err(e) => {
			let code = i32::from(e.use_stderr());
			e.print().ok();
			process::exit(code);
		}
	};

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	// Install miette's fancy handler for rich error diagnostics.
	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	init_tracing(args.verbose, use_color);

	let result = match args.command {
		Some(Commands::Render {
			template,
			variables,
			input,
			config,
		}) => run_render(&template, &variables, input.as_deref(), config),
		Some(Commands::Blocks {
			template,
			format,
			config,
		}) => run_blocks(&template, format, config),
		Some(Commands::Params {
			template,
			format,
			config,
		}) => run_params(&template, format, config),
		None => {
			eprintln!("No subcommand specified. Run `blockprompt --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		// Try to render through miette for rich diagnostics with help text
		// and error codes.
		match e.downcast::<TemplateError>() {
			Ok(template_err) => {
				let report: miette::Report = (*template_err).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Logs go to stderr so rendered output on stdout stays clean. `RUST_LOG`
/// overrides the level chosen by `--verbose`.
fn init_tracing(verbose: bool, use_color: bool) {
	let level = if verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(use_color)
		.with_target(false)
		.without_time()
		.init();
}

fn load_template(source: &str, config: Option<PathBuf>) -> Result<PromptTemplate, TemplateError> {
	let template = read_template(source)?;
	let config = load_config(config.as_deref())?;
	Ok(PromptTemplate::new(template, config))
}

fn run_render(
	source: &str,
	variables: &[(String, String)],
	input: Option<&str>,
	config: Option<PathBuf>,
) -> CliResult {
	let template = load_template(source, config)?;
	let variables = build_variables(variables, input);
	let lookup = PluginCollection::new().with_plugin(text_plugin());
	let cancellation = CancellationToken::new();

	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()?;

	let output = runtime.block_on(async {
		let interrupt = cancellation.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				tracing::warn!("interrupted, cancelling render");
				interrupt.cancel();
			}
		});

		template.render(&lookup, &variables, &cancellation).await
	})?;

	println!("{output}");

	Ok(())
}

fn run_blocks(source: &str, format: OutputFormat, config: Option<PathBuf>) -> CliResult {
	let template = load_template(source, config)?;
	let blocks = template.blocks()?;

	match format {
		OutputFormat::Json => {
			println!("{}", serde_json::to_string_pretty(&blocks)?);
		}
		OutputFormat::Text => {
			if blocks.is_empty() {
				println!("No blocks found.");
				return Ok(());
			}

			for block in &blocks {
				let kind = format!("{:<10}", block.block_type());
				println!("{} {}", colored!(kind, cyan), describe(block));
			}
			println!("\n{} block(s)", blocks.len());
		}
	}

	Ok(())
}

/// One line summary of a block's content.
fn describe(block: &Block) -> String {
	match block {
		Block::Text { content } => format!("{content:?}"),
		Block::Code(code) => {
			let expression = code.expression();
			let function = expression
				.function()
				.map_or_else(String::new, ToString::to_string);
			format!("{{{{{}}}}} {}", code.content(), colored!(function, dimmed))
		}
		other => other.content().to_string(),
	}
}

fn run_params(source: &str, format: OutputFormat, config: Option<PathBuf>) -> CliResult {
	let template = load_template(source, config)?;
	let parameters = template.parameters()?;

	match format {
		OutputFormat::Json => {
			println!("{}", serde_json::to_string_pretty(&parameters)?);
		}
		OutputFormat::Text => {
			if parameters.is_empty() {
				println!("No parameters found.");
				return Ok(());
			}

			for parameter in &parameters {
				let mut line = colored!(format!("${}", parameter.name), bold);
				if !parameter.description.is_empty() {
					line.push_str(&format!(" {}", parameter.description));
				}
				if let Some(default) = &parameter.default {
					line.push_str(&format!(" (default: {default:?})"));
				}
				println!("  {line}");
			}
		}
	}

	Ok(())
}
