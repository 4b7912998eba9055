use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::instrument;
use tracing::trace;

use crate::Block;
use crate::CodeBlock;
use crate::ContextVariables;
use crate::FunctionContext;
use crate::FunctionLookup;
use crate::InputParameter;
use crate::PromptTemplateConfig;
use crate::TemplateError;
use crate::TemplateResult;
use crate::lexer::tokenize;

/// A template string paired with the config it is rendered under.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
	template: String,
	config: Arc<PromptTemplateConfig>,
}

impl PromptTemplate {
	pub fn new(template: impl Into<String>, config: PromptTemplateConfig) -> Self {
		Self {
			template: template.into(),
			config: Arc::new(config),
		}
	}

	pub fn template(&self) -> &str {
		&self.template
	}

	pub fn config(&self) -> &PromptTemplateConfig {
		&self.config
	}

	/// Split the template into blocks.
	pub fn blocks(&self) -> TemplateResult<Vec<Block>> {
		extract_blocks_with_config(&self.template, &self.config)
	}

	/// Render the template, invoking functions through `lookup`.
	pub async fn render(
		&self,
		lookup: &impl FunctionLookup,
		variables: &ContextVariables,
		cancellation: &CancellationToken,
	) -> TemplateResult<String> {
		let blocks = self.blocks()?;
		self.render_blocks(&blocks, lookup, variables, cancellation)
			.await
	}

	/// Render blocks that were already extracted, possibly from another
	/// template.
	#[instrument(skip_all, fields(blocks = blocks.len()))]
	pub async fn render_blocks(
		&self,
		blocks: &[Block],
		lookup: &impl FunctionLookup,
		variables: &ContextVariables,
		cancellation: &CancellationToken,
	) -> TemplateResult<String> {
		let root = self.root_context(variables);
		let mut output = String::new();

		for block in blocks {
			let rendered = match block {
				Block::Code(code) => {
					render_code(code, lookup, &root, &self.config, cancellation).await?
				}
				other => other.render_text(&root).unwrap_or_default(),
			};

			output.push_str(&rendered);
		}

		Ok(output)
	}

	/// Every input the template reads: declared input variables first, then
	/// any other variable the template references, in order of appearance.
	/// Names are de-duplicated ignoring ASCII case.
	pub fn parameters(&self) -> TemplateResult<Vec<InputParameter>> {
		let blocks = self.blocks()?;
		let mut parameters = self.config.input_variables.clone();

		for name in blocks.iter().flat_map(referenced_variables) {
			if !parameters
				.iter()
				.any(|parameter| parameter.name.eq_ignore_ascii_case(name))
			{
				parameters.push(InputParameter::new(name));
			}
		}

		Ok(parameters)
	}

	/// The caller's variables with declared defaults filled in.
	fn root_context(&self, variables: &ContextVariables) -> ContextVariables {
		let mut root = variables.clone();

		for parameter in &self.config.input_variables {
			if let Some(default) = &parameter.default {
				if !root.contains(&parameter.name) {
					root.set(&parameter.name, default.as_str());
				}
			}
		}

		root
	}
}

fn referenced_variables(block: &Block) -> Vec<&str> {
	match block {
		Block::Variable(var) => vec![var.name()],
		Block::NamedArg(named) => named.value().variable_name().into_iter().collect(),
		Block::Code(code) => code.expression().variable_names().collect(),
		_ => vec![],
	}
}

async fn render_code(
	code: &CodeBlock,
	lookup: &impl FunctionLookup,
	root: &ContextVariables,
	config: &Arc<PromptTemplateConfig>,
	cancellation: &CancellationToken,
) -> TemplateResult<String> {
	if cancellation.is_cancelled() {
		return Err(TemplateError::Cancelled);
	}

	let expression = code.expression();
	let Some(id) = expression.function() else {
		return Ok(expression
			.positional()
			.map(|value| value.render(root))
			.unwrap_or_default());
	};

	let Some(function) = lookup.resolve(id.plugin_name(), id.function_name()) else {
		return Err(TemplateError::FunctionNotFound {
			plugin: id.plugin_name().map(ToString::to_string),
			function: id.function_name().to_string(),
		});
	};

	// Arguments are resolved against the root so every invocation sees the
	// same caller state.
	let mut variables = root.clone();
	if let Some(positional) = expression.positional() {
		variables.update(positional.render(root));
	}
	for named in expression.named() {
		variables.set(named.name(), named.value().render(root));
	}

	debug!(function = %id, "invoking function");
	trace!(function = %id, ?variables, "function arguments");

	let context = FunctionContext::new(variables, Arc::clone(config), cancellation.child_token());

	tokio::select! {
		biased;
		() = cancellation.cancelled() => {
			debug!(function = %id, "render cancelled during invocation");
			Err(TemplateError::Cancelled)
		}
		result = function.invoke(context) => {
			result.map_err(|e| {
				error!(function = %id, error = %e, "function failed");
				TemplateError::Function(e)
			})
		}
	}
}

/// Split `template` into blocks using the default config.
pub fn extract_blocks(template: &str) -> TemplateResult<Vec<Block>> {
	extract_blocks_with_config(template, &PromptTemplateConfig::default())
}

pub fn extract_blocks_with_config(
	template: &str,
	config: &PromptTemplateConfig,
) -> TemplateResult<Vec<Block>> {
	let blocks = tokenize(template, config.inline_variables)?;
	trace!(count = blocks.len(), "extracted blocks");
	Ok(blocks)
}

/// Replace every variable block with a text block holding its value. Other
/// blocks are cloned unchanged. Neither `blocks` nor `variables` is modified.
pub fn render_variables(blocks: &[Block], variables: &ContextVariables) -> Vec<Block> {
	blocks
		.iter()
		.map(|block| {
			match block {
				Block::Variable(var) => Block::text(var.render(variables)),
				other => other.clone(),
			}
		})
		.collect()
}

/// Parse and render `template` with the default config.
pub async fn render(
	template: &str,
	variables: &ContextVariables,
	lookup: &impl FunctionLookup,
	cancellation: &CancellationToken,
) -> TemplateResult<String> {
	PromptTemplate::new(template, PromptTemplateConfig::default())
		.render(lookup, variables, cancellation)
		.await
}
