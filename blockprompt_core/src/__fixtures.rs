use std::future::Ready;
use std::future::ready;

use chrono::NaiveDateTime;
use tokio_util::sync::CancellationToken;

use crate::*;

/// Render `template` with the default config and a fresh cancellation token.
pub async fn render_template(
	template: &str,
	variables: &ContextVariables,
	lookup: &impl FunctionLookup,
) -> TemplateResult<String> {
	render(template, variables, lookup, &CancellationToken::new()).await
}

pub fn variables<const N: usize>(entries: [(&str, &str); N]) -> ContextVariables {
	entries.into_iter().collect()
}

pub fn block_types(blocks: &[Block]) -> Vec<BlockType> {
	blocks.iter().map(Block::block_type).collect()
}

/// A function that returns the value of `variable` from its context.
pub fn read_variable(
	name: &'static str,
	variable: &'static str,
) -> NativeFunction<impl Fn(FunctionContext) -> Ready<FunctionResult> + Send + Sync> {
	NativeFunction::new(name, move |context: FunctionContext| {
		ready(Ok(context.get(variable).unwrap_or_default().to_string()))
	})
}

/// The three functions of the isolation scenario. Each mutates its own copy
/// of the context and the mutation must never reach a sibling.
pub fn isolation_plugin() -> KernelPlugin {
	KernelPlugin::new("isolation")
		.with_function(NativeFunction::new("func1", |mut context: FunctionContext| {
			async move {
				context.update("foo");
				Ok::<_, FunctionError>("F(OUTPUT-FOO)".to_string())
			}
		}))
		.with_function(NativeFunction::new("func2", |mut context: FunctionContext| {
			async move {
				let input = context.input().to_string();
				context.set("myVar", "bar");
				Ok::<_, FunctionError>(input)
			}
		}))
		.with_function(NativeFunction::new("func3", |context: FunctionContext| {
			async move { Ok::<_, FunctionError>(context.get("myVar").unwrap_or_default().to_string()) }
		}))
}

/// `plugin.function` formats its arguments as `[date] input (age): "slogan"`.
pub fn greeting_plugin() -> KernelPlugin {
	KernelPlugin::new("plugin").with_function(NativeFunction::new(
		"function",
		|context: FunctionContext| {
			async move {
				let date = NaiveDateTime::parse_from_str(
					context.get("date").unwrap_or_default(),
					"%Y-%m-%dT%H:%M:%S",
				)
				.map_err(FunctionError::new)?;

				Ok::<_, FunctionError>(format!(
					"[{}] {} ({}): \"{}\"",
					date.format("%-m/%-d/%Y"),
					context.input(),
					context.get("age").unwrap_or_default(),
					context.get("slogan").unwrap_or_default(),
				))
			}
		},
	))
}

#[derive(Debug, thiserror::Error)]
#[error("quota exceeded for {0}")]
pub struct QuotaExceeded(pub String);

pub fn failing_plugin() -> KernelPlugin {
	KernelPlugin::new("failing").with_function(NativeFunction::new(
		"quota",
		|context: FunctionContext| {
			async move { Err::<String, _>(FunctionError::new(QuotaExceeded(context.input().to_string()))) }
		},
	))
}

/// All test plugins together with the built-in text plugin.
pub fn test_lookup() -> PluginCollection {
	PluginCollection::new()
		.with_plugin(text_plugin())
		.with_plugin(isolation_plugin())
		.with_plugin(greeting_plugin())
		.with_plugin(failing_plugin())
		.with_plugin(
			KernelPlugin::new("vars")
				.with_function(read_variable("name", "name"))
				.with_function(read_variable("f", "name")),
		)
}
