//! `blockprompt_core` is the core library for the blockprompt prompt template
//! engine. It splits a template into typed blocks and renders them
//! asynchronously, calling out to named functions for every `{{ ... }}` code
//! block.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Template string
//!   → Lexer (splits text, `$variables` and `{{ code }}` into Blocks)
//!   → Code resolver (parses `[plugin.]function [arg] [name=value]*`)
//!   → Variable substitution (optional, folds `$variables` into text)
//!   → Renderer (invokes functions in order and concatenates the output)
//! ```
//!
//! ## Template Syntax
//!
//! - `$name` outside a code block inserts a variable (unless
//!   [`PromptTemplateConfig::inline_variables`] is off).
//! - `{{$name}}` and `{{'literal'}}` insert a variable or a literal.
//! - `{{plugin.function $arg name='value' other=$var}}` calls a function. The
//!   unnamed argument becomes the function's `input`, named arguments become
//!   variables of the same name.
//!
//! Every function call receives its own copy of the caller's variables. What a
//! function changes in that copy is never seen by the caller or by later
//! blocks.
//!
//! ## Key Types
//!
//! - [`Block`]: A typed fragment of a parsed template.
//! - [`ContextVariables`]: The variables a template is rendered against.
//! - [`PromptTemplate`]: A template together with its
//!   [`PromptTemplateConfig`].
//! - [`KernelFunction`] / [`FunctionLookup`]: Callables and how code blocks
//!   find them.
//! - [`TemplateError`]: Everything that can go wrong while parsing or
//!   rendering.
//!
//! ## Quick Start
//!
//! ```rust
//! use blockprompt_core::ContextVariables;
//! use blockprompt_core::render;
//! use blockprompt_core::text_plugin;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let variables = ContextVariables::from_iter([("name", "  world ")]);
//! let output = render(
//! 	"Hello {{text.trim $name}}!",
//! 	&variables,
//! 	&text_plugin(),
//! 	&CancellationToken::new(),
//! )
//! .await
//! .unwrap();
//!
//! assert_eq!(output, "Hello world!");
//! # });
//! ```

pub use blocks::*;
pub use code::parse_code;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use functions::*;
pub use plugins::*;
pub use variables::*;

mod blocks;
mod code;
pub mod config;
mod engine;
#[allow(unused_assignments)]
mod error;
mod functions;
pub(crate) mod lexer;
mod plugins;
mod variables;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
