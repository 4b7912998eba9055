use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Deref;
use derive_more::DerefMut;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ContextVariables;
use crate::FunctionResult;
use crate::PromptTemplateConfig;

/// A named async callable that code blocks can invoke.
///
/// Functions receive their own [`FunctionContext`]. Anything a function writes
/// to that context is dropped once it returns, only the returned string
/// reaches the rendered output.
#[async_trait]
pub trait KernelFunction: Send + Sync {
	fn name(&self) -> &str;

	fn description(&self) -> &str {
		""
	}

	async fn invoke(&self, context: FunctionContext) -> FunctionResult;
}

/// The owned state handed to a single function invocation.
///
/// Dereferences to the [`ContextVariables`] copy the function may read and
/// mutate freely.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct FunctionContext {
	#[deref]
	#[deref_mut]
	variables: ContextVariables,
	config: Arc<PromptTemplateConfig>,
	cancellation: CancellationToken,
}

impl FunctionContext {
	pub fn new(
		variables: ContextVariables,
		config: Arc<PromptTemplateConfig>,
		cancellation: CancellationToken,
	) -> Self {
		Self {
			variables,
			config,
			cancellation,
		}
	}

	pub fn variables(&self) -> &ContextVariables {
		&self.variables
	}

	/// The template's config. Execution settings are passed through
	/// unchanged.
	pub fn config(&self) -> &PromptTemplateConfig {
		&self.config
	}

	/// Cancelled when the render that issued this invocation is cancelled.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancellation
	}

	pub fn into_variables(self) -> ContextVariables {
		self.variables
	}
}

/// Adapts an async closure into a [`KernelFunction`].
///
/// ```rust
/// use blockprompt_core::FunctionContext;
/// use blockprompt_core::FunctionError;
/// use blockprompt_core::NativeFunction;
///
/// let greet = NativeFunction::new("greet", |context: FunctionContext| {
/// 	async move { Ok::<_, FunctionError>(format!("Hello {}", context.input())) }
/// });
/// ```
pub struct NativeFunction<F> {
	name: String,
	description: String,
	function: F,
}

impl<F, Fut> NativeFunction<F>
where
	F: Fn(FunctionContext) -> Fut + Send + Sync,
	Fut: Future<Output = FunctionResult> + Send + 'static,
{
	pub fn new(name: impl Into<String>, function: F) -> Self {
		Self {
			name: name.into(),
			description: String::new(),
			function,
		}
	}

	#[must_use]
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();
		self
	}
}

impl<F> std::fmt::Debug for NativeFunction<F> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NativeFunction")
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}

#[async_trait]
impl<F, Fut> KernelFunction for NativeFunction<F>
where
	F: Fn(FunctionContext) -> Fut + Send + Sync,
	Fut: Future<Output = FunctionResult> + Send + 'static,
{
	fn name(&self) -> &str {
		&self.name
	}

	fn description(&self) -> &str {
		&self.description
	}

	async fn invoke(&self, context: FunctionContext) -> FunctionResult {
		(self.function)(context).await
	}
}

/// Resolves the function a code block names.
pub trait FunctionLookup: Send + Sync {
	/// Find `function`, optionally scoped to `plugin`. An absent or empty
	/// plugin name searches every plugin.
	fn resolve(&self, plugin: Option<&str>, function: &str) -> Option<Arc<dyn KernelFunction>>;
}

impl<T: FunctionLookup + ?Sized> FunctionLookup for Arc<T> {
	fn resolve(&self, plugin: Option<&str>, function: &str) -> Option<Arc<dyn KernelFunction>> {
		(**self).resolve(plugin, function)
	}
}

impl<T: FunctionLookup + ?Sized> FunctionLookup for &T {
	fn resolve(&self, plugin: Option<&str>, function: &str) -> Option<Arc<dyn KernelFunction>> {
		(**self).resolve(plugin, function)
	}
}

/// A named group of functions.
#[derive(Clone, Default)]
pub struct KernelPlugin {
	name: String,
	description: String,
	functions: Vec<Arc<dyn KernelFunction>>,
}

impl KernelPlugin {
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

	/// Add a function. A function with the same name replaces the earlier
	/// one.
	#[must_use]
	pub fn with_function(mut self, function: impl KernelFunction + 'static) -> Self {
		self.add(Arc::new(function));
		self
	}

	pub fn add(&mut self, function: Arc<dyn KernelFunction>) {
		match self
			.functions
			.iter()
			.position(|existing| existing.name().eq_ignore_ascii_case(function.name()))
		{
			Some(index) => self.functions[index] = function,
			None => self.functions.push(function),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn description(&self) -> &str {
		&self.description
	}

	/// Look up a function by name, ignoring ASCII case.
	pub fn get(&self, function: &str) -> Option<Arc<dyn KernelFunction>> {
		self.functions
			.iter()
			.find(|candidate| candidate.name().eq_ignore_ascii_case(function))
			.cloned()
	}

	pub fn functions(&self) -> impl Iterator<Item = &Arc<dyn KernelFunction>> {
		self.functions.iter()
	}
}

impl std::fmt::Debug for KernelPlugin {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KernelPlugin")
			.field("name", &self.name)
			.field(
				"functions",
				&self.functions.iter().map(|function| function.name()).collect::<Vec<_>>(),
			)
			.finish()
	}
}

impl FunctionLookup for KernelPlugin {
	fn resolve(&self, plugin: Option<&str>, function: &str) -> Option<Arc<dyn KernelFunction>> {
		match plugin.filter(|plugin| !plugin.is_empty()) {
			Some(plugin) if !plugin.eq_ignore_ascii_case(&self.name) => None,
			_ => self.get(function),
		}
	}
}

/// An ordered set of plugins.
///
/// Unqualified names resolve to the first plugin, in registration order,
/// that provides the function.
#[derive(Debug, Clone, Default)]
pub struct PluginCollection {
	plugins: Vec<KernelPlugin>,
}

impl PluginCollection {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_plugin(mut self, plugin: KernelPlugin) -> Self {
		self.add(plugin);
		self
	}

	pub fn add(&mut self, plugin: KernelPlugin) {
		self.plugins.push(plugin);
	}

	pub fn get(&self, name: &str) -> Option<&KernelPlugin> {
		self.plugins
			.iter()
			.find(|plugin| plugin.name().eq_ignore_ascii_case(name))
	}

	pub fn plugins(&self) -> &[KernelPlugin] {
		&self.plugins
	}
}

impl FunctionLookup for PluginCollection {
	fn resolve(&self, plugin: Option<&str>, function: &str) -> Option<Arc<dyn KernelFunction>> {
		if let Some(plugin) = plugin.filter(|plugin| !plugin.is_empty()) {
			return self.get(plugin).and_then(|plugin| plugin.get(function));
		}

		let mut matches = self
			.plugins
			.iter()
			.filter_map(|plugin| plugin.get(function).map(|found| (plugin.name(), found)));
		let (owner, found) = matches.next()?;

		let others: Vec<&str> = matches.map(|(name, _)| name).collect();
		if !others.is_empty() {
			debug!(
				function,
				plugin = owner,
				?others,
				"ambiguous function name, using the first registered plugin"
			);
		}

		Some(found)
	}
}
