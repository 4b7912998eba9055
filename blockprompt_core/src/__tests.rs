use std::io::Write;
use std::sync::Arc;

use rstest::rstest;
use similar_asserts::assert_eq;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use super::__fixtures::*;
use super::*;
use crate::lexer::tokenize;

#[test]
fn mixed_variable_styles_with_inline_variables() -> TemplateResult<()> {
	let blocks = extract_blocks("{$x} this is {$a}{{foo}}{{bar $a}}")?;

	assert_eq!(
		block_types(&blocks),
		vec![
			BlockType::Text,
			BlockType::Variable,
			BlockType::Text,
			BlockType::Variable,
			BlockType::Text,
			BlockType::Code,
			BlockType::Code,
		]
	);
	assert_eq!(blocks[2].content(), "} this is {");
	assert_eq!(blocks[6].content(), "bar $a");

	Ok(())
}

#[test]
fn ten_block_regression_template() -> TemplateResult<()> {
	let template = "{$x11} This {$a} is {$_a} a {{$x11}} test {{$x11}} template \
	                {{foo}}{{bar $a}}{{baz $_a}}{{yay $x11}}{{food a='b' c = $d}}";
	let config = PromptTemplateConfig::default().with_inline_variables(false);
	let blocks = extract_blocks_with_config(template, &config)?;

	assert_eq!(blocks.len(), 10);
	assert_eq!(
		block_types(&blocks),
		vec![
			BlockType::Text,
			BlockType::Variable,
			BlockType::Text,
			BlockType::Variable,
			BlockType::Text,
			BlockType::Code,
			BlockType::Code,
			BlockType::Code,
			BlockType::Code,
			BlockType::Code,
		]
	);
	assert_eq!(blocks[0].content(), "{$x11} This {$a} is {$_a} a ");

	let Block::Code(food) = &blocks[9] else {
		panic!("expected a code block, got {:?}", blocks[9]);
	};
	let named: Vec<&str> = food
		.expression()
		.named()
		.iter()
		.map(NamedArgBlock::content)
		.collect();
	assert_eq!(named, vec!["a='b'", "c=$d"]);

	Ok(())
}

#[rstest]
#[case::empty("", vec![])]
#[case::plain_text("hello", vec![BlockType::Text])]
#[case::empty_block("{{ }}", vec![BlockType::Text])]
#[case::lone_variable("{{$a}}", vec![BlockType::Variable])]
#[case::lone_value("{{ 'x' }}", vec![BlockType::Value])]
#[case::restarted_block("{{ {{x}}", vec![BlockType::Text, BlockType::Code])]
#[case::dollar_amount("price: $5", vec![BlockType::Text])]
#[case::stray_close("a }} b", vec![BlockType::Text])]
#[case::close_inside_quotes("{{f '}}'}}", vec![BlockType::Code])]
#[case::inline_variable("Hi $name!", vec![BlockType::Text, BlockType::Variable, BlockType::Text])]
fn tokenize_block_types(
	#[case] template: &str,
	#[case] expected: Vec<BlockType>,
) -> TemplateResult<()> {
	let blocks = tokenize(template, true)?;
	assert_eq!(block_types(&blocks), expected);

	Ok(())
}

#[test]
fn empty_block_keeps_delimiters_as_text() -> TemplateResult<()> {
	let blocks = extract_blocks("a{{  }}b")?;
	assert_eq!(blocks, vec![Block::text("a"), Block::text("{{  }}"), Block::text("b")]);

	Ok(())
}

#[test]
fn restarted_block_keeps_earlier_braces_as_text() -> TemplateResult<()> {
	let blocks = extract_blocks("{{ {{x}}")?;
	assert_eq!(blocks[0], Block::text("{{ "));
	assert_eq!(blocks[1].content(), "x");

	Ok(())
}

#[rstest]
#[case::unterminated_block("{{f", "missing its closing")]
#[case::unterminated_quote("{{f 'abc}}", "never closed")]
#[case::named_first("{{a='b'}}", "Expected function name first")]
#[case::after_variable("{{$a $b}}", "Invalid token detected after the variable: $a")]
#[case::after_value("{{'a' $b}}", "Invalid token detected after the value: 'a'")]
#[case::second_positional("{{f $a $b}}", "Argument 2 is not named")]
#[case::value_after_named("{{f a='1' 'x'}}", "Argument 2 is not named")]
#[case::variable_after_named("{{f a='1' $x}}", "Argument 2 is not named")]
#[case::bare_word_argument("{{f 'a' b}}", "name and value separated by")]
#[case::too_many_dots("{{a.b.c}}", "at most one dot")]
#[case::invalid_function("{{f-g}}", "contains invalid characters")]
#[case::adjacent_tokens("{{f 'a''b'}}", "separated by at least one space")]
#[case::missing_value("{{f a=}}", "after the '=' character")]
#[case::missing_name("{{f 'a' =$x}}", "must have a name")]
#[case::empty_variable("{{f $}}", "The variable name is empty")]
#[case::invalid_variable("{{f $a-b}}", "The variable name 'a-b' contains invalid characters")]
#[case::unprefixed_value("{{f a=b}}", "prefixed with a quote or $")]
fn syntax_errors(#[case] template: &str, #[case] message: &str) {
	let error = extract_blocks(template).unwrap_err();

	assert!(error.is_syntax(), "expected a syntax error, got {error:?}");
	assert!(
		error.to_string().contains(message),
		"`{error}` does not contain `{message}`"
	);
}

#[test]
fn syntax_error_points_at_the_offending_token() {
	let error = extract_blocks("{{f a=1}}").unwrap_err();

	let TemplateError::Syntax { span, template, .. } = error else {
		panic!("expected a syntax error");
	};
	assert_eq!(template, "{{f a=1}}");
	assert_eq!(span.offset(), 6);
	assert_eq!(span.len(), 1);
}

#[tokio::test]
async fn named_argument_values_must_be_prefixed() {
	let error = render_template("{{f a=1}}", &ContextVariables::new(), &test_lookup())
		.await
		.unwrap_err();

	insta::assert_snapshot!(error, @"Named argument values need to be prefixed with a quote or $.");
}

#[tokio::test]
async fn escaped_quote_in_literal() -> TemplateResult<()> {
	let output = render_template(
		r"{{f name='O\'Brien'}}",
		&ContextVariables::new(),
		&test_lookup(),
	)
	.await?;

	assert_eq!(output, "O'Brien");

	Ok(())
}

#[rstest]
#[case::single_quote_in_double(r#"{{f name="it's"}}"#, "it's")]
#[case::escaped_double(r#"{{f name="say \"hi\""}}"#, r#"say "hi""#)]
#[case::escaped_backslash(r"{{f name='a\\b'}}", r"a\b")]
#[case::other_escape_kept(r"{{f name='a\nb'}}", r"a\nb")]
#[tokio::test]
async fn literal_escapes(#[case] template: &str, #[case] expected: &str) -> TemplateResult<()> {
	let output = render_template(template, &ContextVariables::new(), &test_lookup()).await?;
	assert_eq!(output, expected);

	Ok(())
}

#[tokio::test]
async fn isolation_between_sibling_invocations() -> TemplateResult<()> {
	let variables = variables([("input", "BAR"), ("myVar", "BAZ")]);
	let output = render_template(
		"{{func1}} {{func2}} {{func3 $myVar}}",
		&variables,
		&test_lookup(),
	)
	.await?;

	insta::assert_snapshot!(output, @"F(OUTPUT-FOO) BAR BAZ");
	assert_eq!(variables.input(), "BAR");
	assert_eq!(variables.get("myVar"), Some("BAZ"));

	Ok(())
}

#[rstest]
#[case::positional("foo-{{plugin.function $input age='42' slogan='Let\\'s-a go!' date=$someDate}}-baz")]
#[case::named_input(
	"foo-{{plugin.function input=$input age='42' slogan='Let\\'s-a go!' date=$someDate}}-baz"
)]
#[tokio::test]
async fn positional_and_named_arguments_bind_together(#[case] template: &str) -> TemplateResult<()> {
	let variables = variables([("input", "Mario"), ("someDate", "2023-08-25T00:00:00")]);
	let output = render_template(template, &variables, &test_lookup()).await?;

	assert_eq!(output, "foo-[8/25/2023] Mario (42): \"Let's-a go!\"-baz");

	Ok(())
}

#[tokio::test]
async fn last_duplicate_named_argument_wins() -> TemplateResult<()> {
	let output = render_template(
		"{{f name='first' name='second'}}",
		&ContextVariables::new(),
		&test_lookup(),
	)
	.await?;

	assert_eq!(output, "second");

	Ok(())
}

#[rstest]
#[case::known("Hi $name!", "Hi Ann!")]
#[case::missing("Hi $name, $missing!", "Hi Ann, !")]
#[case::case_insensitive("$NAME/$Name", "Ann/Ann")]
#[case::code_variable("<{{$name}}>", "<Ann>")]
#[case::code_value("<{{'lit'}}>", "<lit>")]
#[case::no_variables("plain {text}", "plain {text}")]
#[tokio::test]
async fn pure_substitution(#[case] template: &str, #[case] expected: &str) -> TemplateResult<()> {
	let variables = variables([("name", "Ann")]);
	let output = render_template(template, &variables, &PluginCollection::new()).await?;

	assert_eq!(output, expected);

	Ok(())
}

#[test]
fn render_variables_is_pure() -> TemplateResult<()> {
	let blocks = extract_blocks("Hello $name, {{text.trim $name}} $other")?;
	let variables = variables([("name", "Ann")]);
	let snapshot = variables.clone();

	let first = render_variables(&blocks, &variables);
	let second = render_variables(&blocks, &variables);

	assert_eq!(first, second);
	assert_eq!(variables, snapshot);
	assert_eq!(
		first,
		vec![
			Block::text("Hello "),
			Block::text("Ann"),
			Block::text(", "),
			blocks[3].clone(),
			Block::text(" "),
			Block::text(""),
		]
	);

	Ok(())
}

#[tokio::test]
async fn missing_function_is_reported() {
	let error = render_template("a {{nowhere.fn}} b", &ContextVariables::new(), &test_lookup())
		.await
		.unwrap_err();

	assert!(matches!(
		&error,
		TemplateError::FunctionNotFound { plugin: Some(plugin), function }
			if plugin == "nowhere" && function == "fn"
	));
	insta::assert_snapshot!(error, @"function not found: `nowhere.fn`");
}

#[tokio::test]
async fn function_errors_propagate_unchanged() {
	let error = render_template(
		"before {{failing.quota 'gpu'}} after",
		&ContextVariables::new(),
		&test_lookup(),
	)
	.await
	.unwrap_err();

	let TemplateError::Function(error) = error else {
		panic!("expected a function error, got {error:?}");
	};
	let quota = error.downcast_ref::<QuotaExceeded>();
	assert_eq!(quota.map(|quota| quota.0.as_str()), Some("gpu"));
	assert_eq!(error.to_string(), "quota exceeded for gpu");
}

#[test]
fn function_error_is_transparent() {
	#[derive(Debug, thiserror::Error)]
	#[error("upload failed")]
	struct UploadFailed(#[source] QuotaExceeded);

	let error = FunctionError::new(UploadFailed(QuotaExceeded("disk".to_string())));

	assert_eq!(error.to_string(), "upload failed");
	let source = std::error::Error::source(&error).map(ToString::to_string);
	assert_eq!(source.as_deref(), Some("quota exceeded for disk"));
	assert!(error.downcast_ref::<UploadFailed>().is_some());
}

#[tokio::test]
async fn cancelled_before_render() {
	let cancellation = CancellationToken::new();
	cancellation.cancel();

	let error = render(
		"{{text.echo 'a'}}",
		&ContextVariables::new(),
		&test_lookup(),
		&cancellation,
	)
	.await
	.unwrap_err();

	assert!(matches!(error, TemplateError::Cancelled));
}

#[tokio::test]
async fn cancelled_during_invocation() {
	let cancellation = CancellationToken::new();
	let trigger = cancellation.clone();
	let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
	let counter = Arc::clone(&calls);

	let lookup = PluginCollection::new().with_plugin(
		KernelPlugin::new("slow")
			.with_function(NativeFunction::new("hang", move |context: FunctionContext| {
				let trigger = trigger.clone();
				async move {
					trigger.cancel();
					context.cancellation().cancelled().await;
					Ok::<_, FunctionError>("never".to_string())
				}
			}))
			.with_function(NativeFunction::new("count", move |_: FunctionContext| {
				counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
				async move { Ok::<_, FunctionError>(String::new()) }
			})),
	);

	let error = render(
		"{{slow.hang}}{{slow.count}}",
		&ContextVariables::new(),
		&lookup,
		&cancellation,
	)
	.await
	.unwrap_err();

	assert!(matches!(error, TemplateError::Cancelled));
	assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn functions_see_the_template_config() -> TemplateResult<()> {
	let lookup = KernelPlugin::new("meta").with_function(NativeFunction::new(
		"settings",
		|context: FunctionContext| {
			async move {
				let config = context.config();
				Ok::<_, FunctionError>(format!(
					"{} {}",
					config.allow_unsafe_content,
					config.execution_settings["default"]["max_tokens"]
				))
			}
		},
	));
	let config = PromptTemplateConfig::from_toml(
		"allow_unsafe_content = true\n[execution_settings.default]\nmax_tokens = 256\n",
	)?;
	let template = PromptTemplate::new("{{meta.settings}}", config);

	let output = template
		.render(&lookup, &ContextVariables::new(), &CancellationToken::new())
		.await?;
	assert_eq!(output, "true 256");

	Ok(())
}

#[tokio::test]
async fn input_defaults_fill_missing_variables() -> TemplateResult<()> {
	let config = PromptTemplateConfig::default()
		.with_input_variable(InputParameter::new("style").with_default("neutral"));
	let template = PromptTemplate::new("$style/{{text.uppercase $style}}", config);
	let lookup = test_lookup();
	let cancellation = CancellationToken::new();

	let defaulted = template
		.render(&lookup, &ContextVariables::new(), &cancellation)
		.await?;
	assert_eq!(defaulted, "neutral/NEUTRAL");

	let provided = template
		.render(&lookup, &variables([("Style", "bold")]), &cancellation)
		.await?;
	assert_eq!(provided, "bold/BOLD");

	Ok(())
}

#[test]
fn parameters_list_declared_then_referenced() -> TemplateResult<()> {
	let config = PromptTemplateConfig::default()
		.with_input_variable(InputParameter::new("style").with_description("Tone"));
	let template = PromptTemplate::new(
		"$name {{text.trim $Style}} {{f a=$NAME b=$other}} {{$last}}",
		config,
	);

	let names: Vec<String> = template
		.parameters()?
		.into_iter()
		.map(|parameter| parameter.name)
		.collect();
	assert_eq!(names, vec!["style", "name", "other", "last"]);

	Ok(())
}

#[rstest]
#[case::trim("{{text.trim $v}}", "  Mixed Case  ", "Mixed Case")]
#[case::trim_start("{{text.trimStart $v}}", "  Mixed Case  ", "Mixed Case  ")]
#[case::trim_end("{{text.trimEnd $v}}", "  Mixed Case  ", "  Mixed Case")]
#[case::uppercase("{{text.uppercase $v}}", "Mixed Case", "MIXED CASE")]
#[case::lowercase("{{text.lowercase $v}}", "Mixed Case", "mixed case")]
#[case::length("{{text.length $v}}", "héllo", "5")]
#[case::concat("{{text.concat $v input2='!'}}", "hi", "hi!")]
#[case::echo("{{text.echo $v}}", "same", "same")]
#[case::unqualified("{{uppercase $v}}", "abc", "ABC")]
#[case::case_insensitive_name("{{TEXT.UPPERCASE $v}}", "abc", "ABC")]
#[tokio::test]
async fn text_plugin_functions(
	#[case] template: &str,
	#[case] value: &str,
	#[case] expected: &str,
) -> TemplateResult<()> {
	let output = render_template(template, &variables([("v", value)]), &text_plugin()).await?;
	assert_eq!(output, expected);

	Ok(())
}

#[test]
fn unqualified_lookup_uses_first_registered_plugin() {
	let lookup = PluginCollection::new()
		.with_plugin(KernelPlugin::new("first").with_function(read_variable("shared", "a")))
		.with_plugin(KernelPlugin::new("second").with_function(read_variable("shared", "b")))
		.with_plugin(KernelPlugin::new("third").with_function(read_variable("only", "c")));

	let unqualified = lookup.resolve(None, "shared");
	let blank = lookup.resolve(Some(""), "shared");
	let qualified = lookup.resolve(Some("second"), "shared");

	assert!(unqualified.is_some());
	assert!(blank.is_some());
	assert!(qualified.is_some());
	assert!(lookup.resolve(Some("first"), "only").is_none());
	assert!(lookup.resolve(Some("missing"), "shared").is_none());
	assert!(lookup.resolve(None, "third").is_none());
}

#[tokio::test]
async fn ambiguous_lookup_renders_with_first_plugin() -> TemplateResult<()> {
	let lookup = PluginCollection::new()
		.with_plugin(KernelPlugin::new("first").with_function(read_variable("shared", "a")))
		.with_plugin(KernelPlugin::new("second").with_function(read_variable("shared", "b")));
	let variables = variables([("a", "from first"), ("b", "from second")]);

	let unqualified = render_template("{{shared}}", &variables, &lookup).await?;
	let qualified = render_template("{{second.shared}}", &variables, &lookup).await?;

	assert_eq!(unqualified, "from first");
	assert_eq!(qualified, "from second");

	Ok(())
}

#[tokio::test]
#[traced_test]
async fn missing_variable_logs_a_warning() -> TemplateResult<()> {
	let output = render_template("[$missing]", &ContextVariables::new(), &PluginCollection::new()).await?;

	assert_eq!(output, "[]");
	assert!(logs_contain("variable `$missing` not found"));

	Ok(())
}

#[test]
fn parse_code_splits_function_and_arguments() -> TemplateResult<()> {
	let expression = parse_code("plugin.fn $first a='1' b = $two")?;

	let function = expression.function().map(ToString::to_string);
	assert_eq!(function.as_deref(), Some("plugin.fn"));
	assert_eq!(
		expression.function().and_then(FunctionIdBlock::plugin_name),
		Some("plugin")
	);
	assert_eq!(expression.positional().map(ArgValue::content), Some("$first"));
	assert_eq!(
		expression.variable_names().collect::<Vec<_>>(),
		vec!["first", "two"]
	);

	Ok(())
}

#[test]
fn blocks_serialize_with_type_tags() -> TemplateResult<()> {
	let blocks = extract_blocks("Hi $name {{'x'}}")?;
	let json = serde_json::to_string(&blocks).map_err(|e| TemplateError::ConfigParse(e.to_string()))?;

	insta::assert_snapshot!(json, @r#"[{"type":"text","content":"Hi "},{"type":"variable","content":"$name"},{"type":"text","content":" "},{"type":"value","content":"'x'"}]"#);

	Ok(())
}

#[test]
fn context_variables_ignore_case() {
	let mut variables = ContextVariables::with_input("first");
	variables.set("Name", "Ann");
	variables.set("NAME", "Bea");
	variables.update("second");

	assert_eq!(variables.len(), 2);
	assert_eq!(variables.get("name"), Some("Bea"));
	assert_eq!(variables.input(), "second");
	assert_eq!(
		variables.iter().collect::<Vec<_>>(),
		vec![("input", "second"), ("Name", "Bea")]
	);

	assert_eq!(variables.remove("nAmE"), Some("Bea".to_string()));
	assert!(!variables.contains("name"));
	assert_eq!(ContextVariables::new().input(), "");
}

#[test]
fn context_variables_keep_first_spelling_and_order() {
	let mut variables: ContextVariables =
		[("Alpha", "1"), ("beta", "2"), ("ALPHA", "3"), ("gamma", "4")]
			.into_iter()
			.collect();
	let copy = variables.clone();

	assert_eq!(variables.remove("BETA"), Some("2".to_string()));
	variables.set("delta", "5");

	assert_eq!(
		variables.iter().collect::<Vec<_>>(),
		vec![("Alpha", "3"), ("gamma", "4"), ("delta", "5")]
	);
	assert_eq!(copy.len(), 3);
	assert_eq!(copy.get("beta"), Some("2"));
	assert!(!copy.contains("delta"));
}

#[test]
fn context_variables_collect_many_entries() {
	let variables: ContextVariables = (0..20_000)
		.map(|index| (format!("Var{index}"), index.to_string()))
		.collect();

	assert_eq!(variables.len(), 20_000);
	assert_eq!(variables.get("var19999"), Some("19999"));
	assert_eq!(variables.iter().next(), Some(("Var0", "0")));
}

#[test]
fn config_defaults() {
	let config = PromptTemplateConfig::default();

	assert_eq!(config.schema, 1);
	assert!(config.inline_variables);
	assert!(!config.allow_unsafe_content);
	assert!(config.input_variables.is_empty());
}

#[test]
fn config_from_json() -> TemplateResult<()> {
	let config = PromptTemplateConfig::from_json(
		r#"{
			"description": "Summarise",
			"inline_variables": false,
			"input_variables": [{ "name": "style", "default": "neutral" }],
			"execution_settings": { "default": { "temperature": 0.2 } }
		}"#,
	)?;

	assert_eq!(config.description, "Summarise");
	assert!(!config.inline_variables);
	assert_eq!(
		config.input_variable("STYLE").and_then(|p| p.default.as_deref()),
		Some("neutral")
	);
	assert_eq!(config.schema, 1);

	Ok(())
}

#[test]
fn config_load_by_extension() -> TemplateResult<()> {
	let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
	writeln!(file, "description = \"From disk\"\n\n[[input_variables]]\nname = \"topic\"")?;

	let config = PromptTemplateConfig::load(file.path())?;
	assert_eq!(config.description, "From disk");
	assert_eq!(config.input_variables[0].name, "topic");

	Ok(())
}

#[rstest]
#[case::bad_json(".json", "{ nope")]
#[case::bad_toml(".toml", "description = ")]
#[case::unknown_extension(".yaml", "description: x")]
fn config_load_failures(#[case] suffix: &str, #[case] content: &str) -> TemplateResult<()> {
	let mut file = tempfile::Builder::new().suffix(suffix).tempfile()?;
	write!(file, "{content}")?;

	let error = PromptTemplateConfig::load(file.path()).unwrap_err();
	assert!(matches!(error, TemplateError::ConfigParse(_)), "{error:?}");

	Ok(())
}
