use std::ops::Range;

use logos::Logos;

use crate::ArgValue;
use crate::CodeExpression;
use crate::FunctionIdBlock;
use crate::NamedArgBlock;
use crate::TemplateError;
use crate::TemplateResult;
use crate::ValBlock;
use crate::VarBlock;
use crate::blocks::NAMED_ARG_SEPARATOR;
use crate::blocks::PLUGIN_SEPARATOR;
use crate::blocks::VAR_PREFIX;
use crate::blocks::is_valid_name;

/// Raw tokens for the interior of a `{{ ... }}` block.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
enum RawToken {
	#[regex(r"[ \t\r\n]+")]
	Whitespace,
	#[token("=")]
	Equals,
	#[regex(r"'([^'\\]|\\.)*'")]
	SingleQuoted,
	#[regex(r#""([^"\\]|\\.)*""#)]
	DoubleQuoted,
	#[regex(r#"\$[^ \t\r\n='"]*"#)]
	Variable,
	#[regex(r#"[^ \t\r\n='"$]+"#)]
	Word,
}

/// One whitespace-separated unit of a code expression.
enum Atom {
	Word(String),
	Value(ValBlock),
	Variable(VarBlock),
	NamedArg(NamedArgBlock),
}

/// Walks the raw token stream of a code block and groups the tokens into
/// atoms. Spans are byte offsets into the full template so errors can point
/// at the offending construct.
struct CodeWalker<'a> {
	/// The full template the code block belongs to.
	template: &'a str,
	/// Byte offset of the code block interior within `template`.
	offset: usize,
	/// The collected raw tokens with spans relative to the interior.
	raw_tokens: Vec<(Result<RawToken, ()>, Range<usize>)>,
	/// Current index into `raw_tokens`.
	cursor: usize,
	atoms: Vec<(Atom, Range<usize>)>,
}

impl<'a> CodeWalker<'a> {
	fn new(template: &'a str, range: Range<usize>) -> Self {
		let raw_tokens = RawToken::lexer(&template[range.clone()]).spanned().collect();

		Self {
			template,
			offset: range.start,
			raw_tokens,
			cursor: 0,
			atoms: vec![],
		}
	}

	fn slice(&self, index: usize) -> &'a str {
		let (_, span) = &self.raw_tokens[index];
		&self.template[self.offset + span.start..self.offset + span.end]
	}

	/// The span of the raw token at `index` within the full template.
	fn span(&self, index: usize) -> Range<usize> {
		let (_, span) = &self.raw_tokens[index];
		self.offset + span.start..self.offset + span.end
	}

	fn kind(&self, index: usize) -> Option<Result<RawToken, ()>> {
		self.raw_tokens.get(index).map(|(result, _)| *result)
	}

	fn error(&self, message: impl Into<String>, span: Range<usize>) -> TemplateError {
		TemplateError::syntax(message, self.template, span)
	}

	/// Index of the first non-whitespace token at or after `index`.
	fn skip_whitespace(&self, mut index: usize) -> usize {
		while let Some(Ok(RawToken::Whitespace)) = self.kind(index) {
			index += 1;
		}
		index
	}

	fn process(&mut self) -> TemplateResult<()> {
		let mut separated = true;

		while self.cursor < self.raw_tokens.len() {
			let start = self.cursor;
			let Some(Ok(raw)) = self.kind(start) else {
				return Err(self.unexpected_character(start));
			};

			let atom = match raw {
				RawToken::Whitespace => {
					separated = true;
					self.cursor += 1;
					continue;
				}
				RawToken::Equals => {
					return Err(self.error("A named argument must have a name", self.span(start)));
				}
				RawToken::SingleQuoted | RawToken::DoubleQuoted => {
					self.cursor += 1;
					Atom::Value(ValBlock::from_literal(self.slice(start)))
				}
				RawToken::Variable => {
					self.cursor += 1;
					Atom::Variable(self.variable(start)?)
				}
				RawToken::Word => {
					let next = self.skip_whitespace(start + 1);
					if let Some(Ok(RawToken::Equals)) = self.kind(next) {
						Atom::NamedArg(self.named_arg(start, next)?)
					} else {
						self.cursor += 1;
						Atom::Word(self.slice(start).to_string())
					}
				}
			};

			let span = self.span(start).start..self.span(self.cursor - 1).end;
			if !separated {
				return Err(self.error("Tokens must be separated by at least one space", span));
			}

			self.atoms.push((atom, span));
			separated = false;
		}

		Ok(())
	}

	fn variable(&self, index: usize) -> TemplateResult<VarBlock> {
		let name = &self.slice(index)[VAR_PREFIX.len_utf8()..];

		if name.is_empty() {
			return Err(self.error("The variable name is empty", self.span(index)));
		}

		if !is_valid_name(name) {
			return Err(self.error(
				format!(
					"The variable name '{name}' contains invalid characters. Only alphanumeric \
					 chars and underscore are allowed."
				),
				self.span(index),
			));
		}

		Ok(VarBlock::new(name))
	}

	/// Parse `name = value` where `name` is the word at `name_index` and the
	/// separator is at `equals_index`. Leaves the cursor after the value.
	fn named_arg(&mut self, name_index: usize, equals_index: usize) -> TemplateResult<NamedArgBlock> {
		let name = self.slice(name_index);

		if !is_valid_name(name) {
			return Err(self.error(
				format!(
					"The argument name '{name}' contains invalid characters. Only alphanumeric \
					 chars and underscore are allowed."
				),
				self.span(name_index),
			));
		}

		let value_index = self.skip_whitespace(equals_index + 1);
		let value = match self.kind(value_index) {
			Some(Ok(RawToken::SingleQuoted | RawToken::DoubleQuoted)) => {
				ArgValue::Value(ValBlock::from_literal(self.slice(value_index)))
			}
			Some(Ok(RawToken::Variable)) => ArgValue::Variable(self.variable(value_index)?),
			Some(Ok(RawToken::Word | RawToken::Equals)) => {
				return Err(self.error(
					format!("Named argument values need to be prefixed with a quote or {VAR_PREFIX}."),
					self.span(value_index),
				));
			}
			Some(Err(())) => return Err(self.unexpected_character(value_index)),
			Some(Ok(RawToken::Whitespace)) | None => {
				return Err(self.error(
					format!(
						"A function named argument must contain a quoted value or variable after \
						 the '{NAMED_ARG_SEPARATOR}' character."
					),
					self.span(equals_index),
				));
			}
		};

		self.cursor = value_index + 1;
		Ok(NamedArgBlock::new(name, value))
	}

	/// Logos only fails on a quote that is never closed.
	fn unexpected_character(&self, index: usize) -> TemplateError {
		let span = self.span(index);
		let rest = span.start..self.offset + self.raw_tokens.last().map_or(0, |(_, s)| s.end);

		if self.slice(index).starts_with(['\'', '"']) {
			self.error(
				"A value must have single quotes or double quotes on both sides",
				rest,
			)
		} else {
			self.error(
				format!("Unexpected character `{}` in code block", self.slice(index)),
				span,
			)
		}
	}

	/// Validate the atoms against the code block grammar.
	fn into_expression(self) -> TemplateResult<CodeExpression> {
		let mut expression = CodeExpression::default();
		let mut atoms = self.atoms.into_iter();

		let Some((first, first_span)) = atoms.next() else {
			return Ok(expression);
		};

		match first {
			Atom::NamedArg(_) => {
				return Err(TemplateError::syntax(
					"Unexpected named argument found. Expected function name first.",
					self.template,
					first_span,
				));
			}
			Atom::Variable(block) => {
				if let Some((_, span)) = atoms.next() {
					return Err(TemplateError::syntax(
						format!(
							"Invalid token detected after the variable: {}",
							block.content()
						),
						self.template,
						span,
					));
				}
				expression.positional = Some(ArgValue::Variable(block));
				return Ok(expression);
			}
			Atom::Value(block) => {
				if let Some((_, span)) = atoms.next() {
					return Err(TemplateError::syntax(
						format!("Invalid token detected after the value: {}", block.content()),
						self.template,
						span,
					));
				}
				expression.positional = Some(ArgValue::Value(block));
				return Ok(expression);
			}
			Atom::Word(word) => {
				expression.function = Some(function_id(self.template, &word, first_span)?);
			}
		}

		for (index, (atom, span)) in atoms.enumerate() {
			let position = index + 1;

			match atom {
				Atom::NamedArg(block) => expression.named.push(block),
				Atom::Variable(block) if position == 1 => {
					expression.positional = Some(ArgValue::Variable(block));
				}
				Atom::Value(block) if position == 1 => {
					expression.positional = Some(ArgValue::Value(block));
				}
				Atom::Variable(_) | Atom::Value(_) => {
					return Err(TemplateError::syntax(
						format!(
							"Functions only support named arguments after the first argument. \
							 Argument {position} is not named."
						),
						self.template,
						span,
					));
				}
				Atom::Word(word) => {
					return Err(TemplateError::syntax(
						format!(
							"A function named argument must contain a name and value separated by \
							 a '{NAMED_ARG_SEPARATOR}' character: `{word}`"
						),
						self.template,
						span,
					));
				}
			}
		}

		Ok(expression)
	}
}

fn function_id(template: &str, word: &str, span: Range<usize>) -> TemplateResult<FunctionIdBlock> {
	if word.matches(PLUGIN_SEPARATOR).count() > 1 {
		return Err(TemplateError::syntax(
			format!(
				"A function name can contain at most one dot separating the plugin name from the \
				 function name: `{word}`"
			),
			template,
			span,
		));
	}

	if !word.split(PLUGIN_SEPARATOR).all(is_valid_name) {
		return Err(TemplateError::syntax(
			format!(
				"The function identifier '{word}' contains invalid characters. Only alphanumeric \
				 chars, underscore and a single dot between the plugin and function name are \
				 allowed."
			),
			template,
			span,
		));
	}

	Ok(FunctionIdBlock::new(word))
}

/// Parse the interior of a code block (the text between `{{` and `}}`).
///
/// The first token names the function, an optional second unnamed token is
/// the positional argument, and every remaining token must be a
/// `name='literal'` or `name=$variable` pair. A lone variable or literal with
/// no function is also accepted.
pub fn parse_code(interior: &str) -> TemplateResult<CodeExpression> {
	parse_code_in(interior, 0..interior.len())
}

/// Parse the code block interior found at `range` within `template`.
pub(crate) fn parse_code_in(template: &str, range: Range<usize>) -> TemplateResult<CodeExpression> {
	let mut walker = CodeWalker::new(template, range);
	walker.process()?;
	walker.into_expression()
}
