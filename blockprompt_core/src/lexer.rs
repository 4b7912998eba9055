use logos::Logos;

use crate::ArgValue;
use crate::Block;
use crate::CodeBlock;
use crate::TemplateError;
use crate::TemplateResult;
use crate::VarBlock;
use crate::blocks::VAR_PREFIX;
use crate::code::parse_code_in;

/// Raw tokens produced by logos for flat tokenization of a template. Braces
/// are single-character tokens so that `{{` and `}}` pairs can be matched by
/// looking at the next token.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
enum RawToken {
	#[token("{")]
	BraceOpen,
	#[token("}")]
	BraceClose,
	#[token("'")]
	SingleQuote,
	#[token("\"")]
	DoubleQuote,
	#[token("\\")]
	Backslash,
	#[regex(r"\$[A-Za-z_][A-Za-z0-9_]*")]
	Variable,
	#[token("$")]
	Dollar,
	#[regex(r#"[^{}'"\\$]+"#)]
	Text,
}

/// Context states for the state machine that drives context-dependent token
/// processing.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LexerContext {
	/// The lexer is outside of any code block.
	Outside,
	/// The lexer is inside a `{{ ... }}` code block.
	Block,
	/// The lexer is inside a quoted literal within a code block. Holds the
	/// quote token that closes it.
	Quoted(RawToken),
}

/// Walks the logos token stream with context-dependent rules, building
/// [`Block`]s.
struct TokenWalker<'a> {
	/// The template being tokenized.
	source: &'a str,
	/// The collected raw tokens and their byte spans.
	raw_tokens: Vec<(Result<RawToken, ()>, std::ops::Range<usize>)>,
	/// Current index into `raw_tokens`.
	cursor: usize,
	/// Whether `$name` outside code blocks becomes a variable block.
	inline_variables: bool,
	/// The context stack for the state machine.
	stack: Vec<LexerContext>,
	/// Byte offset where the pending run of plain text starts.
	text_start: usize,
	/// Byte offset of the `{{` that opened the current code block.
	block_start: usize,
	/// Collected blocks.
	blocks: Vec<Block>,
}

impl<'a> TokenWalker<'a> {
	fn new(source: &'a str, inline_variables: bool) -> Self {
		let raw_tokens: Vec<_> = RawToken::lexer(source).spanned().collect();

		Self {
			source,
			raw_tokens,
			cursor: 0,
			inline_variables,
			stack: vec![LexerContext::Outside],
			text_start: 0,
			block_start: 0,
			blocks: vec![],
		}
	}

	fn kind(&self, index: usize) -> Option<RawToken> {
		self.raw_tokens
			.get(index)
			.and_then(|(result, _)| result.ok())
	}

	/// Whether the token after the cursor is `token`.
	fn next_is(&self, token: RawToken) -> bool {
		self.kind(self.cursor + 1) == Some(token)
	}

	/// Push the plain text between `text_start` and `end` as a text block.
	fn push_text(&mut self, end: usize) {
		if end > self.text_start {
			self.blocks
				.push(Block::text(&self.source[self.text_start..end]));
		}
		self.text_start = end;
	}

	/// Handle the `}}` that ends the current block. `end` is the byte offset
	/// just past the closing delimiter.
	fn close_block(&mut self, close_start: usize, end: usize) -> TemplateResult<()> {
		let source = self.source;
		let interior_start = self.block_start + 2;
		let interior = &source[interior_start..close_start];
		let trimmed = interior.trim();

		self.push_text(self.block_start);
		self.stack = vec![LexerContext::Outside];

		if trimmed.is_empty() {
			// `{{ }}` holds nothing to evaluate and is kept as text.
			self.push_text(end);
			return Ok(());
		}

		let trimmed_start = interior_start + (interior.len() - interior.trim_start().len());
		let range = trimmed_start..trimmed_start + trimmed.len();
		let expression = parse_code_in(source, range)?;

		let block = match (expression.function.is_some(), &expression.positional) {
			(false, Some(ArgValue::Variable(block))) => Block::Variable(block.clone()),
			(false, Some(ArgValue::Value(block))) => Block::Value(block.clone()),
			_ => Block::Code(CodeBlock::new(trimmed, expression)),
		};

		self.blocks.push(block);
		self.text_start = end;

		Ok(())
	}

	/// Main processing loop: walk the raw token stream with context-dependent
	/// rules.
	fn process(&mut self) -> TemplateResult<()> {
		while self.cursor < self.raw_tokens.len() {
			let (result, span) = self.raw_tokens[self.cursor].clone();

			// Every byte is covered by a token so this only guards against
			// future grammar changes.
			let Ok(raw) = result else {
				self.cursor += 1;
				continue;
			};

			match self.stack.last().copied() {
				Some(LexerContext::Outside) => {
					match raw {
						RawToken::BraceOpen if self.next_is(RawToken::BraceOpen) => {
							self.block_start = span.start;
							self.stack.push(LexerContext::Block);
						}
						RawToken::Variable if self.inline_variables => {
							self.push_text(span.start);
							let name = &self.source[span.start + VAR_PREFIX.len_utf8()..span.end];
							self.blocks.push(Block::Variable(VarBlock::new(name)));
							self.text_start = span.end;
						}
						_ => {}
					}
					self.cursor += 1;
				}
				Some(LexerContext::Block) => {
					match raw {
						// A fresh `{{` restarts the block: `{{ {{x}}` is the text
						// `{{ ` followed by the block `x`.
						RawToken::BraceOpen if self.next_is(RawToken::BraceOpen) => {
							self.block_start = span.start;
							self.cursor += 1;
						}
						RawToken::BraceClose if self.next_is(RawToken::BraceClose) => {
							let end = self.raw_tokens[self.cursor + 1].1.end;
							self.close_block(span.start, end)?;
							self.cursor += 2;
						}
						RawToken::SingleQuote | RawToken::DoubleQuote => {
							self.stack.push(LexerContext::Quoted(raw));
							self.cursor += 1;
						}
						_ => self.cursor += 1,
					}
				}
				Some(LexerContext::Quoted(quote)) => {
					match raw {
						RawToken::Backslash
							if matches!(
								self.kind(self.cursor + 1),
								Some(RawToken::SingleQuote | RawToken::DoubleQuote | RawToken::Backslash)
							) =>
						{
							self.cursor += 2;
						}
						_ if raw == quote => {
							self.stack.pop();
							self.cursor += 1;
						}
						_ => self.cursor += 1,
					}
				}
				None => break,
			}
		}

		self.finish()
	}

	fn finish(&mut self) -> TemplateResult<()> {
		let span = self.block_start..self.source.len();

		match self.stack.last() {
			Some(LexerContext::Block) => {
				Err(TemplateError::syntax(
					"Code block is missing its closing `}}`",
					self.source,
					span,
				))
			}
			Some(LexerContext::Quoted(_)) => {
				Err(TemplateError::syntax(
					"Code block contains a quoted value that is never closed",
					self.source,
					span,
				))
			}
			_ => {
				self.push_text(self.source.len());
				Ok(())
			}
		}
	}
}

/// Split `template` into an ordered list of blocks.
pub fn tokenize(template: &str, inline_variables: bool) -> TemplateResult<Vec<Block>> {
	let mut walker = TokenWalker::new(template, inline_variables);
	walker.process()?;
	Ok(walker.blocks)
}
