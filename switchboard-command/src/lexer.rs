//! Lexer for the slash-command grammar.
//!
//! Splits raw input such as `/email-mcp send_test_email subject="Weekly
//! Report"` into spanned tokens. The lexer never panics on malformed
//! input; anything it cannot scan becomes a [`TokenKind::Error`] token
//! and the parser turns that into a structured parse failure.

use std::iter::Peekable;
use std::str::CharIndices;

// ============================================================================
// Tokens
// ============================================================================

/// Byte range and position of a token in the original input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Leading `/` that introduces a command.
    Slash,
    /// Bare word: server id, command name, argument key, or positional.
    Word(String),
    /// `=` separating an argument key from its value.
    Eq,
    /// Quoted value with quotes stripped and escapes resolved.
    Quoted(String),
    /// Scan failure with a human-readable reason.
    Error(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

// ============================================================================
// Lexer
// ============================================================================

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
    /// Set after an `=` so the next scan treats everything up to the next
    /// whitespace as a single bare value, including `=` and quote characters
    /// that appear mid-run.
    value_mode: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
            value_mode: false,
        }
    }

    /// Scan the entire input. The returned vector always ends with an
    /// `Eof` token.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let (start, line, column) = (self.offset(), self.line, self.column);
        let Some(&(_, c)) = self.chars.peek() else {
            return self.token(TokenKind::Eof, start, line, column);
        };

        if self.value_mode {
            self.value_mode = false;
            return match c {
                '"' => self.scan_double_quoted(start, line, column),
                '\'' => self.scan_single_quoted(start, line, column),
                _ => self.scan_bare_value(start, line, column),
            };
        }

        match c {
            '/' if start == 0 => {
                self.advance();
                self.token(TokenKind::Slash, start, line, column)
            }
            '=' => {
                self.advance();
                self.value_mode = true;
                self.token(TokenKind::Eq, start, line, column)
            }
            '"' => self.scan_double_quoted(start, line, column),
            '\'' => self.scan_single_quoted(start, line, column),
            _ => self.scan_word(start, line, column),
        }
    }

    /// Bare word outside of value position. Stops at whitespace, `=`, or a
    /// quote character so that `key="v"` splits into three tokens.
    fn scan_word(&mut self, start: usize, line: usize, column: usize) -> Token {
        let mut word = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() || c == '=' || c == '"' || c == '\'' {
                break;
            }
            word.push(c);
            self.advance();
        }
        self.token(TokenKind::Word(word), start, line, column)
    }

    /// Bare value after `=`: a maximal run of non-whitespace characters,
    /// taken verbatim. URLs with embedded `=` stay intact here.
    fn scan_bare_value(&mut self, start: usize, line: usize, column: usize) -> Token {
        let mut value = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                break;
            }
            value.push(c);
            self.advance();
        }
        self.token(TokenKind::Word(value), start, line, column)
    }

    /// Double-quoted value with backslash escapes.
    fn scan_double_quoted(&mut self, start: usize, line: usize, column: usize) -> Token {
        self.advance(); // opening quote
        let mut value = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            match c {
                '"' => {
                    self.advance();
                    return self.token(TokenKind::Quoted(value), start, line, column);
                }
                '\\' => {
                    self.advance();
                    match self.chars.peek().map(|&(_, e)| e) {
                        Some('n') => {
                            value.push('\n');
                            self.advance();
                        }
                        Some('t') => {
                            value.push('\t');
                            self.advance();
                        }
                        Some('r') => {
                            value.push('\r');
                            self.advance();
                        }
                        Some('\\') => {
                            value.push('\\');
                            self.advance();
                        }
                        Some('"') => {
                            value.push('"');
                            self.advance();
                        }
                        Some(other) => {
                            // Unknown escape: keep both characters.
                            value.push('\\');
                            value.push(other);
                            self.advance();
                        }
                        None => break,
                    }
                }
                _ => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        self.token(
            TokenKind::Error("unterminated double-quoted value".to_string()),
            start,
            line,
            column,
        )
    }

    /// Single-quoted value, taken verbatim with no escape processing.
    fn scan_single_quoted(&mut self, start: usize, line: usize, column: usize) -> Token {
        self.advance(); // opening quote
        let mut value = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '\'' {
                self.advance();
                return self.token(TokenKind::Quoted(value), start, line, column);
            }
            value.push(c);
            self.advance();
        }
        self.token(
            TokenKind::Error("unterminated single-quoted value".to_string()),
            start,
            line,
            column,
        )
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn advance(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|&(i, _)| i)
            .unwrap_or(self.source.len())
    }

    fn token(&mut self, kind: TokenKind, start: usize, line: usize, column: usize) -> Token {
        Token {
            kind,
            span: Span {
                start,
                end: self.offset(),
                line,
                column,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The lexer terminates with Eof on arbitrary input and never
        /// panics.
        #[test]
        fn lexing_always_terminates(input in ".{0,200}") {
            let tokens = Lexer::new(&input).tokenize();
            prop_assert!(!tokens.is_empty());
            prop_assert_eq!(&tokens.last().unwrap().kind, &TokenKind::Eof);
        }

        /// Quoted values survive the round trip through the lexer.
        #[test]
        fn quoted_values_round_trip(value in "[a-zA-Z0-9 .,!?-]{0,40}") {
            let input = format!("/srv cmd key=\"{value}\"");
            let tokens = Lexer::new(&input).tokenize();
            let quoted = tokens.iter().find_map(|t| match &t.kind {
                TokenKind::Quoted(v) => Some(v.clone()),
                _ => None,
            });
            prop_assert_eq!(quoted, Some(value));
        }
    }
}
