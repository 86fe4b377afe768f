//! Parser turning lexed tokens into a [`ParsedCommand`].
//!
//! Malformed input is reported as a structured [`CommandError`] with the
//! byte offset of the failure; the parser never panics. Offsets are
//! relative to the trimmed input.

use switchboard_core::{CommandError, ParsedCommand};

use crate::lexer::{Lexer, Token, TokenKind};

/// True when the message should be treated as a slash command at all.
/// Anything else goes through the normal conversational path.
pub fn is_slash_command(input: &str) -> bool {
    input.trim_start().starts_with('/')
}

/// Parse `/serverId command key=value ... positional ...` into its parts.
///
/// Named arguments may be bare (`to=ops@example.com`), double-quoted with
/// backslash escapes, or single-quoted verbatim. Bare tokens without a
/// `key=` prefix become positional arguments in input order. A repeated
/// key keeps the last value.
pub fn parse_command(input: &str) -> Result<ParsedCommand, CommandError> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return Err(CommandError::NotSlashCommand);
    }

    let tokens = Lexer::new(trimmed).tokenize();
    let mut cursor = tokens.iter().peekable();

    // Leading slash is guaranteed by the check above.
    match cursor.next() {
        Some(Token {
            kind: TokenKind::Slash,
            ..
        }) => {}
        other => return Err(malformed(other, "expected '/'")),
    }

    let server_id = match cursor.next() {
        Some(Token {
            kind: TokenKind::Word(word),
            ..
        }) => word.clone(),
        other => return Err(malformed(other, "expected server id after '/'")),
    };

    let command = match cursor.next() {
        Some(Token {
            kind: TokenKind::Word(word),
            ..
        }) => word.clone(),
        other => return Err(malformed(other, "expected command name")),
    };

    let mut parsed = ParsedCommand::new(server_id, command);

    while let Some(token) = cursor.next() {
        match &token.kind {
            TokenKind::Word(word) => {
                let is_assignment = matches!(
                    cursor.peek(),
                    Some(Token {
                        kind: TokenKind::Eq,
                        ..
                    })
                );
                if is_assignment {
                    let eq = cursor.next();
                    let value = match cursor.next() {
                        Some(Token {
                            kind: TokenKind::Word(value),
                            ..
                        }) => value.clone(),
                        Some(Token {
                            kind: TokenKind::Quoted(value),
                            ..
                        }) => value.clone(),
                        Some(Token {
                            kind: TokenKind::Error(reason),
                            span,
                        }) => {
                            return Err(CommandError::Malformed {
                                offset: span.start,
                                reason: reason.clone(),
                            })
                        }
                        other => {
                            return Err(malformed(
                                other.or(eq),
                                &format!("expected value after '{word}='"),
                            ))
                        }
                    };
                    parsed.args.insert(word.clone(), value);
                } else {
                    parsed.positional_args.push(word.clone());
                }
            }
            TokenKind::Quoted(value) => {
                parsed.positional_args.push(value.clone());
            }
            TokenKind::Eq => {
                return Err(CommandError::Malformed {
                    offset: token.span.start,
                    reason: "'=' without an argument key".to_string(),
                });
            }
            TokenKind::Error(reason) => {
                return Err(CommandError::Malformed {
                    offset: token.span.start,
                    reason: reason.clone(),
                });
            }
            TokenKind::Slash => {
                return Err(CommandError::Malformed {
                    offset: token.span.start,
                    reason: "unexpected '/'".to_string(),
                });
            }
            TokenKind::Eof => break,
        }
    }

    Ok(parsed)
}

fn malformed(token: Option<&Token>, reason: &str) -> CommandError {
    CommandError::Malformed {
        offset: token.map(|t| t.span.start).unwrap_or(0),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
