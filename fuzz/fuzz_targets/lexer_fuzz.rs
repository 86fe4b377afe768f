//! Fuzz test for the slash-command lexer
//!
//! Feeds arbitrary byte sequences to the lexer to find:
//! - Panics or crashes
//! - Infinite loops
//! - Memory safety issues
//!
//! Run with: cargo +nightly fuzz run lexer_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use switchboard_command::lexer::{Lexer, TokenKind};

fuzz_target!(|data: &[u8]| {
    // The lexer should handle any valid UTF-8 string without panicking;
    // unscannable input becomes Error tokens, never a crash
    if let Ok(input) = std::str::from_utf8(data) {
        let tokens = Lexer::new(input).tokenize();

        // Basic invariants that should always hold:
        // 1. We should always get at least one token (Eof)
        assert!(!tokens.is_empty(), "Tokenization should produce at least Eof");

        // 2. The last token should always be Eof
        assert_eq!(
            tokens.last().unwrap().kind,
            TokenKind::Eof,
            "Last token should always be Eof"
        );

        // 3. Span positions should be valid
        for token in &tokens {
            assert!(token.span.start <= token.span.end, "Span start should be <= end");
            assert!(token.span.end <= input.len(), "Span should stay inside the input");
            assert!(token.span.line >= 1, "Line numbers should be >= 1");
            assert!(token.span.column >= 1, "Column numbers should be >= 1");
        }
    }
});
