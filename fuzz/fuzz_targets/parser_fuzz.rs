//! Fuzz test for the slash-command parser
//!
//! Feeds arbitrary byte sequences to the parser to find:
//! - Panics or crashes
//! - Infinite loops
//! - Memory safety issues
//!
//! Run with: cargo +nightly fuzz run parser_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use switchboard_command::{is_slash_command, parse_command};

fuzz_target!(|data: &[u8]| {
    // The parser should handle any valid UTF-8 string without panicking
    if let Ok(input) = std::str::from_utf8(data) {
        match parse_command(input) {
            Ok(command) => {
                // A successful parse only comes from slash-command input
                // and always carries a server and a command name
                assert!(is_slash_command(input), "Parsed input should look like a command");
                assert!(!command.server_id.is_empty(), "Server id should not be empty");
                assert!(!command.command.is_empty(), "Command name should not be empty");
            }
            Err(err) => {
                // Failures must explain themselves
                assert!(!err.to_string().is_empty(), "Error message should not be empty");
            }
        }
    }
});
