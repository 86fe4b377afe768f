//! Slash-command grammar, catalog, and dispatch for Switchboard.
//!
//! A turn that starts with `/` goes through this crate end to end:
//!
//! 1. [`parse_command`] lexes and parses the raw text into a
//!    [`ParsedCommand`](switchboard_core::ParsedCommand), rejecting
//!    malformed input with structured errors instead of panics.
//! 2. [`CommandCatalog`] resolves the target integration and its
//!    metadata (parameters, auth, discovery spec).
//! 3. [`CommandDispatcher`] executes it through a [`CommandGateway`]
//!    under a fixed time budget, running one discovery search when a
//!    lookup misses, and always returning a [`DispatchReport`] rather
//!    than an error.

pub mod catalog;
pub mod dispatch;
pub mod gateway;
pub mod lexer;
pub mod parser;

pub use catalog::{CatalogEntry, CommandCatalog, DiscoverySpec, ParamSpec};
pub use dispatch::{CommandDispatcher, DispatchOutcome, DispatchReport, DispatcherConfig};
pub use gateway::{
    CommandGateway, CommandInvocation, CommandOutcome, HttpCommandGateway, LocalCommandGateway,
};
pub use parser::{is_slash_command, parse_command};
