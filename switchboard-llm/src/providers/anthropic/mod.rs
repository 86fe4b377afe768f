//! Anthropic Messages API provider

mod client;
mod types;

pub use client::AnthropicProvider;
