//! OpenAI Chat Completions provider

mod client;
mod types;

pub use client::OpenAiProvider;
