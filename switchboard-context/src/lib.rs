//! Document context for Switchboard turns.
//!
//! Three pieces: a retrieval client for chunk search, a job store plus the
//! stage tracker that owns lifecycle writes, and the injector that turns
//! both into a prompt block (or a short-circuit) for one turn.

pub mod injector;
pub mod jobs;
pub mod retrieval;

pub use injector::{
    is_bare_greeting, still_processing_message, ContextInjector, InjectedContext,
    InjectionOutcome, InjectorConfig,
};
pub use jobs::{HttpJobStore, InMemoryJobStore, JobStageTracker, JobStore};
pub use retrieval::{
    HttpRetrievalService, InMemoryRetrievalService, RetrievalRequest, RetrievalResult,
    RetrievalService,
};

/// Truncate to a maximum number of characters on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 200), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("héllo", 2), "hé");
    }
}
