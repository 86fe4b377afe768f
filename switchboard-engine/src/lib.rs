//! Switchboard Engine - one conversational turn, end to end.
//!
//! The pipeline validates the request, classifies the latest user query,
//! injects document context, then drives one of two execution strategies:
//! the multi-turn agent runner from `switchboard-agents`, or the
//! single-call direct strategy defined here. Whichever strategy runs, its
//! events flow through the normalizer onto one transport of content and
//! log records closed by a single sentinel.
//!
//! Strategy selection is invisible to the caller: the agent runner goes
//! first, and graph failures, unsupported capabilities, or an empty run
//! fall back to the direct call within the same response.

pub mod classifier;
pub mod direct;
pub mod normalizer;
pub mod pipeline;
pub mod selector;

pub use classifier::classify_query;
pub use direct::{DirectCallStrategy, DirectSummary, DIRECT_CALL_AGENT};
pub use normalizer::{EventNormalizer, NormalizerOutcome};
pub use pipeline::{TurnEngine, TurnRequest, MAX_QUERY_CHARS};
pub use selector::{StrategyKind, TurnOutcome, TurnStrategies};
