//! Engine configuration

use crate::error::{ConfigError, SwitchboardError, SwitchboardResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time budgets, caps, and tuning knobs for one turn of execution.
///
/// Defaults carry the production budgets; `from_env` overrides individual
/// fields for deployment tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Budget for one command-gateway call.
    pub command_timeout: Duration,
    /// Budget for one retrieval or job-store call.
    pub retrieval_timeout: Duration,
    /// Budget for establishing a model-provider stream.
    pub provider_connect_timeout: Duration,
    /// Hard ceiling for the whole streamed exchange.
    pub request_deadline: Duration,
    /// Quiet period after which a synthetic progress record is emitted.
    pub progress_interval: Duration,
    /// Maximum handoff turns per request.
    pub max_turns: u32,
    /// Maximum chunks requested from the retrieval collaborator.
    pub retrieval_limit: usize,
    /// Minimum similarity for vector-mode chunks.
    pub similarity_threshold: f32,
    /// Minimum query length for vector-mode retrieval.
    pub vector_query_min_chars: usize,
    /// Buffer size of the event and transport channels.
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            retrieval_timeout: Duration::from_secs(30),
            provider_connect_timeout: Duration::from_secs(60),
            request_deadline: Duration::from_secs(300),
            progress_interval: Duration::from_secs(10),
            max_turns: 20,
            retrieval_limit: 6,
            similarity_threshold: 0.35,
            vector_query_min_chars: 10,
            channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `SWITCHBOARD_COMMAND_TIMEOUT_SECS` (default: 30)
    /// - `SWITCHBOARD_RETRIEVAL_TIMEOUT_SECS` (default: 30)
    /// - `SWITCHBOARD_PROVIDER_CONNECT_TIMEOUT_SECS` (default: 60)
    /// - `SWITCHBOARD_REQUEST_DEADLINE_SECS` (default: 300)
    /// - `SWITCHBOARD_PROGRESS_INTERVAL_SECS` (default: 10)
    /// - `SWITCHBOARD_MAX_TURNS` (default: 20)
    /// - `SWITCHBOARD_RETRIEVAL_LIMIT` (default: 6)
    /// - `SWITCHBOARD_SIMILARITY_THRESHOLD` (default: 0.35)
    /// - `SWITCHBOARD_VECTOR_QUERY_MIN_CHARS` (default: 10)
    /// - `SWITCHBOARD_CHANNEL_CAPACITY` (default: 256)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            command_timeout: env_secs("SWITCHBOARD_COMMAND_TIMEOUT_SECS")
                .unwrap_or(defaults.command_timeout),
            retrieval_timeout: env_secs("SWITCHBOARD_RETRIEVAL_TIMEOUT_SECS")
                .unwrap_or(defaults.retrieval_timeout),
            provider_connect_timeout: env_secs("SWITCHBOARD_PROVIDER_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.provider_connect_timeout),
            request_deadline: env_secs("SWITCHBOARD_REQUEST_DEADLINE_SECS")
                .unwrap_or(defaults.request_deadline),
            progress_interval: env_secs("SWITCHBOARD_PROGRESS_INTERVAL_SECS")
                .unwrap_or(defaults.progress_interval),
            max_turns: env_parse("SWITCHBOARD_MAX_TURNS").unwrap_or(defaults.max_turns),
            retrieval_limit: env_parse("SWITCHBOARD_RETRIEVAL_LIMIT")
                .unwrap_or(defaults.retrieval_limit),
            similarity_threshold: env_parse("SWITCHBOARD_SIMILARITY_THRESHOLD")
                .unwrap_or(defaults.similarity_threshold),
            vector_query_min_chars: env_parse("SWITCHBOARD_VECTOR_QUERY_MIN_CHARS")
                .unwrap_or(defaults.vector_query_min_chars),
            channel_capacity: env_parse("SWITCHBOARD_CHANNEL_CAPACITY")
                .unwrap_or(defaults.channel_capacity),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SwitchboardResult<()> {
        if self.command_timeout.is_zero() {
            return Err(invalid("command_timeout", "0", "must be positive"));
        }
        if self.retrieval_timeout.is_zero() {
            return Err(invalid("retrieval_timeout", "0", "must be positive"));
        }
        if self.provider_connect_timeout.is_zero() {
            return Err(invalid("provider_connect_timeout", "0", "must be positive"));
        }
        if self.request_deadline < self.provider_connect_timeout {
            return Err(invalid(
                "request_deadline",
                &format!("{:?}", self.request_deadline),
                "must be at least the provider connect timeout",
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(invalid("progress_interval", "0", "must be positive"));
        }
        if self.max_turns == 0 {
            return Err(invalid("max_turns", "0", "must be at least 1"));
        }
        if self.retrieval_limit == 0 {
            return Err(invalid("retrieval_limit", "0", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(invalid(
                "similarity_threshold",
                &self.similarity_threshold.to_string(),
                "must be between 0.0 and 1.0",
            ));
        }
        if self.vector_query_min_chars == 0 {
            return Err(invalid("vector_query_min_chars", "0", "must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> SwitchboardError {
    SwitchboardError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_budgets() {
        let config = EngineConfig::default();
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.retrieval_timeout, Duration::from_secs(30));
        assert_eq!(config.provider_connect_timeout, Duration::from_secs(60));
        assert_eq!(config.request_deadline, Duration::from_secs(300));
        assert_eq!(config.progress_interval, Duration::from_secs(10));
        assert_eq!(config.max_turns, 20);
    }

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_max_turns() {
        let config = EngineConfig {
            max_turns: 0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            SwitchboardError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "max_turns"
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let config = EngineConfig {
            similarity_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_deadline_below_connect_timeout() {
        let config = EngineConfig {
            request_deadline: Duration::from_secs(10),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
