use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Period of the async driver.
    pub tick_interval_ms: u64,
    /// Ticks after which a run that has not settled is abandoned.
    pub max_ticks: usize,
    /// Record one trace entry per executed input set.
    pub record_traces: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            max_ticks: 10_000,
            record_traces: true,
        }
    }
}

impl SessionConfig {
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = SessionConfig::from_json(r#"{"tick_interval_ms": 5}"#).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(5));
        assert_eq!(config.max_ticks, 10_000);
        assert!(config.record_traces);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(SessionConfig::from_json(r#"{"max_ticks": "many"}"#).is_err());
    }
}
