//! Runtime configuration for the orchestration core.

use serde::{Deserialize, Serialize};

/// Retry policy for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff sleep
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Configuration shared by the router, dispatcher, and workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    /// Bound on token-embedded permission cache entries (LRU beyond this)
    #[serde(default = "default_permission_cache_max_entries")]
    pub permission_cache_max_entries: usize,
    /// Bound on concurrently executing workflow steps
    #[serde(default = "default_max_in_flight_steps")]
    pub max_in_flight_steps: usize,
    /// Bound on workflow nesting depth (top-level run is depth 1)
    #[serde(default = "default_max_workflow_depth")]
    pub max_workflow_depth: u32,
    /// Input/output snapshots larger than this are stored truncated
    #[serde(default = "default_snapshot_max_bytes")]
    pub snapshot_max_bytes: usize,
    /// Bearer token lifetime in seconds
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: i64,
}

fn default_permission_cache_max_entries() -> usize {
    32
}

fn default_max_in_flight_steps() -> usize {
    8
}

fn default_max_workflow_depth() -> u32 {
    3
}

fn default_snapshot_max_bytes() -> usize {
    16 * 1024
}

fn default_token_ttl_secs() -> i64 {
    3_600
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            permission_cache_max_entries: default_permission_cache_max_entries(),
            max_in_flight_steps: default_max_in_flight_steps(),
            max_workflow_depth: default_max_workflow_depth(),
            snapshot_max_bytes: default_snapshot_max_bytes(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.permission_cache_max_entries, 32);
        assert_eq!(config.max_in_flight_steps, 8);
        assert_eq!(config.max_workflow_depth, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: CoreConfig = toml::from_str("permission_cache_max_entries = 4").unwrap();
        assert_eq!(config.permission_cache_max_entries, 4);
        assert_eq!(config.max_in_flight_steps, 8);
        assert_eq!(config.retry.base_delay_ms, 50);
    }
}
