//! Optimizer configuration
//!
//! Process-wide defaults for safe mode, query splitting, caching and
//! statement timeouts. Individual queries can override most of these through
//! the fluent builder.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::decode::OutputFormat;
use crate::error::ConfigError;

/// Default values shared by `Default` and `from_env`
pub struct OptimizerDefaults;

impl OptimizerDefaults {
    pub const SAFE_MODE: bool = true;
    pub const MAX_RELATIONS_PER_QUERY: usize = 0;
    pub const COMPLEXITY_WARNING_THRESHOLD: usize = 8;
    pub const DEBUG: bool = false;
    pub const LOG_QUERIES: bool = false;
    pub const CACHE_ENABLED: bool = true;
    pub const CACHE_PREFIX: &'static str = "optimized_queries";
}

/// What to do when a follow-up batch of a split plan fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitFailurePolicy {
    /// Log and leave the batch's relations absent from the affected rows
    Skip,
    /// Fail the whole query
    Fail,
}

/// Configuration for the query optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Retry failed optimized queries with per-relation loading
    pub safe_mode: bool,
    /// Split relations into batches of this size (0 = never split)
    pub max_relations_per_query: usize,
    /// Warn in debug mode when a statement carries more subqueries than this
    pub complexity_warning_threshold: usize,
    /// Enable advisory diagnostics
    pub debug: bool,
    /// Log every compiled statement at debug level
    pub log_queries: bool,
    /// Master switch for both cache tiers
    pub cache_enabled: bool,
    /// TTL applied when a query enables caching without one
    pub default_cache_ttl: Option<Duration>,
    /// Prefix of every derived cache key
    pub cache_prefix: String,
    /// Output shape used by `fetch`
    pub default_format: OutputFormat,
    /// Session statement timeout issued before execution
    pub statement_timeout: Option<Duration>,
    /// Behaviour of split plans when a follow-up batch fails
    pub split_failure_policy: SplitFailurePolicy,
    /// Upper bound for `limit` (None = unbounded)
    pub max_limit: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            safe_mode: OptimizerDefaults::SAFE_MODE,
            max_relations_per_query: OptimizerDefaults::MAX_RELATIONS_PER_QUERY,
            complexity_warning_threshold: OptimizerDefaults::COMPLEXITY_WARNING_THRESHOLD,
            debug: OptimizerDefaults::DEBUG,
            log_queries: OptimizerDefaults::LOG_QUERIES,
            cache_enabled: OptimizerDefaults::CACHE_ENABLED,
            default_cache_ttl: None,
            cache_prefix: OptimizerDefaults::CACHE_PREFIX.to_string(),
            default_format: OutputFormat::Array,
            statement_timeout: None,
            split_failure_policy: SplitFailurePolicy::Skip,
            max_limit: None,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_safe_mode(mut self, enabled: bool) -> Self {
        self.safe_mode = enabled;
        self
    }

    pub fn with_max_relations_per_query(mut self, max: usize) -> Self {
        self.max_relations_per_query = max;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl = Some(ttl);
        self
    }

    pub fn with_cache_prefix(mut self, prefix: &str) -> Self {
        self.cache_prefix = prefix.to_string();
        self
    }

    pub fn with_default_format(mut self, format: OutputFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn with_split_failure_policy(mut self, policy: SplitFailurePolicy) -> Self {
        self.split_failure_policy = policy;
        self
    }

    pub fn with_max_limit(mut self, max: u64) -> Self {
        self.max_limit = Some(max);
        self
    }

    /// Check the configuration for values that can never work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.complexity_warning_threshold == 0 {
            return Err(ConfigError::validation_failed(
                "Complexity warning threshold must be greater than 0",
            ));
        }

        if self.cache_prefix.trim().is_empty() {
            return Err(ConfigError::validation_failed("Cache prefix cannot be empty"));
        }

        if let Some(ttl) = self.default_cache_ttl {
            if ttl.is_zero() {
                return Err(ConfigError::validation_failed(
                    "Default cache TTL must be greater than 0",
                ));
            }
        }

        if let Some(timeout) = self.statement_timeout {
            if timeout.as_millis() == 0 {
                return Err(ConfigError::validation_failed(
                    "Statement timeout must be at least 1ms",
                ));
            }
        }

        if self.max_limit == Some(0) {
            return Err(ConfigError::validation_failed("Max limit must be greater than 0"));
        }

        Ok(())
    }

    /// Load configuration from `OPTIMIZED_QUERIES_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            safe_mode: parse_env("OPTIMIZED_QUERIES_SAFE_MODE", "true or false")?
                .unwrap_or(defaults.safe_mode),
            max_relations_per_query: parse_env(
                "OPTIMIZED_QUERIES_MAX_RELATIONS_PER_QUERY",
                "a non-negative integer",
            )?
            .unwrap_or(defaults.max_relations_per_query),
            complexity_warning_threshold: parse_env(
                "OPTIMIZED_QUERIES_COMPLEXITY_THRESHOLD",
                "a positive integer",
            )?
            .unwrap_or(defaults.complexity_warning_threshold),
            debug: parse_env("OPTIMIZED_QUERIES_DEBUG", "true or false")?
                .unwrap_or(defaults.debug),
            log_queries: parse_env("OPTIMIZED_QUERIES_LOG_QUERIES", "true or false")?
                .unwrap_or(defaults.log_queries),
            cache_enabled: parse_env("OPTIMIZED_QUERIES_CACHE_ENABLED", "true or false")?
                .unwrap_or(defaults.cache_enabled),
            default_cache_ttl: parse_env::<u64>(
                "OPTIMIZED_QUERIES_CACHE_TTL",
                "a number of seconds",
            )?
            .map(Duration::from_secs),
            cache_prefix: env::var("OPTIMIZED_QUERIES_CACHE_PREFIX")
                .unwrap_or(defaults.cache_prefix),
            default_format: match env::var("OPTIMIZED_QUERIES_FORMAT") {
                Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "default_format".to_string(),
                    value,
                    expected: "array, object or entity".to_string(),
                })?,
                Err(_) => defaults.default_format,
            },
            statement_timeout: parse_env::<u64>(
                "OPTIMIZED_QUERIES_TIMEOUT_MS",
                "a number of milliseconds",
            )?
            .map(Duration::from_millis),
            split_failure_policy: match env::var("OPTIMIZED_QUERIES_SPLIT_FAILURE").as_deref() {
                Ok("fail") => SplitFailurePolicy::Fail,
                Ok("skip") | Err(_) => SplitFailurePolicy::Skip,
                Ok(other) => {
                    return Err(ConfigError::InvalidValue {
                        field: "split_failure_policy".to_string(),
                        value: other.to_string(),
                        expected: "skip or fail".to_string(),
                    })
                }
            },
            max_limit: parse_env("OPTIMIZED_QUERIES_MAX_LIMIT", "a positive integer")?,
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value,
                expected: expected.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OptimizerConfig::default();
        assert!(config.safe_mode);
        assert_eq!(config.max_relations_per_query, 0);
        assert_eq!(config.complexity_warning_threshold, 8);
        assert_eq!(config.default_cache_ttl, None);
        assert_eq!(config.split_failure_policy, SplitFailurePolicy::Skip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = OptimizerConfig::new()
            .with_safe_mode(false)
            .with_max_relations_per_query(2)
            .with_default_cache_ttl(Duration::from_secs(60))
            .with_statement_timeout(Duration::from_millis(1500))
            .with_max_limit(500);

        assert!(!config.safe_mode);
        assert_eq!(config.max_relations_per_query, 2);
        assert_eq!(config.default_cache_ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.statement_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_limit, Some(500));
    }

    #[test]
    fn test_validation_rejects_impossible_values() {
        let config = OptimizerConfig::new().with_cache_prefix("  ");
        assert!(config.validate().is_err());

        let config = OptimizerConfig {
            complexity_warning_threshold: 0,
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = OptimizerConfig::new().with_default_cache_ttl(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: OptimizerConfig =
            serde_json::from_str(r#"{"safe_mode": false, "max_relations_per_query": 3}"#).unwrap();
        assert!(!config.safe_mode);
        assert_eq!(config.max_relations_per_query, 3);
        assert_eq!(config.cache_prefix, "optimized_queries");
    }
}
