use crate::error::ConfigError;
use crate::query::planner::DEFAULT_MAX_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_FILE: &str = "waypoint-search.json";

pub const ENV_URL: &str = "WAYPOINT_MEILISEARCH_URL";
pub const ENV_API_KEY: &str = "WAYPOINT_MEILISEARCH_API_KEY";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "WAYPOINT_REQUEST_TIMEOUT_MS";
pub const ENV_MAX_LIMIT: &str = "WAYPOINT_SEARCH_MAX_LIMIT";
pub const ENV_SETTINGS_DEADLINE_SECS: &str = "WAYPOINT_SETTINGS_DEADLINE_SECS";
pub const ENV_RETRY_ATTEMPTS: &str = "WAYPOINT_RETRY_ATTEMPTS";

/// How settings tasks are polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Budget for a whole `apply_settings` run, all groups included.
    pub deadline_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            deadline_secs: 60,
        }
    }
}

impl PollConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Retry of idempotent calls (upsert, lookup, search) on transient errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub max_limit: u32,
    pub poll: PollConfig,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            url: "http://127.0.0.1:7700".to_string(),
            api_key: None,
            request_timeout_ms: 5_000,
            max_limit: DEFAULT_MAX_LIMIT,
            poll: PollConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Load `{dir}/waypoint-search.json` if present, otherwise build the
    /// config from `WAYPOINT_*` environment variables over the defaults.
    ///
    /// A config file that exists but cannot be read or parsed is an error,
    /// not a reason to fall back.
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Self::from_env()?;
            tracing::info!("No {} found, using environment: url={}", CONFIG_FILE, config.url);
            return Ok(config);
        }

        let unreadable = |reason: String| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(&path).map_err(|e| unreadable(e.to_string()))?;
        let config: SyncConfig =
            serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
        config.validate()?;
        tracing::info!(
            "Loaded {}: url={}, max_limit={}",
            path.display(),
            config.url,
            config.max_limit
        );
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or empty keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = SyncConfig::default();

        if let Some(url) = get(ENV_URL) {
            config.url = url.trim().to_string();
        }
        config.api_key = get(ENV_API_KEY);
        if let Some(v) = get(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout_ms = parse_value(ENV_REQUEST_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(ENV_MAX_LIMIT) {
            config.max_limit = parse_value(ENV_MAX_LIMIT, &v)?;
        }
        if let Some(v) = get(ENV_SETTINGS_DEADLINE_SECS) {
            config.poll.deadline_secs = parse_value(ENV_SETTINGS_DEADLINE_SECS, &v)?;
        }
        if let Some(v) = get(ENV_RETRY_ATTEMPTS) {
            config.retry.max_attempts = parse_value(ENV_RETRY_ATTEMPTS, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, value: String, reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
            reason: reason.to_string(),
        };
        if self.url.trim().is_empty() {
            return Err(invalid("url", self.url.clone(), "must not be empty"));
        }
        if self.max_limit == 0 {
            return Err(invalid("maxLimit", "0".into(), "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.maxAttempts", "0".into(), "must be at least 1"));
        }
        if self.poll.deadline_secs == 0 {
            return Err(invalid("poll.deadlineSecs", "0".into(), "must be at least 1"));
        }
        if self.poll.initial_delay_ms == 0 {
            return Err(invalid("poll.initialDelayMs", "0".into(), "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = SyncConfig::default();
        assert_eq!(c.max_limit, 1000);
        assert_eq!(c.poll.initial_delay(), Duration::from_millis(200));
        assert_eq!(c.poll.max_delay(), Duration::from_secs(5));
        assert_eq!(c.retry.max_attempts, 3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let c = SyncConfig::from_lookup(lookup(&[
            (ENV_URL, "http://meili:7700"),
            (ENV_API_KEY, "secret"),
            (ENV_MAX_LIMIT, "250"),
            (ENV_SETTINGS_DEADLINE_SECS, "5"),
            (ENV_RETRY_ATTEMPTS, "1"),
        ]))
        .unwrap();
        assert_eq!(c.url, "http://meili:7700");
        assert_eq!(c.api_key.as_deref(), Some("secret"));
        assert_eq!(c.max_limit, 250);
        assert_eq!(c.poll.deadline(), Duration::from_secs(5));
        assert_eq!(c.retry.max_attempts, 1);
        assert_eq!(c.request_timeout_ms, 5_000);
    }

    #[test]
    fn empty_values_keep_defaults() {
        let c = SyncConfig::from_lookup(lookup(&[(ENV_API_KEY, ""), (ENV_MAX_LIMIT, " ")]))
            .unwrap();
        assert_eq!(c.api_key, None);
        assert_eq!(c.max_limit, DEFAULT_MAX_LIMIT);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = SyncConfig::from_lookup(lookup(&[(ENV_MAX_LIMIT, "lots")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, ref value, .. }
                if key == ENV_MAX_LIMIT && value == "lots"
        ));
        assert!(SyncConfig::from_lookup(lookup(&[(ENV_RETRY_ATTEMPTS, "0")])).is_err());
    }

    #[test]
    #[serial]
    fn load_or_default_without_file_reads_env() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(ENV_URL, "http://from-env:7700");
        std::env::remove_var(ENV_MAX_LIMIT);

        let c = SyncConfig::load_or_default(dir.path());

        std::env::remove_var(ENV_URL);
        assert_eq!(c.unwrap().url, "http://from-env:7700");
    }

    #[test]
    #[serial]
    fn file_takes_precedence_over_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"url": "http://from-file:7700", "poll": {"deadlineSecs": 10}}"#,
        )
        .unwrap();
        std::env::set_var(ENV_URL, "http://from-env:7700");

        let c = SyncConfig::load_or_default(dir.path());

        std::env::remove_var(ENV_URL);
        let c = c.unwrap();
        assert_eq!(c.url, "http://from-file:7700");
        assert_eq!(c.poll.deadline_secs, 10);
        assert_eq!(c.poll.initial_delay_ms, 200);
        assert_eq!(c.max_limit, DEFAULT_MAX_LIMIT);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "invalid json").unwrap();
        assert!(matches!(
            SyncConfig::load_or_default(dir.path()),
            Err(ConfigError::Unreadable { .. })
        ));
    }
}
