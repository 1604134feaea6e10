//! Pipeline configuration, loaded from environment variables.

use std::time::Duration;

pub const ENV_MAX_RETRIES: &str = "FORGEJOBS_MAX_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "FORGEJOBS_RETRY_DELAY_MS";
pub const ENV_DELAY_BETWEEN_ITEMS_MS: &str = "FORGEJOBS_DELAY_BETWEEN_ITEMS_MS";
pub const ENV_PER_ITEM_ESTIMATE_MS: &str = "FORGEJOBS_PER_ITEM_ESTIMATE_MS";
pub const ENV_MAX_ITEMS: &str = "FORGEJOBS_MAX_ITEMS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_BIND_ADDR: &str = "FORGEJOBS_BIND_ADDR";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Worker retry and throttling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingConfig {
    /// Attempts per item, including the first.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Pause between items; zero disables throttling.
    pub delay_between_items: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            delay_between_items: Duration::ZERO,
        }
    }
}

impl ProcessingConfig {
    /// Fixed retry count with no delays; handy in tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::ZERO,
            delay_between_items: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobServiceConfig {
    /// Time budget per item used for the estimated duration.
    pub per_item_estimate: Duration,
    pub max_items: usize,
}

impl Default for JobServiceConfig {
    fn default() -> Self {
        Self {
            per_item_estimate: Duration::from_secs(10),
            max_items: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub processing: ProcessingConfig,
    pub service: JobServiceConfig,
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            service: JobServiceConfig::default(),
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup(ENV_MAX_RETRIES) {
            let n: u32 = parse(ENV_MAX_RETRIES, &v)?;
            if n == 0 {
                return Err(invalid(ENV_MAX_RETRIES, &v));
            }
            cfg.processing.max_retries = n;
        }
        if let Some(v) = lookup(ENV_RETRY_DELAY_MS) {
            cfg.processing.retry_delay = Duration::from_millis(parse(ENV_RETRY_DELAY_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_DELAY_BETWEEN_ITEMS_MS) {
            cfg.processing.delay_between_items =
                Duration::from_millis(parse(ENV_DELAY_BETWEEN_ITEMS_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_PER_ITEM_ESTIMATE_MS) {
            cfg.service.per_item_estimate =
                Duration::from_millis(parse(ENV_PER_ITEM_ESTIMATE_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_MAX_ITEMS) {
            cfg.service.max_items = parse(ENV_MAX_ITEMS, &v)?;
        }
        if let Some(v) = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            cfg.database_url = Some(v);
        }
        if let Some(v) = lookup(ENV_BIND_ADDR).filter(|v| !v.trim().is_empty()) {
            cfg.bind_addr = v;
        }

        Ok(cfg)
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.processing.max_retries, 3);
        assert_eq!(cfg.processing.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn reads_every_key() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            (ENV_MAX_RETRIES, "5"),
            (ENV_RETRY_DELAY_MS, "250"),
            (ENV_DELAY_BETWEEN_ITEMS_MS, "10"),
            (ENV_PER_ITEM_ESTIMATE_MS, "2000"),
            (ENV_MAX_ITEMS, "50"),
            (ENV_DATABASE_URL, "postgres://localhost/jobs"),
            (ENV_BIND_ADDR, "127.0.0.1:9000"),
        ]))
        .unwrap();

        assert_eq!(cfg.processing.max_retries, 5);
        assert_eq!(cfg.processing.retry_delay, Duration::from_millis(250));
        assert_eq!(cfg.processing.delay_between_items, Duration::from_millis(10));
        assert_eq!(cfg.service.per_item_estimate, Duration::from_secs(2));
        assert_eq!(cfg.service.max_items, 50);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/jobs"));
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn zero_retries_is_rejected() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_MAX_RETRIES, "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: ENV_MAX_RETRIES,
                value: "0".to_string()
            }
        );
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(PipelineConfig::from_lookup(lookup(&[(ENV_RETRY_DELAY_MS, "-1")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[(ENV_MAX_ITEMS, "lots")])).is_err());
    }
}
