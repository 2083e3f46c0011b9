//! Pipeline configuration.
//!
//! Values come from environment variables; anything unset keeps its default.
//! Tests build configs with [`PipelineConfig::from_lookup`] or the `with_*`
//! builders instead of touching the process environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::resilience::{Resilience, RetryPolicy};
use crate::workers::ConsumerConfig;

pub const ENV_RETRY_MAX_ATTEMPTS: &str = "DOCPROC_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "DOCPROC_RETRY_BASE_DELAY_MS";
pub const ENV_SIDE_EFFECT_TIMEOUT_MS: &str = "DOCPROC_SIDE_EFFECT_TIMEOUT_MS";
pub const ENV_MAX_REDELIVERIES: &str = "DOCPROC_MAX_REDELIVERIES";
pub const ENV_REDELIVERY_DELAY_MS: &str = "DOCPROC_REDELIVERY_DELAY_MS";
pub const ENV_DOCUMENTS_ROOT: &str = "DOCPROC_DOCUMENTS_ROOT";
pub const ENV_STOP_WORDS_PATH: &str = "DOCPROC_STOP_WORDS_PATH";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_USE_PERSISTENT_STORES: &str = "USE_PERSISTENT_STORES";
pub const ENV_BIND_ADDR: &str = "DOCPROC_BIND_ADDR";
pub const ENV_SAGA_RETENTION_SECS: &str = "DOCPROC_SAGA_RETENTION_SECS";
pub const ENV_SAGA_PURGE_INTERVAL_SECS: &str = "DOCPROC_SAGA_PURGE_INTERVAL_SECS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be set when {ENV_USE_PERSISTENT_STORES}=true")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retries after the first attempt of a saga side effect.
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub side_effect_timeout_ms: u64,
    pub max_redeliveries: u32,
    pub redelivery_delay_ms: u64,
    /// When set, the analyzer reads documents from `<root>/<process_id>/<file_name>`.
    pub documents_root: Option<PathBuf>,
    pub stop_words_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
    pub bind_addr: SocketAddr,
    /// How long a finalized saga is kept before the janitor removes it.
    pub saga_retention_secs: u64,
    pub saga_purge_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            side_effect_timeout_ms: 5000,
            max_redeliveries: 5,
            redelivery_delay_ms: 200,
            documents_root: None,
            stop_words_path: None,
            database_url: None,
            use_persistent_stores: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            saga_retention_secs: 3600,
            saga_purge_interval_secs: 60,
        }
    }
}

fn parse<T: FromStr>(key: &'static str, raw: Option<String>, target: &mut T) -> Result<(), ConfigError> {
    if let Some(value) = raw {
        *target = value.trim().parse().map_err(|_| ConfigError::Invalid { key, value })?;
    }
    Ok(())
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        parse(ENV_RETRY_MAX_ATTEMPTS, get(ENV_RETRY_MAX_ATTEMPTS), &mut config.retry_max_attempts)?;
        parse(ENV_RETRY_BASE_DELAY_MS, get(ENV_RETRY_BASE_DELAY_MS), &mut config.retry_base_delay_ms)?;
        parse(
            ENV_SIDE_EFFECT_TIMEOUT_MS,
            get(ENV_SIDE_EFFECT_TIMEOUT_MS),
            &mut config.side_effect_timeout_ms,
        )?;
        parse(ENV_MAX_REDELIVERIES, get(ENV_MAX_REDELIVERIES), &mut config.max_redeliveries)?;
        parse(ENV_REDELIVERY_DELAY_MS, get(ENV_REDELIVERY_DELAY_MS), &mut config.redelivery_delay_ms)?;
        parse(
            ENV_USE_PERSISTENT_STORES,
            get(ENV_USE_PERSISTENT_STORES).map(|v| v.to_ascii_lowercase()),
            &mut config.use_persistent_stores,
        )?;
        parse(ENV_BIND_ADDR, get(ENV_BIND_ADDR), &mut config.bind_addr)?;
        parse(ENV_SAGA_RETENTION_SECS, get(ENV_SAGA_RETENTION_SECS), &mut config.saga_retention_secs)?;
        parse(
            ENV_SAGA_PURGE_INTERVAL_SECS,
            get(ENV_SAGA_PURGE_INTERVAL_SECS),
            &mut config.saga_purge_interval_secs,
        )?;

        config.documents_root = get(ENV_DOCUMENTS_ROOT).map(PathBuf::from);
        config.stop_words_path = get(ENV_STOP_WORDS_PATH).map(PathBuf::from);
        config.database_url = get(ENV_DATABASE_URL);

        if config.use_persistent_stores && config.database_url.is_none() {
            return Err(ConfigError::Missing(ENV_DATABASE_URL));
        }
        Ok(config)
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.retry_max_attempts = max_attempts;
        self.retry_base_delay_ms = base_delay.as_millis() as u64;
        self
    }

    pub fn with_side_effect_timeout(mut self, timeout: Duration) -> Self {
        self.side_effect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_redelivery(mut self, max_redeliveries: u32, delay: Duration) -> Self {
        self.max_redeliveries = max_redeliveries;
        self.redelivery_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_documents_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.documents_root = Some(root.into());
        self
    }

    pub fn with_stop_words_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stop_words_path = Some(path.into());
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_saga_retention(mut self, retention: Duration, purge_interval: Duration) -> Self {
        self.saga_retention_secs = retention.as_secs();
        self.saga_purge_interval_secs = purge_interval.as_secs();
        self
    }

    pub fn saga_retention(&self) -> Duration {
        Duration::from_secs(self.saga_retention_secs)
    }

    pub fn saga_purge_interval(&self) -> Duration {
        Duration::from_secs(self.saga_purge_interval_secs)
    }

    pub fn resilience(&self) -> Resilience {
        Resilience::new(
            RetryPolicy::new(self.retry_max_attempts, Duration::from_millis(self.retry_base_delay_ms)),
            Duration::from_millis(self.side_effect_timeout_ms),
        )
    }

    pub fn consumer_config(&self, name: &'static str) -> ConsumerConfig {
        ConsumerConfig::new(name)
            .with_max_redeliveries(self.max_redeliveries)
            .with_redelivery_delay(Duration::from_millis(self.redelivery_delay_ms))
    }

    /// Postgres URL, when persistent stores are enabled.
    pub fn persistent_database_url(&self) -> Option<&str> {
        if self.use_persistent_stores {
            self.database_url.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, PipelineConfig::default());

        let resilience = config.resilience();
        assert_eq!(resilience.retry_policy().max_attempts, 3);
        assert_eq!(resilience.retry_policy().base_delay, Duration::from_secs(1));
        assert_eq!(resilience.timeout(), Duration::from_secs(5));
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.persistent_database_url().is_none());
        assert_eq!(config.saga_retention(), Duration::from_secs(3600));
        assert_eq!(config.saga_purge_interval(), Duration::from_secs(60));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            (ENV_RETRY_MAX_ATTEMPTS, "1"),
            (ENV_SIDE_EFFECT_TIMEOUT_MS, "250"),
            (ENV_DOCUMENTS_ROOT, "/var/lib/docproc"),
            (ENV_USE_PERSISTENT_STORES, "TRUE"),
            (ENV_DATABASE_URL, "postgres://localhost/docproc"),
            (ENV_BIND_ADDR, "127.0.0.1:9000"),
            (ENV_SAGA_RETENTION_SECS, "600"),
        ]))
        .unwrap();

        assert_eq!(config.retry_max_attempts, 1);
        assert_eq!(config.resilience().timeout(), Duration::from_millis(250));
        assert_eq!(config.documents_root, Some(PathBuf::from("/var/lib/docproc")));
        assert_eq!(config.persistent_database_url(), Some("postgres://localhost/docproc"));
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.saga_retention(), Duration::from_secs(600));
    }

    #[test]
    fn unparsable_values_are_rejected() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_MAX_REDELIVERIES, "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: ENV_MAX_REDELIVERIES,
                value: "many".into()
            }
        );
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_USE_PERSISTENT_STORES, "true")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(ENV_DATABASE_URL));
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "max_redeliveries": 1 }"#).unwrap();
        assert_eq!(config.max_redeliveries, 1);
        assert_eq!(config.redelivery_delay_ms, 200);
    }
}
