//! Runtime configuration.
//!
//! Every section deserializes with per-field defaults, so a partial JSON
//! document (or none at all) yields a usable configuration. Environment
//! variables are overlaid by [`RuntimeConfig::from_env`].

use crate::errors::ConfigError;
use crate::utils::parse_duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection string variable.
pub const ENV_DB_CONN: &str = "MQAS_DB_CONN";
/// Database name variable.
pub const ENV_DB_NAME: &str = "MQAS_DB_NAME";
/// Collection name variable.
pub const ENV_DB_COLL: &str = "MQAS_DB_COLL";
/// Reservation lease timeout variable.
pub const ENV_LOCK_TIMEOUT: &str = "MQAS_LOCK_TIMEOUT";
/// Lease renewal interval variable.
pub const ENV_LOCK_UPDATE_INTERVAL: &str = "MQAS_LOCK_UPDATE_INTERVAL";
/// Admission retry delay variable.
pub const ENV_LOCK_RETRY_DELAY: &str = "MQAS_LOCK_RETRY_DELAY";
/// Fixed host memory budget variable, in MB.
pub const ENV_MEMORY_LIMIT_MB: &str = "MQAS_MEMORY_LIMIT_MB";
/// Piped-mode child program variable.
pub const ENV_RUNNER: &str = "MQAS_RUNNER";
/// Colon-separated module search paths variable.
pub const ENV_MODULES: &str = "MQAS_MODULES";
/// Log level variable.
pub const ENV_LOG_LEVEL: &str = "MQAS_LOG_LEVEL";
/// JSON log output variable.
pub const ENV_LOG_JSON: &str = "MQAS_LOG_JSON";

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Store connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Memory reservation lock settings.
    #[serde(default)]
    pub lock: LockConfig,
    /// Piped-mode runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlays values returned by `lookup` for the `MQAS_*` variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_DB_CONN) {
            self.connection.db_conn = v;
        }
        if let Some(v) = lookup(ENV_DB_NAME) {
            self.connection.db_name = v;
        }
        if let Some(v) = lookup(ENV_DB_COLL) {
            self.connection.db_coll = v;
        }
        if let Some(v) = lookup(ENV_LOCK_TIMEOUT) {
            self.lock.timeout_seconds = env_duration(ENV_LOCK_TIMEOUT, &v)?;
        }
        if let Some(v) = lookup(ENV_LOCK_UPDATE_INTERVAL) {
            self.lock.update_interval_seconds = env_duration(ENV_LOCK_UPDATE_INTERVAL, &v)?;
        }
        if let Some(v) = lookup(ENV_LOCK_RETRY_DELAY) {
            self.lock.retry_delay_seconds = env_duration(ENV_LOCK_RETRY_DELAY, &v)?;
        }
        if let Some(v) = lookup(ENV_MEMORY_LIMIT_MB) {
            self.lock.memory_limit_mb = Some(v.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                key: ENV_MEMORY_LIMIT_MB.to_string(),
                value: v.clone(),
            })?);
        }
        if let Some(v) = lookup(ENV_RUNNER) {
            self.runner.program = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_MODULES) {
            self.runner.modules = std::env::split_paths(&v).collect();
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = v;
        }
        if let Some(v) = lookup(ENV_LOG_JSON) {
            self.logging.json = env_bool(ENV_LOG_JSON, &v)?;
        }
        Ok(())
    }

    /// Sets the connection section.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Sets the lock section.
    #[must_use]
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Sets the runner section.
    #[must_use]
    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }
}

fn env_duration(key: &str, value: &str) -> Result<f64, ConfigError> {
    parse_duration(value)
        .map(|d| d.as_secs_f64())
        .ok_or_else(|| ConfigError::InvalidDuration {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn env_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Where the shared jobs collection lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection string.
    #[serde(default = "default_db_conn")]
    pub db_conn: String,
    /// Database name.
    #[serde(default = "default_db_name")]
    pub db_name: String,
    /// Collection name.
    #[serde(default = "default_db_coll")]
    pub db_coll: String,
}

fn default_db_conn() -> String {
    "memory://jobs".to_string()
}

fn default_db_name() -> String {
    "jobs".to_string()
}

fn default_db_coll() -> String {
    "jobs".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            db_conn: default_db_conn(),
            db_name: default_db_name(),
            db_coll: default_db_coll(),
        }
    }
}

impl ConnectionConfig {
    /// Creates a connection config.
    #[must_use]
    pub fn new(
        db_conn: impl Into<String>,
        db_name: impl Into<String>,
        db_coll: impl Into<String>,
    ) -> Self {
        Self {
            db_conn: db_conn.into(),
            db_name: db_name.into(),
            db_coll: db_coll.into(),
        }
    }
}

/// Timing of the memory reservation protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Reservation lease length in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// Preferred renewal interval in seconds.
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: f64,
    /// Sleep between admission attempts in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: f64,
    /// Lifetime of an abandoned mutex record in seconds.
    #[serde(default = "default_mutex_ttl")]
    pub mutex_ttl_seconds: f64,
    /// Upper bound on the renewal interval in seconds.
    #[serde(default = "default_renewal_cap")]
    pub renewal_cap_seconds: f64,
    /// How long release waits for the renewal task in seconds.
    #[serde(default = "default_release_join_timeout")]
    pub release_join_timeout_seconds: f64,
    /// Fixed memory budget in MB. When set, admission checks against this
    /// instead of probing the host.
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

fn default_timeout() -> f64 {
    60.0
}

fn default_update_interval() -> f64 {
    10.0
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_mutex_ttl() -> f64 {
    5.0
}

fn default_renewal_cap() -> f64 {
    5.0
}

fn default_release_join_timeout() -> f64 {
    1.0
}

/// Renewal never spins faster than this.
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(10);

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            update_interval_seconds: default_update_interval(),
            retry_delay_seconds: default_retry_delay(),
            mutex_ttl_seconds: default_mutex_ttl(),
            renewal_cap_seconds: default_renewal_cap(),
            release_join_timeout_seconds: default_release_join_timeout(),
            memory_limit_mb: None,
        }
    }
}

impl LockConfig {
    /// Creates a lock config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lease timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the preferred renewal interval.
    #[must_use]
    pub fn with_update_interval(mut self, seconds: f64) -> Self {
        self.update_interval_seconds = seconds;
        self
    }

    /// Sets the admission retry delay.
    #[must_use]
    pub fn with_retry_delay(mut self, seconds: f64) -> Self {
        self.retry_delay_seconds = seconds;
        self
    }

    /// Sets the mutex record lifetime.
    #[must_use]
    pub fn with_mutex_ttl(mut self, seconds: f64) -> Self {
        self.mutex_ttl_seconds = seconds;
        self
    }

    /// Sets the renewal interval cap.
    #[must_use]
    pub fn with_renewal_cap(mut self, seconds: f64) -> Self {
        self.renewal_cap_seconds = seconds;
        self
    }

    /// Sets the release join timeout.
    #[must_use]
    pub fn with_release_join_timeout(mut self, seconds: f64) -> Self {
        self.release_join_timeout_seconds = seconds;
        self
    }

    /// Sets a fixed memory budget.
    #[must_use]
    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    /// Gets the lease timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds)
    }

    /// Gets the preferred renewal interval as Duration.
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        seconds(self.update_interval_seconds)
    }

    /// Gets the retry delay as Duration.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        seconds(self.retry_delay_seconds)
    }

    /// Gets the mutex record lifetime as Duration.
    #[must_use]
    pub fn mutex_ttl(&self) -> Duration {
        seconds(self.mutex_ttl_seconds)
    }

    /// Gets the release join timeout as Duration.
    #[must_use]
    pub fn release_join_timeout(&self) -> Duration {
        seconds(self.release_join_timeout_seconds)
    }

    /// The interval at which a held reservation is refreshed:
    /// `min(renewal_cap, update_interval, timeout)`.
    #[must_use]
    pub fn renewal_interval(&self) -> Duration {
        seconds(self.renewal_cap_seconds)
            .min(self.update_interval())
            .min(self.timeout())
            .max(MIN_RENEWAL_INTERVAL)
    }
}

/// How piped-mode children are launched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Child program; defaults to the `mqas-job` binary on `PATH`.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Extra arguments passed to the child program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Module search paths added to every payload.
    #[serde(default)]
    pub modules: Vec<PathBuf>,
}

impl RunnerConfig {
    /// The program to spawn.
    #[must_use]
    pub fn program(&self) -> PathBuf {
        self.program
            .clone()
            .unwrap_or_else(|| PathBuf::from("mqas-job"))
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.connection.db_conn, "memory://jobs");
        assert_eq!(config.lock.timeout(), Duration::from_secs(60));
        assert_eq!(config.lock.update_interval(), Duration::from_secs(10));
        assert_eq!(config.lock.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.lock.mutex_ttl(), Duration::from_secs(5));
        assert_eq!(config.lock.memory_limit_mb, None);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_renewal_interval_is_minimum() {
        assert_eq!(LockConfig::default().renewal_interval(), Duration::from_secs(5));
        let short = LockConfig::new().with_timeout(2.0);
        assert_eq!(short.renewal_interval(), Duration::from_secs(2));
        let fast = LockConfig::new().with_update_interval(0.5);
        assert_eq!(fast.renewal_interval(), Duration::from_millis(500));
        let zero = LockConfig::new().with_update_interval(0.0);
        assert_eq!(zero.renewal_interval(), MIN_RENEWAL_INTERVAL);
    }

    #[test]
    fn test_builders() {
        let lock = LockConfig::new()
            .with_retry_delay(0.1)
            .with_mutex_ttl(2.0)
            .with_renewal_cap(3.0)
            .with_release_join_timeout(0.5)
            .with_memory_limit_mb(512);
        let config = RuntimeConfig::new()
            .with_lock(lock)
            .with_runner(RunnerConfig {
                program: Some(PathBuf::from("/bin/job")),
                ..RunnerConfig::default()
            });

        assert_eq!(config.lock.retry_delay(), Duration::from_millis(100));
        assert_eq!(config.lock.mutex_ttl(), Duration::from_secs(2));
        assert_eq!(config.lock.renewal_interval(), Duration::from_secs(3));
        assert_eq!(config.lock.release_join_timeout(), Duration::from_millis(500));
        assert_eq!(config.lock.memory_limit_mb, Some(512));
        assert_eq!(config.runner.program(), PathBuf::from("/bin/job"));
    }

    #[test]
    fn test_partial_json() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"lock": {"timeout_seconds": 30}}"#).unwrap();
        assert_eq!(config.lock.timeout(), Duration::from_secs(30));
        assert_eq!(config.lock.update_interval(), Duration::from_secs(10));
        assert_eq!(config.connection.db_name, "jobs");
    }

    #[test]
    fn test_apply_env() {
        let mut config = RuntimeConfig::default();
        config
            .apply_env(lookup(&[
                (ENV_DB_CONN, "memory://other"),
                (ENV_LOCK_TIMEOUT, "2m"),
                (ENV_LOCK_UPDATE_INTERVAL, "3"),
                (ENV_LOCK_RETRY_DELAY, "0.25"),
                (ENV_MEMORY_LIMIT_MB, "2048"),
                (ENV_MODULES, "/a:/b"),
                (ENV_LOG_JSON, "true"),
            ]))
            .unwrap();

        assert_eq!(config.connection.db_conn, "memory://other");
        assert_eq!(config.lock.timeout(), Duration::from_secs(120));
        assert_eq!(config.lock.update_interval(), Duration::from_secs(3));
        assert_eq!(config.lock.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.lock.memory_limit_mb, Some(2048));
        assert_eq!(
            config.runner.modules,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert!(config.logging.json);
    }

    #[test]
    fn test_apply_env_rejects_bad_values() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_env(lookup(&[(ENV_LOCK_TIMEOUT, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));

        let err = config
            .apply_env(lookup(&[(ENV_LOG_JSON, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBool { .. }));

        let err = config
            .apply_env(lookup(&[(ENV_MEMORY_LIMIT_MB, "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn test_runner_program_default() {
        assert_eq!(RunnerConfig::default().program(), PathBuf::from("mqas-job"));
    }
}
