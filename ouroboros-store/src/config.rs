//! Backing-store settings
//!
//! The engine treats these as an opaque settings object handed to
//! [`SqlSupplier::open`](crate::sql::SqlSupplier::open). Loading them from a
//! file is the caller's business; [`SqlSettings::from_env`] covers the plain
//! environment case.

use crate::error::BootstrapError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ENV_PREFIX: &str = "OUROBOROS_SQL_";

/// SQL dialect selected by the driver name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
    Postgres,
}

impl Driver {
    /// Resolve a configured driver name
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Driver::Sqlite),
            "postgres" | "postgresql" => Some(Driver::Postgres),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Sqlite => "sqlite",
            Driver::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for the primary, replica and search-replica pools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlSettings {
    /// Driver identifier (`sqlite` or `postgres`)
    pub driver_name: String,

    /// Data source of the primary (the only writable connection)
    pub data_source: String,

    /// Data sources of general read replicas, in rotation order
    pub data_source_replicas: Vec<String>,

    /// Data sources of search replicas, in rotation order
    pub data_source_search_replicas: Vec<String>,

    /// Connections each pool keeps warm
    pub max_idle_conns: u32,

    /// Upper bound of open connections per pool
    pub max_open_conns: u32,

    /// Connections older than this are recycled by the pool
    pub conn_max_lifetime: Duration,

    /// Default per-call deadline and pool acquire timeout
    pub query_timeout: Duration,

    /// Log every statement through sqlx's tracing output
    pub trace: bool,

    /// Bootstrap ping attempts per connection
    pub ping_attempts: u32,

    /// Delay between bootstrap ping attempts
    pub ping_delay: Duration,

    /// Timeout of a single bootstrap ping
    pub ping_timeout: Duration,
}

impl Default for SqlSettings {
    fn default() -> Self {
        Self {
            driver_name: Driver::Sqlite.as_str().to_string(),
            data_source: String::new(),
            data_source_replicas: Vec::new(),
            data_source_search_replicas: Vec::new(),
            max_idle_conns: 20,
            max_open_conns: 300,
            conn_max_lifetime: Duration::from_secs(60 * 60),
            query_timeout: Duration::from_secs(30),
            trace: false,
            ping_attempts: 18,
            ping_delay: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

impl SqlSettings {
    /// Create a new builder for SQL settings
    pub fn builder() -> SqlSettingsBuilder {
        SqlSettingsBuilder::default()
    }

    /// Resolve the configured driver
    pub fn driver(&self) -> Result<Driver, BootstrapError> {
        Driver::parse(&self.driver_name)
            .ok_or_else(|| BootstrapError::UnsupportedDriver(self.driver_name.clone()))
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), BootstrapError> {
        self.driver()?;

        if self.data_source.trim().is_empty() {
            return Err(BootstrapError::InvalidSettings(
                "data_source must not be empty".to_string(),
            ));
        }

        if self.max_open_conns == 0 {
            return Err(BootstrapError::InvalidSettings(
                "max_open_conns must be greater than 0".to_string(),
            ));
        }

        if self.max_idle_conns > self.max_open_conns {
            return Err(BootstrapError::InvalidSettings(format!(
                "max_idle_conns ({}) exceeds max_open_conns ({})",
                self.max_idle_conns, self.max_open_conns
            )));
        }

        if self.ping_attempts == 0 {
            return Err(BootstrapError::InvalidSettings(
                "ping_attempts must be at least 1".to_string(),
            ));
        }

        if self.query_timeout.is_zero() {
            return Err(BootstrapError::InvalidSettings(
                "query_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load settings from `OUROBOROS_SQL_*` environment variables.
    ///
    /// A `.env` file in the working directory is read first if present.
    /// Unset variables keep their defaults; replica lists are comma separated
    /// and durations are whole seconds.
    pub fn from_env() -> Result<Self, BootstrapError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, BootstrapError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(driver) = lookup("DRIVER") {
            settings.driver_name = driver;
        }
        if let Some(source) = lookup("DATA_SOURCE") {
            settings.data_source = source;
        }
        if let Some(list) = lookup("REPLICAS") {
            settings.data_source_replicas = split_list(&list);
        }
        if let Some(list) = lookup("SEARCH_REPLICAS") {
            settings.data_source_search_replicas = split_list(&list);
        }
        if let Some(v) = lookup("MAX_IDLE_CONNS") {
            settings.max_idle_conns = parse_number("MAX_IDLE_CONNS", &v)?;
        }
        if let Some(v) = lookup("MAX_OPEN_CONNS") {
            settings.max_open_conns = parse_number("MAX_OPEN_CONNS", &v)?;
        }
        if let Some(v) = lookup("CONN_MAX_LIFETIME_SECS") {
            settings.conn_max_lifetime =
                Duration::from_secs(parse_number("CONN_MAX_LIFETIME_SECS", &v)?);
        }
        if let Some(v) = lookup("QUERY_TIMEOUT_SECS") {
            settings.query_timeout = Duration::from_secs(parse_number("QUERY_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("TRACE") {
            settings.trace = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("PING_ATTEMPTS") {
            settings.ping_attempts = parse_number("PING_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("PING_DELAY_SECS") {
            settings.ping_delay = Duration::from_secs(parse_number("PING_DELAY_SECS", &v)?);
        }
        if let Some(v) = lookup("PING_TIMEOUT_SECS") {
            settings.ping_timeout = Duration::from_secs(parse_number("PING_TIMEOUT_SECS", &v)?);
        }

        Ok(settings)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, BootstrapError> {
    value.trim().parse().map_err(|_| {
        BootstrapError::InvalidSettings(format!("{}{} is not a number: {}", ENV_PREFIX, key, value))
    })
}

/// Builder for SQL settings
#[derive(Debug, Default)]
pub struct SqlSettingsBuilder {
    driver_name: Option<String>,
    data_source: Option<String>,
    data_source_replicas: Option<Vec<String>>,
    data_source_search_replicas: Option<Vec<String>>,
    max_idle_conns: Option<u32>,
    max_open_conns: Option<u32>,
    conn_max_lifetime: Option<Duration>,
    query_timeout: Option<Duration>,
    trace: Option<bool>,
    ping_attempts: Option<u32>,
    ping_delay: Option<Duration>,
    ping_timeout: Option<Duration>,
}

impl SqlSettingsBuilder {
    pub fn driver(mut self, driver: Driver) -> Self {
        self.driver_name = Some(driver.as_str().to_string());
        self
    }

    pub fn data_source(mut self, source: impl Into<String>) -> Self {
        self.data_source = Some(source.into());
        self
    }

    pub fn replicas(mut self, sources: Vec<String>) -> Self {
        self.data_source_replicas = Some(sources);
        self
    }

    pub fn search_replicas(mut self, sources: Vec<String>) -> Self {
        self.data_source_search_replicas = Some(sources);
        self
    }

    pub fn max_idle_conns(mut self, n: u32) -> Self {
        self.max_idle_conns = Some(n);
        self
    }

    pub fn max_open_conns(mut self, n: u32) -> Self {
        self.max_open_conns = Some(n);
        self
    }

    pub fn conn_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.conn_max_lifetime = Some(lifetime);
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Set bootstrap ping attempts and the delay between them
    pub fn ping_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.ping_attempts = Some(attempts);
        self.ping_delay = Some(delay);
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> SqlSettings {
        let defaults = SqlSettings::default();

        SqlSettings {
            driver_name: self.driver_name.unwrap_or(defaults.driver_name),
            data_source: self.data_source.unwrap_or(defaults.data_source),
            data_source_replicas: self
                .data_source_replicas
                .unwrap_or(defaults.data_source_replicas),
            data_source_search_replicas: self
                .data_source_search_replicas
                .unwrap_or(defaults.data_source_search_replicas),
            max_idle_conns: self.max_idle_conns.unwrap_or(defaults.max_idle_conns),
            max_open_conns: self.max_open_conns.unwrap_or(defaults.max_open_conns),
            conn_max_lifetime: self.conn_max_lifetime.unwrap_or(defaults.conn_max_lifetime),
            query_timeout: self.query_timeout.unwrap_or(defaults.query_timeout),
            trace: self.trace.unwrap_or(defaults.trace),
            ping_attempts: self.ping_attempts.unwrap_or(defaults.ping_attempts),
            ping_delay: self.ping_delay.unwrap_or(defaults.ping_delay),
            ping_timeout: self.ping_timeout.unwrap_or(defaults.ping_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_settings() {
        let settings = SqlSettings::default();
        assert_eq!(settings.driver().unwrap(), Driver::Sqlite);
        assert_eq!(settings.ping_attempts, 18);
        assert_eq!(settings.ping_delay, Duration::from_secs(10));
        assert_eq!(settings.conn_max_lifetime, Duration::from_secs(3600));
        assert!(settings.data_source_replicas.is_empty());
    }

    #[test]
    fn test_driver_parse() {
        assert_eq!(Driver::parse("SQLite3"), Some(Driver::Sqlite));
        assert_eq!(Driver::parse("postgresql"), Some(Driver::Postgres));
        assert_eq!(Driver::parse("mysql"), None);
    }

    #[test]
    fn test_settings_validation() {
        let valid = SqlSettings::builder()
            .data_source("sqlite://store.db?mode=rwc")
            .max_idle_conns(2)
            .max_open_conns(4)
            .build();
        assert!(valid.validate().is_ok());

        let missing_source = SqlSettings::default();
        assert!(matches!(
            missing_source.validate(),
            Err(BootstrapError::InvalidSettings(_))
        ));

        let mut bad_driver = valid.clone();
        bad_driver.driver_name = "oracle".to_string();
        assert!(matches!(
            bad_driver.validate(),
            Err(BootstrapError::UnsupportedDriver(_))
        ));

        let mut idle_over_open = valid.clone();
        idle_over_open.max_idle_conns = 10;
        assert!(idle_over_open.validate().is_err());
    }

    #[test]
    fn test_settings_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("DRIVER", "postgres"),
            ("DATA_SOURCE", "postgres://primary/db"),
            ("REPLICAS", "postgres://r1/db, postgres://r2/db,"),
            ("QUERY_TIMEOUT_SECS", "5"),
            ("TRACE", "true"),
            ("PING_ATTEMPTS", "4"),
            ("PING_DELAY_SECS", "2"),
            ("PING_TIMEOUT_SECS", "3"),
        ]
        .into_iter()
        .collect();

        let settings =
            SqlSettings::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.driver().unwrap(), Driver::Postgres);
        assert_eq!(settings.data_source_replicas.len(), 2);
        assert_eq!(settings.query_timeout, Duration::from_secs(5));
        assert!(settings.trace);
        assert!(settings.data_source_search_replicas.is_empty());
        assert_eq!(settings.ping_attempts, 4);
        assert_eq!(settings.ping_delay, Duration::from_secs(2));
        assert_eq!(settings.ping_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_settings_from_lookup_rejects_garbage_numbers() {
        let result = SqlSettings::from_lookup(|key| {
            (key == "MAX_OPEN_CONNS").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(BootstrapError::InvalidSettings(_))));
    }
}
