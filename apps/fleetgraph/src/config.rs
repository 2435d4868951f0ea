//! # Configuration
//!
//! Optional TOML file, then `FLEETGRAPH_*` environment overrides, then
//! CLI flags (applied by the caller).
//!
//! ```toml
//! [store]
//! kind = "redb"          # or "memory"
//! path = "fleetgraph.redb"
//!
//! [scheduler]
//! interval_ms = 5000
//!
//! [metrics]
//! report_period_ms = 60000
//!
//! [api]
//! host = "127.0.0.1"
//! port = 8080
//! rate_limit = 100
//!
//! [bus]
//! capacity = 1024
//! ```

use crate::error::AppError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Redb,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redb" => Ok(StoreKind::Redb),
            "memory" => Ok(StoreKind::Memory),
            other => Err(AppError::Config(format!("unknown store kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Redb,
            path: PathBuf::from("fleetgraph.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub report_period_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_period_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Requests per second, 0 disables the limiter.
    pub rate_limit: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            rate_limit: 100,
        }
    }
}

impl ApiConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: crate::bus::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub metrics: MetricsConfig,
    pub api: ApiConfig,
    pub bus: BusConfig,
}

impl Config {
    /// Parse a TOML document. Missing sections keep their defaults.
    pub fn from_toml(contents: &str) -> Result<Self, AppError> {
        toml::from_str(contents).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Load `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| AppError::Config(format!("failed to read {}: {e}", path.display())))?;
                Self::from_toml(&contents)
                    .map_err(|e| AppError::Config(format!("failed to parse {}: {e}", path.display())))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override values from `FLEETGRAPH_*` variables. Unparsable values are
    /// logged and ignored.
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            var(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(kind) = get("FLEETGRAPH_STORE_KIND") {
            match kind.parse() {
                Ok(kind) => self.store.kind = kind,
                Err(e) => tracing::warn!("invalid FLEETGRAPH_STORE_KIND, ignoring: {e}"),
            }
        }
        if let Some(path) = get("FLEETGRAPH_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(host) = get("FLEETGRAPH_API_HOST") {
            self.api.host = host;
        }
        override_parsed(&get, "FLEETGRAPH_SCHEDULER_INTERVAL_MS", &mut self.scheduler.interval_ms);
        override_parsed(&get, "FLEETGRAPH_METRICS_PERIOD_MS", &mut self.metrics.report_period_ms);
        override_parsed(&get, "FLEETGRAPH_API_PORT", &mut self.api.port);
        override_parsed(&get, "FLEETGRAPH_RATE_LIMIT", &mut self.api.rate_limit);
        override_parsed(&get, "FLEETGRAPH_BUS_CAPACITY", &mut self.bus.capacity);
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.interval_ms.max(1))
    }

    pub fn metrics_period(&self) -> Duration {
        Duration::from_millis(self.metrics.report_period_ms)
    }
}

fn override_parsed<T, G>(get: &G, key: &str, slot: &mut T)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(e) => tracing::warn!("invalid {key}, ignoring: {e}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [store]
            kind = "memory"

            [api]
            port = 9000
            "#,
        )
        .expect("parse");

        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.scheduler.interval_ms, 5000);
        assert_eq!(config.metrics.report_period_ms, 60_000);
    }

    #[test]
    fn unknown_store_kind_is_rejected() {
        assert!(Config::from_toml("[store]\nkind = \"sqlite\"").is_err());
    }

    #[test]
    fn env_overrides_win_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("FLEETGRAPH_STORE_PATH", "/var/lib/fleet.redb"),
            ("FLEETGRAPH_API_PORT", "not-a-port"),
            ("FLEETGRAPH_RATE_LIMIT", " 0 "),
            ("FLEETGRAPH_SCHEDULER_INTERVAL_MS", "250"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.store.path, PathBuf::from("/var/lib/fleet.redb"));
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.api.rate_limit, 0);
        assert_eq!(config.scheduler_interval(), Duration::from_millis(250));
    }
}
