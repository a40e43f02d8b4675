//! Host Configuration
//!
//! Defaults, merged with an optional `Periscope.toml` and `PERISCOPE_*`
//! environment variables. CLI flags override both.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::types::{Error, Result};

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-plugin backlog capacity before oldest entries are dropped
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Quiet period of the session flush debouncer, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Time budget of a backlog drain before it yields, in milliseconds
    #[serde(default = "default_idle_budget_ms")]
    pub idle_budget_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9700
}

fn default_max_queue_size() -> usize {
    periscope_runtime::DEFAULT_MAX_QUEUE_SIZE
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_idle_budget_ms() -> u64 {
    16
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_queue_size: default_max_queue_size(),
            debounce_ms: default_debounce_ms(),
            idle_budget_ms: default_idle_budget_ms(),
        }
    }
}

impl HostConfig {
    /// Load configuration: defaults, then the TOML file (when present),
    /// then `PERISCOPE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(HostConfig::default()));
        figment = match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment.merge(Toml::file("Periscope.toml")),
        };
        figment
            .merge(Env::prefixed("PERISCOPE_"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Debounce quiet period as a duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Drain time budget as a duration
    pub fn idle_budget(&self) -> Duration {
        Duration::from_millis(self.idle_budget_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.port, 9700);
        assert_eq!(config.max_queue_size, 5000);
        assert_eq!(config.debounce(), Duration::from_millis(200));
        assert_eq!(config.idle_budget(), Duration::from_millis(16));
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "port = 9999\nmax_queue_size = 100").unwrap();

        let config = HostConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.max_queue_size, 100);
        // Untouched keys keep their defaults.
        assert_eq!(config.debounce_ms, 200);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = HostConfig::load(Some(Path::new("/nonexistent/Periscope.toml"))).unwrap();
        assert_eq!(config.port, 9700);
    }
}
