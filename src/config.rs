use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineOptions;

/// Process configuration, read from `STAFFSLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub lock_wait: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            lock_wait: EngineOptions::default().lock_wait,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unparsable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        Self {
            bind: lookup("STAFFSLOT_BIND").unwrap_or(defaults.bind),
            port: lookup("STAFFSLOT_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("STAFFSLOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_wait: number("STAFFSLOT_LOCK_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_wait),
            compact_threshold: number("STAFFSLOT_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: lookup("STAFFSLOT_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            lock_wait: self.lock_wait,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("staffslot.wal")
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_map(&[]);
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr(), "0.0.0.0:8080");
        assert_eq!(config.lock_wait, Duration::from_millis(250));
    }

    #[test]
    fn reads_overrides() {
        let config = from_map(&[
            ("STAFFSLOT_PORT", "9000"),
            ("STAFFSLOT_DATA_DIR", "/var/lib/staffslot"),
            ("STAFFSLOT_LOCK_WAIT_MS", "50"),
            ("STAFFSLOT_METRICS_PORT", "9100"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/staffslot/staffslot.wal"));
        assert_eq!(config.engine_options().lock_wait, Duration::from_millis(50));
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let config = from_map(&[("STAFFSLOT_PORT", "http"), ("STAFFSLOT_COMPACT_THRESHOLD", "-1")]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.compact_threshold, 1000);
    }
}
