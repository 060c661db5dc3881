use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::{DEFAULT_OPERATING_HOURS_PER_DAY, EngineConfig};
use crate::error::{Error, Result};

/// Process configuration, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
    pub operating_hours_per_day: u32,
    pub metrics_port: Option<u16>,
    /// JSON array of rooms loaded at startup.
    pub rooms_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7411,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            operating_hours_per_day: DEFAULT_OPERATING_HOURS_PER_DAY,
            metrics_port: None,
            rooms_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            bind: get("ROOMBOOK_BIND").unwrap_or(defaults.bind),
            port: parsed(&get, "ROOMBOOK_PORT").unwrap_or(defaults.port),
            data_dir: get("ROOMBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            max_connections: parsed(&get, "ROOMBOOK_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            operating_hours_per_day: parsed(&get, "ROOMBOOK_OPERATING_HOURS")
                .unwrap_or(defaults.operating_hours_per_day),
            metrics_port: parsed(&get, "ROOMBOOK_METRICS_PORT"),
            rooms_file: get("ROOMBOOK_ROOMS_FILE").map(PathBuf::from),
        };

        if config.operating_hours_per_day == 0 || config.operating_hours_per_day > 24 {
            return Err(Error::ValidationError(
                "ROOMBOOK_OPERATING_HOURS must be between 1 and 24",
            ));
        }
        if config.max_connections == 0 {
            return Err(Error::ValidationError("ROOMBOOK_MAX_CONNECTIONS must be positive"));
        }
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            operating_hours_per_day: self.operating_hours_per_day,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}
