//! Process configuration, read once from `TRAINBOOK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::RoomChangePolicy;

pub const BIND: &str = "TRAINBOOK_BIND";
pub const PORT: &str = "TRAINBOOK_PORT";
pub const DATA_DIR: &str = "TRAINBOOK_DATA_DIR";
pub const METRICS_PORT: &str = "TRAINBOOK_METRICS_PORT";
pub const COMPACT_THRESHOLD: &str = "TRAINBOOK_COMPACT_THRESHOLD";
pub const MOVE_OCCUPANCY_ON_UPDATE: &str = "TRAINBOOK_MOVE_OCCUPANCY_ON_UPDATE";

const WAL_FILE: &str = "trainbook.wal";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{var}: cannot parse {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub room_change: RoomChangePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            room_change: RoomChangePolicy::KeepOccupancy,
        }
    }
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError { var, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their
    /// defaults; set but unparseable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(bind) = lookup(BIND) {
            config.bind = bind;
        }
        if let Some(port) = lookup(PORT) {
            config.port = parse(PORT, port)?;
        }
        if let Some(dir) = lookup(DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup(METRICS_PORT) {
            config.metrics_port = Some(parse(METRICS_PORT, port)?);
        }
        if let Some(threshold) = lookup(COMPACT_THRESHOLD) {
            config.compact_threshold = parse(COMPACT_THRESHOLD, threshold)?;
        }
        if let Some(flag) = lookup(MOVE_OCCUPANCY_ON_UPDATE) {
            config.room_change = if parse(MOVE_OCCUPANCY_ON_UPDATE, flag)? {
                RoomChangePolicy::MoveOccupancy
            } else {
                RoomChangePolicy::KeepOccupancy
            };
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }
}
