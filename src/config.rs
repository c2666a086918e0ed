use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::LeavePolicy;

/// Process configuration read from `OFFICEFLOW_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub auto_approve_top_level: bool,
    pub top_level_fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        let policy = LeavePolicy::default();
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            auto_approve_top_level: policy.auto_approve_top_level,
            top_level_fallback: policy.top_level_fallback,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {key}={raw}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("OFFICEFLOW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "OFFICEFLOW_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "OFFICEFLOW_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            auto_approve_top_level: parsed(&lookup, "OFFICEFLOW_AUTO_APPROVE_TOP_LEVEL")
                .unwrap_or(defaults.auto_approve_top_level),
            top_level_fallback: parsed(&lookup, "OFFICEFLOW_TOP_LEVEL_FALLBACK")
                .unwrap_or(defaults.top_level_fallback),
        }
    }

    pub fn leave_policy(&self) -> LeavePolicy {
        LeavePolicy {
            auto_approve_top_level: self.auto_approve_top_level,
            top_level_fallback: self.top_level_fallback,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("officeflow.wal")
    }
}
