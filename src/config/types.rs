use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Frame pacing for the tick source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay between a flush request and the flush (default: 16, about one
    /// 60 Hz frame).
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

/// Store persistence and notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key under which the whole state tree is persisted (default: "storeState").
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Quiet period before namespace listeners fire (default: 50).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Save after every notification dispatch (default: false).
    #[serde(default)]
    pub autosave: bool,
    /// Top-level key holding the migration marker (default: "__version").
    #[serde(default = "default_version_key")]
    pub version_key: String,
    /// Directory for file-backed storage. `None` uses the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl SchedulerConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl StoreConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_storage_key() -> String {
    "storeState".to_string()
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_version_key() -> String {
    "__version".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            debounce_ms: default_debounce_ms(),
            autosave: false,
            version_key: default_version_key(),
            data_dir: None,
        }
    }
}
