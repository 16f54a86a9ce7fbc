//! Runtime configuration read from `~/.config/weft/config.toml`.

pub mod loader;
pub mod types;

pub use loader::ConfigError;
pub use types::{RuntimeConfig, SchedulerConfig, StoreConfig};
