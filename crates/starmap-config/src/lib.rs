//! Runtime configuration for the tile engine.
//!
//! Settings persist to disk as `config.ron`, can be overridden from the
//! command line via clap, and support hot-reload detection. Unknown or
//! missing fields fall back to defaults so older files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE, CacheConfig, Config, DebugConfig, LodConfig, NetworkConfig, ViewportConfig,
    default_config_dir,
};
pub use error::ConfigError;
