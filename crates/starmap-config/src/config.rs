//! Configuration sections, their defaults, and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Render target size and camera field of view.
    pub viewport: ViewportConfig,
    /// Tile cache, download queue and eviction tuning.
    pub cache: CacheConfig,
    /// Level-of-detail selection.
    pub lod: LodConfig,
    /// Tile fetching.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Render target configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewportConfig {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Vertical field of view in degrees.
    pub fov_degrees: f64,
}

/// Tile cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Concurrent tile requests allowed at once.
    pub open_threads: u32,
    /// Registry size at which not-ready tiles start being purged.
    pub max_tile_cache_size: usize,
    /// Ready tiles kept before the oldest are purged.
    pub max_ready_to_render_size: usize,
    /// Frames a tile may go un-rendered before it becomes evictable.
    pub staleness_generations: u64,
    /// Upper bound on not-ready tiles purged per eviction pass.
    pub max_not_ready_purge: usize,
    /// Weight added to a queued request each time the traversal asks for it.
    pub request_hit_value: u32,
}

/// Level-of-detail configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodConfig {
    /// A tile is subdivided once its longest projected edge exceeds this many pixels.
    pub screen_threshold_px: f64,
}

/// Tile fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Loader worker threads. 0 means one per CPU core.
    pub worker_threads: usize,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// User agent sent with HTTP requests.
    pub user_agent: String,
    /// Keep fetched tiles in the user cache directory.
    pub disk_cache: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log a statistics line every N frames (0 disables).
    pub stats_interval_frames: u32,
}

// --- Default implementations ---

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fov_degrees: 60.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            open_threads: 8,
            max_tile_cache_size: 800,
            max_ready_to_render_size: 200,
            staleness_generations: 10,
            max_not_ready_purge: 20,
            request_hit_value: 256,
        }
    }
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            screen_threshold_px: 300.0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            timeout_seconds: 30,
            user_agent: format!("starmap/{}", env!("CARGO_PKG_VERSION")),
            disk_cache: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval_frames: 60,
        }
    }
}

/// Platform config directory for starmap (`<config_dir>/starmap`).
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("starmap"))
        .ok_or(ConfigError::NoConfigDir)
}

/// File name inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

impl Config {
    fn read_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }

    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// if the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let defaults = Self::default();
            defaults.save(config_dir)?;
            log::info!("Wrote default settings to {}", path.display());
            return Ok(defaults);
        }
        let config = Self::read_from(&path)?;
        log::info!("Settings read from {}", path.display());
        Ok(config)
    }

    /// Write as pretty RON, creating `config_dir` if needed.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .separate_tuple_members(true);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;
        std::fs::write(config_dir.join(CONFIG_FILE), text).map_err(ConfigError::WriteError)
    }

    /// Re-read the file; `Some` only when it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read_from(&config_dir.join(CONFIG_FILE))?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Settings changed on disk");
        Ok(Some(fresh))
    }
}
