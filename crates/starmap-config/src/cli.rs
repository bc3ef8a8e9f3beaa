//! Command-line arguments shared by starmap binaries.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Starmap command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "starmap", about = "Streams a tiled sky or planet imageset")]
pub struct CliArgs {
    /// Viewport width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Viewport height in pixels.
    #[arg(long)]
    pub height: Option<u32>,

    /// Concurrent tile requests.
    #[arg(long)]
    pub open_threads: Option<u32>,

    /// Registry size at which not-ready tiles are purged.
    #[arg(long)]
    pub max_tile_cache_size: Option<usize>,

    /// LOD subdivision threshold in pixels.
    #[arg(long)]
    pub lod_threshold: Option<f64>,

    /// Disable the on-disk tile cache.
    #[arg(long)]
    pub no_disk_cache: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// RON imageset library to load.
    #[arg(long)]
    pub library: Option<PathBuf>,

    /// Imageset to display: a name from the library, or a built-in preset.
    #[arg(long, default_value = "dss")]
    pub imageset: String,

    /// Number of frames to run.
    #[arg(long, default_value_t = 600)]
    pub frames: u32,

    /// Record draws instead of rendering on a GPU.
    #[arg(long)]
    pub no_gpu: bool,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.viewport.width = w;
        }
        if let Some(h) = args.height {
            self.viewport.height = h;
        }
        if let Some(n) = args.open_threads {
            self.cache.open_threads = n;
        }
        if let Some(n) = args.max_tile_cache_size {
            self.cache.max_tile_cache_size = n;
        }
        if let Some(px) = args.lod_threshold {
            self.lod.screen_threshold_px = px;
        }
        if args.no_disk_cache {
            self.network.disk_cache = false;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            width: Some(1920),
            open_threads: Some(2),
            no_disk_cache: true,
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.viewport.width, 1920);
        assert_eq!(config.cache.open_threads, 2);
        assert!(!config.network.disk_cache);
        // Non-overridden fields retain defaults
        assert_eq!(config.viewport.height, 720);
        assert_eq!(config.cache.max_tile_cache_size, 800);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "starmap",
            "--imageset",
            "blue-marble",
            "--frames",
            "10",
            "--lod-threshold",
            "256",
            "--no-gpu",
        ]);
        assert_eq!(args.imageset, "blue-marble");
        assert_eq!(args.frames, 10);
        assert_eq!(args.lod_threshold, Some(256.0));
        assert!(args.no_gpu);
    }
}
