//! Streams one imageset through the tile cache under a scripted camera.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. Frames render offscreen on a headless GPU when one is available;
//! with `--no-gpu` (or without an adapter) draws are only recorded.
//!
//! `cargo run -p starmap-demo -- --imageset osm --frames 300`

mod camera;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use starmap_cache::{
    FileFetcher, HttpFetcher, MemoryCatalog, RoutingFetcher, ThreadedLoader, TileCache,
};
use starmap_config::{CliArgs, Config, default_config_dir};
use starmap_imageset::{Imageset, ImagesetLibrary};
use starmap_math::Viewport;
use starmap_render::{GpuContext, OffscreenTarget, WgpuTileRenderer};
use starmap_tiles::{RecordingRenderer, RenderContext, TileRenderer};
use tracing::{error, info, warn};

use crate::camera::OrbitCamera;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Where frames go.
enum Backend {
    Gpu {
        renderer: WgpuTileRenderer,
        target: OffscreenTarget,
    },
    Recording(RecordingRenderer),
}

impl Backend {
    fn create(config: &Config, no_gpu: bool) -> Self {
        if no_gpu {
            return Self::Recording(RecordingRenderer::new());
        }
        match GpuContext::headless_blocking() {
            Ok(gpu) => {
                let format = wgpu::TextureFormat::Rgba8UnormSrgb;
                let renderer = WgpuTileRenderer::new(&gpu, format);
                let target = OffscreenTarget::new(
                    renderer.device(),
                    config.viewport.width,
                    config.viewport.height,
                    format,
                );
                Self::Gpu { renderer, target }
            }
            Err(e) => {
                warn!("GPU unavailable ({e}), recording draws instead");
                Self::Recording(RecordingRenderer::new())
            }
        }
    }

    fn tiles(&mut self) -> &mut dyn TileRenderer {
        match self {
            Self::Gpu { renderer, .. } => renderer,
            Self::Recording(recording) => recording,
        }
    }

    /// Submit the frame; returns the number of draws.
    fn present(&mut self, ctx: &RenderContext) -> usize {
        match self {
            Self::Gpu { renderer, target } => renderer.render(ctx.wvp.as_mat4(), &target.view),
            Self::Recording(recording) => recording.take_draws().len(),
        }
    }
}

fn resolve_imageset(args: &CliArgs) -> Option<Arc<Imageset>> {
    if let Some(path) = &args.library {
        match ImagesetLibrary::load(path) {
            Ok(library) => {
                if let Some(set) = library.get(&args.imageset) {
                    return Some(set);
                }
                warn!(
                    "Imageset '{}' not in {}, trying presets",
                    args.imageset,
                    path.display()
                );
            }
            Err(e) => error!("Failed to load library {}: {e}", path.display()),
        }
    }
    Imageset::preset(&args.imageset).map(Arc::new)
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(|| default_config_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    starmap_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let Some(imageset) = resolve_imageset(&args) else {
        error!("Unknown imageset '{}'", args.imageset);
        std::process::exit(1);
    };
    info!(
        "Streaming '{}' ({:?}, {} levels)",
        imageset.name,
        imageset.projection,
        imageset.max_level()
    );

    let file_root = args
        .library
        .as_ref()
        .and_then(|path| path.parent())
        .map(PathBuf::from);
    let fetcher = Arc::new(RoutingFetcher::new(
        HttpFetcher::new(&config.network),
        FileFetcher::new(file_root),
    ));
    let loader = match ThreadedLoader::with_config(
        fetcher,
        None,
        &config.network,
        config.cache.open_threads,
    ) {
        Ok(loader) => loader,
        Err(e) => {
            error!("Failed to start tile loader: {e}");
            std::process::exit(1);
        }
    };

    let mut cache = TileCache::new(config.cache.clone(), loader);
    // HiPS metadata arrives lazily, so whether this is a catalog is not
    // known yet. The cache only feeds the sink from catalog tiles.
    let catalog = MemoryCatalog::new();
    cache.set_catalog_sink(Box::new(catalog.clone()));

    let mut backend = Backend::create(&config, args.no_gpu);
    let camera = OrbitCamera::for_dataset(imageset.data_set_type);
    let viewport = Viewport::new(
        f64::from(config.viewport.width),
        f64::from(config.viewport.height),
    );
    let interval = config.debug.stats_interval_frames.max(1);
    let started = Instant::now();

    for frame in 0..args.frames {
        let ctx = camera.context(
            frame,
            viewport,
            config.viewport.fov_degrees,
            config.lod.screen_threshold_px,
        );
        cache.draw_imageset(&imageset, &ctx, backend.tiles(), 1.0);
        cache.end_frame(&ctx, backend.tiles());
        let drawn = backend.present(&ctx);

        if (frame + 1) % interval == 0 {
            let stats = cache.stats();
            info!(
                "frame {}: drawn={} in_view={} queued={} dispatched={} completed={} failed={} purged={} tiles={} ready={} free_slots={}",
                frame + 1,
                drawn,
                stats.in_view,
                stats.queued,
                stats.dispatched,
                stats.completed,
                stats.failed,
                stats.purged,
                stats.registry_size,
                stats.ready_count,
                stats.open_threads
            );
            if imageset.is_catalog() {
                info!(
                    "catalog: {} tiles, {} rows shown",
                    catalog.len(),
                    catalog.total_rows()
                );
            }
        }
        std::thread::sleep(FRAME_INTERVAL);
    }

    cache.shutdown(backend.tiles());
    info!(
        "Ran {} frames in {:.1}s",
        args.frames,
        started.elapsed().as_secs_f64()
    );
}
