//! Tile cache, download queue, asynchronous loading and the per-frame
//! quad-tree traversal.
//!
//! A [`TileCache`] owns every [`Tile`](starmap_tiles::Tile) of every imageset
//! it has touched. Each frame the host calls
//! [`draw_imageset`](TileCache::draw_imageset) for the visible imagesets and
//! then [`end_frame`](TileCache::end_frame), which applies finished downloads,
//! dispatches new ones nearest-first, evicts stale tiles and advances the
//! render generation.
//!
//! Fetching happens behind the [`TileLoader`] trait: [`ThreadedLoader`] runs a
//! worker pool over a [`Fetcher`], while [`ManualLoader`] leaves fetching to
//! the host (and to tests).

mod cache;
mod catalog;
mod error;
mod fetch;
mod loader;
mod stats;
mod traversal;

pub use cache::{QueueEntry, TileCache};
pub use catalog::{CatalogSink, MemoryCatalog};
pub use error::{FetchError, LoadError};
pub use fetch::{FileFetcher, Fetcher, HttpFetcher, RoutingFetcher};
pub use loader::{
    FetchOutcome, FetchRequest, FetchTarget, ManualLoader, ThreadedLoader, TileLoader,
};
pub use stats::FrameStats;
