//! Asynchronous fetch-and-decode of tile payloads.
//!
//! The cache hands [`FetchRequest`]s to a [`TileLoader`] and collects
//! [`FetchOutcome`]s once per frame. Every accepted request produces exactly
//! one outcome, cancelled ones included, so the cache can account for its
//! download slots.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use dashmap::DashMap;
use starmap_config::NetworkConfig;
use starmap_tiles::{FitsDecoder, Payload, PayloadFormat, RequestKind, TileKey, decode_payload};

use crate::{FetchError, Fetcher, LoadError};

/// What a fetched payload is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchTarget {
    Tile { key: TileKey, kind: RequestKind },
    /// HiPS `properties` of the named imageset.
    Properties { imageset: String },
}

/// One fetch handed to a loader.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub target: FetchTarget,
    /// Dispatch the request belongs to; echoed back in the outcome.
    pub epoch: u64,
    pub url: String,
    pub format: PayloadFormat,
}

impl FetchRequest {
    #[must_use]
    pub fn tile_key(&self) -> Option<&TileKey> {
        match &self.target {
            FetchTarget::Tile { key, .. } => Some(key),
            FetchTarget::Properties { .. } => None,
        }
    }
}

/// The result of a [`FetchRequest`].
#[derive(Debug)]
pub struct FetchOutcome {
    pub request: FetchRequest,
    pub result: Result<Payload, LoadError>,
}

/// Runs fetches off the frame thread.
pub trait TileLoader {
    /// Queue a request. Hands the request back when the loader is saturated.
    #[allow(clippy::result_large_err)]
    fn submit(&self, request: FetchRequest) -> Result<(), FetchRequest>;

    /// Abandon the requests of `key` that have not run yet.
    fn cancel(&self, _key: &TileKey) {}

    /// Outcomes finished since the last call.
    fn drain(&self) -> Vec<FetchOutcome>;

    /// Accepted requests whose outcome has not been drained.
    fn in_flight(&self) -> u64;

    /// Stop accepting work and release worker resources.
    fn shutdown(&mut self) {}
}

struct Job {
    request: FetchRequest,
    cancelled: Arc<AtomicBool>,
}

/// Cancellation state of one tile's current dispatch.
struct ActiveRequest {
    epoch: u64,
    pending: usize,
    cancelled: Arc<AtomicBool>,
}

/// Worker-pool loader over a [`Fetcher`].
pub struct ThreadedLoader {
    job_sender: Option<Sender<Job>>,
    result_receiver: Receiver<FetchOutcome>,
    active: Arc<DashMap<TileKey, ActiveRequest>>,
    in_flight: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadedLoader {
    /// Spawn `threads` workers sharing one fetcher.
    ///
    /// At most `capacity` requests wait in the job queue; further submissions
    /// are rejected until workers catch up.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        fits: Option<Arc<dyn FitsDecoder>>,
        threads: usize,
        capacity: usize,
    ) -> Result<Self, LoadError> {
        let threads = threads.max(1);
        let capacity = capacity.max(1);
        let (job_sender, job_receiver) = bounded::<Job>(capacity);
        let (result_sender, result_receiver) = bounded::<FetchOutcome>(capacity + threads);
        let in_flight = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = job_receiver.clone();
            let sender = result_sender.clone();
            let fetcher = Arc::clone(&fetcher);
            let fits = fits.clone();

            let handle = std::thread::Builder::new()
                .name(format!("tile-loader-{i}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        let result = if job.cancelled.load(Ordering::Relaxed) {
                            Err(LoadError::Cancelled)
                        } else {
                            load(fetcher.as_ref(), fits.as_deref(), &job.request)
                        };
                        if sender
                            .send(FetchOutcome {
                                request: job.request,
                                result,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                })
                .map_err(LoadError::Spawn)?;
            workers.push(handle);
        }
        tracing::info!("Tile loader started with {} workers", threads);

        Ok(Self {
            job_sender: Some(job_sender),
            result_receiver,
            active: Arc::new(DashMap::new()),
            in_flight,
            workers,
        })
    }

    /// Size the pool from network settings; zero threads means one per core.
    pub fn with_config(
        fetcher: Arc<dyn Fetcher>,
        fits: Option<Arc<dyn FitsDecoder>>,
        network: &NetworkConfig,
        open_threads: u32,
    ) -> Result<Self, LoadError> {
        let threads = if network.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            network.worker_threads
        };
        let capacity = (open_threads.max(1) as usize) * 4;
        Self::new(fetcher, fits, threads, capacity)
    }

    fn cancel_flag(&self, request: &FetchRequest) -> Arc<AtomicBool> {
        let Some(key) = request.tile_key() else {
            return Arc::new(AtomicBool::new(false));
        };
        let mut entry = self.active.entry(key.clone()).or_insert_with(|| ActiveRequest {
            epoch: request.epoch,
            pending: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        if entry.epoch != request.epoch {
            *entry = ActiveRequest {
                epoch: request.epoch,
                pending: 0,
                cancelled: Arc::new(AtomicBool::new(false)),
            };
        }
        entry.pending += 1;
        Arc::clone(&entry.cancelled)
    }

    fn settle(&self, request: &FetchRequest) {
        let Some(key) = request.tile_key() else {
            return;
        };
        self.active.remove_if_mut(key, |_, active| {
            if active.epoch != request.epoch {
                return false;
            }
            active.pending = active.pending.saturating_sub(1);
            active.pending == 0
        });
    }
}

fn load(
    fetcher: &dyn Fetcher,
    fits: Option<&dyn FitsDecoder>,
    request: &FetchRequest,
) -> Result<Payload, LoadError> {
    let bytes = fetcher.fetch(&request.url)?;
    Ok(decode_payload(request.format, &bytes, fits)?)
}

impl TileLoader for ThreadedLoader {
    fn submit(&self, request: FetchRequest) -> Result<(), FetchRequest> {
        let Some(sender) = &self.job_sender else {
            return Err(request);
        };
        let cancelled = self.cancel_flag(&request);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        sender.try_send(Job { request, cancelled }).map_err(|err| {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            let request = err.into_inner().request;
            self.settle(&request);
            request
        })
    }

    fn cancel(&self, key: &TileKey) {
        if let Some((_, active)) = self.active.remove(key) {
            active.cancelled.store(true, Ordering::Relaxed);
        }
    }

    fn drain(&self) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.result_receiver.try_recv() {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            self.settle(&outcome.request);
            outcomes.push(outcome);
        }
        outcomes
    }

    fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn shutdown(&mut self) {
        let Some(sender) = self.job_sender.take() else {
            return;
        };
        for entry in self.active.iter() {
            entry.cancelled.store(true, Ordering::Relaxed);
        }
        drop(sender);
        // Workers may block on a full result channel; keep draining until
        // they have all exited.
        for handle in self.workers.drain(..) {
            while !handle.is_finished() {
                while self.result_receiver.try_recv().is_ok() {}
                std::thread::yield_now();
            }
            if handle.join().is_err() {
                tracing::error!("Tile loader worker panicked");
            }
        }
        while self.result_receiver.try_recv().is_ok() {}
        self.active.clear();
        self.in_flight.store(0, Ordering::Relaxed);
        tracing::info!("Tile loader stopped");
    }
}

impl Drop for ThreadedLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Default)]
struct ManualState {
    pending: Vec<FetchRequest>,
    finished: Vec<FetchOutcome>,
    in_flight: u64,
    capacity: Option<usize>,
}

/// Loader whose requests are completed by the caller.
///
/// Clones share state, so a test or host keeps one handle while the cache
/// owns another.
#[derive(Clone, Debug, Default)]
pub struct ManualLoader {
    state: Arc<Mutex<ManualState>>,
}

impl ManualLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject submissions while `capacity` requests are pending.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let loader = Self::default();
        loader.lock().capacity = Some(capacity);
        loader
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Requests submitted and not yet taken.
    #[must_use]
    pub fn pending(&self) -> Vec<FetchRequest> {
        self.lock().pending.clone()
    }

    pub fn take_pending(&self) -> Vec<FetchRequest> {
        std::mem::take(&mut self.lock().pending)
    }

    /// Decode `bytes` as the answer to `request`.
    pub fn complete(&self, request: &FetchRequest, bytes: &[u8]) {
        let result = decode_payload(request.format, bytes, None).map_err(LoadError::from);
        self.complete_with(request.clone(), result);
    }

    pub fn complete_with(&self, request: FetchRequest, result: Result<Payload, LoadError>) {
        let mut state = self.lock();
        state.pending.retain(|r| r != &request);
        state.finished.push(FetchOutcome { request, result });
    }

    pub fn fail(&self, request: &FetchRequest, error: FetchError) {
        self.complete_with(request.clone(), Err(error.into()));
    }
}

impl TileLoader for ManualLoader {
    fn submit(&self, request: FetchRequest) -> Result<(), FetchRequest> {
        let mut state = self.lock();
        if state.capacity.is_some_and(|cap| state.pending.len() >= cap) {
            return Err(request);
        }
        state.in_flight += 1;
        state.pending.push(request);
        Ok(())
    }

    fn cancel(&self, key: &TileKey) {
        let mut state = self.lock();
        let (cancelled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|r| r.tile_key() == Some(key));
        state.pending = kept;
        state
            .finished
            .extend(cancelled.into_iter().map(|request| FetchOutcome {
                request,
                result: Err(LoadError::Cancelled),
            }));
    }

    fn drain(&self) -> Vec<FetchOutcome> {
        let mut state = self.lock();
        let outcomes = std::mem::take(&mut state.finished);
        state.in_flight = state.in_flight.saturating_sub(outcomes.len() as u64);
        outcomes
    }

    fn in_flight(&self) -> u64 {
        self.lock().in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use starmap_imageset::Imageset;
    use starmap_tiles::QuadPath;

    struct MapFetcher;

    impl Fetcher for MapFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            match url {
                "mem://dem" => Ok(vec![0; 17 * 17 * 4]),
                "mem://slow" => {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(vec![0; 17 * 17 * 4])
                }
                _ => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    fn key(x: u32) -> TileKey {
        let set = Imageset::dss();
        let path = QuadPath::from_address(1, x, 0);
        TileKey::new(&set, 1, x, 0, &path)
    }

    fn request(x: u32, epoch: u64, url: &str) -> FetchRequest {
        FetchRequest {
            target: FetchTarget::Tile {
                key: key(x),
                kind: RequestKind::Elevation,
            },
            epoch,
            url: url.to_string(),
            format: PayloadFormat::Elevation { grid_size: 17 },
        }
    }

    fn drain_all(loader: &ThreadedLoader, expected: usize) -> Vec<FetchOutcome> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut outcomes = Vec::new();
        while outcomes.len() < expected && Instant::now() < deadline {
            outcomes.extend(loader.drain());
            std::thread::sleep(Duration::from_millis(1));
        }
        outcomes
    }

    #[test]
    fn test_threaded_loader_fetches_and_decodes() {
        let loader = ThreadedLoader::new(Arc::new(MapFetcher), None, 2, 8).unwrap();
        loader.submit(request(0, 1, "mem://dem")).unwrap();
        loader.submit(request(1, 2, "mem://missing")).unwrap();
        let mut outcomes = drain_all(&loader, 2);
        outcomes.sort_by_key(|o| o.request.epoch);
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].result, Ok(Payload::Elevation(_))));
        assert!(matches!(
            outcomes[1].result,
            Err(LoadError::Fetch(FetchError::Status { status: 404, .. }))
        ));
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn test_threaded_loader_rejects_when_full() {
        let loader = ThreadedLoader::new(Arc::new(MapFetcher), None, 1, 1).unwrap();
        let mut rejected = 0;
        for x in 0..8 {
            if loader.submit(request(x, u64::from(x) + 1, "mem://slow")).is_err() {
                rejected += 1;
            }
        }
        assert!(rejected > 0);
        let accepted = 8 - rejected;
        assert_eq!(drain_all(&loader, accepted).len(), accepted);
    }

    #[test]
    fn test_cancelled_request_still_reports() {
        let loader = ThreadedLoader::new(Arc::new(MapFetcher), None, 1, 8).unwrap();
        loader.submit(request(0, 1, "mem://slow")).unwrap();
        loader.submit(request(1, 2, "mem://slow")).unwrap();
        loader.cancel(&key(1));
        let outcomes = drain_all(&loader, 2);
        let second = outcomes.iter().find(|o| o.request.epoch == 2).unwrap();
        assert!(matches!(second.result, Err(LoadError::Cancelled)));
    }

    #[test]
    fn test_shutdown_stops_accepting() {
        let mut loader = ThreadedLoader::new(Arc::new(MapFetcher), None, 2, 4).unwrap();
        loader.submit(request(0, 1, "mem://slow")).unwrap();
        loader.shutdown();
        assert!(loader.submit(request(1, 2, "mem://dem")).is_err());
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn test_manual_loader_round_trip() {
        let loader = ManualLoader::with_capacity(1);
        let handle = loader.clone();
        loader.submit(request(0, 1, "mem://dem")).unwrap();
        assert!(loader.submit(request(1, 2, "mem://dem")).is_err());
        assert_eq!(loader.in_flight(), 1);

        let pending = handle.take_pending();
        handle.complete(&pending[0], &[0; 17 * 17 * 4]);
        let outcomes = loader.drain();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn test_manual_loader_cancel() {
        let loader = ManualLoader::new();
        loader.submit(request(0, 1, "a")).unwrap();
        loader.submit(request(1, 2, "b")).unwrap();
        loader.cancel(&key(0));
        assert_eq!(loader.pending().len(), 1);
        let outcomes = loader.drain();
        assert!(matches!(outcomes[0].result, Err(LoadError::Cancelled)));
    }
}
