//! Byte sources for tile requests.

use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rustc_hash::FxHasher;
use starmap_config::NetworkConfig;

use crate::FetchError;

/// Retrieves the bytes behind a URL. Called from loader worker threads.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP(S) fetcher with an optional on-disk response cache.
pub struct HttpFetcher {
    agent: ureq::Agent,
    cache_dir: Option<PathBuf>,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(config: &NetworkConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .user_agent(&config.user_agent)
            .build();
        let cache_dir = if config.disk_cache {
            dirs::cache_dir().map(|dir| dir.join("starmap").join("tiles"))
        } else {
            None
        };
        Self { agent, cache_dir }
    }

    /// Cache responses under `dir` instead of the platform cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    fn cache_path(&self, url: &str) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let mut hasher = FxHasher::default();
        url.hash(&mut hasher);
        Some(dir.join(format!("{:016x}", hasher.finish())))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(status, _) => FetchError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => FetchError::Network {
                url: url.to_string(),
                reason: transport.to_string(),
            },
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| FetchError::Network {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(bytes)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let cached = self.cache_path(url);
        if let Some(path) = &cached
            && let Ok(bytes) = std::fs::read(path)
        {
            tracing::trace!("Disk cache hit for {}", url);
            return Ok(bytes);
        }

        let bytes = self.download(url)?;

        if let Some(path) = cached {
            // A failed cache write only costs a re-download later.
            if let Err(err) = write_cache_entry(&path, &bytes) {
                tracing::debug!("Could not cache {}: {}", url, err);
            }
        }
        Ok(bytes)
    }
}

fn write_cache_entry(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("part");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)
}

/// Reads `file://` URLs and bare paths, optionally relative to a root.
#[derive(Clone, Debug, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    #[must_use]
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        let path = match url.strip_prefix("file://") {
            Some(rest) => rest,
            None if url.contains("://") => {
                return Err(FetchError::UnsupportedScheme(url.to_string()));
            }
            None => url,
        };
        let path = Path::new(path);
        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        })
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(url)?;
        std::fs::read(&path).map_err(|source| FetchError::Io { path, source })
    }
}

/// Sends `http(s)://` URLs to the network and everything else to disk.
pub struct RoutingFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl RoutingFetcher {
    #[must_use]
    pub fn new(http: HttpFetcher, file: FileFetcher) -> Self {
        Self { http, file }
    }
}

impl Fetcher for RoutingFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.fetch(url)
        } else {
            self.file.fetch(url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serve `body` for `/ok` and 404 otherwise; returns the base URL and a
    /// request counter.
    fn serve(body: &'static [u8], requests: usize) -> (String, Arc<AtomicUsize>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        std::thread::spawn(move || {
            for request in server.incoming_requests().take(requests) {
                counter.fetch_add(1, Ordering::SeqCst);
                let response = if request.url() == "/ok" {
                    tiny_http::Response::from_data(body.to_vec())
                } else {
                    tiny_http::Response::from_data(Vec::new()).with_status_code(404)
                };
                let _ = request.respond(response);
            }
        });
        (format!("http://127.0.0.1:{port}"), hits)
    }

    fn uncached() -> HttpFetcher {
        HttpFetcher::new(&NetworkConfig {
            disk_cache: false,
            ..NetworkConfig::default()
        })
    }

    #[test]
    fn test_http_fetch_and_status() {
        let (base, _) = serve(b"tile-bytes", 2);
        let fetcher = uncached();
        assert_eq!(fetcher.fetch(&format!("{base}/ok")).unwrap(), b"tile-bytes");
        match fetcher.fetch(&format!("{base}/missing")) {
            Err(FetchError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn test_disk_cache_serves_repeat_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (base, hits) = serve(b"cached", 2);
        let fetcher = uncached().with_cache_dir(Some(dir.path().to_path_buf()));
        let url = format!("{base}/ok");
        assert_eq!(fetcher.fetch(&url).unwrap(), b"cached");
        assert_eq!(fetcher.fetch(&url).unwrap(), b"cached");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unreachable_host_is_network_error() {
        let fetcher = uncached();
        let err = fetcher.fetch("http://127.0.0.1:1/tile.png").unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
    }

    #[test]
    fn test_file_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"abc").unwrap();
        let fetcher = FileFetcher::new(Some(dir.path().to_path_buf()));
        assert_eq!(fetcher.fetch("a.bin").unwrap(), b"abc");
        let absolute = format!("file://{}", dir.path().join("a.bin").display());
        assert_eq!(fetcher.fetch(&absolute).unwrap(), b"abc");
        assert!(matches!(
            fetcher.fetch("missing.bin"),
            Err(FetchError::Io { .. })
        ));
        assert!(matches!(
            fetcher.fetch("ftp://host/a.bin"),
            Err(FetchError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_routing_fetcher_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.png"), b"png").unwrap();
        let fetcher = RoutingFetcher::new(uncached(), FileFetcher::new(Some(dir.path().into())));
        assert_eq!(fetcher.fetch("t.png").unwrap(), b"png");
    }
}
