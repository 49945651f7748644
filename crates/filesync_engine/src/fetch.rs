//! Fetcher contract and local implementations.

use crate::error::{FetchError, FetchResult};
use crate::http::{BlockingHttpClient, HttpClient, HttpFetcher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A readable byte stream produced by a fetcher.
pub type ByteStream = Box<dyn Read + Send>;

/// Opens source locations as byte streams.
///
/// This trait abstracts the transport, allowing for different
/// implementations (local files, HTTP, mock for testing, etc.).
pub trait Fetcher: Send + Sync {
    /// Opens `location` for streaming.
    fn open(&self, location: &str) -> FetchResult<ByteStream>;
}

impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    fn open(&self, location: &str) -> FetchResult<ByteStream> {
        (**self).open(location)
    }
}

/// Returns the lowercase scheme of `location`, if it has one.
pub fn scheme_of(location: &str) -> Option<String> {
    let (scheme, _) = location.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| scheme.to_ascii_lowercase())
}

/// Reads `file://` URLs and absolute paths from the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl FileFetcher {
    /// Creates a new file fetcher.
    pub fn new() -> Self {
        Self
    }
}

impl Fetcher for FileFetcher {
    fn open(&self, location: &str) -> FetchResult<ByteStream> {
        let path = match scheme_of(location).as_deref() {
            Some("file") => location
                .split_once("://")
                .map_or(location, |(_, rest)| rest),
            Some(_) => return Err(FetchError::UnsupportedScheme(location.to_string())),
            None => location,
        };

        if !Path::new(path).is_absolute() {
            return Err(FetchError::InvalidLocation {
                location: location.to_string(),
                reason: "local sources must be absolute paths".into(),
            });
        }

        match File::open(path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(location.to_string()))
            }
            Err(e) => Err(FetchError::Io {
                location: location.to_string(),
                source: e,
            }),
        }
    }
}

/// Routes each location to the fetcher for its scheme.
///
/// `http://` goes over [`HttpFetcher`]; `file://` and bare absolute
/// paths go to [`FileFetcher`]. Anything else is unsupported.
pub struct SchemeFetcher<C: HttpClient = BlockingHttpClient> {
    file: FileFetcher,
    http: HttpFetcher<C>,
}

impl SchemeFetcher<BlockingHttpClient> {
    /// Creates a fetcher whose network requests time out after `timeout`.
    pub fn with_timeout(timeout: Duration) -> FetchResult<Self> {
        Ok(Self::new(BlockingHttpClient::new(timeout)?))
    }
}

impl<C: HttpClient> SchemeFetcher<C> {
    /// Creates a fetcher over the given HTTP client.
    pub fn new(client: C) -> Self {
        Self {
            file: FileFetcher::new(),
            http: HttpFetcher::new(client),
        }
    }
}

impl<C: HttpClient> Fetcher for SchemeFetcher<C> {
    fn open(&self, location: &str) -> FetchResult<ByteStream> {
        match scheme_of(location).as_deref() {
            Some("http") => self.http.open(location),
            Some("file") | None => self.file.open(location),
            Some(_) => Err(FetchError::UnsupportedScheme(location.to_string())),
        }
    }
}

/// A scripted fetcher for testing.
#[derive(Debug, Default)]
pub struct MockFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    truncated: Mutex<HashSet<String>>,
    opened: Mutex<Vec<String>>,
}

impl MockFetcher {
    /// Creates a fetcher that knows no locations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` at `location`.
    pub fn serve(&self, location: &str, body: impl Into<Vec<u8>>) {
        self.bodies.lock().insert(location.to_string(), body.into());
    }

    /// Makes `open` fail for `location` until healed.
    pub fn fail(&self, location: &str) {
        self.failing.lock().insert(location.to_string());
    }

    /// Makes the stream for `location` break after the first byte.
    pub fn truncate(&self, location: &str) {
        self.truncated.lock().insert(location.to_string());
    }

    /// Removes scripted failures for `location`.
    pub fn heal(&self, location: &str) {
        self.failing.lock().remove(location);
        self.truncated.lock().remove(location);
    }

    /// Returns every location opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl Fetcher for MockFetcher {
    fn open(&self, location: &str) -> FetchResult<ByteStream> {
        self.opened.lock().push(location.to_string());

        if self.failing.lock().contains(location) {
            return Err(FetchError::transport_retryable(format!(
                "scripted failure for {location}"
            )));
        }

        let body = self
            .bodies
            .lock()
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(location.to_string()))?;

        if self.truncated.lock().contains(location) {
            return Ok(Box::new(BrokenStream { first: body.first().copied() }));
        }
        Ok(Box::new(Cursor::new(body)))
    }
}

/// Yields at most one byte, then fails like a dropped connection.
struct BrokenStream {
    first: Option<u8>,
}

impl Read for BrokenStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match (self.first.take(), buf.first_mut()) {
            (Some(byte), Some(slot)) => {
                *slot = byte;
                Ok(1)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_all(mut stream: ByteStream) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn scheme_detection() {
        assert_eq!(scheme_of("http://h/x").as_deref(), Some("http"));
        assert_eq!(scheme_of("FILE:///x").as_deref(), Some("file"));
        assert_eq!(scheme_of("/plain/path"), None);
        assert_eq!(scheme_of("://nothing"), None);
    }

    #[test]
    fn file_fetcher_reads_paths_and_urls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("src.bin");
        std::fs::write(&path, b"content").unwrap();

        let fetcher = FileFetcher::new();
        let plain = fetcher.open(path.to_str().unwrap()).unwrap();
        assert_eq!(read_all(plain).unwrap(), b"content");

        let url = format!("file://{}", path.display());
        let via_url = fetcher.open(&url).unwrap();
        assert_eq!(read_all(via_url).unwrap(), b"content");
    }

    #[test]
    fn file_fetcher_missing_source() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = FileFetcher::new().open(missing.to_str().unwrap());
        assert!(matches!(result, Err(FetchError::NotFound(_))));
    }

    #[test]
    fn file_fetcher_rejects_relative_paths() {
        let result = FileFetcher::new().open("relative/path");
        assert!(matches!(result, Err(FetchError::InvalidLocation { .. })));
    }

    #[test]
    fn scheme_fetcher_rejects_unknown_schemes() {
        let fetcher = SchemeFetcher::with_timeout(Duration::from_secs(1)).unwrap();
        let result = fetcher.open("ftp://host/file");
        assert!(matches!(result, Err(FetchError::UnsupportedScheme(_))));
    }

    #[test]
    fn mock_fetcher_scripts() {
        let fetcher = MockFetcher::new();
        fetcher.serve("u1", "one");
        fetcher.fail("u2");

        assert_eq!(read_all(fetcher.open("u1").unwrap()).unwrap(), b"one");
        assert!(fetcher.open("u2").is_err());
        assert!(matches!(fetcher.open("u3"), Err(FetchError::NotFound(_))));
        assert_eq!(fetcher.opened(), vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn truncated_stream_errors_mid_copy() {
        let fetcher = MockFetcher::new();
        fetcher.serve("u", "abcdef");
        fetcher.truncate("u");

        let err = read_all(fetcher.open("u").unwrap()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
