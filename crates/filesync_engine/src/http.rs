//! HTTP fetch implementation.
//!
//! The actual HTTP client is abstracted via a trait so the reconciler can
//! run over any client. [`BlockingHttpClient`] is the production client,
//! built on `reqwest`'s blocking API.

use crate::error::{FetchError, FetchResult};
use crate::fetch::{scheme_of, ByteStream, Fetcher};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;

/// Most redirects followed for one request.
const MAX_REDIRECTS: usize = 10;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Issues a `GET` and returns the response body as a stream.
    ///
    /// Implementations map a missing resource to [`FetchError::NotFound`]
    /// and any other non-success status to [`FetchError::Http`].
    fn get(&self, url: &str) -> FetchResult<ByteStream>;
}

/// Fetcher for `http://` locations.
pub struct HttpFetcher<C: HttpClient> {
    client: C,
}

impl<C: HttpClient> HttpFetcher<C> {
    /// Creates a new HTTP fetcher.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: HttpClient> Fetcher for HttpFetcher<C> {
    fn open(&self, location: &str) -> FetchResult<ByteStream> {
        match scheme_of(location).as_deref() {
            Some("http") => self.client.get(location),
            _ => Err(FetchError::UnsupportedScheme(location.to_string())),
        }
    }
}

/// HTTP client over `reqwest::blocking`, plain HTTP only.
///
/// Follows up to ten redirects. Connecting and the whole exchange,
/// body included, are bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct BlockingHttpClient {
    client: Client,
    timeout: Duration,
}

impl BlockingHttpClient {
    /// Creates a client with the given timeout.
    pub fn new(timeout: Duration) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("filesync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::transport_fatal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl HttpClient for BlockingHttpClient {
    fn get(&self, url: &str) -> FetchResult<ByteStream> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| map_request_error(url, e))?;

        match response.status() {
            status if status.is_success() => Ok(Box::new(response)),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(FetchError::NotFound(url.to_string())),
            status => Err(FetchError::Http {
                location: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

fn map_request_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_builder() {
        FetchError::InvalidLocation {
            location: url.to_string(),
            reason: err.to_string(),
        }
    } else if err.is_redirect() {
        FetchError::transport_fatal(format!("{url}: {err}"))
    } else {
        FetchError::transport_retryable(format!("{url}: {err}"))
    }
}
