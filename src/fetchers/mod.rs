//! Fetching the CVE pages
//!
//! A fetcher downloads one page of CVEs at a time. It hides the
//! network errors and the retries: the caller only gets the decoded page,
//! or nothing when the page couldn't be fetched.

pub mod nvd;

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// The default URL of the NVD CVE API.
pub const NVD_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
/// The User-Agent sent to the API by default.
pub const DEFAULT_USER_AGENT: &str = "NVD-Data-Scraper";

/// A common interface between all page fetchers.
pub trait PageSource {
    /// Fetches `results_per_page` CVEs starting at `start_index`.
    /// Returns None when the page couldn't be fetched.
    fn fetch_page(&self, start_index: u64, results_per_page: u32) -> Option<Value>;
}

/// Sends one HTTP GET request and decodes its JSON body.
///
/// It's the only part of the fetcher talking to the network, so the retry
/// policy can be exercised without it.
pub trait Transport {
    /// Sends a GET request to `url` with the given headers and query
    /// parameters, and returns the decoded JSON body.
    fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, String)],
    ) -> Result<Value, FetchError>;
}

/// The ways a single request can fail.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server didn't answer in time. The only retried error.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The server answered with a non-2xx status.
    #[error("HTTP error: {0}")]
    Status(u16),
    /// Connection refused, DNS failure, TLS error...
    #[error("request failed: {0}")]
    Request(String),
    /// The body isn't valid JSON.
    #[error("invalid JSON response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether the request should be sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

/// The settings of a fetcher.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// The API endpoint.
    pub url: String,
    /// The User-Agent header sent with every request.
    pub user_agent: String,
    /// How many times a page is requested before giving up.
    pub max_retries: u32,
    /// How long to wait after a timeout before retrying.
    pub retry_delay: Duration,
    /// The timeout of one request.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url: NVD_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(20),
        }
    }
}
