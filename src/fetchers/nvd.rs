//! This module implements a fetcher which downloads the CVEs from the NVD.
//! https://nvd.nist.gov/developers/vulnerabilities
//!
//! Example: https://services.nvd.nist.gov/rest/json/cves/2.0?resultsPerPage=1000&startIndex=2000

use std::thread;

use log::{debug, error, trace, warn};
use reqwest::blocking::Client;
use serde_json::Value;

use super::{FetchConfig, FetchError, PageSource, Transport};

/// The production transport, a blocking reqwest client.
pub struct ReqwestTransport {
    /// The HTTP client, built once with the request timeout.
    client: Client,
}

impl ReqwestTransport {
    /// Creates a new ReqwestTransport from the fetcher settings.
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        trace!("Running ReqwestTransport::new()");
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, String)],
    ) -> Result<Value, FetchError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response.json::<Value>().map_err(|e| {
            // The body is read lazily, the timeout can also fire here
            if e.is_timeout() {
                FetchError::Timeout(e.to_string())
            } else {
                FetchError::Decode(e.to_string())
            }
        })
    }
}

/// Maps a reqwest error to the errors known by the fetcher.
fn classify(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(error.to_string())
    } else if let Some(status) = error.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Request(error.to_string())
    }
}

/// This struct represents the NVD CVE fetcher.
///
/// Each page is requested at most `max_retries` times. Only timeouts are
/// retried, after a fixed delay. Any other error gives up immediately.
pub struct NVDFetcher<T: Transport = ReqwestTransport> {
    /// The settings of the fetcher.
    config: FetchConfig,
    /// What actually sends the requests.
    transport: T,
}

impl NVDFetcher<ReqwestTransport> {
    /// Creates a new NVDFetcher talking to the network.
    pub fn new(config: FetchConfig) -> Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> NVDFetcher<T> {
    /// Creates a new NVDFetcher with the given transport.
    pub fn with_transport(config: FetchConfig, transport: T) -> Self {
        Self { config, transport }
    }

    /// Sends the request, retrying on timeouts.
    /// Returns None if all the attempts failed or if a non-retryable
    /// error occurred.
    pub fn safe_request(&self, query: &[(&str, String)]) -> Option<Value> {
        trace!("Running NVDFetcher::safe_request()");
        let headers = [("User-Agent", self.config.user_agent.as_str())];
        let max_retries = self.config.max_retries;

        for attempt in 1..=max_retries {
            debug!("GET {} {:?}, attempt {}", self.config.url, query, attempt);
            match self.transport.get_json(&self.config.url, &headers, query) {
                Ok(payload) => return Some(payload),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Timeout on attempt {}/{}, retrying in {}s...",
                        attempt,
                        max_retries,
                        self.config.retry_delay.as_secs_f32()
                    );
                    debug!("{}", e);
                    if attempt < max_retries {
                        thread::sleep(self.config.retry_delay);
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    return None;
                }
            }
        }

        error!("No response after {} attempts", max_retries);
        None
    }
}

impl<T: Transport> PageSource for NVDFetcher<T> {
    fn fetch_page(&self, start_index: u64, results_per_page: u32) -> Option<Value> {
        let query = [
            ("resultsPerPage", results_per_page.to_string()),
            ("startIndex", start_index.to_string()),
        ];
        self.safe_request(&query)
    }
}
