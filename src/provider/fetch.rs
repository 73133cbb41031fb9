//! Outbound HTTP for subscription feeds

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a single fetch.
///
/// Cloneable so that every caller joined on a coalesced fetch receives it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

/// Response of a successful fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// ============================================================================
// SBIO: Pure helpers (no I/O)
// ============================================================================

/// User agent sent with every subscription request
pub fn user_agent(custom: Option<&str>) -> String {
    let base = concat!("subforge/", env!("CARGO_PKG_VERSION"));
    match custom.map(str::trim).filter(|s| !s.is_empty()) {
        Some(custom) => format!("{} {}", custom, base),
        None => base.to_string(),
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<FetchResponse, FetchError>;
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| FetchError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(FetchResponse {
            status: status.as_u16(),
            body,
            headers,
        })
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Serves the same body for every URL
    pub struct MockFetcher {
        body: String,
        headers: HashMap<String, String>,
        delay: Duration,
        failures: AtomicUsize,
        call_count: Arc<AtomicUsize>,
        user_agents: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        pub fn new(body: &str) -> Self {
            Self {
                body: body.to_string(),
                headers: HashMap::new(),
                delay: Duration::ZERO,
                failures: AtomicUsize::new(0),
                call_count: Arc::new(AtomicUsize::new(0)),
                user_agents: Mutex::new(Vec::new()),
            }
        }

        pub fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers
                .insert(name.to_ascii_lowercase(), value.to_string());
            self
        }

        /// Wait on the tokio clock before answering
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Fail the next `times` calls with a 502
        pub fn failing(self, times: usize) -> Self {
            self.failures.store(times, Ordering::SeqCst);
            self
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn user_agents(&self) -> Vec<String> {
            self.user_agents.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, url: &str, user_agent: &str) -> Result<FetchResponse, FetchError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.user_agents.lock().unwrap().push(user_agent.to_string());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 502,
                });
            }

            Ok(FetchResponse {
                status: 200,
                body: self.body.clone(),
                headers: self.headers.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockFetcher;
    use super::*;

    #[test]
    fn test_user_agent() {
        let version = env!("CARGO_PKG_VERSION");
        assert_eq!(user_agent(None), format!("subforge/{}", version));
        assert_eq!(user_agent(Some("")), format!("subforge/{}", version));
        assert_eq!(
            user_agent(Some("clash")),
            format!("clash subforge/{}", version)
        );
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("subscription-userinfo".to_string(), "total=1".to_string());
        let response = FetchResponse {
            status: 200,
            body: String::new(),
            headers,
        };
        assert_eq!(response.header("Subscription-Userinfo"), Some("total=1"));
        assert_eq!(response.header("etag"), None);
    }

    #[tokio::test]
    async fn test_mock_failures_then_success() {
        let fetcher = MockFetcher::new("body").failing(1);
        assert!(matches!(
            fetcher.fetch("http://x", "ua").await,
            Err(FetchError::Status { status: 502, .. })
        ));
        assert_eq!(fetcher.fetch("http://x", "ua").await.unwrap().body, "body");
        assert_eq!(fetcher.call_count(), 2);
        assert_eq!(fetcher.user_agents(), vec!["ua", "ua"]);
    }
}
