//! Per-request timeout wrapper for fetch transports.

use std::sync::Arc;
use std::time::Duration;

use hopp_error::FetchError;
use hopp_sandbox::{FetchDispatcher, FetchRequest, HostResponse};

/// A [`FetchDispatcher`] that enforces a per-request timeout on the inner
/// transport.
pub struct TimeoutFetchDispatcher {
    inner: Arc<dyn FetchDispatcher>,
    timeout: Duration,
}

impl TimeoutFetchDispatcher {
    /// Wrap an inner transport with a per-request timeout.
    pub fn new(inner: Arc<dyn FetchDispatcher>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl FetchDispatcher for TimeoutFetchDispatcher {
    #[tracing::instrument(skip(self, request), fields(url = %request.url, method = %request.method))]
    async fn perform_fetch(&self, request: FetchRequest) -> Result<HostResponse, FetchError> {
        let url = request.url.clone();
        match tokio::time::timeout(self.timeout, self.inner.perform_fetch(request)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(%url, timeout_ms = self.timeout.as_millis() as u64, "fetch timed out");
                Err(FetchError::Timeout {
                    url,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}
