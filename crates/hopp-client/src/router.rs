//! Router dispatcher for sending script requests to the right transport.

use std::sync::Arc;

use hopp_error::FetchError;
use hopp_sandbox::{FetchDispatcher, FetchRequest, HostResponse};

/// A [`FetchDispatcher`] that picks a transport by URL prefix. The longest
/// matching prefix wins; a fallback handles everything else.
///
/// A prefix only matches on a boundary: it must end in `/` or be followed
/// in the URL by `/`, `?`, `#` or nothing. `https://api.example.com`
/// therefore covers `https://api.example.com/users` but not
/// `https://api.example.com.evil.io/`.
pub struct RouterFetchDispatcher {
    routes: Vec<(String, Arc<dyn FetchDispatcher>)>,
    fallback: Option<Arc<dyn FetchDispatcher>>,
}

impl RouterFetchDispatcher {
    /// Create a new empty router.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: None,
        }
    }

    /// Route requests whose URL starts with `prefix` to `transport`.
    /// Registering the same prefix twice replaces the earlier transport.
    pub fn add_route(&mut self, prefix: impl Into<String>, transport: Arc<dyn FetchDispatcher>) {
        let prefix = prefix.into();
        self.routes.retain(|(p, _)| *p != prefix);
        self.routes.push((prefix, transport));
        // longest first
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Transport for URLs no route matches.
    pub fn set_fallback(&mut self, transport: Arc<dyn FetchDispatcher>) {
        self.fallback = Some(transport);
    }

    /// All registered prefixes, sorted.
    pub fn prefixes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.iter().map(|(p, _)| p.as_str()).collect();
        names.sort();
        names
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn route(&self, url: &str) -> Option<&Arc<dyn FetchDispatcher>> {
        self.routes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, url))
            .map(|(_, transport)| transport)
            .or(self.fallback.as_ref())
    }
}

fn prefix_matches(prefix: &str, url: &str) -> bool {
    let Some(rest) = url.strip_prefix(prefix) else {
        return false;
    };
    prefix.ends_with('/') || rest.is_empty() || rest.starts_with(['/', '?', '#'])
}

impl Default for RouterFetchDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FetchDispatcher for RouterFetchDispatcher {
    async fn perform_fetch(&self, request: FetchRequest) -> Result<HostResponse, FetchError> {
        let transport = self.route(&request.url).ok_or_else(|| {
            tracing::debug!(url = %request.url, routes = ?self.prefixes(), "no fetch route");
            FetchError::NoRoute(request.url.clone())
        })?;
        transport.perform_fetch(request).await
    }
}
