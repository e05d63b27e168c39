//! Named keep-alive futures that hold a run open.
//!
//! A run is finished only when every registered keep-alive has resolved.
//! The first one to fail aborts the set with its error.

use std::future::Future;
use std::pin::Pin;

use deno_core::futures::future::try_join_all;

use crate::error::SandboxError;

type KeepAlive = Pin<Box<dyn Future<Output = Result<(), SandboxError>>>>;

/// Collection of keep-alive futures awaited together.
#[derive(Default)]
pub struct KeepAliveSet {
    entries: Vec<(&'static str, KeepAlive)>,
}

impl KeepAliveSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a keep-alive under `name`.
    pub fn register<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<(), SandboxError>> + 'static,
    {
        self.entries.push((name, Box::pin(fut)));
    }

    /// Names of the registered keep-alives, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    /// Resolve when all keep-alives have resolved, or fail with the first error.
    pub fn settle(self) -> impl Future<Output = Result<(), SandboxError>> {
        let futures = self.entries.into_iter().map(|(name, fut)| async move {
            let out = fut.await;
            match &out {
                Ok(()) => tracing::debug!(keep_alive = name, "keep-alive resolved"),
                Err(e) => tracing::debug!(keep_alive = name, error = %e, "keep-alive failed"),
            }
            out
        });
        async move { try_join_all(futures).await.map(|_| ()) }
    }
}
