#![warn(missing_docs)]

//! # hopp-sandbox
//!
//! V8 sandbox for Hoppscotch pre-request and test scripts.
//!
//! Scripts run in a fresh deno_core isolate per call. They see `pw`, `hopp`,
//! `fetch`, `Request`, `Response`, `Headers`, `AbortController`, `console`
//! and `setTimeout`, and nothing else. Every capability reaches the host
//! through an op registered in [`ops`].
//!
//! ## Run lifecycle
//!
//! - **Fresh runtime per call**: no state survives between runs
//! - **Tracked host work**: every async op is registered with the
//!   [`tracker::PendingOperationTracker`] while in flight
//! - **Drain before capture**: the run stays open until the script has
//!   settled, queued tests have run, and the bridge has been quiet for
//!   several consecutive rounds
//! - **Capture once**: environment, request, cookies, console and the test
//!   tree are moved out of the runtime before it is dropped
//!
//! The HTTP transport is injected through [`FetchDispatcher`].

pub mod bridge;
pub mod capture;
pub mod console;
pub mod env;
pub mod error;
pub mod executor;
pub mod keep_alive;
pub mod marshal;
pub mod matchers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod ops;
pub mod request;
pub mod test_runner;
pub mod tracker;
pub mod validator;

pub use bridge::{FetchRequest, Headers, HostResponse};
pub use capture::{RunResult, ScriptKind};
pub use env::{EnvVar, EnvironmentState};
pub use error::SandboxError;
pub use executor::{PreRequestInput, SandboxConfig, SandboxExecutor, TestInput, TestResponse};
pub use marshal::HostValue;
pub use request::RequestSnapshot;
pub use test_runner::{ExpectResult, ExpectStatus, TestDescriptor};
pub use tracker::DrainPolicy;

/// The host's HTTP transport, injected into every run.
///
/// The sandbox never opens sockets itself. Interceptors, proxies and
/// extensions all sit behind this trait.
#[async_trait::async_trait]
pub trait FetchDispatcher: Send + Sync {
    /// Perform one HTTP exchange.
    ///
    /// An `Err` reaches the script as a rejected `fetch()` promise carrying
    /// a `FetchError` with the error's message.
    async fn perform_fetch(
        &self,
        request: FetchRequest,
    ) -> Result<HostResponse, hopp_error::FetchError>;
}
