#![warn(missing_docs)]

//! # hopp-client
//!
//! Host-side [`FetchDispatcher`](hopp_sandbox::FetchDispatcher) combinators
//! for the script sandbox.
//!
//! Provides [`TimeoutFetchDispatcher`] for bounding each request made by a
//! script, and [`RouterFetchDispatcher`] for sending requests to different
//! transports by URL prefix (for example a browser extension for one host and
//! a proxy for everything else).

pub mod router;
pub mod timeout;

pub use router::RouterFetchDispatcher;
pub use timeout::TimeoutFetchDispatcher;
