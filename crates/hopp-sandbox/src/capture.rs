//! Result capture.
//!
//! All mutable run state lives in one [`RunState`] inside the runtime's
//! `OpState`. Capturing moves it out, so it can happen exactly once and
//! nothing the script does afterwards can reach the result.

use deno_core::OpState;
use serde::Serialize;

use crate::console::{ConsoleEntry, ConsoleLog};
use crate::env::EnvironmentState;
use crate::error::SandboxError;
use crate::request::{CookieJar, RequestSnapshot};
use crate::test_runner::{TestDescriptor, TestRunner};

/// Which kind of script a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptKind {
    /// Runs before the request is sent; may edit the request.
    PreRequest,
    /// Runs after the response arrives; records tests.
    Test,
}

impl ScriptKind {
    /// Stable name for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::PreRequest => "pre_request",
            ScriptKind::Test => "test",
        }
    }
}

/// Everything a run can mutate.
#[derive(Debug)]
pub struct RunState {
    /// Global and selected environments.
    pub environment: EnvironmentState,
    /// The request being prepared (read-only for test scripts).
    pub request: RequestSnapshot,
    /// Cookie list.
    pub cookies: CookieJar,
    /// Console output.
    pub console: ConsoleLog,
    /// Test tree.
    pub runner: TestRunner,
}

/// The outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Final environment state.
    pub updated_environment: EnvironmentState,
    /// Final request, for pre-request scripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_request: Option<RequestSnapshot>,
    /// Root of the test tree, for test scripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestDescriptor>,
    /// Final cookies, `None` when cookies were not available.
    pub updated_cookies: Option<Vec<serde_json::Value>>,
    /// Console calls in order.
    pub console_entries: Vec<ConsoleEntry>,
    /// Console calls past the entry cap that were not kept.
    #[serde(skip_serializing_if = "is_zero")]
    pub console_dropped: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Turn the final run state into a result.
pub fn capture_run(state: RunState, kind: ScriptKind) -> RunResult {
    let RunState {
        environment,
        request,
        cookies,
        console,
        runner,
    } = state;
    RunResult {
        updated_environment: environment,
        updated_request: (kind == ScriptKind::PreRequest).then_some(request),
        test_results: (kind == ScriptKind::Test).then(|| runner.into_tree()),
        updated_cookies: cookies.into_inner(),
        console_dropped: console.dropped(),
        console_entries: console.into_entries(),
    }
}

/// Move the run state out of `op_state` and build the result.
///
/// Fails if the state is missing, which means it was already captured.
pub fn capture(op_state: &mut OpState, kind: ScriptKind) -> Result<RunResult, SandboxError> {
    let state = op_state
        .try_take::<RunState>()
        .ok_or_else(|| SandboxError::Capture("run state already captured".into()))?;
    Ok(capture_run(state, kind))
}
