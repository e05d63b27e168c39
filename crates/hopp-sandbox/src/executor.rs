//! Sandbox executor: runs one script in a fresh V8 isolate and captures its
//! results once every piece of async work it started has finished.
//!
//! V8 isolates are `!Send`, so each run happens on a dedicated thread with
//! its own single-threaded tokio runtime. The public API is fully async and
//! `Send`-safe.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Semaphore};
use uuid::Uuid;

use crate::bridge::{BodyRegistry, Headers};
use crate::capture::{capture, RunResult, RunState, ScriptKind};
use crate::console::ConsoleLog;
use crate::env::EnvironmentState;
use crate::error::SandboxError;
use crate::keep_alive::KeepAliveSet;
use crate::ops::{hopp_ext, FetchLimits, SettleSender, Settlement, TimerHandles};
use crate::request::{CookieJar, RequestSnapshot};
use crate::test_runner::TestRunner;
use crate::tracker::{DrainPolicy, PendingOperationTracker};
use crate::validator::{validate_script, DEFAULT_MAX_SCRIPT_SIZE};
use crate::FetchDispatcher;

const MARSHAL_JS: &str = include_str!("../js/marshal.js");
const BRIDGE_JS: &str = include_str!("../js/bridge.js");
const RUNNER_JS: &str = include_str!("../js/runner.js");
const API_JS: &str = include_str!("../js/api.js");

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Optional deadline for a whole run. `None` means the run waits for as
    /// long as the injected fetch transport keeps operations in flight.
    pub timeout: Option<Duration>,
    /// Maximum script size in bytes.
    pub max_script_size: usize,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Maximum concurrent runs.
    pub max_concurrent: usize,
    /// Maximum `fetch()` calls per run.
    pub max_fetch_calls: usize,
    /// Maximum console entries kept per run.
    pub max_console_entries: usize,
    /// When the bridge counts as drained.
    pub drain: DrainPolicy,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_script_size: DEFAULT_MAX_SCRIPT_SIZE,
            max_heap_size: 64 * 1024 * 1024, // 64 MB
            max_concurrent: 8,
            max_fetch_calls: 50,
            max_console_entries: 1000,
            drain: DrainPolicy::default(),
        }
    }
}

/// Inputs of a pre-request run.
#[derive(Debug, Clone, Default)]
pub struct PreRequestInput {
    /// Environment snapshot.
    pub environment: EnvironmentState,
    /// The request about to be sent.
    pub request: RequestSnapshot,
    /// Cookies, or `None` when cookies are unavailable.
    pub cookies: Option<Vec<serde_json::Value>>,
}

/// The response a test script asserts against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase.
    #[serde(default)]
    pub status_text: String,
    /// Response headers.
    #[serde(default)]
    pub headers: Headers,
    /// Parsed JSON body, or the raw text as a JSON string.
    #[serde(default)]
    pub body: serde_json::Value,
    /// Round-trip time in milliseconds.
    #[serde(default)]
    pub response_time: u64,
}

/// Inputs of a test run.
#[derive(Debug, Clone, Default)]
pub struct TestInput {
    /// Environment snapshot.
    pub environment: EnvironmentState,
    /// The request that was sent; read-only to the script.
    pub request: RequestSnapshot,
    /// The response received.
    pub response: TestResponse,
    /// Cookies, or `None` when cookies are unavailable.
    pub cookies: Option<Vec<serde_json::Value>>,
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunPhase {
    /// Runtime allocated, capabilities installed.
    Created,
    /// Script evaluated up to its first suspension point.
    Running,
    /// Waiting for the script, queued tests and tracked host work to settle.
    AwaitingDrain,
    /// Results moved out; the runtime may now be dropped.
    Captured,
}

impl RunPhase {
    fn advance(&mut self, next: RunPhase, run_id: Uuid) {
        debug_assert!(next > *self, "run phase cannot go from {self:?} to {next:?}");
        tracing::debug!(%run_id, from = ?*self, to = ?next, "run phase");
        *self = next;
    }
}

/// The sandbox executor. Creates a fresh V8 isolate for each run.
///
/// This is `Send + Sync` safe; all V8 operations happen on a dedicated
/// thread per run. A semaphore limits simultaneous isolates.
pub struct SandboxExecutor {
    config: SandboxConfig,
    semaphore: Arc<Semaphore>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<crate::metrics::SandboxMetrics>>,
}

impl SandboxExecutor {
    /// Create a new sandbox executor with the given configuration.
    pub fn new(config: SandboxConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            semaphore,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Create an executor that records run metrics.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(config: SandboxConfig, metrics: Arc<crate::metrics::SandboxMetrics>) -> Self {
        let mut executor = Self::new(config);
        executor.metrics = Some(metrics);
        executor
    }

    /// The active configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run a pre-request script. The result carries the edited request.
    pub async fn run_pre_request(
        &self,
        script: &str,
        input: PreRequestInput,
        fetcher: Arc<dyn FetchDispatcher>,
    ) -> Result<RunResult, SandboxError> {
        let state = self.run_state(input.environment, input.request, input.cookies);
        self.run(ScriptKind::PreRequest, script, state, None, fetcher)
            .await
    }

    /// Run a test script against a response. The result carries the test tree.
    pub async fn run_test(
        &self,
        script: &str,
        input: TestInput,
        fetcher: Arc<dyn FetchDispatcher>,
    ) -> Result<RunResult, SandboxError> {
        let state = self.run_state(input.environment, input.request, input.cookies);
        self.run(ScriptKind::Test, script, state, Some(input.response), fetcher)
            .await
    }

    fn run_state(
        &self,
        environment: EnvironmentState,
        request: RequestSnapshot,
        cookies: Option<Vec<serde_json::Value>>,
    ) -> RunState {
        RunState {
            environment,
            request,
            cookies: CookieJar(cookies),
            console: ConsoleLog::new(self.config.max_console_entries),
            runner: TestRunner::new(),
        }
    }

    async fn run(
        &self,
        kind: ScriptKind,
        script: &str,
        state: RunState,
        response: Option<TestResponse>,
        fetcher: Arc<dyn FetchDispatcher>,
    ) -> Result<RunResult, SandboxError> {
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, kind = kind.as_str(), script_len = script.len(), "sandbox run: starting");

        let result = self
            .run_on_thread(run_id, kind, script, state, response, fetcher)
            .await;

        match &result {
            Ok((run, drain)) => {
                tracing::info!(
                    %run_id,
                    drain_ms = drain.as_millis() as u64,
                    console_entries = run.console_entries.len(),
                    console_dropped = run.console_dropped,
                    "sandbox run: complete"
                );
                #[cfg(feature = "metrics")]
                if let Some(m) = &self.metrics {
                    m.record_run(kind.as_str(), drain.as_secs_f64());
                }
            }
            Err(e) => {
                tracing::warn!(%run_id, kind = %e.kind(), error = %e, "sandbox run: failed");
                #[cfg(feature = "metrics")]
                if let Some(m) = &self.metrics {
                    m.record_error(e.kind().as_str());
                }
            }
        }

        result.map(|(run, _)| run)
    }

    async fn run_on_thread(
        &self,
        run_id: Uuid,
        kind: ScriptKind,
        script: &str,
        state: RunState,
        response: Option<TestResponse>,
        fetcher: Arc<dyn FetchDispatcher>,
    ) -> Result<(RunResult, Duration), SandboxError> {
        validate_script(script, Some(self.config.max_script_size))?;

        let _permit = self.semaphore.clone().try_acquire_owned().map_err(|_| {
            SandboxError::ConcurrencyLimit {
                max: self.config.max_concurrent,
            }
        })?;

        let script = script.to_string();
        let config = self.config.clone();

        // V8 isolates are !Send, run everything on a dedicated thread
        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    if tx.send(Err(SandboxError::Execution(e.into()))).is_err() {
                        tracing::warn!("sandbox result receiver dropped");
                    }
                    return;
                }
            };
            let result = rt.block_on(run_isolated(
                &config, run_id, kind, &script, state, response, fetcher,
            ));
            if tx.send(result).is_err() {
                tracing::warn!("sandbox result receiver dropped before result was sent");
            }
        });

        rx.await
            .map_err(|_| SandboxError::Execution(anyhow::anyhow!("sandbox thread panicked")))?
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate cleanly.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the boxed `HeapLimitState` created in
    // `run_isolated`, which removes this callback before dropping the box.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Create a fresh JsRuntime with the hopp extension loaded and V8 heap limits set.
pub(crate) fn create_runtime(max_heap_size: usize) -> JsRuntime {
    let create_params = v8::CreateParams::default().heap_limits(0, max_heap_size);
    JsRuntime::new(RuntimeOptions {
        extensions: vec![hopp_ext::init()],
        create_params: Some(create_params),
        ..Default::default()
    })
}

/// Build the bootstrap that installs the script-facing globals.
fn build_bootstrap(kind: ScriptKind, response: Option<&TestResponse>) -> Result<String, SandboxError> {
    let kind = serde_json::to_string(&kind)?;
    let response = match response {
        Some(r) => serde_json::to_string(r)?,
        None => "null".to_string(),
    };
    Ok(format!(
        "((ops, scriptKind, testResponse) => {{\n{MARSHAL_JS}\n{BRIDGE_JS}\n{RUNNER_JS}\n{API_JS}\n}})(Deno.core.ops, {kind}, {response});"
    ))
}

/// Wrap script text so that its outcome is reported through
/// `op_hopp_script_settled`: `runtime` for a throw before the first
/// suspension point, `async` for a later rejection, `ok` once the script and
/// every queued test body have finished.
fn wrap_script(script: &str) -> String {
    format!(
        r#"((__rt) => {{
  let __syncPhase = true;
  let __failedSync = false;
  const __script = async () => {{
    try {{
{script}
    }} catch (e) {{
      if (__syncPhase) {{
        __failedSync = true;
        __rt.settle("runtime", __rt.describe(e));
        return;
      }}
      throw e;
    }}
  }};
  __script()
    .then(() => (__failedSync ? undefined : __rt.drainTests().then(() => __rt.settle("ok", ""))))
    .catch((e) => __rt.settle("async", __rt.describe(e)));
  __syncPhase = false;
}})((() => {{
  const rt = globalThis.__hoppRuntime;
  delete globalThis.__hoppRuntime;
  return rt;
}})());
"#
    )
}

/// Poll the V8 event loop and `keep_alive` together until `keep_alive`
/// resolves. An event loop error (an unhandled rejection) ends the run.
async fn drive_event_loop<F>(runtime: &mut JsRuntime, keep_alive: F) -> Result<(), SandboxError>
where
    F: Future<Output = Result<(), SandboxError>>,
{
    let mut keep_alive = std::pin::pin!(keep_alive);
    std::future::poll_fn(|cx| {
        if let Poll::Ready(Err(e)) = runtime.poll_event_loop(cx, PollEventLoopOptions::default()) {
            return Poll::Ready(Err(SandboxError::AsyncRejection {
                message: e.to_string(),
            }));
        }
        keep_alive.as_mut().poll(cx)
    })
    .await
}

/// Resolve when the script reports it settled. If the bridge drains first,
/// nothing can ever resolve what the script is waiting for.
async fn script_keep_alive<D>(
    early: Option<Settlement>,
    settle_rx: oneshot::Receiver<Settlement>,
    drained: D,
) -> Result<(), SandboxError>
where
    D: Future<Output = ()>,
{
    let settlement = match early {
        Some(settlement) => settlement,
        None => tokio::select! {
            biased;
            settled = settle_rx => settled.map_err(|_| {
                SandboxError::Execution(anyhow::anyhow!("script settlement channel closed"))
            })?,
            () = drained => return Err(SandboxError::Unsettled),
        },
    };
    match settlement {
        Settlement::Completed => Ok(()),
        Settlement::Runtime(message) => Err(SandboxError::Runtime { message }),
        Settlement::Async(message) => Err(SandboxError::AsyncRejection { message }),
    }
}

async fn execute_and_drain(
    runtime: &mut JsRuntime,
    tracker: &PendingOperationTracker,
    mut settle_rx: oneshot::Receiver<Settlement>,
    script: &str,
    config: &SandboxConfig,
    phase: &mut RunPhase,
    run_id: Uuid,
) -> Result<Duration, SandboxError> {
    phase.advance(RunPhase::Running, run_id);
    if let Err(e) = runtime.execute_script("[hopp:script]", wrap_script(script)) {
        let message = e.to_string();
        return Err(if message.contains("SyntaxError") {
            SandboxError::Syntax { message }
        } else {
            SandboxError::Runtime { message }
        });
    }

    // A synchronous throw has already been reported; skip the drain.
    let early = match settle_rx.try_recv() {
        Ok(Settlement::Runtime(message)) => return Err(SandboxError::Runtime { message }),
        Ok(other) => Some(other),
        Err(_) => None,
    };

    phase.advance(RunPhase::AwaitingDrain, run_id);
    let started = Instant::now();

    let mut keep_alive = KeepAliveSet::new();
    let bridge_drained = tracker.await_drain(config.drain);
    keep_alive.register("bridge", async move {
        bridge_drained.await;
        Ok(())
    });
    keep_alive.register(
        "script",
        script_keep_alive(early, settle_rx, tracker.await_drain(config.drain)),
    );

    let drive = drive_event_loop(runtime, keep_alive.settle());
    match config.timeout {
        Some(timeout) => tokio::time::timeout(timeout, drive).await.map_err(|_| {
            SandboxError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
        })??,
        None => drive.await?,
    }

    tracing::debug!(
        %run_id,
        operations = tracker.total_tracked(),
        "host operations drained"
    );
    Ok(started.elapsed())
}

/// Run one script to completion on the current thread and capture its
/// results. Must be called from a dedicated thread.
async fn run_isolated(
    config: &SandboxConfig,
    run_id: Uuid,
    kind: ScriptKind,
    script: &str,
    state: RunState,
    response: Option<TestResponse>,
    fetcher: Arc<dyn FetchDispatcher>,
) -> Result<(RunResult, Duration), SandboxError> {
    let mut phase = RunPhase::Created;
    let mut runtime = create_runtime(config.max_heap_size);
    let tracker = PendingOperationTracker::new();
    let (settle_tx, settle_rx) = oneshot::channel();

    {
        let op_state = runtime.op_state();
        let mut st = op_state.borrow_mut();
        st.put(state);
        st.put(kind);
        st.put(BodyRegistry::new());
        st.put(TimerHandles::default());
        st.put(tracker.clone());
        st.put(fetcher);
        st.put(FetchLimits {
            max_calls: config.max_fetch_calls,
            calls_made: 0,
        });
        st.put(SettleSender(Some(settle_tx)));
    }

    let bootstrap = build_bootstrap(kind, response.as_ref())?;
    runtime
        .execute_script("[hopp:bootstrap]", bootstrap)
        .map_err(|e| SandboxError::Execution(anyhow::anyhow!("bootstrap failed: {e}")))?;

    // --- Set up heap limit callback ---
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    // --- Set up CPU watchdog (only with a deadline) ---
    let timed_out = Arc::new(AtomicBool::new(false));
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
    let watchdog = config.timeout.map(|timeout| {
        let handle = runtime.v8_isolate().thread_safe_handle();
        let timed_out = timed_out.clone();
        std::thread::spawn(move || {
            if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout)
            {
                timed_out.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        })
    });

    let outcome = execute_and_drain(
        &mut runtime,
        &tracker,
        settle_rx,
        script,
        config,
        &mut phase,
        run_id,
    )
    .await;

    // The watchdog must be gone before the runtime is dropped.
    let _ = cancel_tx.send(());
    if let Some(watchdog) = watchdog {
        let _ = watchdog.join();
    }
    runtime
        .v8_isolate()
        .remove_near_heap_limit_callback(near_heap_limit_callback, 0);

    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(SandboxError::HeapLimitExceeded);
    }
    if timed_out.load(Ordering::SeqCst) {
        return Err(SandboxError::Timeout {
            timeout_ms: config.timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        });
    }
    let drain = outcome?;

    phase.advance(RunPhase::Captured, run_id);
    let result = {
        let op_state = runtime.op_state();
        let mut st = op_state.borrow_mut();
        capture(&mut st, kind)?
    };
    drop(runtime);
    Ok((result, drain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopp_error::FetchError;

    use crate::bridge::{FetchRequest, HostResponse};

    struct NoNetwork;

    #[async_trait::async_trait]
    impl FetchDispatcher for NoNetwork {
        async fn perform_fetch(&self, request: FetchRequest) -> Result<HostResponse, FetchError> {
            Err(FetchError::NoRoute(request.url))
        }
    }

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig::default())
    }

    #[test]
    fn phases_are_ordered() {
        assert!(RunPhase::Created < RunPhase::Running);
        assert!(RunPhase::Running < RunPhase::AwaitingDrain);
        assert!(RunPhase::AwaitingDrain < RunPhase::Captured);
        let mut phase = RunPhase::Created;
        phase.advance(RunPhase::Running, Uuid::nil());
        assert_eq!(phase, RunPhase::Running);
    }

    #[test]
    fn bootstrap_embeds_kind_and_response() {
        let response = TestResponse {
            status: 201,
            ..Default::default()
        };
        let js = build_bootstrap(ScriptKind::Test, Some(&response)).unwrap();
        assert!(js.contains(r#"(Deno.core.ops, "test", {"status":201"#));
        assert!(js.contains("delete globalThis.Deno;"));

        let js = build_bootstrap(ScriptKind::PreRequest, None).unwrap();
        assert!(js.ends_with(r#"(Deno.core.ops, "preRequest", null);"#));
    }

    #[test]
    fn wrapper_keeps_script_inside_async_body() {
        let wrapped = wrap_script("pw.env.set('a', 'b');");
        assert!(wrapped.contains("const __script = async () => {"));
        assert!(wrapped.contains("pw.env.set('a', 'b');"));
    }

    #[tokio::test]
    async fn empty_script_returns_seeded_state() {
        let input = PreRequestInput {
            environment: EnvironmentState::new(vec![], vec![crate::env::EnvVar::new("k", "v")]),
            ..Default::default()
        };
        let result = executor()
            .run_pre_request("", input, Arc::new(NoNetwork))
            .await
            .unwrap();
        assert_eq!(result.updated_environment.selected[0].value, "v");
        assert!(result.updated_request.is_some());
        assert!(result.test_results.is_none());
    }

    #[tokio::test]
    async fn synchronous_throw_is_a_runtime_error() {
        let err = executor()
            .run_test(
                r#"throw new Error("boom");"#,
                TestInput::default(),
                Arc::new(NoNetwork),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { .. }), "got {err:?}");
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn syntax_error_is_reported_before_execution() {
        let err = executor()
            .run_test("pw.test('x', () => {", TestInput::default(), Arc::new(NoNetwork))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), hopp_error::ScriptErrorKind::Syntax);
    }

    #[tokio::test]
    async fn deno_and_eval_are_not_reachable() {
        let result = executor()
            .run_test(
                r#"
                pw.expect(typeof Deno).toBe("undefined");
                pw.expect(typeof eval).toBe("undefined");
                pw.expect(typeof __hoppRuntime).toBe("undefined");
                "#,
                TestInput::default(),
                Arc::new(NoNetwork),
            )
            .await
            .unwrap();
        let root = result.test_results.unwrap();
        assert_eq!(root.expect_results.len(), 3);
        assert!(root
            .expect_results
            .iter()
            .all(|r| r.status == crate::ExpectStatus::Pass));
    }

    #[tokio::test]
    async fn concurrency_limit_is_enforced() {
        let exec = SandboxExecutor::new(SandboxConfig {
            max_concurrent: 0,
            ..Default::default()
        });
        let err = exec
            .run_test("", TestInput::default(), Arc::new(NoNetwork))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ConcurrencyLimit { max: 0 }));
    }
}
