//! deno_core op definitions for the Hoppscotch sandbox.
//!
//! The `#[op2]` macro generates additional public items (v8 function pointers,
//! metadata structs) that cannot carry doc comments. We suppress `missing_docs`
//! at the module level; all actual functions and types are documented below.
#![allow(missing_docs)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use deno_core::op2;
use deno_core::{CancelFuture, CancelHandle, OpState};
use deno_error::JsErrorBox;
use serde_json::json;

use crate::bridge::{self, BodyKind, BodyRegistry, FetchInit};
use crate::capture::{RunState, ScriptKind};
use crate::console::ConsoleLevel;
use crate::env::Scope;
use crate::marshal::{self, HostValue};
use crate::matchers::{self, MatcherCall};
use crate::request::RequestMutation;
use crate::test_runner::{ExpectResult, ExpectStatus};
use crate::tracker::PendingOperationTracker;
use crate::FetchDispatcher;

/// Per-run cap on `fetch()` calls.
pub struct FetchLimits {
    /// Maximum number of fetch calls allowed.
    pub max_calls: usize,
    /// Number of fetch calls made so far.
    pub calls_made: usize,
}

/// Cancel handles of timers that have not fired or been cleared yet.
#[derive(Default)]
pub struct TimerHandles {
    next_id: u32,
    pending: HashMap<u32, Rc<CancelHandle>>,
}

/// How the script's top-level promise ended, as reported by the wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Script and every queued test body completed.
    Completed,
    /// The synchronous part threw.
    Runtime(String),
    /// The script's promise rejected after its first suspension point.
    Async(String),
}

/// Channel the wrapper uses to report settlement. Only the first report
/// counts.
pub struct SettleSender(pub Option<tokio::sync::oneshot::Sender<Settlement>>);

fn bad_arg(what: &str, e: impl std::fmt::Display) -> JsErrorBox {
    JsErrorBox::type_error(format!("invalid {what}: {e}"))
}

fn to_json_string<T: serde::Serialize>(value: &T) -> Result<String, JsErrorBox> {
    serde_json::to_string(value)
        .map_err(|e| JsErrorBox::generic(format!("serialization failed: {e}")))
}

fn wire(value: &HostValue) -> Result<String, JsErrorBox> {
    marshal::to_vm(value).map_err(|e| JsErrorBox::generic(e.to_string()))
}

// --- console ---------------------------------------------------------------

/// Record a `console.*` call. `args` is a marshalled array.
#[op2(fast)]
pub fn op_hopp_console(
    state: &mut OpState,
    #[string] level: &str,
    #[string] args: &str,
) -> Result<(), JsErrorBox> {
    let level: ConsoleLevel = level.parse().map_err(|e| bad_arg("console level", e))?;
    let args = match marshal::to_host(args).map_err(|e| bad_arg("console arguments", e))? {
        HostValue::Array(items) => items.into_iter().map(HostValue::into_json).collect(),
        other => vec![other.into_json()],
    };
    state.borrow_mut::<RunState>().console.push(level, args);
    Ok(())
}

// --- environment -------------------------------------------------------------

/// Look up a variable. Returns a marshalled string, or `undefined`.
#[op2]
#[string]
pub fn op_hopp_env_get(
    state: &mut OpState,
    #[string] key: &str,
    #[string] scope: &str,
) -> Result<String, JsErrorBox> {
    let scope: Scope = scope.parse().map_err(|e| bad_arg("scope", e))?;
    let value = state
        .borrow::<RunState>()
        .environment
        .get(key, scope)
        .map(str::to_string);
    wire(&HostValue::from(value))
}

/// Set a variable.
#[op2(fast)]
pub fn op_hopp_env_set(
    state: &mut OpState,
    #[string] key: &str,
    #[string] value: &str,
    #[string] scope: &str,
) -> Result<(), JsErrorBox> {
    let scope: Scope = scope.parse().map_err(|e| bad_arg("scope", e))?;
    state
        .borrow_mut::<RunState>()
        .environment
        .set(key, value, scope);
    Ok(())
}

/// Remove a variable. Returns whether it existed.
#[op2(fast)]
pub fn op_hopp_env_unset(
    state: &mut OpState,
    #[string] key: &str,
    #[string] scope: &str,
) -> Result<bool, JsErrorBox> {
    let scope: Scope = scope.parse().map_err(|e| bad_arg("scope", e))?;
    Ok(state
        .borrow_mut::<RunState>()
        .environment
        .unset(key, scope))
}

/// Expand `<<var>>` references.
#[op2]
#[string]
pub fn op_hopp_env_resolve(state: &mut OpState, #[string] template: &str) -> String {
    state.borrow::<RunState>().environment.resolve(template)
}

// --- request and cookies -----------------------------------------------------

/// The request snapshot as JSON.
#[op2]
#[string]
pub fn op_hopp_request_get(state: &mut OpState) -> Result<String, JsErrorBox> {
    to_json_string(&state.borrow::<RunState>().request)
}

/// Apply one request edit. Test scripts see the request read-only.
#[op2(fast)]
pub fn op_hopp_request_mutate(
    state: &mut OpState,
    #[string] mutation: &str,
) -> Result<(), JsErrorBox> {
    if *state.borrow::<ScriptKind>() == ScriptKind::Test {
        return Err(JsErrorBox::type_error(
            "request is read-only in test scripts",
        ));
    }
    let mutation: RequestMutation =
        serde_json::from_str(mutation).map_err(|e| bad_arg("request mutation", e))?;
    state.borrow_mut::<RunState>().request.apply(mutation);
    Ok(())
}

/// The cookie list as JSON (`null` when cookies are unavailable).
#[op2]
#[string]
pub fn op_hopp_cookies_get(state: &mut OpState) -> Result<String, JsErrorBox> {
    to_json_string(&state.borrow::<RunState>().cookies.get_all())
}

/// Replace the cookie list.
#[op2(fast)]
pub fn op_hopp_cookies_set(state: &mut OpState, #[string] cookies: &str) -> Result<(), JsErrorBox> {
    let cookies: Vec<serde_json::Value> =
        serde_json::from_str(cookies).map_err(|e| bad_arg("cookie list", e))?;
    state.borrow_mut::<RunState>().cookies.set_all(cookies);
    Ok(())
}

// --- tests -------------------------------------------------------------------

/// Declare a test under `parent` and return its id.
#[op2(fast)]
#[smi]
pub fn op_hopp_test_declare(
    state: &mut OpState,
    #[string] descriptor: &str,
    #[smi] parent: u32,
) -> Result<u32, JsErrorBox> {
    state
        .borrow_mut::<RunState>()
        .runner
        .declare(descriptor, parent)
        .map_err(|e| JsErrorBox::generic(e.to_string()))
}

/// Mark a test body as running.
#[op2(fast)]
pub fn op_hopp_test_enter(state: &mut OpState, #[smi] id: u32) -> Result<(), JsErrorBox> {
    state
        .borrow_mut::<RunState>()
        .runner
        .enter(id)
        .map_err(|e| JsErrorBox::generic(e.to_string()))
}

/// Mark a test body as finished.
#[op2(fast)]
pub fn op_hopp_test_exit(state: &mut OpState, #[smi] id: u32) -> Result<(), JsErrorBox> {
    state
        .borrow_mut::<RunState>()
        .runner
        .exit(id)
        .map_err(|e| JsErrorBox::generic(e.to_string()))
}

/// Record a result against a specific test (used when a body throws).
#[op2(fast)]
pub fn op_hopp_test_record(
    state: &mut OpState,
    #[smi] id: u32,
    #[string] status: &str,
    #[string] message: String,
) -> Result<(), JsErrorBox> {
    let status: ExpectStatus = status.parse().map_err(|e| bad_arg("status", e))?;
    state
        .borrow_mut::<RunState>()
        .runner
        .record_in(id, ExpectResult::new(status, message))
        .map_err(|e| JsErrorBox::generic(e.to_string()))
}

/// Evaluate a matcher and record its result against the current test.
#[op2(fast)]
pub fn op_hopp_expect(state: &mut OpState, #[string] call: &str) -> Result<(), JsErrorBox> {
    let call: MatcherCall = serde_json::from_str(call).map_err(|e| bad_arg("matcher call", e))?;
    let result = matchers::evaluate(&call);
    state.borrow_mut::<RunState>().runner.record(result);
    Ok(())
}

/// Report how the wrapped script ended.
#[op2(fast)]
pub fn op_hopp_script_settled(
    state: &mut OpState,
    #[string] kind: &str,
    #[string] message: String,
) -> Result<(), JsErrorBox> {
    let settlement = match kind {
        "ok" => Settlement::Completed,
        "runtime" => Settlement::Runtime(message),
        "async" => Settlement::Async(message),
        other => return Err(bad_arg("settlement", other)),
    };
    if let Some(tx) = state.borrow_mut::<SettleSender>().0.take() {
        tracing::debug!(?settlement, "script settled");
        let _ = tx.send(settlement);
    }
    Ok(())
}

// --- bodies ------------------------------------------------------------------

/// Store a body for a script-constructed `Request`/`Response`.
#[op2(fast)]
#[smi]
pub fn op_hopp_body_register(
    state: &mut OpState,
    #[string] body: &str,
    #[string] content_type: String,
) -> Result<u32, JsErrorBox> {
    let value = marshal::to_host(body).map_err(|e| bad_arg("body", e))?;
    let bytes = bridge::body_bytes(value).unwrap_or_default();
    let content_type = (!content_type.is_empty()).then_some(content_type);
    Ok(state
        .borrow_mut::<BodyRegistry>()
        .register(bytes, content_type))
}

/// Check and flip a body's consumed flag. Returns `false` if it was
/// already consumed.
#[op2(fast)]
pub fn op_hopp_body_mark_used(state: &mut OpState, #[smi] id: u32) -> Result<bool, JsErrorBox> {
    match state.borrow_mut::<BodyRegistry>().mark_used(id) {
        Ok(()) => Ok(true),
        Err(bridge::BodyError::AlreadyUsed) => Ok(false),
        Err(e) => Err(JsErrorBox::type_error(e.to_string())),
    }
}

/// Whether a body has been consumed.
#[op2(fast)]
pub fn op_hopp_body_used(state: &mut OpState, #[smi] id: u32) -> Result<bool, JsErrorBox> {
    state
        .borrow::<BodyRegistry>()
        .is_used(id)
        .map_err(|e| JsErrorBox::type_error(e.to_string()))
}

/// Register a second handle over the same body.
#[op2(fast)]
#[smi]
pub fn op_hopp_body_clone(state: &mut OpState, #[smi] id: u32) -> Result<u32, JsErrorBox> {
    state
        .borrow_mut::<BodyRegistry>()
        .clone_slot(id)
        .map_err(|e| JsErrorBox::type_error(e.to_string()))
}

/// Decode a body that the VM has already marked consumed.
///
/// Resolves to an envelope: `{"ok": <wire>}` or
/// `{"error": {"name": <JS class>, "message": ...}}`, so the bootstrap can
/// raise the right error class.
#[op2(async)]
#[string]
pub async fn op_hopp_body_read(
    op_state: Rc<RefCell<OpState>>,
    #[smi] id: u32,
    #[string] kind: String,
) -> Result<String, JsErrorBox> {
    let kind: BodyKind = kind.parse().map_err(|e| bad_arg("body reader", e))?;
    let (tracker, snapshot) = {
        let st = op_state.borrow();
        (
            st.borrow::<PendingOperationTracker>().clone(),
            st.borrow::<BodyRegistry>().snapshot(id),
        )
    };

    let decoded = tracker
        .track("body_read", async move {
            // Bytes are already materialized; yield so the result is never
            // delivered in the same turn as the call.
            tokio::task::yield_now().await;
            snapshot.and_then(|snap| bridge::decode_body(&snap, kind))
        })
        .await;

    let envelope = match decoded {
        Ok(value) => {
            let value = serde_json::to_value(&value)
                .map_err(|e| JsErrorBox::generic(format!("serialization failed: {e}")))?;
            json!({ "ok": value })
        }
        Err(e) => json!({ "error": { "name": e.js_class(), "message": e.to_string() } }),
    };
    Ok(envelope.to_string())
}

// --- fetch and timers --------------------------------------------------------

/// Perform a fetch through the injected [`FetchDispatcher`].
///
/// Resolves to a serialized response shadow. Transport failures reject
/// with the transport's message; the bootstrap rethrows them as `FetchError`.
#[op2(async)]
#[string]
pub async fn op_hopp_fetch(
    op_state: Rc<RefCell<OpState>>,
    #[string] init: String,
) -> Result<String, JsErrorBox> {
    let (tracker, dispatcher, request) = {
        let mut st = op_state.borrow_mut();
        let limits = st.borrow_mut::<FetchLimits>();
        if limits.calls_made >= limits.max_calls {
            return Err(JsErrorBox::generic(format!(
                "fetch limit exceeded (max {} calls per run)",
                limits.max_calls
            )));
        }
        limits.calls_made += 1;

        let init: FetchInit = serde_json::from_str(&init).map_err(|e| bad_arg("fetch init", e))?;
        let stored_body = match init.body_id {
            Some(id) => Some(
                st.borrow::<BodyRegistry>()
                    .snapshot(id)
                    .map_err(|e| JsErrorBox::type_error(e.to_string()))?
                    .bytes
                    .to_vec(),
            ),
            None => None,
        };
        let request = bridge::build_fetch_request(init, stored_body)
            .map_err(|e| JsErrorBox::generic(e.to_string()))?;
        (
            st.borrow::<PendingOperationTracker>().clone(),
            st.borrow::<Arc<dyn FetchDispatcher>>().clone(),
            request,
        )
    };

    tracing::debug!(method = %request.method, url = %request.url, "fetch dispatched");
    let url = request.url.clone();
    let response = tracker
        .track("fetch", async move { dispatcher.perform_fetch(request).await })
        .await
        .map_err(|e| {
            tracing::debug!(url = %url, code = e.code(), error = %e, "fetch failed");
            JsErrorBox::generic(e.to_string())
        })?;

    let shadow = {
        let mut st = op_state.borrow_mut();
        bridge::register_response(st.borrow_mut::<BodyRegistry>(), url, response)
    };
    to_json_string(&shadow)
}

/// Allocate a timer id. The timer can be cleared from this point on, even
/// before its sleep starts.
#[op2(fast)]
#[smi]
pub fn op_hopp_timer_create(state: &mut OpState) -> u32 {
    let timers = state.borrow_mut::<TimerHandles>();
    timers.next_id += 1;
    let id = timers.next_id;
    timers.pending.insert(id, CancelHandle::new_rc());
    id
}

/// Resolve after `ms` milliseconds. Backs `setTimeout`.
///
/// Resolves `true` when the delay elapsed and `false` when the timer was
/// cleared first. A cleared timer stops being tracked immediately.
#[op2(async)]
pub async fn op_hopp_sleep(
    op_state: Rc<RefCell<OpState>>,
    #[smi] id: u32,
    #[smi] ms: u32,
) -> bool {
    let (tracker, cancel) = {
        let st = op_state.borrow();
        let Some(cancel) = st.borrow::<TimerHandles>().pending.get(&id).cloned() else {
            return false;
        };
        (st.borrow::<PendingOperationTracker>().clone(), cancel)
    };
    let sleep = tokio::time::sleep(std::time::Duration::from_millis(u64::from(ms)));
    let fired = tracker.track("timer", sleep.or_cancel(cancel)).await.is_ok();
    op_state
        .borrow_mut()
        .borrow_mut::<TimerHandles>()
        .pending
        .remove(&id);
    fired
}

/// Cancel a pending timer. Unknown or finished ids are ignored.
#[op2(fast)]
pub fn op_hopp_clear_timer(state: &mut OpState, #[smi] id: u32) {
    if let Some(cancel) = state.borrow_mut::<TimerHandles>().pending.remove(&id) {
        cancel.cancel();
    }
}

deno_core::extension!(
    hopp_ext,
    ops = [
        op_hopp_console,
        op_hopp_env_get,
        op_hopp_env_set,
        op_hopp_env_unset,
        op_hopp_env_resolve,
        op_hopp_request_get,
        op_hopp_request_mutate,
        op_hopp_cookies_get,
        op_hopp_cookies_set,
        op_hopp_test_declare,
        op_hopp_test_enter,
        op_hopp_test_exit,
        op_hopp_test_record,
        op_hopp_expect,
        op_hopp_script_settled,
        op_hopp_body_register,
        op_hopp_body_mark_used,
        op_hopp_body_used,
        op_hopp_body_clone,
        op_hopp_body_read,
        op_hopp_fetch,
        op_hopp_timer_create,
        op_hopp_sleep,
        op_hopp_clear_timer
    ],
);
