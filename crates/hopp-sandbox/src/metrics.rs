//! Prometheus metrics for the Hoppscotch sandbox.
//!
//! Only compiled with the `metrics` feature.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Label set for run metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RunLabels {
    /// `"pre_request"` or `"test"`.
    pub script_kind: String,
}

/// Label set for error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// A `ScriptErrorKind` string such as `"async_rejection"`.
    pub error_kind: String,
}

/// Sandbox run metrics.
pub struct SandboxMetrics {
    /// Completed runs by script kind.
    pub runs_total: Family<RunLabels, Counter>,
    /// Time from the end of synchronous evaluation until the run drained.
    pub drain_duration_seconds: Family<RunLabels, Histogram>,
    /// Failed runs by error kind.
    pub errors_total: Family<ErrorLabels, Counter>,
}

impl SandboxMetrics {
    /// Create the metrics and register them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let runs_total = Family::default();
        registry.register(
            "hopp_sandbox_runs_total",
            "Completed sandbox runs",
            runs_total.clone(),
        );

        let drain_duration_seconds = Family::<RunLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.01, 0.03, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0].into_iter())
        });
        registry.register(
            "hopp_sandbox_drain_duration_seconds",
            "Time spent waiting for async script work to drain",
            drain_duration_seconds.clone(),
        );

        let errors_total = Family::default();
        registry.register(
            "hopp_sandbox_errors_total",
            "Failed sandbox runs by error kind",
            errors_total.clone(),
        );

        Self {
            runs_total,
            drain_duration_seconds,
            errors_total,
        }
    }

    /// Record a completed run.
    pub fn record_run(&self, script_kind: &str, drain_secs: f64) {
        let labels = RunLabels {
            script_kind: script_kind.to_string(),
        };
        self.runs_total.get_or_create(&labels).inc();
        self.drain_duration_seconds
            .get_or_create(&labels)
            .observe(drain_secs);
    }

    /// Record a failed run.
    pub fn record_error(&self, error_kind: &str) {
        let labels = ErrorLabels {
            error_kind: error_kind.to_string(),
        };
        self.errors_total.get_or_create(&labels).inc();
    }
}
