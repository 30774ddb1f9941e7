//! Telemetry metric name constants.
//!
//! Centralised metric names for protolane operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `protolane_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `transport`: adapter name (e.g. "grpc", "channel")
//! - `kind`: call kind: "unary" or "server_stream"
//! - `code`: terminal status code name (e.g. "OK", "NOT_FOUND")

/// Total call activations (one per subscription).
///
/// Labels: `transport`, `kind`.
pub const CALLS_TOTAL: &str = "protolane_calls_total";

/// Total terminal events delivered to consumers.
///
/// Labels: `transport`, `kind`, `code`.
pub const CALL_OUTCOMES_TOTAL: &str = "protolane_call_outcomes_total";

/// Call duration in seconds, from activation to the terminal event.
///
/// Labels: `transport`, `kind`.
pub const CALL_DURATION_SECONDS: &str = "protolane_call_duration_seconds";

/// Total calls cancelled by their consumer before terminating.
///
/// Labels: `transport`, `kind`.
pub const CANCELLATIONS_TOTAL: &str = "protolane_cancellations_total";

/// Total events the call state machine dropped or rewrote.
///
/// Labels: `reason` ("after_terminal" | "after_cancel" | "unary_without_data"
/// | "unary_extra_data" | "unary_data_on_failure").
pub const SUPPRESSED_EVENTS_TOTAL: &str = "protolane_suppressed_events_total";

/// Total method bindings produced by the generator.
///
/// Labels: `cardinality` ("unary" | "server_streaming" | "client_streaming"
/// | "bidi_streaming").
pub const GENERATED_BINDINGS_TOTAL: &str = "protolane_generated_bindings_total";
