//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use prost::Message as _;

use protolane::schema::{
    FieldDescriptor, FieldKind, FileDecl, MessageDecl, MethodCardinality, MethodDescriptor,
    ServiceDescriptor, Syntax,
};
use protolane::telemetry;
use protolane::transport::{CallGuard, EventSink, MessageCodec, RawCall, server_stream_call, unary_call};
use protolane::{
    CallStatus, Generator, SchemaSet, StatusCode, Transport, TransportEvent,
};

#[derive(Clone, PartialEq, prost::Message)]
struct Count {
    #[prost(uint32, tag = "1")]
    value: u32,
}

fn payload(value: u32) -> Bytes {
    Bytes::from(Count { value }.encode_to_vec())
}

// ============================================================================
// Mock transport
// ============================================================================

/// Replays `script` into the sink as soon as a call starts. Streams stay
/// open when the script has no terminal event.
struct ScriptedTransport {
    script: Vec<TransportEvent<Bytes>>,
}

impl ScriptedTransport {
    fn new(script: Vec<TransportEvent<Bytes>>) -> Arc<dyn Transport> {
        Arc::new(Self { script })
    }

    fn start(&self, sink: EventSink<Bytes>) -> CallGuard {
        for event in &self.script {
            sink.emit(event.clone());
        }
        CallGuard::noop()
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn start_unary(&self, _call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        self.start(sink)
    }

    fn start_server_stream(&self, _call: RawCall, sink: EventSink<Bytes>) -> CallGuard {
        self.start(sink)
    }
}

fn unary(transport: Arc<dyn Transport>) -> protolane::EventSource<Count> {
    unary_call(
        transport,
        "/count.Counter/Get",
        &Count::default(),
        Default::default(),
        MessageCodec::prost(),
    )
}

fn stream(transport: Arc<dyn Transport>) -> protolane::EventSource<Count> {
    server_stream_call(
        transport,
        "/count.Counter/Watch",
        &Count::default(),
        Default::default(),
        MessageCodec::prost(),
    )
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for `name` whose label `label` equals `value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn successful_call_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let transport = ScriptedTransport::new(vec![
                    TransportEvent::Data(payload(7)),
                    TransportEvent::Status(CallStatus::ok()),
                ]);
                unary(transport).response().await
            })
        })
    });
    assert_eq!(result.unwrap().0.value, 7);

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::CALLS_TOTAL), 1);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CALL_OUTCOMES_TOTAL, "code", "OK"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CALLS_TOTAL, "transport", "scripted"),
        1
    );
    assert!(
        has_histogram(&snapshot, telemetry::CALL_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
    assert_eq!(counter_total(&snapshot, telemetry::SUPPRESSED_EVENTS_TOTAL), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn failed_call_records_its_code() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let _result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let transport = ScriptedTransport::new(vec![TransportEvent::Status(
                    CallStatus::new(StatusCode::NotFound, "gone", Default::default()),
                )]);
                unary(transport).response().await
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::CALL_OUTCOMES_TOTAL, "code", "NOT_FOUND"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CALL_OUTCOMES_TOTAL, "kind", "unary"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn contract_violations_record_suppressed_events() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                // OK without data, then a late event after the terminal one.
                let transport = ScriptedTransport::new(vec![
                    TransportEvent::Status(CallStatus::ok()),
                    TransportEvent::Data(payload(1)),
                ]);
                let _ = unary(transport).response().await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::SUPPRESSED_EVENTS_TOTAL,
            "reason",
            "unary_without_data"
        ),
        1
    );
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::SUPPRESSED_EVENTS_TOTAL,
            "reason",
            "after_terminal"
        ),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CALL_OUTCOMES_TOTAL, "code", "INTERNAL"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cancellation_is_counted_once() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let transport = ScriptedTransport::new(vec![TransportEvent::Data(payload(1))]);
                let mut subscription = stream(transport).subscribe();
                assert!(subscription.next().await.is_some());
                subscription.cancel();
                subscription.cancel();
                drop(subscription);
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::CANCELLATIONS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CALL_OUTCOMES_TOTAL), 0);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CALLS_TOTAL, "kind", "server_stream"),
        1
    );
}

#[test]
fn generation_counts_bindings_by_cardinality() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let file = FileDecl::new("count.proto", "count", Syntax::Proto3)
        .message(MessageDecl::new("Count").field(FieldDescriptor::scalar("value", 1, FieldKind::Uint32)))
        .service(
            ServiceDescriptor::new("Counter")
                .method(MethodDescriptor::new("Get", "Count", "Count", MethodCardinality::Unary))
                .method(MethodDescriptor::new(
                    "Watch",
                    "Count",
                    "Count",
                    MethodCardinality::ServerStreaming,
                ))
                .method(MethodDescriptor::new(
                    "Sync",
                    "Count",
                    "Count",
                    MethodCardinality::BidiStreaming,
                )),
        );
    let schema = SchemaSet::new(vec![file]).unwrap();

    let output = metrics::with_local_recorder(&recorder, || Generator::default().generate(&schema));
    assert!(output.unwrap().is_success());

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::GENERATED_BINDINGS_TOTAL), 3);
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::GENERATED_BINDINGS_TOTAL,
            "cardinality",
            "bidi_streaming"
        ),
        1
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let transport = ScriptedTransport::new(vec![
        TransportEvent::Data(payload(3)),
        TransportEvent::Status(CallStatus::ok()),
    ]);
    let (count, _) = unary(transport).response().await.unwrap();
    assert_eq!(count.value, 3);
}
