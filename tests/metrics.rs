//! Tests for `inout` metrics.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.
#![cfg(feature = "metrics")]

use std::time::Duration;

use inout::{
    CallOptions,
    Destination,
    InMemoryBroker,
    RequestGateway,
    metrics::{
        CANCELLATIONS_TOTAL,
        PENDING_REQUESTS,
        REPLIES_TOTAL,
        REQUESTS_SENT,
        ReplyOutcome,
        SEND_FAILURES_TOTAL,
        TIMEOUTS_TOTAL,
    },
};
use inout_testing::Responder;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// Run `scenario` on a current-thread runtime so every task records into the
/// thread-local recorder.
fn record<F, Fut>(recorder: &DebuggingRecorder, scenario: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    metrics::with_local_recorder(recorder, || runtime.block_on(scenario()));
}

struct Reading {
    name: String,
    labels: Vec<(String, String)>,
    value: DebugValue,
}

/// Take a single snapshot of everything recorded so far.
fn readings(snapshotter: &Snapshotter) -> Vec<Reading> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(key, _, _, value)| Reading {
            name: key.key().name().to_owned(),
            labels: key
                .key()
                .labels()
                .map(|l| (l.key().to_owned(), l.value().to_owned()))
                .collect(),
            value,
        })
        .collect()
}

fn counter(readings: &[Reading], name: &str, label: Option<(&str, &str)>) -> u64 {
    readings
        .iter()
        .filter(|r| {
            r.name == name
                && label.is_none_or(|(k, v)| r.labels.iter().any(|(lk, lv)| lk == k && lv == v))
        })
        .map(|r| match &r.value {
            DebugValue::Counter(c) => *c,
            _ => 0,
        })
        .sum()
}

fn gauge(readings: &[Reading], name: &str) -> Option<f64> {
    readings
        .iter()
        .find(|r| r.name == name)
        .and_then(|r| match &r.value {
            DebugValue::Gauge(g) => Some(g.into_inner()),
            _ => None,
        })
}

#[rstest]
#[case(ReplyOutcome::Delivered, "delivered")]
#[case(ReplyOutcome::Late, "late")]
#[case(ReplyOutcome::Malformed, "malformed")]
fn reply_outcomes_are_labelled(#[case] outcome: ReplyOutcome, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || inout::metrics::inc_replies(outcome));

    let readings = readings(&snapshotter);
    assert_eq!(counter(&readings, REPLIES_TOTAL, Some(("outcome", label))), 1);
}

#[test]
fn successful_call_records_request_and_reply() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    record(&recorder, || async {
        let broker = InMemoryBroker::new();
        let _responder = Responder::new(&broker, "queue.request").start().await;
        let gateway = RequestGateway::builder(broker.clone())
            .timeout(Duration::from_secs(5))
            .reply_to(Destination::new("queue.response"))
            .start()
            .await
            .expect("failed to start gateway");
        gateway
            .call("ping", &Destination::new("queue.request"), CallOptions::new())
            .await
            .expect("call failed");
        gateway.shutdown().await;
    });

    let readings = readings(&snapshotter);
    assert_eq!(counter(&readings, REQUESTS_SENT, None), 1);
    assert_eq!(
        counter(&readings, REPLIES_TOTAL, Some(("outcome", "delivered"))),
        1
    );
    assert_eq!(gauge(&readings, PENDING_REQUESTS), Some(0.0));
}

#[test]
fn failures_are_counted_by_kind() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    record(&recorder, || async {
        let broker = InMemoryBroker::new();
        let gateway = RequestGateway::builder(broker.clone())
            .timeout(Duration::from_millis(20))
            .reply_to(Destination::new("queue.response"))
            .start()
            .await
            .expect("failed to start gateway");
        let queue = Destination::new("queue.request");

        // Nobody answers: timeout.
        let _ = gateway.call("a", &queue, CallOptions::new()).await;
        // Explicit cancellation.
        let pending = gateway
            .send_request("b", &queue, CallOptions::new())
            .await
            .expect("send failed");
        pending.cancel_handle().cancel();
        let _ = pending.await;
        // Transport refusal.
        broker.reject_sends_to(&queue, "down");
        let _ = gateway.call("c", &queue, CallOptions::new()).await;
    });

    let readings = readings(&snapshotter);
    assert_eq!(counter(&readings, TIMEOUTS_TOTAL, None), 1);
    assert_eq!(counter(&readings, CANCELLATIONS_TOTAL, None), 1);
    assert_eq!(counter(&readings, SEND_FAILURES_TOTAL, None), 1);
    assert_eq!(counter(&readings, REQUESTS_SENT, None), 2);
    assert_eq!(gauge(&readings, PENDING_REQUESTS), Some(0.0));
}
