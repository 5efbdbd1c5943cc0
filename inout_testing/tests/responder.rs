//! Integration coverage for the scripted responder.

use std::time::Duration;

use futures::FutureExt;
use inout::{
    Correlatable,
    Destination,
    InMemoryBroker,
    Message,
    Transport,
    message::{CORRELATION_ID_HEADER, FAULT_HEADER},
};
use inout_testing::{Responder, broker};
use rstest::rstest;
use tokio::sync::mpsc;

async fn reply_for(broker: &InMemoryBroker, responder: Responder) -> Message {
    let _running = responder.start().await;
    let replies = Destination::new("queue.response");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: inout::MessageHandler = std::sync::Arc::new(move |message| {
        let _ = tx.send(message);
        futures::future::ready(()).boxed()
    });
    let _sub = broker
        .subscribe(&replies, handler)
        .await
        .expect("subscribe failed");

    let mut request = Message::new("ping").with_header(CORRELATION_ID_HEADER, "r-1");
    request.set_reply_to(&replies);
    broker
        .send(request, &Destination::new("queue.request"))
        .await
        .expect("send failed");

    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no reply")
        .expect("reply channel closed")
}

#[rstest]
#[tokio::test]
async fn echo_preserves_payload_and_id(broker: InMemoryBroker) {
    let reply = reply_for(&broker, Responder::new(&broker, "queue.request")).await;
    assert_eq!(reply.payload().as_ref(), b"ping");
    assert_eq!(reply.header(CORRELATION_ID_HEADER), Some("r-1"));
}

#[rstest]
#[tokio::test]
async fn fault_reply_carries_reason(broker: InMemoryBroker) {
    let responder = Responder::new(&broker, "queue.request").faulting("boom");
    let reply = reply_for(&broker, responder).await;
    assert_eq!(reply.header(FAULT_HEADER), Some("boom"));
    assert_eq!(reply.header(CORRELATION_ID_HEADER), Some("r-1"));
}

#[rstest]
#[tokio::test]
async fn mismatched_reply_uses_other_id(broker: InMemoryBroker) {
    let responder = Responder::new(&broker, "queue.request").mismatched("other");
    let reply = reply_for(&broker, responder).await;
    assert_eq!(
        reply.correlation_id().expect("valid id").map(|id| id.to_string()),
        Some("other".to_owned())
    );
}

#[rstest]
#[tokio::test]
async fn silent_responder_records_requests(broker: InMemoryBroker) {
    let running = Responder::new(&broker, "queue.request").silent().start().await;
    broker
        .send(Message::new("ignored"), &Destination::new("queue.request"))
        .await
        .expect("send failed");

    tokio::time::timeout(Duration::from_secs(1), async {
        while running.request_count() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("request not consumed");
    assert_eq!(running.requests()[0].payload().as_ref(), b"ignored");
}
