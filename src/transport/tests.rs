//! Tests for the in-memory broker.

use std::sync::Arc;

use futures::FutureExt;
use rstest::{fixture, rstest};
use tokio::{
    sync::mpsc,
    time::{Duration, timeout},
};

use super::{InMemoryBroker, MessageHandler, Transport};
use crate::{
    error::TransportError,
    message::{Destination, Message},
};

#[fixture]
fn broker() -> InMemoryBroker { InMemoryBroker::new() }

fn forwarding_handler(tx: mpsc::UnboundedSender<Message>) -> MessageHandler {
    Arc::new(move |message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(message);
        }
        .boxed()
    })
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("handler channel closed")
}

#[rstest]
#[tokio::test]
async fn backlog_is_delivered_to_first_consumer(broker: InMemoryBroker) {
    let queue = Destination::new("queue.request");
    broker
        .send(Message::new("early"), &queue)
        .await
        .expect("send failed");
    assert_eq!(broker.backlog_len(&queue), 1);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = broker
        .subscribe(&queue, forwarding_handler(tx))
        .await
        .expect("subscribe failed");

    assert_eq!(next(&mut rx).await.payload().as_ref(), b"early");
    assert_eq!(broker.backlog_len(&queue), 0);
}

#[rstest]
#[tokio::test]
async fn consumers_share_a_queue_round_robin(broker: InMemoryBroker) {
    let queue = Destination::new("queue.work");
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let _a = broker
        .subscribe(&queue, forwarding_handler(tx_a))
        .await
        .expect("subscribe a failed");
    let _b = broker
        .subscribe(&queue, forwarding_handler(tx_b))
        .await
        .expect("subscribe b failed");

    for body in ["1", "2", "3", "4"] {
        broker
            .send(Message::new(body), &queue)
            .await
            .expect("send failed");
    }

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(next(&mut rx_a).await);
        seen.push(next(&mut rx_b).await);
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(broker.consumer_count(&queue), 2);
}

#[rstest]
#[tokio::test]
async fn dropped_subscription_stops_delivery(broker: InMemoryBroker) {
    let queue = Destination::new("queue.response");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = broker
        .subscribe(&queue, forwarding_handler(tx))
        .await
        .expect("subscribe failed");
    sub.cancel();
    timeout(Duration::from_secs(1), async {
        while broker.consumer_count(&queue) > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("consumer was not detached");

    broker
        .send(Message::new("after"), &queue)
        .await
        .expect("send failed");
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.backlog_len(&queue), 1);
}

#[rstest]
#[tokio::test]
async fn rejected_destination_fails_sends(broker: InMemoryBroker) {
    let queue = Destination::new("queue.request");
    broker.reject_sends_to(&queue, "quota exceeded");
    let err = broker
        .send(Message::new("x"), &queue)
        .await
        .expect_err("send should be rejected");
    assert_eq!(
        err,
        TransportError::Rejected {
            destination: queue.clone(),
            reason: "quota exceeded".into(),
        }
    );

    broker.accept_sends_to(&queue);
    broker
        .send(Message::new("x"), &queue)
        .await
        .expect("send should succeed again");
}

#[rstest]
#[tokio::test]
async fn temporary_destination_is_deleted_with_its_last_consumer(broker: InMemoryBroker) {
    let temp = broker
        .provision_temporary_destination()
        .await
        .expect("provision failed");
    assert!(temp.is_temporary());
    assert!(broker.temporary_exists(&temp));

    let (tx, _rx) = mpsc::unbounded_channel();
    let sub = broker
        .subscribe(&temp, forwarding_handler(tx))
        .await
        .expect("subscribe failed");
    drop(sub);

    timeout(Duration::from_secs(1), async {
        while broker.temporary_exists(&temp) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("temporary destination was not deleted");

    let err = broker
        .send(Message::new("late"), &temp)
        .await
        .expect_err("send to deleted destination should fail");
    assert_eq!(err, TransportError::UnknownDestination(temp));
}

#[rstest]
#[tokio::test]
async fn closed_broker_refuses_work(broker: InMemoryBroker) {
    broker.close().await;
    let queue = Destination::new("queue.request");
    assert_eq!(
        broker.send(Message::new("x"), &queue).await,
        Err(TransportError::Closed)
    );
    assert_eq!(
        broker.provision_temporary_destination().await,
        Err(TransportError::Closed)
    );
}

#[rstest]
#[tokio::test]
async fn unsubscribed_temporary_destination_can_be_released(broker: InMemoryBroker) {
    let temp = broker
        .provision_temporary_destination()
        .await
        .expect("provision failed");

    broker
        .release_temporary_destination(&temp)
        .await
        .expect("release failed");

    assert!(!broker.temporary_exists(&temp));
    assert_eq!(
        broker.send(Message::new("x"), &temp).await,
        Err(TransportError::UnknownDestination(temp))
    );
}

#[rstest]
#[tokio::test]
async fn release_leaves_subscribed_temporary_destination(broker: InMemoryBroker) {
    let temp = broker
        .provision_temporary_destination()
        .await
        .expect("provision failed");
    let (tx, _rx) = mpsc::unbounded_channel();
    let _sub = broker
        .subscribe(&temp, forwarding_handler(tx))
        .await
        .expect("subscribe failed");

    broker
        .release_temporary_destination(&temp)
        .await
        .expect("release failed");

    assert!(broker.temporary_exists(&temp));
}

#[rstest]
#[tokio::test]
async fn release_rejects_named_queues(broker: InMemoryBroker) {
    let queue = Destination::new("queue.request");
    assert!(matches!(
        broker.release_temporary_destination(&queue).await,
        Err(TransportError::Rejected { .. })
    ));
}
