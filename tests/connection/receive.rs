//! End-to-end receive over the in-memory broker.

use std::collections::BTreeSet;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use msgbridge::{
    ConnectionConfig, ConnectionFactory, DeliveryTag, InMemoryBroker, Message, TaskExecutor,
};
use serde::{Deserialize, Serialize};

use crate::support::{count, eventually, init_tracing, Harness};

fn started(broker: &InMemoryBroker, workers: usize) -> msgbridge::Connection {
    init_tracing();
    let factory = ConnectionFactory::new(
        broker.clone(),
        ConnectionConfig::default().with_workers(workers),
    );
    let connection = factory.create_connection().unwrap();
    connection.start().unwrap();
    connection
}

#[test]
fn receive_returns_published_message_and_acks_it() {
    let broker = InMemoryBroker::new();
    let connection = started(&broker, 2);
    broker.publish(
        "orders",
        Message::text("order-1")
            .with_id("m-1")
            .with_header("tenant", "acme"),
    );

    let session = connection.create_session().unwrap();
    let received = session
        .receive("orders", Some(Duration::from_secs(1)))
        .unwrap()
        .unwrap();

    assert_eq!(received.body_str(), Some("order-1"));
    assert_eq!(received.message_id.as_deref(), Some("m-1"));
    assert_eq!(received.header("tenant"), Some("acme"));
    assert_eq!(broker.acked(), vec![DeliveryTag(1)]);
    assert!(broker.nacked().is_empty());
    assert_eq!(broker.unacked_len(), 0);

    connection.close().unwrap();
}

#[test]
fn receive_times_out_on_empty_queue() {
    let broker = InMemoryBroker::new();
    let connection = started(&broker, 1);
    let session = connection.create_session().unwrap();

    let begun = Instant::now();
    let received = session
        .receive("orders", Some(Duration::from_millis(100)))
        .unwrap();

    assert!(received.is_none());
    assert!(begun.elapsed() >= Duration::from_millis(100));
    assert!(broker.acked().is_empty());
    assert!(broker.nacked().is_empty());
    assert_eq!(broker.cancelled().len(), 1);
    assert_eq!(session.active_receivers(), 0);

    connection.close().unwrap();
}

#[test]
fn message_published_while_waiting_is_delivered() {
    let broker = InMemoryBroker::new();
    let connection = started(&broker, 1);
    let session = connection.create_session().unwrap();

    let receiver = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.receive("orders", Some(Duration::from_secs(5))))
    };
    assert!(eventually(|| session.active_receivers() == 1));
    broker.publish("orders", Message::text("late-order"));

    let received = receiver.join().unwrap().unwrap().unwrap();
    assert_eq!(received.body_str(), Some("late-order"));
    assert_eq!(broker.acked().len(), 1);

    connection.close().unwrap();
}

#[test]
fn delivery_after_timeout_is_requeued_for_the_next_receive() {
    let h = Harness::new(1);
    let session = h.session();
    h.connection.start().unwrap();

    // Occupy the only worker so the delivery lands after the receive gives up.
    let (release_tx, release_rx) = channel::<()>();
    h.executor
        .submit(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();
    h.broker.publish("orders", Message::text("order-1"));

    let first = session
        .receive("orders", Some(Duration::from_millis(50)))
        .unwrap();
    assert!(first.is_none());

    release_tx.send(()).unwrap();
    assert!(eventually(|| count(&h.log, "channel.nack 1 requeue=true") == 1));
    assert!(eventually(|| h.broker.queue_len("orders") == 1));

    let second = session
        .receive("orders", Some(Duration::from_secs(1)))
        .unwrap()
        .unwrap();
    assert_eq!(second.body_str(), Some("order-1"));
    assert_eq!(h.broker.acked(), vec![DeliveryTag(2)]);
    assert_eq!(h.broker.nacked(), vec![(DeliveryTag(1), true)]);
    assert_eq!(count(&h.log, "channel.ack 1"), 0);
}

#[test]
fn competing_sessions_receive_each_message_once() {
    let broker = InMemoryBroker::new();
    let connection = started(&broker, 2);
    for i in 0..9 {
        broker.publish("work", Message::text(format!("job-{}", i)));
    }

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let session = connection.create_session().unwrap();
            thread::spawn(move || {
                (0..3)
                    .map(|_| {
                        session
                            .receive("work", Some(Duration::from_secs(2)))
                            .unwrap()
                            .and_then(|m| m.body_str().map(str::to_string))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for worker in workers {
        for body in worker.join().unwrap() {
            assert!(seen.insert(body.expect("every receive gets a message")));
        }
    }

    assert_eq!(seen.len(), 9);
    assert_eq!(broker.acked().len(), 9);
    assert_eq!(broker.queue_len("work"), 0);

    connection.close().unwrap();
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
    quantity: u32,
}

#[test]
fn encoded_payload_survives_receive() {
    let broker = InMemoryBroker::new();
    let connection = started(&broker, 1);
    let event = OrderPlaced {
        order_id: "o-42".into(),
        quantity: 3,
    };
    broker.publish(
        "events",
        Message::encode(&event)
            .unwrap()
            .with_content_type("application/x-bitcode"),
    );

    let session = connection.create_session().unwrap();
    let received = session
        .receive("events", Some(Duration::from_secs(1)))
        .unwrap()
        .unwrap();

    assert_eq!(received.content_type.as_deref(), Some("application/x-bitcode"));
    assert_eq!(received.decode::<OrderPlaced>().unwrap(), event);

    connection.close().unwrap();
}
