use super::MemoryBroker;
use super::engine::QUEUE_BACKLOG_LIMIT;
use crate::transport::message::{ClientFrame, CorrelationId, DeliveryMode, ServerFrame};
use crate::utils::SessionError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

fn peer(
    broker: &MemoryBroker,
    name: &str,
) -> (UnboundedSender<ServerFrame>, UnboundedReceiver<ServerFrame>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    broker
        .handle_frame(
            name,
            &tx,
            ClientFrame::Connect {
                vpn_name: "default".to_string(),
                username: name.to_string(),
            },
        )
        .unwrap();
    assert_eq!(rx.try_recv().unwrap(), ServerFrame::Up);
    (tx, rx)
}

fn subscribe(broker: &MemoryBroker, name: &str, tx: &UnboundedSender<ServerFrame>, topic: &str) {
    broker
        .handle_frame(
            name,
            tx,
            ClientFrame::Subscribe {
                topic: topic.to_string(),
                correlation: CorrelationId::new(),
            },
        )
        .unwrap();
}

fn publish(broker: &MemoryBroker, name: &str, tx: &UnboundedSender<ServerFrame>, topic: &str, payload: &str) {
    broker
        .handle_frame(
            name,
            tx,
            ClientFrame::Publish {
                topic: topic.to_string(),
                payload: payload.to_string(),
                delivery: DeliveryMode::Direct,
                correlation: None,
            },
        )
        .unwrap();
}

fn drain(rx: &mut UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[test]
fn test_connect_registers_peer() {
    let broker = MemoryBroker::new();
    let _peer = peer(&broker, "a");
    assert_eq!(broker.peer_count(), 1);
}

#[test]
fn test_frames_before_connect_are_refused() {
    let broker = MemoryBroker::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = broker.handle_frame(
        "stranger",
        &tx,
        ClientFrame::Subscribe {
            topic: "a/b".to_string(),
            correlation: CorrelationId::new(),
        },
    );
    assert_eq!(result, Err(SessionError::NotConnected));
}

#[test]
fn test_refused_connection() {
    let broker = MemoryBroker::new();
    broker.refuse_connections(Some("bad credentials"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::Connect {
                vpn_name: "default".to_string(),
                username: "a".to_string(),
            },
        )
        .unwrap();

    assert_eq!(
        rx.try_recv().unwrap(),
        ServerFrame::ConnectFailed {
            reason: "bad credentials".to_string()
        }
    );
    assert_eq!(broker.peer_count(), 0);
}

#[test]
fn test_subscribe_echoes_correlation() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = peer(&broker, "a");
    let correlation = CorrelationId::from("sub-1");

    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::Subscribe {
                topic: "game/*".to_string(),
                correlation: correlation.clone(),
            },
        )
        .unwrap();

    assert_eq!(rx.try_recv().unwrap(), ServerFrame::SubscriptionOk { correlation });
    assert_eq!(broker.subscription_count(), 1);
}

#[test]
fn test_publish_reaches_each_matching_peer_once() {
    let broker = MemoryBroker::new();
    let (tx_a, mut rx_a) = peer(&broker, "a");
    let (tx_b, mut rx_b) = peer(&broker, "b");

    // two overlapping patterns on the same peer still mean one delivery
    subscribe(&broker, "a", &tx_a, "game/*/fire");
    subscribe(&broker, "a", &tx_a, "game/>");
    subscribe(&broker, "b", &tx_b, "other/>");
    drain(&mut rx_a);
    drain(&mut rx_b);

    publish(&broker, "b", &tx_b, "game/42/fire", "{}");

    let frames = drain(&mut rx_a);
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerFrame::Message { topic, payload, .. } => {
            assert_eq!(topic, "game/42/fire");
            assert_eq!(payload, "{}");
        }
        other => panic!("Expected Message, got {other:?}"),
    }
    assert!(drain(&mut rx_b).is_empty());
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = peer(&broker, "a");
    subscribe(&broker, "a", &tx, "a/b");
    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::Unsubscribe {
                topic: "a/b".to_string(),
                correlation: CorrelationId::new(),
            },
        )
        .unwrap();
    drain(&mut rx);

    publish(&broker, "a", &tx, "a/b", "1");
    assert!(drain(&mut rx).is_empty());
    assert_eq!(broker.subscription_count(), 0);
}

#[test]
fn test_guaranteed_publish_acknowledged_or_rejected() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = peer(&broker, "a");
    let correlation = CorrelationId::from("pub-1");
    let guaranteed = |correlation: &CorrelationId| ClientFrame::Publish {
        topic: "a/b".to_string(),
        payload: "1".to_string(),
        delivery: DeliveryMode::Guaranteed,
        correlation: Some(correlation.clone()),
    };

    broker.handle_frame("a", &tx, guaranteed(&correlation)).unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        ServerFrame::Acknowledged {
            correlation: correlation.clone()
        }
    );

    broker.reject_guaranteed(Some("queue full"));
    broker.handle_frame("a", &tx, guaranteed(&correlation)).unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        ServerFrame::Rejected {
            correlation,
            reason: "queue full".to_string()
        }
    );
}

#[test]
fn test_withheld_and_duplicated_acks() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = peer(&broker, "a");

    broker.withhold_acks(true);
    subscribe(&broker, "a", &tx, "a/b");
    assert!(drain(&mut rx).is_empty());

    broker.withhold_acks(false);
    assert_eq!(broker.release_withheld(), 1);
    assert_eq!(drain(&mut rx).len(), 1);

    broker.duplicate_acks(true);
    subscribe(&broker, "a", &tx, "a/c");
    assert_eq!(drain(&mut rx).len(), 2);
}

#[test]
fn test_request_reply_routing() {
    let broker = MemoryBroker::new();
    let (tx_req, mut rx_req) = peer(&broker, "requester");
    let (tx_rep, mut rx_rep) = peer(&broker, "responder");
    subscribe(&broker, "responder", &tx_rep, "join/>");
    drain(&mut rx_rep);

    let correlation = CorrelationId::from("req-1");
    broker
        .handle_frame(
            "requester",
            &tx_req,
            ClientFrame::Request {
                topic: "join/7".to_string(),
                payload: "{}".to_string(),
                correlation: correlation.clone(),
            },
        )
        .unwrap();

    let reply_to = match rx_rep.try_recv().unwrap() {
        ServerFrame::Message {
            reply_to: Some(reply_to),
            correlation: Some(received),
            ..
        } => {
            assert_eq!(received, correlation);
            reply_to
        }
        other => panic!("Expected request Message, got {other:?}"),
    };

    broker
        .handle_frame(
            "responder",
            &tx_rep,
            ClientFrame::Reply {
                reply_to,
                correlation: correlation.clone(),
                payload: "\"ok\"".to_string(),
            },
        )
        .unwrap();

    match rx_req.try_recv().unwrap() {
        ServerFrame::Reply {
            correlation: received,
            payload,
            ..
        } => {
            assert_eq!(received, correlation);
            assert_eq!(payload, "\"ok\"");
        }
        other => panic!("Expected Reply, got {other:?}"),
    }
}

#[test]
fn test_queue_backlog_delivered_on_bind() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = peer(&broker, "a");
    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::QueueSubscribe {
                queue: "scores".to_string(),
                topic: "game/*/score".to_string(),
                correlation: CorrelationId::new(),
            },
        )
        .unwrap();
    drain(&mut rx);

    publish(&broker, "a", &tx, "game/1/score", "10");
    publish(&broker, "a", &tx, "game/2/score", "20");
    assert_eq!(broker.queue_backlog("scores"), 2);
    assert!(drain(&mut rx).is_empty());

    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::BindQueue {
                queue: "scores".to_string(),
            },
        )
        .unwrap();

    let frames = drain(&mut rx);
    assert_eq!(
        frames[0],
        ServerFrame::ConsumerUp {
            queue: "scores".to_string()
        }
    );
    assert_eq!(frames.len(), 3);
    assert_eq!(broker.queue_backlog("scores"), 0);
}

#[test]
fn test_queue_allows_single_consumer() {
    let broker = MemoryBroker::new();
    let (tx_a, mut rx_a) = peer(&broker, "a");
    let (tx_b, mut rx_b) = peer(&broker, "b");
    let bind = || ClientFrame::BindQueue {
        queue: "q".to_string(),
    };

    broker.handle_frame("a", &tx_a, bind()).unwrap();
    broker.handle_frame("b", &tx_b, bind()).unwrap();

    assert!(matches!(rx_a.try_recv().unwrap(), ServerFrame::ConsumerUp { .. }));
    assert!(matches!(
        rx_b.try_recv().unwrap(),
        ServerFrame::ConsumerConnectFailed { .. }
    ));

    // detaching the consumer frees the queue
    broker.detach("a");
    broker.handle_frame("b", &tx_b, bind()).unwrap();
    assert!(matches!(rx_b.try_recv().unwrap(), ServerFrame::ConsumerUp { .. }));
}

#[test]
fn test_disconnect_confirms_and_forgets_peer() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = peer(&broker, "a");
    subscribe(&broker, "a", &tx, "a/b");
    drain(&mut rx);

    broker.handle_frame("a", &tx, ClientFrame::Disconnect).unwrap();

    assert_eq!(rx.try_recv().unwrap(), ServerFrame::Disconnected);
    assert_eq!(broker.peer_count(), 0);
    assert_eq!(broker.subscription_count(), 0);
}

fn queue_subscribe(broker: &MemoryBroker, tx: &UnboundedSender<ServerFrame>, queue: &str, topic: &str) {
    broker
        .handle_frame(
            "a",
            tx,
            ClientFrame::QueueSubscribe {
                queue: queue.to_string(),
                topic: topic.to_string(),
                correlation: CorrelationId::new(),
            },
        )
        .unwrap();
}

#[test]
fn test_queue_backlog_is_capped() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = peer(&broker, "a");
    queue_subscribe(&broker, &tx, "scores", "scores/>");

    for n in 0..QUEUE_BACKLOG_LIMIT + 5 {
        publish(&broker, "a", &tx, "scores/1", &n.to_string());
    }
    assert_eq!(broker.queue_backlog("scores"), QUEUE_BACKLOG_LIMIT);
    drain(&mut rx);

    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::BindQueue {
                queue: "scores".to_string(),
            },
        )
        .unwrap();

    // the oldest messages were dropped
    match &drain(&mut rx)[1] {
        ServerFrame::Message { payload, .. } => assert_eq!(payload, "5"),
        other => panic!("Expected Message, got {other:?}"),
    }
}

#[test]
fn test_idle_queue_is_dropped() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = peer(&broker, "a");
    queue_subscribe(&broker, &tx, "scores", "scores/>");
    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::BindQueue {
                queue: "scores".to_string(),
            },
        )
        .unwrap();
    assert_eq!(broker.queue_count(), 1);

    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::UnbindQueue {
                queue: "scores".to_string(),
            },
        )
        .unwrap();
    // still subscribed, so the queue keeps collecting
    assert_eq!(broker.queue_count(), 1);

    broker
        .handle_frame(
            "a",
            &tx,
            ClientFrame::QueueUnsubscribe {
                queue: "scores".to_string(),
                topic: "scores/>".to_string(),
                correlation: CorrelationId::new(),
            },
        )
        .unwrap();
    assert_eq!(broker.queue_count(), 0);
    drain(&mut rx);
}
