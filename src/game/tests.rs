use super::{
    CannonFireMessage, CannonRotationMessage, DEFAULT_NAMESPACE, GameClient, GameEvent,
    GameJoinRequest, HighScoreMessage, Rotation,
};
use crate::broker::MemoryBroker;
use crate::client::Session;
use crate::config::Settings;
use crate::transport::MemoryConnector;
use crate::utils::SessionError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn game_client(broker: &MemoryBroker) -> GameClient {
    let mut settings = Settings::default();
    settings.session.request_timeout_ms = 300;
    let session = Session::new(&settings, Arc::new(MemoryConnector::new(broker.clone())));
    session.connect().await.unwrap();
    GameClient::new(session, DEFAULT_NAMESPACE)
}

#[test]
fn test_event_topics() {
    assert_eq!(
        GameEvent::CannonRotation.topic("entangled-cannon", "g1"),
        "entangled-cannon/g1/cannon/rotation"
    );
    assert_eq!(
        GameEvent::CannonFire.topic("entangled-cannon", "g1"),
        "entangled-cannon/g1/cannon/fire"
    );
    assert_eq!(
        GameEvent::GameJoin.topic("entangled-cannon", "g1"),
        "entangled-cannon/g1/game/join"
    );
    assert_eq!(
        GameEvent::GameOver.topic("entangled-cannon", "g1"),
        "entangled-cannon/g1/game/over"
    );
    assert_eq!(
        GameEvent::HighScore.topic("entangled-cannon", "g1"),
        "entangled-cannon/g1/highscore"
    );
    assert_eq!(
        GameEvent::HighScore.any_session("entangled-cannon"),
        "entangled-cannon/*/highscore"
    );
}

#[test]
fn test_parse_topic() {
    assert_eq!(
        GameEvent::parse("entangled-cannon", "entangled-cannon/42/cannon/fire"),
        Some(("42".to_string(), GameEvent::CannonFire))
    );
    assert_eq!(GameEvent::parse("entangled-cannon", "other/42/cannon/fire"), None);
    assert_eq!(GameEvent::parse("entangled-cannon", "entangled-cannon/42/cannon/reload"), None);
    assert_eq!(GameEvent::parse("entangled-cannon", "entangled-cannon//highscore"), None);
}

#[test]
fn test_rotation_wire_format() {
    let message = CannonRotationMessage {
        game_session_id: "g1".to_string(),
        rotation: Rotation::new(0.1, 0.2, 0.0),
    };
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(
        value,
        json!({
            "game_session_id": "g1",
            "rotation": { "_x": 0.1, "_y": 0.2, "_z": 0.0, "_order": "XYZ" }
        })
    );

    // the display's engine adds its own bookkeeping fields
    let from_engine: CannonRotationMessage = serde_json::from_value(json!({
        "game_session_id": "g1",
        "rotation": { "isEuler": true, "_x": 1.0, "_y": 0.0, "_z": 0.5, "_order": "YXZ" }
    }))
    .unwrap();
    assert_eq!(from_engine.rotation.order, "YXZ");

    let plain: Rotation = serde_json::from_value(json!({ "x": 1.0, "y": 2.0, "z": 3.0 })).unwrap();
    assert_eq!(plain, Rotation::new(1.0, 2.0, 3.0));
}

#[tokio::test]
async fn test_fire_and_rotation_reach_display() {
    let broker = MemoryBroker::new();
    let display = game_client(&broker).await;
    let controller = game_client(&broker).await;

    let (fire_tx, mut fire_rx) = mpsc::unbounded_channel::<CannonFireMessage>();
    let (rot_tx, mut rot_rx) = mpsc::unbounded_channel::<CannonRotationMessage>();
    display
        .subscribe_cannon_fire("1", move |m| {
            let _ = fire_tx.send(m);
        })
        .await
        .unwrap();
    display
        .subscribe_cannon_rotation("1", move |m| {
            let _ = rot_tx.send(m);
        })
        .await
        .unwrap();

    controller.publish_cannon_rotation("1", Rotation::new(0.0, 1.5, 0.0));
    controller.publish_cannon_fire("1", 5.0);
    // another game's events are not delivered
    controller.publish_cannon_fire("2", 9.0);

    let rotation = tokio::time::timeout(Duration::from_secs(1), rot_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rotation.rotation.y, 1.5);

    let fire = tokio::time::timeout(Duration::from_secs(1), fire_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        fire,
        CannonFireMessage {
            game_session_id: "1".to_string(),
            power: 5.0
        }
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fire_rx.try_recv().is_err());

    display.unsubscribe_cannon_fire("1").await.unwrap();
    assert!(!display.session().is_subscribed("entangled-cannon/1/cannon/fire"));
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let broker = MemoryBroker::new();
    let display = game_client(&broker).await;
    let controller = game_client(&broker).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<HighScoreMessage>();
    display
        .subscribe_high_score("1", move |m| {
            let _ = tx.send(m);
        })
        .await
        .unwrap();

    controller
        .session()
        .publish_direct("entangled-cannon/1/highscore", &json!({ "score": "lots" }));
    controller.publish_high_score("ABC", "1", 1200);

    let score = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(score.initials, "ABC");
    assert_eq!(score.score, 1200);
}

#[tokio::test]
async fn test_join_is_accepted_once() {
    let broker = MemoryBroker::new();
    let display = game_client(&broker).await;
    let controller = game_client(&broker).await;

    let (tx, mut joins) = mpsc::unbounded_channel::<GameJoinRequest>();
    display
        .subscribe_game_join_request("7", move |request| {
            let _ = tx.send(request);
        })
        .await
        .unwrap();

    let reply = controller.send_game_join_request("7").await.unwrap();
    assert!(reply.accepted);
    assert_eq!(reply.game_session_id, "7");
    assert_eq!(joins.recv().await.unwrap().game_session_id, "7");

    // the join subscription removes itself
    let topic = display.topic(GameEvent::GameJoin, "7");
    tokio::time::timeout(Duration::from_secs(1), async {
        while display.session().subscriptions().contains(&topic) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("join subscription was not removed");

    let second = controller.send_game_join_request("7").await;
    assert!(matches!(second, Err(SessionError::OperationTimeout(_))));
    assert!(joins.try_recv().is_err());
}

#[tokio::test]
async fn test_game_over_roundtrip() {
    let broker = MemoryBroker::new();
    let display = game_client(&broker).await;
    let controller = game_client(&broker).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    controller
        .subscribe_game_over("3", move |m| {
            let _ = tx.send(m);
        })
        .await
        .unwrap();

    display.publish_game_over("3");

    let over = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(over.game_session_id, "3");
}

#[tokio::test]
async fn test_join_answered_when_callback_panics() {
    let broker = MemoryBroker::new();
    let display = game_client(&broker).await;
    let controller = game_client(&broker).await;

    display
        .subscribe_game_join_request("8", |_| panic!("display failed to start the game"))
        .await
        .unwrap();

    let reply = controller.send_game_join_request("8").await.unwrap();
    assert!(reply.accepted);

    let topic = display.topic(GameEvent::GameJoin, "8");
    tokio::time::timeout(Duration::from_secs(1), async {
        while display.session().subscriptions().contains(&topic) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("join subscription was not removed");
}
