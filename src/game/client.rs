use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::client::Session;
use crate::game::protocol::{
    CannonFireMessage, CannonRotationMessage, GameEvent, GameJoinReply, GameJoinRequest,
    GameOverMessage, HighScoreMessage, Rotation,
};
use crate::transport::InboundMessage;
use crate::utils::Result;

/// Typed game operations over a [`Session`].
#[derive(Clone)]
pub struct GameClient {
    session: Session,
    namespace: String,
}

impl GameClient {
    pub fn new(session: Session, namespace: impl Into<String>) -> Self {
        Self {
            session,
            namespace: namespace.into(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn topic(&self, event: GameEvent, game_session_id: &str) -> String {
        event.topic(&self.namespace, game_session_id)
    }

    pub fn publish_cannon_rotation(&self, game_session_id: &str, rotation: Rotation) {
        let message = CannonRotationMessage {
            game_session_id: game_session_id.to_string(),
            rotation,
        };
        self.session.publish_direct(
            &self.topic(GameEvent::CannonRotation, game_session_id),
            &message,
        );
    }

    pub async fn subscribe_cannon_rotation<F>(&self, game_session_id: &str, callback: F) -> Result<()>
    where
        F: Fn(CannonRotationMessage) + Send + Sync + 'static,
    {
        self.subscribe_typed(GameEvent::CannonRotation, game_session_id, callback)
            .await
    }

    pub async fn unsubscribe_cannon_rotation(&self, game_session_id: &str) -> Result<()> {
        self.unsubscribe(GameEvent::CannonRotation, game_session_id)
            .await
    }

    pub fn publish_cannon_fire(&self, game_session_id: &str, power: f64) {
        let message = CannonFireMessage {
            game_session_id: game_session_id.to_string(),
            power,
        };
        self.session
            .publish_direct(&self.topic(GameEvent::CannonFire, game_session_id), &message);
    }

    pub async fn subscribe_cannon_fire<F>(&self, game_session_id: &str, callback: F) -> Result<()>
    where
        F: Fn(CannonFireMessage) + Send + Sync + 'static,
    {
        self.subscribe_typed(GameEvent::CannonFire, game_session_id, callback)
            .await
    }

    pub async fn unsubscribe_cannon_fire(&self, game_session_id: &str) -> Result<()> {
        self.unsubscribe(GameEvent::CannonFire, game_session_id).await
    }

    pub fn publish_high_score(&self, initials: &str, game_session_id: &str, score: u64) {
        let message = HighScoreMessage {
            initials: initials.to_string(),
            game_session_id: game_session_id.to_string(),
            score,
        };
        self.session
            .publish_direct(&self.topic(GameEvent::HighScore, game_session_id), &message);
    }

    pub async fn subscribe_high_score<F>(&self, game_session_id: &str, callback: F) -> Result<()>
    where
        F: Fn(HighScoreMessage) + Send + Sync + 'static,
    {
        self.subscribe_typed(GameEvent::HighScore, game_session_id, callback)
            .await
    }

    pub async fn unsubscribe_high_score(&self, game_session_id: &str) -> Result<()> {
        self.unsubscribe(GameEvent::HighScore, game_session_id).await
    }

    pub fn publish_game_over(&self, game_session_id: &str) {
        let message = GameOverMessage {
            game_session_id: game_session_id.to_string(),
        };
        self.session
            .publish_direct(&self.topic(GameEvent::GameOver, game_session_id), &message);
    }

    pub async fn subscribe_game_over<F>(&self, game_session_id: &str, callback: F) -> Result<()>
    where
        F: Fn(GameOverMessage) + Send + Sync + 'static,
    {
        self.subscribe_typed(GameEvent::GameOver, game_session_id, callback)
            .await
    }

    pub async fn unsubscribe_game_over(&self, game_session_id: &str) -> Result<()> {
        self.unsubscribe(GameEvent::GameOver, game_session_id).await
    }

    /// Asks the display running `game_session_id` to accept this controller.
    pub async fn send_game_join_request(&self, game_session_id: &str) -> Result<GameJoinReply> {
        let request = GameJoinRequest {
            game_session_id: game_session_id.to_string(),
        };
        info!("Sending game session join request for {game_session_id}");
        let reply = self
            .session
            .send_request(
                &self.topic(GameEvent::GameJoin, game_session_id),
                &request,
                self.session.request_timeout(),
            )
            .await?;
        reply.payload_json()
    }

    /// Accepts the first join request for `game_session_id`.
    ///
    /// The accepted request is answered, the subscription removes itself,
    /// and the request is then passed to `on_join`. Requests that arrive
    /// before the unsubscribe completes are answered with `accepted: false`.
    pub async fn subscribe_game_join_request<F>(&self, game_session_id: &str, on_join: F) -> Result<()>
    where
        F: Fn(GameJoinRequest) + Send + Sync + 'static,
    {
        let topic = self.topic(GameEvent::GameJoin, game_session_id);
        let session = self.session.downgrade();
        let joined = AtomicBool::new(false);
        let own_topic = topic.clone();

        let handler = move |message: &InboundMessage| {
            if !message.is_request() {
                debug!("Ignoring join on {} without a reply address", message.topic);
                return;
            }
            let Some(session) = session.upgrade() else {
                return;
            };
            let request = match message.payload_json::<GameJoinRequest>() {
                Ok(request) => request,
                Err(e) => {
                    warn!("Dropping malformed join request on {}: {e}", message.topic);
                    return;
                }
            };

            let first = !joined.swap(true, Ordering::SeqCst);
            let reply = GameJoinReply {
                game_session_id: request.game_session_id.clone(),
                accepted: first,
            };
            if let Err(e) = session.reply(message, &reply) {
                warn!("Unable to answer join request on {}: {e}", message.topic);
            }
            if !first {
                return;
            }

            info!("Accepting join for game {}", request.game_session_id);
            let topic = own_topic.clone();
            tokio::spawn(async move {
                if let Err(e) = session.unsubscribe(&topic).await {
                    warn!("Unable to stop accepting joins on {topic}: {e}");
                }
            });
            // the requester is answered even if this panics
            on_join(request);
        };

        self.session.subscribe(&topic, handler).await
    }

    async fn subscribe_typed<T, F>(&self, event: GameEvent, game_session_id: &str, callback: F) -> Result<()>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let topic = self.topic(event, game_session_id);
        self.session
            .subscribe(&topic, move |message: &InboundMessage| {
                match message.payload_json::<T>() {
                    Ok(payload) => callback(payload),
                    Err(e) => warn!("Dropping malformed {event} payload on {}: {e}", message.topic),
                }
            })
            .await
    }

    async fn unsubscribe(&self, event: GameEvent, game_session_id: &str) -> Result<()> {
        self.session
            .unsubscribe(&self.topic(event, game_session_id))
            .await
    }
}
