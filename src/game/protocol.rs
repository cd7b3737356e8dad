//! Game topics and payloads.
//!
//! Every game event lives under `<namespace>/<game-session-id>/<path>`.
//! Payloads are JSON objects that always carry `game_session_id`.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "entangled-cannon";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameEvent {
    CannonRotation,
    CannonFire,
    GameJoin,
    GameOver,
    HighScore,
}

impl GameEvent {
    pub const ALL: [GameEvent; 5] = [
        GameEvent::CannonRotation,
        GameEvent::CannonFire,
        GameEvent::GameJoin,
        GameEvent::GameOver,
        GameEvent::HighScore,
    ];

    pub fn path(self) -> &'static str {
        match self {
            GameEvent::CannonRotation => "cannon/rotation",
            GameEvent::CannonFire => "cannon/fire",
            GameEvent::GameJoin => "game/join",
            GameEvent::GameOver => "game/over",
            GameEvent::HighScore => "highscore",
        }
    }

    /// Topic for this event in one game session.
    pub fn topic(self, namespace: &str, game_session_id: &str) -> String {
        format!("{namespace}/{game_session_id}/{}", self.path())
    }

    /// Pattern matching this event in every game session.
    pub fn any_session(self, namespace: &str) -> String {
        format!("{namespace}/*/{}", self.path())
    }

    /// Splits a concrete game topic into its session id and event.
    pub fn parse(namespace: &str, topic: &str) -> Option<(String, GameEvent)> {
        let rest = topic.strip_prefix(namespace)?.strip_prefix('/')?;
        let (game_session_id, path) = rest.split_once('/')?;
        if game_session_id.is_empty() {
            return None;
        }
        GameEvent::ALL
            .into_iter()
            .find(|event| event.path() == path)
            .map(|event| (game_session_id.to_string(), event))
    }
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Euler angles in radians. Serialized the way the display's 3D engine
/// stores them (`_x`, `_y`, `_z`, `_order`); plain names are accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    #[serde(rename = "_x", alias = "x")]
    pub x: f64,
    #[serde(rename = "_y", alias = "y")]
    pub y: f64,
    #[serde(rename = "_z", alias = "z")]
    pub z: f64,
    #[serde(rename = "_order", alias = "order", default = "default_order")]
    pub order: String,
}

fn default_order() -> String {
    "XYZ".to_string()
}

impl Rotation {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            order: default_order(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CannonRotationMessage {
    pub game_session_id: String,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CannonFireMessage {
    pub game_session_id: String,
    pub power: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighScoreMessage {
    pub initials: String,
    pub game_session_id: String,
    pub score: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameJoinRequest {
    pub game_session_id: String,
}

/// Answer to a join request. Only the first join of a game is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameJoinReply {
    pub game_session_id: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOverMessage {
    pub game_session_id: String,
}
