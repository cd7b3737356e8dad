//! The `game` module maps the cannon game's events onto topics and JSON
//! payloads and exposes them as typed operations on a session.
//!
//! A controller joins a game with a one-shot request/reply, then streams
//! cannon rotation and fire events that the display subscribes to. The
//! display announces game over and high scores.

pub mod client;
pub mod protocol;

pub use client::GameClient;
pub use protocol::{
    CannonFireMessage, CannonRotationMessage, DEFAULT_NAMESPACE, GameEvent, GameJoinReply,
    GameJoinRequest, GameOverMessage, HighScoreMessage, Rotation,
};

#[cfg(test)]
mod tests;
