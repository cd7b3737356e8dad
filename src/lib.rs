//! # cannon-link
//!
//! `cannon-link` is the messaging layer of a remote-controlled cannon game.
//! A controller device and a display exchange game events through a
//! publish/subscribe broker; this crate is the client-side session that sits
//! between the game and the broker.
//!
//! ## Core Modules
//!
//! - `client`: the [`client::Session`] façade, topic pattern matching,
//!   subscription dispatch and acknowledgment tracking.
//! - `transport`: the broker transport boundary, with in-process and
//!   WebSocket implementations.
//! - `broker`: an in-memory broker engine used by tests and the relay server.
//! - `game`: game topics, payloads and typed operations.
//! - `config`: settings loading.
//! - `utils`: the shared error type, lock helper and logging bootstrap.

pub mod broker;
pub mod client;
pub mod config;
pub mod game;
pub mod transport;
pub mod utils;
