//! Message definitions shared by the session, the transports and the broker
//! engine.
//!
//! `InboundMessage` and `OutboundMessage` are what the session sees.
//! `ClientFrame` and `ServerFrame` are the JSON frames exchanged with the
//! broker engine, either in-process or over a WebSocket. Payloads travel as
//! UTF-8 text on the wire.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::{Result, SessionError};

/// Caller-generated token used to match an asynchronous outcome back to the
/// call that started it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Fire-and-forget.
    Direct,
    /// The broker acknowledges every message individually.
    Guaranteed,
}

/// A message delivered to this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub correlation: Option<CorrelationId>,
    /// Present when the sender expects a reply.
    pub reply_to: Option<String>,
    /// Name of the queue the message was consumed from, if any.
    pub queue: Option<String>,
    /// Milliseconds since the UNIX epoch, stamped by the broker.
    pub timestamp: i64,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            correlation: None,
            reply_to: None,
            queue: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn payload_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload).map_err(|e| SessionError::Serialization(e.to_string()))
    }

    /// Decodes the payload as JSON into `T`.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn is_request(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// A message handed to a transport for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub delivery: DeliveryMode,
    pub correlation: Option<CorrelationId>,
}

impl OutboundMessage {
    pub fn direct(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            delivery: DeliveryMode::Direct,
            correlation: None,
        }
    }

    pub fn guaranteed(topic: impl Into<String>, payload: Vec<u8>, correlation: CorrelationId) -> Self {
        Self {
            topic: topic.into(),
            payload,
            delivery: DeliveryMode::Guaranteed,
            correlation: Some(correlation),
        }
    }

    /// Serializes `payload` as JSON into a direct message.
    pub fn direct_json<T: Serialize + ?Sized>(topic: &str, payload: &T) -> Result<Self> {
        Ok(Self::direct(topic, serde_json::to_vec(payload)?))
    }
}

pub(crate) fn payload_to_wire(payload: Vec<u8>) -> Result<String> {
    String::from_utf8(payload)
        .map_err(|_| SessionError::Serialization("payload is not valid UTF-8".to_string()))
}

/// Frames sent from a session to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "connect")]
    Connect { vpn_name: String, username: String },
    #[serde(rename = "disconnect")]
    Disconnect,
    #[serde(rename = "subscribe")]
    Subscribe {
        topic: String,
        correlation: CorrelationId,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        topic: String,
        correlation: CorrelationId,
    },
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        payload: String,
        delivery: DeliveryMode,
        correlation: Option<CorrelationId>,
    },
    #[serde(rename = "request")]
    Request {
        topic: String,
        payload: String,
        correlation: CorrelationId,
    },
    #[serde(rename = "reply")]
    Reply {
        reply_to: String,
        correlation: CorrelationId,
        payload: String,
    },
    #[serde(rename = "bind_queue")]
    BindQueue { queue: String },
    #[serde(rename = "unbind_queue")]
    UnbindQueue { queue: String },
    #[serde(rename = "queue_subscribe")]
    QueueSubscribe {
        queue: String,
        topic: String,
        correlation: CorrelationId,
    },
    #[serde(rename = "queue_unsubscribe")]
    QueueUnsubscribe {
        queue: String,
        topic: String,
        correlation: CorrelationId,
    },
}

/// Frames sent from the broker to a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "up")]
    Up,
    #[serde(rename = "connect_failed")]
    ConnectFailed { reason: String },
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "subscription_ok")]
    SubscriptionOk { correlation: CorrelationId },
    #[serde(rename = "subscription_error")]
    SubscriptionError {
        correlation: CorrelationId,
        reason: String,
    },
    #[serde(rename = "acknowledged")]
    Acknowledged { correlation: CorrelationId },
    #[serde(rename = "rejected")]
    Rejected {
        correlation: CorrelationId,
        reason: String,
    },
    #[serde(rename = "message")]
    Message {
        topic: String,
        payload: String,
        timestamp: i64,
        correlation: Option<CorrelationId>,
        reply_to: Option<String>,
        queue: Option<String>,
    },
    #[serde(rename = "reply")]
    Reply {
        topic: String,
        correlation: CorrelationId,
        payload: String,
        timestamp: i64,
    },
    #[serde(rename = "consumer_up")]
    ConsumerUp { queue: String },
    #[serde(rename = "consumer_connect_failed")]
    ConsumerConnectFailed { queue: String, reason: String },
    #[serde(rename = "consumer_down")]
    ConsumerDown { queue: String },
}
