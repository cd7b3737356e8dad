//! The `transport` module is the boundary between the session and a message
//! broker.
//!
//! A [`Connector`] opens a [`BrokerTransport`] bound to an event channel.
//! Transport calls only *issue* operations; their outcomes come back later as
//! [`SessionEvent`]s, with correlated operations echoing the
//! [`CorrelationId`] they were issued with. Two transports are provided:
//! an in-process one attached to a [`crate::broker::MemoryBroker`] and a
//! WebSocket client, both built on the frame link in `link`.

mod link;
pub mod memory;
pub mod message;
pub mod websocket;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::BrokerSettings;
use crate::utils::Result;

pub use memory::MemoryConnector;
pub use message::{CorrelationId, DeliveryMode, InboundMessage, OutboundMessage};
pub use websocket::{WsConnector, start_websocket_server};

/// Everything a broker session can report back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    UpNotice,
    ConnectFailed { reason: String },
    Disconnected,
    SubscriptionOk { correlation: CorrelationId },
    SubscriptionError { correlation: CorrelationId, reason: String },
    Acknowledged { correlation: CorrelationId },
    Rejected { correlation: CorrelationId, reason: String },
    Message(InboundMessage),
    ConsumerUp { queue: String },
    ConsumerConnectFailed { queue: String, reason: String },
    ConsumerDown { queue: String },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// One broker session.
///
/// Every method returns as soon as the operation has been handed to the
/// broker. Failures reported here are local (the link is gone, the payload
/// could not be encoded); broker verdicts arrive as events.
pub trait BrokerTransport: Send + Sync {
    fn connect(&self) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    fn subscribe(&self, topic: &str, correlation: &CorrelationId) -> Result<()>;

    fn unsubscribe(&self, topic: &str, correlation: &CorrelationId) -> Result<()>;

    fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Sends a direct request. The returned receiver yields the reply; it is
    /// closed without a value if the link goes away first.
    fn send_request(&self, message: OutboundMessage) -> Result<oneshot::Receiver<InboundMessage>>;

    /// Forgets a request whose requester stopped waiting.
    fn cancel_request(&self, correlation: &CorrelationId);

    /// Requests still waiting for a reply.
    fn pending_requests(&self) -> usize;

    fn send_reply(&self, request: &InboundMessage, payload: Vec<u8>) -> Result<()>;

    fn create_consumer(&self, queue: &str) -> Result<Box<dyn QueueConsumer>>;
}

/// A guaranteed-delivery consumer bound to one named queue.
pub trait QueueConsumer: Send + Sync {
    fn queue(&self) -> &str;

    fn connect(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn add_subscription(&self, topic: &str, correlation: &CorrelationId) -> Result<()>;

    fn remove_subscription(&self, topic: &str, correlation: &CorrelationId) -> Result<()>;
}

/// Opens broker sessions.
pub trait Connector: Send + Sync {
    fn open(&self, settings: &BrokerSettings, events: EventSender)
    -> Result<Arc<dyn BrokerTransport>>;
}
