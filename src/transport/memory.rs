//! In-process transport
//!
//! Attaches sessions directly to a shared [`MemoryBroker`]. Frames are handed
//! to the broker synchronously; everything the broker sends back goes through
//! the same frame router as the WebSocket transport, so sessions observe the
//! same event ordering either way.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::{MemoryBroker, PeerId};
use crate::config::BrokerSettings;
use crate::transport::link::{FrameLink, FrameTransport};
use crate::transport::message::{ClientFrame, ServerFrame};
use crate::transport::{BrokerTransport, Connector, EventSender};
use crate::utils::Result;

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl MemoryConnector {
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

impl Connector for MemoryConnector {
    fn open(
        &self,
        settings: &BrokerSettings,
        events: EventSender,
    ) -> Result<Arc<dyn BrokerTransport>> {
        let (outbox, frames) = mpsc::unbounded_channel();
        let link = MemoryLink {
            broker: self.broker.clone(),
            peer: format!("session-{}", Uuid::new_v4()),
            outbox,
        };
        Ok(Arc::new(FrameTransport::new(link, settings, frames, events)))
    }
}

struct MemoryLink {
    broker: MemoryBroker,
    peer: PeerId,
    outbox: mpsc::UnboundedSender<ServerFrame>,
}

impl FrameLink for MemoryLink {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn send_frame(&self, frame: ClientFrame) -> Result<()> {
        self.broker.handle_frame(&self.peer, &self.outbox, frame)
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        // a session that goes away without disconnecting must not leave a
        // peer behind
        self.broker.detach(&self.peer);
    }
}
