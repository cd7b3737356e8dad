//! Frame link
//!
//! Both transports speak `ClientFrame`/`ServerFrame` to a broker engine; they
//! differ only in how a frame gets there. `FrameLink` is that difference.
//! `FrameTransport` implements the whole `BrokerTransport` contract on top of
//! a link, and `route_frames` turns incoming `ServerFrame`s into
//! `SessionEvent`s, resolving request/reply pairs on the way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::BrokerSettings;
use crate::transport::message::{
    ClientFrame, CorrelationId, InboundMessage, OutboundMessage, ServerFrame, payload_to_wire,
};
use crate::transport::{BrokerTransport, EventSender, QueueConsumer, SessionEvent};
use crate::utils::{Result, SessionError, lock};

pub(crate) trait FrameLink: Send + Sync + 'static {
    /// Prepares the link for a new connection. Called before the connect
    /// frame is sent.
    fn open(&self) -> Result<()>;

    fn send_frame(&self, frame: ClientFrame) -> Result<()>;
}

pub(crate) type PendingRequests = Arc<Mutex<HashMap<CorrelationId, oneshot::Sender<InboundMessage>>>>;

pub(crate) struct FrameTransport<L: FrameLink> {
    link: Arc<L>,
    vpn_name: String,
    username: String,
    requests: PendingRequests,
}

impl<L: FrameLink> FrameTransport<L> {
    /// Wraps `link` and starts routing `frames` into `events`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        link: L,
        settings: &BrokerSettings,
        frames: mpsc::UnboundedReceiver<ServerFrame>,
        events: EventSender,
    ) -> Self {
        let requests = PendingRequests::default();
        tokio::spawn(route_frames(frames, events, requests.clone()));

        Self {
            link: Arc::new(link),
            vpn_name: settings.vpn_name.clone(),
            username: settings.username.clone(),
            requests,
        }
    }
}

impl<L: FrameLink> BrokerTransport for FrameTransport<L> {
    fn connect(&self) -> Result<()> {
        self.link.open()?;
        self.link.send_frame(ClientFrame::Connect {
            vpn_name: self.vpn_name.clone(),
            username: self.username.clone(),
        })
    }

    fn disconnect(&self) -> Result<()> {
        self.link.send_frame(ClientFrame::Disconnect)
    }

    fn subscribe(&self, topic: &str, correlation: &CorrelationId) -> Result<()> {
        self.link.send_frame(ClientFrame::Subscribe {
            topic: topic.to_string(),
            correlation: correlation.clone(),
        })
    }

    fn unsubscribe(&self, topic: &str, correlation: &CorrelationId) -> Result<()> {
        self.link.send_frame(ClientFrame::Unsubscribe {
            topic: topic.to_string(),
            correlation: correlation.clone(),
        })
    }

    fn send(&self, message: OutboundMessage) -> Result<()> {
        self.link.send_frame(ClientFrame::Publish {
            topic: message.topic,
            payload: payload_to_wire(message.payload)?,
            delivery: message.delivery,
            correlation: message.correlation,
        })
    }

    fn send_request(&self, message: OutboundMessage) -> Result<oneshot::Receiver<InboundMessage>> {
        let correlation = message.correlation.unwrap_or_default();
        let payload = payload_to_wire(message.payload)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.requests);
            // requesters that gave up leave closed senders behind
            pending.retain(|_, waiter| !waiter.is_closed());
            pending.insert(correlation.clone(), tx);
        }

        let sent = self.link.send_frame(ClientFrame::Request {
            topic: message.topic,
            payload,
            correlation: correlation.clone(),
        });
        if let Err(e) = sent {
            lock(&self.requests).remove(&correlation);
            return Err(e);
        }
        Ok(rx)
    }

    fn cancel_request(&self, correlation: &CorrelationId) {
        lock(&self.requests).remove(correlation);
    }

    fn pending_requests(&self) -> usize {
        lock(&self.requests).len()
    }

    fn send_reply(&self, request: &InboundMessage, payload: Vec<u8>) -> Result<()> {
        let (Some(reply_to), Some(correlation)) = (&request.reply_to, &request.correlation) else {
            return Err(SessionError::Transport(format!(
                "message on {} does not expect a reply",
                request.topic
            )));
        };
        self.link.send_frame(ClientFrame::Reply {
            reply_to: reply_to.clone(),
            correlation: correlation.clone(),
            payload: payload_to_wire(payload)?,
        })
    }

    fn create_consumer(&self, queue: &str) -> Result<Box<dyn QueueConsumer>> {
        Ok(Box::new(FrameConsumer {
            link: self.link.clone(),
            queue: queue.to_string(),
        }))
    }
}

pub(crate) struct FrameConsumer<L: FrameLink> {
    link: Arc<L>,
    queue: String,
}

impl<L: FrameLink> QueueConsumer for FrameConsumer<L> {
    fn queue(&self) -> &str {
        &self.queue
    }

    fn connect(&self) -> Result<()> {
        self.link.send_frame(ClientFrame::BindQueue {
            queue: self.queue.clone(),
        })
    }

    fn stop(&self) -> Result<()> {
        self.link.send_frame(ClientFrame::UnbindQueue {
            queue: self.queue.clone(),
        })
    }

    fn add_subscription(&self, topic: &str, correlation: &CorrelationId) -> Result<()> {
        self.link.send_frame(ClientFrame::QueueSubscribe {
            queue: self.queue.clone(),
            topic: topic.to_string(),
            correlation: correlation.clone(),
        })
    }

    fn remove_subscription(&self, topic: &str, correlation: &CorrelationId) -> Result<()> {
        self.link.send_frame(ClientFrame::QueueUnsubscribe {
            queue: self.queue.clone(),
            topic: topic.to_string(),
            correlation: correlation.clone(),
        })
    }
}

/// Converts one broker frame into a session event.
///
/// Replies are handed straight to their waiting requester and produce no
/// event.
pub(crate) fn frame_to_event(frame: ServerFrame, requests: &PendingRequests) -> Option<SessionEvent> {
    let event = match frame {
        ServerFrame::Up => SessionEvent::UpNotice,
        ServerFrame::ConnectFailed { reason } => SessionEvent::ConnectFailed { reason },
        ServerFrame::Disconnected => SessionEvent::Disconnected,
        ServerFrame::SubscriptionOk { correlation } => SessionEvent::SubscriptionOk { correlation },
        ServerFrame::SubscriptionError {
            correlation,
            reason,
        } => SessionEvent::SubscriptionError {
            correlation,
            reason,
        },
        ServerFrame::Acknowledged { correlation } => SessionEvent::Acknowledged { correlation },
        ServerFrame::Rejected {
            correlation,
            reason,
        } => SessionEvent::Rejected {
            correlation,
            reason,
        },
        ServerFrame::Message {
            topic,
            payload,
            timestamp,
            correlation,
            reply_to,
            queue,
        } => SessionEvent::Message(InboundMessage {
            topic,
            payload: payload.into_bytes(),
            correlation,
            reply_to,
            queue,
            timestamp,
        }),
        ServerFrame::Reply {
            topic,
            correlation,
            payload,
            timestamp,
        } => {
            match lock(requests).remove(&correlation) {
                Some(waiter) => {
                    let reply = InboundMessage {
                        topic,
                        payload: payload.into_bytes(),
                        correlation: Some(correlation),
                        reply_to: None,
                        queue: None,
                        timestamp,
                    };
                    let _ = waiter.send(reply);
                }
                None => debug!("Dropping reply for unknown request {correlation}"),
            }
            return None;
        }
        ServerFrame::ConsumerUp { queue } => SessionEvent::ConsumerUp { queue },
        ServerFrame::ConsumerConnectFailed { queue, reason } => {
            SessionEvent::ConsumerConnectFailed { queue, reason }
        }
        ServerFrame::ConsumerDown { queue } => SessionEvent::ConsumerDown { queue },
    };
    Some(event)
}

async fn route_frames(
    mut frames: mpsc::UnboundedReceiver<ServerFrame>,
    events: EventSender,
    requests: PendingRequests,
) {
    while let Some(frame) = frames.recv().await {
        if let Some(event) = frame_to_event(frame, &requests) {
            if events.send(event).is_err() {
                debug!("Session event channel closed; stopping frame router");
                break;
            }
        }
    }

    // closes every outstanding request receiver
    lock(&requests).clear();
}
