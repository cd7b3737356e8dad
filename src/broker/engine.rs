//! Broker engine
//!
//! `MemoryBroker` is an in-memory broker that speaks the session frame
//! protocol. It backs the in-process transport used by tests and the demo,
//! and the WebSocket relay server. Responsibilities:
//! - tracking connected peers and their topic subscriptions
//! - acknowledging subscription changes and guaranteed publishes by echoing
//!   the caller's correlation id
//! - routing published messages once per matching peer and into matching
//!   queues, holding a bounded queue backlog until a consumer binds
//! - forwarding requests with a reply address and routing replies back
//!
//! The broker also exposes controls for refusing connections, rejecting or
//! withholding acknowledgments, and duplicating them, so sessions can be
//! exercised against a misbehaving broker.
//!
//! Concurrency: all state lives behind one lock. Frames are handled
//! synchronously and outgoing frames are pushed onto unbounded channels, so
//! the lock is never held across I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::client::TopicPattern;
use crate::transport::message::{ClientFrame, CorrelationId, DeliveryMode, ServerFrame};
use crate::utils::{Result, SessionError, lock};

pub type PeerId = String;

const REPLY_PREFIX: &str = "#reply/";

/// Messages a queue holds while nobody consumes it. The oldest is dropped
/// first.
pub const QUEUE_BACKLOG_LIMIT: usize = 1000;

#[derive(Debug)]
struct Peer {
    outbox: UnboundedSender<ServerFrame>,
    subscriptions: Vec<TopicPattern>,
}

#[derive(Debug, Default)]
struct Queue {
    subscriptions: Vec<TopicPattern>,
    consumer: Option<PeerId>,
    backlog: VecDeque<ServerFrame>,
}

impl Queue {
    fn is_idle(&self) -> bool {
        self.subscriptions.is_empty() && self.consumer.is_none() && self.backlog.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Controls {
    refuse_connections: Option<String>,
    reject_subscriptions: Option<String>,
    reject_guaranteed: Option<String>,
    withhold_acks: bool,
    duplicate_acks: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    peers: HashMap<PeerId, Peer>,
    queues: HashMap<String, Queue>,
    controls: Controls,
    withheld: Vec<(PeerId, ServerFrame)>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one frame from `peer`. Frames the broker sends back go to
    /// `outbox`.
    pub fn handle_frame(
        &self,
        peer: &str,
        outbox: &UnboundedSender<ServerFrame>,
        frame: ClientFrame,
    ) -> Result<()> {
        let mut state = lock(&self.state);

        if !matches!(frame, ClientFrame::Connect { .. }) && !state.peers.contains_key(peer) {
            return Err(SessionError::NotConnected);
        }

        match frame {
            ClientFrame::Connect { vpn_name, username } => {
                state.connect(peer, outbox, &vpn_name, &username);
            }
            ClientFrame::Disconnect => {
                if let Some(peer_state) = state.peers.get(peer) {
                    let _ = peer_state.outbox.send(ServerFrame::Disconnected);
                }
                state.detach(peer);
                info!("{peer} disconnected");
            }
            ClientFrame::Subscribe { topic, correlation } => {
                let verdict = match state.controls.reject_subscriptions.clone() {
                    Some(reason) => ServerFrame::SubscriptionError {
                        correlation,
                        reason,
                    },
                    None => {
                        if let Some(peer_state) = state.peers.get_mut(peer) {
                            if !peer_state.subscriptions.iter().any(|p| p.as_str() == topic) {
                                peer_state.subscriptions.push(TopicPattern::new(&topic));
                            }
                        }
                        debug!("{peer} subscribed to {topic}");
                        ServerFrame::SubscriptionOk { correlation }
                    }
                };
                state.acknowledge(peer, verdict);
            }
            ClientFrame::Unsubscribe { topic, correlation } => {
                let verdict = match state.controls.reject_subscriptions.clone() {
                    Some(reason) => ServerFrame::SubscriptionError {
                        correlation,
                        reason,
                    },
                    None => {
                        if let Some(peer_state) = state.peers.get_mut(peer) {
                            peer_state.subscriptions.retain(|p| p.as_str() != topic);
                        }
                        debug!("{peer} unsubscribed from {topic}");
                        ServerFrame::SubscriptionOk { correlation }
                    }
                };
                state.acknowledge(peer, verdict);
            }
            ClientFrame::Publish {
                topic,
                payload,
                delivery,
                correlation,
            } => {
                if delivery == DeliveryMode::Guaranteed {
                    if let Some(reason) = state.controls.reject_guaranteed.clone() {
                        if let Some(correlation) = correlation {
                            state.acknowledge(
                                peer,
                                ServerFrame::Rejected {
                                    correlation,
                                    reason,
                                },
                            );
                        }
                        return Ok(());
                    }
                }

                state.route(&topic, &payload, None, None, true);

                if let (DeliveryMode::Guaranteed, Some(correlation)) = (delivery, correlation) {
                    state.acknowledge(peer, ServerFrame::Acknowledged { correlation });
                }
            }
            ClientFrame::Request {
                topic,
                payload,
                correlation,
            } => {
                let reply_to = format!("{REPLY_PREFIX}{peer}");
                let delivered = state.route(&topic, &payload, Some(correlation), Some(reply_to), false);
                if delivered == 0 {
                    debug!("Request from {peer} on {topic} has no subscribers");
                }
            }
            ClientFrame::Reply {
                reply_to,
                correlation,
                payload,
            } => {
                let target = reply_to.strip_prefix(REPLY_PREFIX).unwrap_or(&reply_to);
                match state.peers.get(target) {
                    Some(requester) => {
                        let _ = requester.outbox.send(ServerFrame::Reply {
                            topic: reply_to.clone(),
                            correlation,
                            payload,
                            timestamp: chrono::Utc::now().timestamp_millis(),
                        });
                    }
                    None => debug!("Reply to {reply_to} has no live requester"),
                }
            }
            ClientFrame::BindQueue { queue } => state.bind_queue(peer, &queue),
            ClientFrame::UnbindQueue { queue } => {
                if let Some(q) = state.queues.get_mut(&queue) {
                    if q.consumer.as_deref() == Some(peer) {
                        q.consumer = None;
                    }
                }
                state.drop_idle_queues();
                if let Some(peer_state) = state.peers.get(peer) {
                    let _ = peer_state.outbox.send(ServerFrame::ConsumerDown { queue });
                }
            }
            ClientFrame::QueueSubscribe {
                queue,
                topic,
                correlation,
            } => {
                let verdict = match state.controls.reject_subscriptions.clone() {
                    Some(reason) => ServerFrame::SubscriptionError {
                        correlation,
                        reason,
                    },
                    None => {
                        let q = state.queues.entry(queue).or_default();
                        if !q.subscriptions.iter().any(|p| p.as_str() == topic) {
                            q.subscriptions.push(TopicPattern::new(&topic));
                        }
                        ServerFrame::SubscriptionOk { correlation }
                    }
                };
                state.acknowledge(peer, verdict);
            }
            ClientFrame::QueueUnsubscribe {
                queue,
                topic,
                correlation,
            } => {
                let verdict = match state.controls.reject_subscriptions.clone() {
                    Some(reason) => ServerFrame::SubscriptionError {
                        correlation,
                        reason,
                    },
                    None => {
                        if let Some(q) = state.queues.get_mut(&queue) {
                            q.subscriptions.retain(|p| p.as_str() != topic);
                        }
                        state.drop_idle_queues();
                        ServerFrame::SubscriptionOk { correlation }
                    }
                };
                state.acknowledge(peer, verdict);
            }
        }

        Ok(())
    }

    /// Forgets `peer` without notifying it, releasing any queue it consumed.
    pub fn detach(&self, peer: &str) {
        lock(&self.state).detach(peer);
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.state).peers.len()
    }

    /// Number of topic subscriptions held for all peers.
    pub fn subscription_count(&self) -> usize {
        lock(&self.state)
            .peers
            .values()
            .map(|p| p.subscriptions.len())
            .sum()
    }

    pub fn queue_backlog(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map_or(0, |q| q.backlog.len())
    }

    pub fn queue_count(&self) -> usize {
        lock(&self.state).queues.len()
    }

    /// Answers future connection attempts with `ConnectFailed`.
    pub fn refuse_connections(&self, reason: Option<&str>) {
        lock(&self.state).controls.refuse_connections = reason.map(str::to_string);
    }

    /// Answers subscription changes with `SubscriptionError`.
    pub fn reject_subscriptions(&self, reason: Option<&str>) {
        lock(&self.state).controls.reject_subscriptions = reason.map(str::to_string);
    }

    /// Answers guaranteed publishes with `Rejected`.
    pub fn reject_guaranteed(&self, reason: Option<&str>) {
        lock(&self.state).controls.reject_guaranteed = reason.map(str::to_string);
    }

    /// Holds back every acknowledgment until [`MemoryBroker::release_withheld`].
    pub fn withhold_acks(&self, withhold: bool) {
        lock(&self.state).controls.withhold_acks = withhold;
    }

    /// Sends every acknowledgment twice.
    pub fn duplicate_acks(&self, duplicate: bool) {
        lock(&self.state).controls.duplicate_acks = duplicate;
    }

    /// Delivers the withheld acknowledgments and returns how many were sent.
    pub fn release_withheld(&self) -> usize {
        let mut state = lock(&self.state);
        let withheld = std::mem::take(&mut state.withheld);
        let mut released = 0;
        for (peer, frame) in withheld {
            if let Some(peer_state) = state.peers.get(&peer) {
                if peer_state.outbox.send(frame).is_ok() {
                    released += 1;
                }
            }
        }
        released
    }
}

impl BrokerState {
    fn connect(
        &mut self,
        peer: &str,
        outbox: &UnboundedSender<ServerFrame>,
        vpn_name: &str,
        username: &str,
    ) {
        if let Some(reason) = self.controls.refuse_connections.clone() {
            warn!("Refusing connection from {peer}: {reason}");
            let _ = outbox.send(ServerFrame::ConnectFailed { reason });
            return;
        }

        self.peers.entry(peer.to_string()).or_insert_with(|| Peer {
            outbox: outbox.clone(),
            subscriptions: Vec::new(),
        });
        info!("{peer} connected as {username} on {vpn_name}");
        let _ = outbox.send(ServerFrame::Up);
    }

    fn detach(&mut self, peer: &str) {
        self.peers.remove(peer);
        for q in self.queues.values_mut() {
            if q.consumer.as_deref() == Some(peer) {
                q.consumer = None;
            }
        }
        self.drop_idle_queues();
        self.withheld.retain(|(p, _)| p != peer);
    }

    fn drop_idle_queues(&mut self) {
        self.queues.retain(|name, q| {
            let idle = q.is_idle();
            if idle {
                debug!("Dropping idle queue {name}");
            }
            !idle
        });
    }

    fn acknowledge(&mut self, peer: &str, frame: ServerFrame) {
        if self.controls.withhold_acks {
            self.withheld.push((peer.to_string(), frame));
            return;
        }
        let Some(peer_state) = self.peers.get(peer) else {
            return;
        };
        if self.controls.duplicate_acks {
            let _ = peer_state.outbox.send(frame.clone());
        }
        let _ = peer_state.outbox.send(frame);
    }

    /// Delivers a message to every peer with a matching subscription and,
    /// when `to_queues` is set, to every matching queue. Returns the number
    /// of peers reached directly.
    fn route(
        &mut self,
        topic: &str,
        payload: &str,
        correlation: Option<CorrelationId>,
        reply_to: Option<String>,
        to_queues: bool,
    ) -> usize {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let message = |queue: Option<String>| ServerFrame::Message {
            topic: topic.to_string(),
            payload: payload.to_string(),
            timestamp,
            correlation: correlation.clone(),
            reply_to: reply_to.clone(),
            queue,
        };

        let mut delivered = 0;
        for (peer_id, peer) in &self.peers {
            if peer.subscriptions.iter().any(|p| p.matches(topic)) {
                if let Err(e) = peer.outbox.send(message(None)) {
                    warn!("Failed to deliver {topic} to {peer_id}: {e}");
                } else {
                    delivered += 1;
                }
            }
        }

        if to_queues {
            for (name, q) in self.queues.iter_mut() {
                if !q.subscriptions.iter().any(|p| p.matches(topic)) {
                    continue;
                }
                let frame = message(Some(name.clone()));
                match q.consumer.as_ref().and_then(|c| self.peers.get(c)) {
                    Some(consumer) => {
                        let _ = consumer.outbox.send(frame);
                    }
                    None => {
                        if q.backlog.len() >= QUEUE_BACKLOG_LIMIT {
                            warn!("Queue {name} is full; dropping its oldest message");
                            q.backlog.pop_front();
                        }
                        q.backlog.push_back(frame);
                    }
                }
            }
        }

        delivered
    }

    fn bind_queue(&mut self, peer: &str, queue: &str) {
        let Some(outbox) = self.peers.get(peer).map(|p| p.outbox.clone()) else {
            return;
        };

        // queues are created on first use
        let q = self.queues.entry(queue.to_string()).or_default();
        if let Some(existing) = q.consumer.as_deref() {
            if existing != peer {
                let _ = outbox.send(ServerFrame::ConsumerConnectFailed {
                    queue: queue.to_string(),
                    reason: format!("queue {queue} already has a consumer"),
                });
                return;
            }
        }

        q.consumer = Some(peer.to_string());
        let _ = outbox.send(ServerFrame::ConsumerUp {
            queue: queue.to_string(),
        });
        while let Some(frame) = q.backlog.pop_front() {
            let _ = outbox.send(frame);
        }
        info!("{peer} consuming from queue {queue}");
    }
}
