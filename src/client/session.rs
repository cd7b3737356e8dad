//! Session façade
//!
//! `Session` owns one broker session at a time and is the only component
//! that talks to a transport. It turns the transport's fire-and-forget calls
//! and after-the-fact events into plain `async` operations:
//! - `connect`/`disconnect` wait for the broker's up/disconnected events
//! - subscription changes, queue subscription changes and guaranteed
//!   publishes wait for the acknowledgment carrying their correlation id,
//!   bounded by the operation timeout
//! - inbound messages are dispatched to every matching subscription
//!
//! Broker events for one connection are handled in order on a single task.
//! The registry and tracker locks are only held for map updates, never while
//! a callback runs or across an `.await`.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::client::registry::{Callback, SubscriptionRegistry, invoke_all};
use crate::client::tracker::{CorrelationTracker, Settlement};
use crate::config::{BrokerSettings, SessionSettings, Settings};
use crate::transport::{
    BrokerTransport, Connector, CorrelationId, InboundMessage, OutboundMessage, QueueConsumer,
    SessionEvent,
};
use crate::utils::{Result, SessionError, lock};

/// Connection status as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Default)]
struct Released {
    _transport: Option<Arc<dyn BrokerTransport>>,
    _consumer: Option<Arc<dyn QueueConsumer>>,
}

struct Lifecycle {
    state: SessionState,
    generation: u64,
    transport: Option<Arc<dyn BrokerTransport>>,
    consumer: Option<Arc<dyn QueueConsumer>>,
    connect_waiter: Option<oneshot::Sender<Result<()>>>,
    disconnect_waiter: Option<oneshot::Sender<()>>,
}

impl Lifecycle {
    /// Detaches the broker handle and consumer. The caller drops the result
    /// after releasing the lifecycle lock.
    fn release(&mut self) -> Released {
        Released {
            _transport: self.transport.take(),
            _consumer: self.consumer.take(),
        }
    }
}

struct Inner {
    broker: BrokerSettings,
    timeouts: SessionSettings,
    connector: Arc<dyn Connector>,
    lifecycle: Mutex<Lifecycle>,
    registry: Mutex<SubscriptionRegistry>,
    tracker: Mutex<CorrelationTracker>,
    status: watch::Sender<ConnectionStatus>,
}

/// A cloneable handle to one client session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

/// A non-owning handle for callbacks that need to call back into their own
/// session.
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<Inner>,
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

impl Session {
    pub fn new(settings: &Settings, connector: Arc<dyn Connector>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                broker: settings.broker.clone(),
                timeouts: settings.session.clone(),
                connector,
                lifecycle: Mutex::new(Lifecycle {
                    state: SessionState::Disconnected,
                    generation: 0,
                    transport: None,
                    consumer: None,
                    connect_waiter: None,
                    disconnect_waiter: None,
                }),
                registry: Mutex::new(SubscriptionRegistry::new()),
                tracker: Mutex::new(CorrelationTracker::new()),
                status,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.lifecycle).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Observes connection status changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// True once the broker has acknowledged a subscription to `pattern`.
    pub fn is_subscribed(&self, pattern: &str) -> bool {
        lock(&self.inner.registry).is_active(pattern)
    }

    /// Every registered pattern, acknowledged or not, in registration order.
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.inner.registry)
            .patterns()
            .map(str::to_string)
            .collect()
    }

    pub fn pending_operations(&self) -> usize {
        lock(&self.inner.tracker).len()
    }

    /// Requests sent by [`Session::send_request`] that still wait for a reply.
    pub fn pending_requests(&self) -> usize {
        self.transport().map_or(0, |t| t.pending_requests())
    }

    pub fn is_consuming(&self) -> bool {
        lock(&self.inner.lifecycle).consumer.is_some()
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.timeouts.request_timeout()
    }

    /// Opens a broker session and waits until the broker reports it up.
    ///
    /// While a session is already connected or connecting this only logs a
    /// warning. A session that failed to connect is released and replaced.
    pub async fn connect(&self) -> Result<()> {
        self.inner
            .broker
            .validate()
            .map_err(SessionError::Configuration)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (waiter_tx, waiter_rx) = oneshot::channel();

        let (transport, generation, stale) = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            let stale = match lifecycle.state {
                SessionState::Connected | SessionState::Connecting => {
                    warn!("Already connected and ready to subscribe.");
                    return Ok(());
                }
                SessionState::Failed => {
                    info!("Releasing the failed broker session before reconnecting");
                    lifecycle.release()
                }
                SessionState::Disconnected => Released::default(),
            };

            let transport = self.inner.connector.open(&self.inner.broker, events_tx)?;
            lifecycle.generation += 1;
            lifecycle.state = SessionState::Connecting;
            lifecycle.transport = Some(transport.clone());
            lifecycle.connect_waiter = Some(waiter_tx);
            (transport, lifecycle.generation, stale)
        };
        drop(stale);

        self.inner.status.send_replace(ConnectionStatus::Connecting);
        tokio::spawn(run_event_loop(
            Arc::downgrade(&self.inner),
            generation,
            events_rx,
        ));

        info!("Connecting to {}", self.inner.broker.url);
        if let Err(e) = transport.connect() {
            error!("Unable to start the broker connection: {e}");
            self.inner.handle_event(
                generation,
                SessionEvent::ConnectFailed {
                    reason: e.to_string(),
                },
            );
        }

        match waiter_rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Transport(
                "broker session closed before it came up".to_string(),
            )),
        }
    }

    /// Disconnects and waits for the broker to confirm, then releases the
    /// broker handle. Subscriptions stay registered.
    pub async fn disconnect(&self) -> Result<()> {
        let (transport, confirmed) = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            let Some(transport) = lifecycle.transport.clone() else {
                info!("Not connected to the message router.");
                return Ok(());
            };

            if lifecycle.state == SessionState::Failed {
                // the broker never accepted this session
                let released = lifecycle.release();
                lifecycle.state = SessionState::Disconnected;
                drop(lifecycle);
                drop(released);
                self.inner.status.send_replace(ConnectionStatus::Disconnected);
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            lifecycle.disconnect_waiter = Some(tx);
            (transport, rx)
        };

        info!("Disconnecting from the message router...");
        let issued = transport.disconnect();
        drop(transport);
        if let Err(e) = issued {
            error!("Unable to disconnect: {e}");
            lock(&self.inner.lifecycle).disconnect_waiter = None;
            return Err(e);
        }

        if tokio::time::timeout(self.inner.timeouts.disconnect_timeout(), confirmed)
            .await
            .is_err()
        {
            warn!("Broker did not confirm the disconnect; releasing the session anyway");
            let released = {
                let mut lifecycle = lock(&self.inner.lifecycle);
                lifecycle.state = SessionState::Disconnected;
                lifecycle.disconnect_waiter = None;
                lifecycle.release()
            };
            drop(released);
            self.inner.status.send_replace(ConnectionStatus::Disconnected);
            return Err(SessionError::OperationTimeout("disconnect".to_string()));
        }

        Ok(())
    }

    /// Subscribes `callback` to `pattern` and waits for the broker to
    /// acknowledge.
    pub async fn subscribe<F>(&self, pattern: &str, callback: F) -> Result<()>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.subscribe_callback(pattern, Arc::new(callback)).await
    }

    pub async fn subscribe_callback(&self, pattern: &str, callback: Callback) -> Result<()> {
        let transport = self.require_transport("subscribe")?;

        if let Err(e) = lock(&self.inner.registry).register(pattern, callback) {
            warn!("Already subscribed to {pattern}.");
            return Err(e);
        }

        info!("Subscribing to {pattern}");
        let result = self
            .track(&format!("subscribe to {pattern}"), |id| {
                transport.subscribe(pattern, id)
            })
            .await;

        let mut registry = lock(&self.inner.registry);
        match result {
            Ok(()) => {
                registry.activate(pattern);
                info!("Subscribed to {pattern}");
                Ok(())
            }
            Err(e) => {
                registry.deregister(pattern);
                warn!("Subscription to {pattern} failed: {e}");
                Err(e)
            }
        }
    }

    /// Removes the subscription to `pattern` once the broker acknowledges.
    pub async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        let transport = self.require_transport("unsubscribe")?;

        if !lock(&self.inner.registry).contains(pattern) {
            warn!("Not subscribed to {pattern}.");
            return Err(SessionError::NotSubscribed(pattern.to_string()));
        }

        info!("Unsubscribing from {pattern}...");
        self.track(&format!("unsubscribe from {pattern}"), |id| {
            transport.unsubscribe(pattern, id)
        })
        .await?;

        lock(&self.inner.registry).deregister(pattern);
        info!("Unsubscribed from {pattern}");
        Ok(())
    }

    /// Publishes `payload` as JSON with guaranteed delivery and waits for the
    /// broker's acknowledgment.
    pub async fn publish_guaranteed<T>(&self, topic: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let transport = self.require_transport("publish")?;
        let payload = serde_json::to_vec(payload)?;

        self.track(&format!("guaranteed publish on {topic}"), |id| {
            transport.send(OutboundMessage::guaranteed(topic, payload, id.clone()))
        })
        .await
    }

    /// Publishes `payload` as JSON without any delivery guarantee. Failures
    /// are logged.
    pub fn publish_direct<T>(&self, topic: &str, payload: &T)
    where
        T: Serialize + ?Sized,
    {
        let Some(transport) = self.transport() else {
            debug!("Dropping message on {topic}: not connected");
            return;
        };

        let result = OutboundMessage::direct_json(topic, payload).and_then(|m| transport.send(m));
        if let Err(e) = result {
            warn!("Unable to publish message on {topic}: {e}");
        }
    }

    /// Sends `payload` as a direct request and waits up to `timeout` for the
    /// reply.
    pub async fn send_request<T>(
        &self,
        topic: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<InboundMessage>
    where
        T: Serialize + ?Sized,
    {
        let transport = self.require_transport("send a request")?;
        let correlation = CorrelationId::new();
        let mut message = OutboundMessage::direct_json(topic, payload)?;
        message.correlation = Some(correlation.clone());

        debug!("Sending request on {topic}");
        let reply = transport.send_request(message).inspect_err(|e| {
            error!("Unable to send request on {topic}: {e}");
        })?;
        drop(transport);

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SessionError::Transport(format!(
                "request on {topic} was abandoned by the transport"
            ))),
            Err(_) => {
                if let Some(transport) = self.transport() {
                    transport.cancel_request(&correlation);
                }
                warn!("Request on {topic} timed out after {timeout:?}");
                Err(SessionError::OperationTimeout(format!("request on {topic}")))
            }
        }
    }

    /// Answers `request` with `payload` serialized as JSON.
    pub fn reply<T>(&self, request: &InboundMessage, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let transport = self.require_transport("reply")?;
        transport.send_reply(request, serde_json::to_vec(payload)?)
    }

    /// Starts consuming from `queue`. Logged no-op when not connected or
    /// already consuming.
    pub fn consume_from_queue(&self, queue: &str) {
        let mut lifecycle = lock(&self.inner.lifecycle);
        let Some(transport) = lifecycle.transport.clone() else {
            warn!("Not connected to the message router!");
            return;
        };
        if let Some(consumer) = &lifecycle.consumer {
            warn!("Already consuming from the queue {}", consumer.queue());
            return;
        }

        let started = transport.create_consumer(queue).and_then(|consumer| {
            consumer.connect()?;
            Ok(consumer)
        });
        match started {
            Ok(consumer) => lifecycle.consumer = Some(Arc::from(consumer)),
            Err(e) => error!("Cannot start the message consumer on queue {queue} because: {e}"),
        }
    }

    pub fn stop_consume_from_queue(&self) {
        let consumer = lock(&self.inner.lifecycle).consumer.take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.stop() {
                warn!("Unable to stop consuming from {}: {e}", consumer.queue());
            }
        }
    }

    /// Adds a topic subscription to the consumed queue.
    pub async fn add_subscription_to_queue(&self, topic: &str) -> Result<()> {
        let consumer = self.require_consumer()?;
        self.track(
            &format!("add {topic} to queue {}", consumer.queue()),
            |id| consumer.add_subscription(topic, id),
        )
        .await
    }

    /// Removes a topic subscription from the consumed queue.
    pub async fn remove_subscription_from_queue(&self, topic: &str) -> Result<()> {
        let consumer = self.require_consumer()?;
        self.track(
            &format!("remove {topic} from queue {}", consumer.queue()),
            |id| consumer.remove_subscription(topic, id),
        )
        .await
    }

    /// Issues a correlated operation and waits for its settlement or the
    /// operation timeout, whichever comes first.
    async fn track<F>(&self, operation: &str, issue: F) -> Result<()>
    where
        F: FnOnce(&CorrelationId) -> Result<()>,
    {
        let (id, mut settled) = lock(&self.inner.tracker).begin();

        if let Err(e) = issue(&id) {
            lock(&self.inner.tracker).cancel(&id);
            error!("Unable to {operation}: {e}");
            return Err(e);
        }

        let window = self.inner.timeouts.operation_timeout();
        let settlement = match tokio::time::timeout(window, &mut settled).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => {
                return Err(SessionError::Transport(format!("{operation} was abandoned")));
            }
            Err(_) => {
                lock(&self.inner.tracker).time_out(&id);
                // an acknowledgment may have won the race with the timer
                settled.try_recv().unwrap_or(Settlement::TimedOut)
            }
        };

        settlement.into_result(operation)
    }

    fn transport(&self) -> Option<Arc<dyn BrokerTransport>> {
        lock(&self.inner.lifecycle).transport.clone()
    }

    fn require_transport(&self, action: &str) -> Result<Arc<dyn BrokerTransport>> {
        self.transport().ok_or_else(|| {
            error!("Cannot {action} because not connected to the message router!");
            SessionError::NotConnected
        })
    }

    fn require_consumer(&self) -> Result<Arc<dyn QueueConsumer>> {
        lock(&self.inner.lifecycle)
            .consumer
            .clone()
            .ok_or(SessionError::NotConsuming)
    }
}

impl Inner {
    fn handle_event(&self, generation: u64, event: SessionEvent) {
        match event {
            SessionEvent::UpNotice => {
                let waiter = {
                    let mut lifecycle = lock(&self.lifecycle);
                    if lifecycle.generation != generation {
                        return;
                    }
                    lifecycle.state = SessionState::Connected;
                    lifecycle.connect_waiter.take()
                };
                info!("=== Successfully connected and ready to subscribe. ===");
                self.status.send_replace(ConnectionStatus::Connected);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
            }
            SessionEvent::ConnectFailed { reason } => {
                let waiter = {
                    let mut lifecycle = lock(&self.lifecycle);
                    if lifecycle.generation != generation {
                        return;
                    }
                    lifecycle.state = SessionState::Failed;
                    lifecycle.connect_waiter.take()
                };
                warn!("Connection failed to the message router: {reason}");
                self.status.send_replace(ConnectionStatus::Disconnected);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(SessionError::ConnectFailed(reason)));
                }
            }
            SessionEvent::Disconnected => {
                let (released, disconnect_waiter, connect_waiter) = {
                    let mut lifecycle = lock(&self.lifecycle);
                    if lifecycle.generation != generation {
                        return;
                    }
                    lifecycle.state = SessionState::Disconnected;
                    (
                        lifecycle.release(),
                        lifecycle.disconnect_waiter.take(),
                        lifecycle.connect_waiter.take(),
                    )
                };
                drop(released);
                info!("Disconnected.");
                self.status.send_replace(ConnectionStatus::Disconnected);
                if let Some(waiter) = disconnect_waiter {
                    let _ = waiter.send(());
                }
                if let Some(waiter) = connect_waiter {
                    let _ = waiter.send(Err(SessionError::ConnectFailed(
                        "disconnected before the session came up".to_string(),
                    )));
                }
            }
            SessionEvent::SubscriptionOk { correlation }
            | SessionEvent::Acknowledged { correlation } => {
                lock(&self.tracker).settle(&correlation, Settlement::Acknowledged);
            }
            SessionEvent::SubscriptionError {
                correlation,
                reason,
            }
            | SessionEvent::Rejected {
                correlation,
                reason,
            } => {
                lock(&self.tracker).settle(&correlation, Settlement::Rejected(reason));
            }
            SessionEvent::Message(message) => {
                let callbacks = lock(&self.registry).matching(&message.topic);
                if callbacks.is_empty() {
                    debug!("No active subscription matches {}", message.topic);
                    return;
                }
                invoke_all(callbacks, &message);
            }
            SessionEvent::ConsumerUp { queue } => {
                info!("Successfully connected to and consuming from {queue}");
            }
            SessionEvent::ConsumerConnectFailed { queue, reason } => {
                warn!("Consumer cannot bind to queue {queue}: {reason}");
                let released = {
                    let mut lifecycle = lock(&self.lifecycle);
                    if lifecycle
                        .consumer
                        .as_ref()
                        .is_some_and(|c| c.queue() == queue)
                    {
                        lifecycle.consumer.take()
                    } else {
                        None
                    }
                };
                drop(released);
            }
            SessionEvent::ConsumerDown { queue } => {
                info!("The message consumer for {queue} is down");
            }
        }
    }
}

async fn run_event_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(generation, event);
    }
    debug!("Session event loop {generation} finished");
}
