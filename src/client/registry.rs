//! Subscription registry
//!
//! Maps each subscribed pattern to its callback and whether the broker has
//! acknowledged it. Entries keep registration order, which is also the order
//! callbacks fire in when several patterns match one topic.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::client::topic::TopicPattern;
use crate::transport::InboundMessage;
use crate::utils::{Result, SessionError};

pub type Callback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

pub struct Subscription {
    pattern: TopicPattern,
    callback: Callback,
    active: bool,
}

impl Subscription {
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern.as_str())
            .field("active", &self.active)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an inactive subscription for `pattern`.
    ///
    /// Fails with `AlreadySubscribed` and leaves the existing entry untouched
    /// when the pattern is already present.
    pub fn register(&mut self, pattern: &str, callback: Callback) -> Result<()> {
        if self.contains(pattern) {
            return Err(SessionError::AlreadySubscribed(pattern.to_string()));
        }
        self.subscriptions.push(Subscription {
            pattern: TopicPattern::new(pattern),
            callback,
            active: false,
        });
        Ok(())
    }

    /// Marks `pattern` active. Returns false when it is not registered.
    pub fn activate(&mut self, pattern: &str) -> bool {
        match self.find_mut(pattern) {
            Some(subscription) => {
                subscription.active = true;
                true
            }
            None => false,
        }
    }

    /// Removes `pattern`. Returns false when it was not registered.
    pub fn deregister(&mut self, pattern: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.pattern.as_str() != pattern);
        self.subscriptions.len() != before
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.get(pattern).is_some()
    }

    pub fn get(&self, pattern: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.pattern.as_str() == pattern)
    }

    pub fn is_active(&self, pattern: &str) -> bool {
        self.get(pattern).is_some_and(Subscription::is_active)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(|s| s.pattern.as_str())
    }

    /// Callbacks of every active subscription matching `topic`, in
    /// registration order.
    pub fn matching(&self, topic: &str) -> Vec<Callback> {
        self.subscriptions
            .iter()
            .filter(|s| s.active && s.pattern.matches(topic))
            .map(|s| s.callback.clone())
            .collect()
    }

    /// Invokes every matching callback with `message`. Returns how many
    /// completed without panicking.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        invoke_all(self.matching(&message.topic), message)
    }

    fn find_mut(&mut self, pattern: &str) -> Option<&mut Subscription> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.pattern.as_str() == pattern)
    }
}

/// Runs each callback in turn. A panicking callback is logged and does not
/// stop the ones after it.
pub fn invoke_all(callbacks: Vec<Callback>, message: &InboundMessage) -> usize {
    let mut completed = 0;
    for callback in callbacks {
        match catch_unwind(AssertUnwindSafe(|| callback(message))) {
            Ok(()) => completed += 1,
            Err(_) => error!("Subscription callback for {} panicked", message.topic),
        }
    }
    completed
}
