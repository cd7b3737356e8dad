//! Correlation tracker
//!
//! Turns the broker's acknowledgment events into one-shot outcomes. Each
//! pending operation is a oneshot sender keyed by its correlation id; the
//! entry is removed the moment it settles, so duplicate or late events for
//! the same id find nothing and are ignored.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::debug;

use crate::transport::CorrelationId;
use crate::utils::{Result, SessionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acknowledged,
    Rejected(String),
    TimedOut,
}

impl Settlement {
    /// Converts the outcome of `operation` into a result.
    pub fn into_result(self, operation: &str) -> Result<()> {
        match self {
            Settlement::Acknowledged => Ok(()),
            Settlement::Rejected(reason) => {
                Err(SessionError::OperationRejected(format!("{operation}: {reason}")))
            }
            Settlement::TimedOut => Err(SessionError::OperationTimeout(operation.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct CorrelationTracker {
    pending: HashMap<CorrelationId, oneshot::Sender<Settlement>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `id` and returns the receiver its settlement will arrive on.
    ///
    /// Ids are expected to be unique; registering an id that is still pending
    /// drops the earlier receiver's sender.
    pub fn register(&mut self, id: CorrelationId) -> oneshot::Receiver<Settlement> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Tracks a freshly generated id.
    pub fn begin(&mut self) -> (CorrelationId, oneshot::Receiver<Settlement>) {
        let id = CorrelationId::new();
        let rx = self.register(id.clone());
        (id, rx)
    }

    /// Delivers `outcome` for `id`. Returns false, and does nothing, when `id`
    /// is not pending.
    pub fn settle(&mut self, id: &CorrelationId, outcome: Settlement) -> bool {
        match self.pending.remove(id) {
            Some(waiter) => {
                let _ = waiter.send(outcome);
                true
            }
            None => {
                debug!("Ignoring settlement for unknown correlation id {id}");
                false
            }
        }
    }

    pub fn time_out(&mut self, id: &CorrelationId) -> bool {
        self.settle(id, Settlement::TimedOut)
    }

    /// Forgets `id` without settling it, for operations that never reached
    /// the broker.
    pub fn cancel(&mut self, id: &CorrelationId) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
