//! The `client` module is the application-facing side of the crate.
//!
//! [`Session`] wraps a broker transport and exposes connect, subscribe,
//! publish, request/reply and queue consumption as `async` operations. It is
//! built from three smaller pieces:
//!
//! - `topic`: hierarchical topic patterns with `*` and `>` wildcards.
//! - `registry`: pattern to callback bookkeeping and message dispatch.
//! - `tracker`: correlation ids awaiting a broker acknowledgment.

pub mod registry;
pub mod session;
pub mod topic;
pub mod tracker;

pub use registry::{Callback, Subscription, SubscriptionRegistry};
pub use session::{ConnectionStatus, Session, SessionState, WeakSession};
pub use topic::{TopicPattern, matches};
pub use tracker::{CorrelationTracker, Settlement};
