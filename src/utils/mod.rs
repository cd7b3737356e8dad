//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `cannon-link` crate.
//!
//! This module centralizes the error type shared by the session, transports
//! and game layer, and the logging bootstrap used by the binary.

pub mod error;
pub mod logging;

pub use error::{Result, SessionError};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// User callbacks never run under these locks, so a poisoned lock only means
/// a panic elsewhere interrupted a short map update.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
