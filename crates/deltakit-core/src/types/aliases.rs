//! Type aliases for commonly used complex types.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use deltakit_core::types::*;
//!
//! // Instead of: Arc<Mutex<Vec<String>>>
//! let log: ThreadSafe<Vec<String>> = thread_safe(Vec::new());
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

/// A thread-safe, mutex-protected wrapper for cross-thread sharing.
///
/// Uses `parking_lot::Mutex`, which does not poison, so a panicking
/// callback cannot wedge bookkeeping shared with timer tasks.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// Create a new `ThreadSafe<T>` from a value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}
