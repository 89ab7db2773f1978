//! Shared-state type aliases used across the DeltaKit crates.

pub mod aliases;

pub use aliases::{thread_safe, ThreadSafe};
