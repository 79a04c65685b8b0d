//! # Events delivered by emitters.
//!
//! An [`Event`] couples a payload with the label of the emitter that produced it
//! (for task emitters, the task id), a wall-clock timestamp and a global
//! sequence number.
//!
//! ## Ordering guarantees
//! `seq` increases monotonically across all emitters. Events of one emitter are
//! delivered to each listener in invocation order.
//!
//! ```rust
//! use tasktree::Event;
//!
//! let a = Event::new("TEST".into(), 42u32);
//! let b = Event::new("TEST".into(), 43u32);
//! assert_eq!(&*a.source, "TEST");
//! assert!(b.seq > a.seq);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A payload published by an emitter.
///
/// Listeners receive events as `Arc<Event<T>>`: every listener of an
/// invocation observes the same allocation.
#[derive(Debug, Clone)]
pub struct Event<T> {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (for logs/metrics only).
    pub at: SystemTime,
    /// Label of the emitter that produced the event.
    pub source: Arc<str>,
    /// Carried value.
    pub payload: T,
}

impl<T> Event<T> {
    /// Creates an event with the next sequence number and the current time.
    pub fn new(source: Arc<str>, payload: T) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            source,
            payload,
        }
    }
}
