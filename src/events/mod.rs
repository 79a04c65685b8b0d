//! Events: typed emitters synchronized by one action processor.
//!
//! This module groups the event **data model**, the **hub** that serializes
//! every listener-set mutation and delivery, and the typed **emitter/listener**
//! API used by tasks to publish status, progress and produced files.
//!
//! ## Contents
//! - [`Event`] payload plus source label, timestamp and sequence number
//! - [`EventHub`] single tokio task applying Open/Add/Remove/Emit/Count/Close
//! - [`Emitter`], [`Listener`], [`ListenHandle`] the typed pub/sub surface
//!
//! ## Quick reference
//! - **Publishers**: every [`Task`](crate::Task) owns six emitters
//!   (status-changed, failed, succeeded, done, progress, file-produced).
//! - **Consumers**: `Task::await_done`, fail-fast watchers of
//!   [`ParentTask`](crate::ParentTask), the file-produced loops of
//!   [`FilesBucketTask`](crate::FilesBucketTask), and callers.

mod emitter;
mod event;
mod hub;

pub use emitter::{Emitter, ListenHandle, Listener};
pub use event::Event;
pub use hub::EventHub;
