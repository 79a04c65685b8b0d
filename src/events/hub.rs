//! # Serialized action processor for all emitters.
//!
//! [`EventHub`] owns the listener sets of every emitter created from it. All
//! registration changes and deliveries are sent as actions over one unbounded
//! queue and applied, in arrival order, by a single tokio task.
//!
//! ## Architecture
//! ```text
//! Emitter<A> ──┐                            ┌──► Listener #1 (bounded mpsc)
//! Emitter<B> ──┼──► action queue ──► processor ──► Listener #2
//! Listener   ──┘   (Open/Add/Remove/         └──► ...
//!  (drop)           Emit/Count/Close)
//! ```
//!
//! ## Rules
//! - One processor: listener sets are never touched outside it, so no locks.
//! - `Emit` is acknowledged only after every listener of the emitter accepted
//!   the event (or turned out to be gone).
//! - A listener whose receiver was dropped is pruned on the next delivery.
//! - `Add` for an emitter that was already closed drops the delivery queue at
//!   once, so the new listener observes end-of-stream.
//! - A listener that stops draining its queue stalls the processor once the
//!   queue is full.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::event::Event;

static NEXT_EMITTER: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Identity of an emitter inside a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct EmitterId(u64);

impl EmitterId {
    pub(crate) fn next() -> Self {
        Self(NEXT_EMITTER.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

/// Identity of a listener inside an emitter's set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

/// Type-erased event as carried through the action queue.
pub(crate) type AnyEvent = Arc<dyn Any + Send + Sync>;

/// Type-erased delivery endpoint of one listener.
pub(crate) trait Sink: Send + Sync {
    /// Delivers `ev`; resolves to `false` when the listener is gone.
    fn deliver(&self, ev: AnyEvent) -> BoxFuture<'_, bool>;
}

/// Bounded channel endpoint for listeners of `Emitter<T>`.
pub(crate) struct ChannelSink<T> {
    tx: mpsc::Sender<Arc<Event<T>>>,
}

impl<T> ChannelSink<T> {
    pub(crate) fn new(tx: mpsc::Sender<Arc<Event<T>>>) -> Self {
        Self { tx }
    }
}

impl<T: Send + Sync + 'static> Sink for ChannelSink<T> {
    fn deliver(&self, ev: AnyEvent) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match ev.downcast::<Event<T>>() {
                Ok(ev) => self.tx.send(ev).await.is_ok(),
                Err(_) => {
                    debug!("event type mismatch, dropping listener");
                    false
                }
            }
        })
    }
}

/// Actions applied by the processor.
pub(crate) enum Action {
    Open {
        emitter: EmitterId,
    },
    Add {
        emitter: EmitterId,
        listener: ListenerId,
        sink: Box<dyn Sink>,
    },
    Remove {
        emitter: EmitterId,
        listener: ListenerId,
    },
    Emit {
        emitter: EmitterId,
        event: AnyEvent,
        ack: oneshot::Sender<()>,
    },
    Count {
        emitter: EmitterId,
        reply: oneshot::Sender<usize>,
    },
    Close {
        emitter: EmitterId,
    },
}

/// Handle to the serialized processor shared by a family of emitters.
///
/// Cheap to clone. The processor task exits when the last handle is dropped.
#[derive(Clone, Debug)]
pub struct EventHub {
    tx: mpsc::UnboundedSender<Action>,
    capacity: usize,
}

impl EventHub {
    /// Spawns the processor task with listener queues of capacity 1.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    /// Spawns the processor task; each listener queue holds up to `capacity`
    /// undelivered events (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(process(rx));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Capacity of the delivery queue of new listeners.
    pub fn listener_capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues an action; `false` when the processor is gone.
    pub(crate) fn send(&self, action: Action) -> bool {
        self.tx.send(action).is_ok()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

type ListenerSet = Vec<(ListenerId, Box<dyn Sink>)>;

async fn process(mut rx: mpsc::UnboundedReceiver<Action>) {
    let mut sets: HashMap<EmitterId, ListenerSet> = HashMap::new();

    while let Some(action) = rx.recv().await {
        match action {
            Action::Open { emitter } => {
                sets.entry(emitter).or_default();
            }
            Action::Add {
                emitter,
                listener,
                sink,
            } => match sets.get_mut(&emitter) {
                Some(set) => set.push((listener, sink)),
                None => debug!(?emitter, "listener added to a closed emitter"),
            },
            Action::Remove { emitter, listener } => {
                if let Some(set) = sets.get_mut(&emitter) {
                    set.retain(|(id, _)| *id != listener);
                }
            }
            Action::Emit {
                emitter,
                event,
                ack,
            } => {
                if let Some(set) = sets.get_mut(&emitter) {
                    let mut gone = Vec::new();
                    for (id, sink) in set.iter() {
                        if !sink.deliver(Arc::clone(&event)).await {
                            gone.push(*id);
                        }
                    }
                    if !gone.is_empty() {
                        set.retain(|(id, _)| !gone.contains(id));
                    }
                }
                let _ = ack.send(());
            }
            Action::Count { emitter, reply } => {
                let _ = reply.send(sets.get(&emitter).map_or(0, Vec::len));
            }
            Action::Close { emitter } => {
                sets.remove(&emitter);
            }
        }
    }
}
