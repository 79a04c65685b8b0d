//! # Typed emitters and their listeners.
//!
//! An [`Emitter<T>`] publishes [`Event<T>`] values to every registered
//! [`Listener<T>`]. Listener registration, delivery and counting are all
//! applied by the [`EventHub`] processor, so one invocation is delivered
//! atomically with respect to `add_listener`/`stop`/`close` on the same emitter.
//!
//! ## Lifecycle
//! ```text
//! new ──► add_listener / listen / await_one / await_any ──► invoke ... ──► close
//!                                                                        │
//!         every listener drains what was delivered, then observes `None` ◄┘
//! ```
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use tasktree::{Emitter, EventHub};
//!
//! let hub = EventHub::new();
//! let emitter = Emitter::<u32>::new(&hub, "TEST");
//! let mut listener = emitter.add_listener().unwrap();
//!
//! tokio::spawn({
//!     let emitter = emitter.clone();
//!     async move { emitter.invoke(42).await }
//! });
//! assert_eq!(listener.recv().await.unwrap().payload, 42);
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::event::Event;
use super::hub::{Action, ChannelSink, EmitterId, EventHub, ListenerId};

/// Publisher of events with payload `T`.
///
/// Cheap to clone; clones are the same emitter.
pub struct Emitter<T> {
    id: EmitterId,
    source: Arc<str>,
    hub: EventHub,
    closed: Arc<AtomicBool>,
    _payload: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            source: Arc::clone(&self.source),
            hub: self.hub.clone(),
            closed: Arc::clone(&self.closed),
            _payload: std::marker::PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("source", &self.source)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Emitter<T> {
    /// Label stamped on every event.
    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T: Send + Sync + 'static> Emitter<T> {
    /// Creates an emitter bound to `source` with no listeners.
    pub fn new(hub: &EventHub, source: impl Into<Arc<str>>) -> Self {
        let id = EmitterId::next();
        hub.send(Action::Open { emitter: id });
        Self {
            id,
            source: source.into(),
            hub: hub.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            _payload: std::marker::PhantomData,
        }
    }

    /// Registers a new listener.
    ///
    /// Returns `None` when the emitter is closed. The listener receives every
    /// event invoked after the registration was applied.
    pub fn add_listener(&self) -> Option<Listener<T>> {
        if self.is_closed() {
            return None;
        }
        let (tx, rx) = mpsc::channel(self.hub.listener_capacity());
        let listener = ListenerId::next();
        let added = self.hub.send(Action::Add {
            emitter: self.id,
            listener,
            sink: Box::new(ChannelSink::new(tx)),
        });
        if !added {
            return None;
        }
        Some(Listener {
            id: listener,
            emitter: self.id,
            hub: self.hub.clone(),
            rx,
        })
    }

    /// Delivers `payload` to every registered listener, in registration order.
    ///
    /// Resolves once every listener has accepted the event.
    /// Does nothing on a closed emitter.
    pub async fn invoke(&self, payload: T) {
        if self.is_closed() {
            return;
        }
        let event = Arc::new(Event::new(Arc::clone(&self.source), payload));
        let (ack, done) = oneshot::channel();
        if self.hub.send(Action::Emit {
            emitter: self.id,
            event,
            ack,
        }) {
            let _ = done.await;
        }
    }

    /// Calls `handler` for every event on a background task.
    ///
    /// Returns `None` when the emitter is closed. The loop ends when the
    /// handle is stopped or the emitter is closed.
    pub fn listen<F, Fut>(&self, handler: F) -> Option<ListenHandle>
    where
        F: Fn(Arc<Event<T>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut listener = self.add_listener()?;
        let token = CancellationToken::new();
        let stop = token.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    ev = listener.recv() => match ev {
                        Some(ev) => handler(ev).await,
                        None => break,
                    },
                }
            }
        });
        Some(ListenHandle { token, join })
    }

    /// Waits for the next event.
    ///
    /// Returns `None` immediately if the emitter is closed, or when it closes
    /// before an event arrives.
    pub async fn await_one(&self) -> Option<Arc<Event<T>>> {
        let mut listener = self.add_listener()?;
        listener.recv().await
    }

    /// Returns a listener to receive events from until `None`.
    ///
    /// Equivalent to [`add_listener`](Self::add_listener).
    pub fn await_any(&self) -> Option<Listener<T>> {
        self.add_listener()
    }

    /// Number of registered listeners, as seen by the processor.
    pub async fn count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if !self.hub.send(Action::Count {
            emitter: self.id,
            reply,
        }) {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Closes the emitter: listeners drain what was delivered, then observe `None`.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.send(Action::Close { emitter: self.id });
        }
    }
}

/// A registered receiver of events.
///
/// Dropping the listener deregisters it.
#[derive(Debug)]
pub struct Listener<T> {
    id: ListenerId,
    emitter: EmitterId,
    hub: EventHub,
    rx: mpsc::Receiver<Arc<Event<T>>>,
}

impl<T> Listener<T> {
    /// Next event, or `None` once the emitter is closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Event<T>>> {
        self.rx.recv().await
    }

    /// Deregisters the listener; later invocations are not delivered to it.
    pub fn stop(self) {}
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        self.rx.close();
        self.hub.send(Action::Remove {
            emitter: self.emitter,
            listener: self.id,
        });
    }
}

/// Handle of a [`Emitter::listen`] loop.
#[derive(Debug)]
pub struct ListenHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl ListenHandle {
    /// Stops the loop; the handler is not called for later events.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Waits for the loop to end (after `stop` or `close`).
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_invoke_reaches_every_listener() {
        let hub = EventHub::new();
        let emitter = Emitter::<u32>::new(&hub, "TEST");

        let mut listeners: Vec<_> = (0..5).map(|_| emitter.add_listener().unwrap()).collect();
        assert_eq!(emitter.count().await, 5);

        let sender = emitter.clone();
        tokio::spawn(async move {
            for n in 0..3 {
                sender.invoke(n).await;
            }
        });

        // queues hold one event: every listener takes event n before n + 1 is sent
        for n in 0..3 {
            for listener in listeners.iter_mut() {
                let ev = listener.recv().await.unwrap();
                assert_eq!(ev.payload, n);
                assert_eq!(&*ev.source, "TEST");
            }
        }
    }

    #[tokio::test]
    async fn test_stop_deregisters() {
        let hub = EventHub::new();
        let emitter = Emitter::<()>::new(&hub, "TEST");

        let a = emitter.add_listener().unwrap();
        let b = emitter.add_listener().unwrap();
        assert_eq!(emitter.count().await, 2);

        a.stop();
        assert_eq!(emitter.count().await, 1);
        drop(b);
        assert_eq!(emitter.count().await, 0);

        // No listener: invoke must still be acknowledged.
        emitter.invoke(()).await;
    }

    #[tokio::test]
    async fn test_await_one_sequence() {
        let hub = EventHub::new();
        let emitter = Emitter::<u32>::new(&hub, "TEST");

        for n in 0..3 {
            let waiter = {
                let emitter = emitter.clone();
                tokio::spawn(async move { emitter.await_one().await.map(|ev| ev.payload) })
            };
            while emitter.count().await == 0 {
                tokio::task::yield_now().await;
            }
            emitter.invoke(n).await;
            assert_eq!(waiter.await.unwrap(), Some(n));
        }
        assert_eq!(emitter.count().await, 0);
    }

    #[tokio::test]
    async fn test_await_any_counts_events() {
        let hub = EventHub::new();
        let emitter = Emitter::<u32>::new(&hub, "TEST");
        let mut listener = emitter.await_any().unwrap();

        let sender = emitter.clone();
        tokio::spawn(async move {
            for n in 0..10 {
                sender.invoke(n).await;
            }
            sender.close();
        });

        let mut count = 0;
        while listener.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn test_listen_until_close() {
        let hub = EventHub::new();
        let emitter = Emitter::<u32>::new(&hub, "TEST");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = emitter
            .listen({
                let seen = Arc::clone(&seen);
                move |ev| {
                    let seen = Arc::clone(&seen);
                    async move { seen.lock().unwrap().push(ev.payload) }
                }
            })
            .unwrap();

        for n in 0..4 {
            emitter.invoke(n).await;
        }
        emitter.close();
        handle.join().await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_listen_stop() {
        let hub = EventHub::new();
        let emitter = Emitter::<u32>::new(&hub, "TEST");
        let handle = emitter.listen(|_| async {}).unwrap();

        handle.stop();
        handle.join().await;
        assert_eq!(emitter.count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_emitter() {
        let hub = EventHub::new();
        let emitter = Emitter::<u32>::new(&hub, "TEST");
        let mut pending = emitter.add_listener().unwrap();

        emitter.close();
        emitter.close();

        assert!(emitter.add_listener().is_none());
        assert!(emitter.await_any().is_none());
        assert!(emitter.listen(|_| async {}).is_none());
        let none = tokio::time::timeout(Duration::from_secs(1), emitter.await_one()).await;
        assert!(none.unwrap().is_none());

        emitter.invoke(1).await;
        assert!(pending.recv().await.is_none());
        assert_eq!(emitter.count().await, 0);
    }
}
