use dashmap::DashMap;
use futures_channel::oneshot::{self, Canceled, Receiver};
use futures_util::future::{join_all, FutureExt};
use std::{
    error::Error as StdError,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    future::Future,
    hash::Hash,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type Handler<E> = Box<dyn Fn(E) -> BoxFuture<'static, ()> + Send + Sync>;
type Predicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Failure raised by a registered handler, re-dispatched on the reserved
/// error channel rather than propagated to the caller of [`Dispatcher::dispatch`].
#[derive(Debug)]
pub struct DispatchError<K> {
    key: K,
    source: Arc<dyn StdError + Send + Sync>,
}

impl<K: Clone> Clone for DispatchError<K> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            source: Arc::clone(&self.source),
        }
    }
}

impl<K: Debug> Display for DispatchError<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "handler for {:?} failed", self.key)
    }
}

impl<K: Debug> StdError for DispatchError<K> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}

impl<K> DispatchError<K> {
    /// Key the failing handler was registered under.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Consume the error, returning its source.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Arc<dyn StdError + Send + Sync> {
        self.source
    }
}

/// Event observed on the dispatcher's global channel: either a normal
/// dispatch or a handler failure, so one subscription sees both without
/// the caller manufacturing a reserved key out of `K`.
#[derive(Debug)]
pub enum GlobalEvent<K, E> {
    /// A normal dispatch under `key`.
    Dispatch(K, E),
    /// A handler registered under some key failed.
    Error(DispatchError<K>),
}

struct Registered<T> {
    id: u64,
    handler: Handler<T>,
}

struct Waiter<T> {
    id: u64,
    predicate: Predicate<T>,
    tx: Option<oneshot::Sender<T>>,
}

struct Keyed<E> {
    listeners: Vec<Registered<E>>,
    waiters: Vec<Waiter<E>>,
}

impl<E> Default for Keyed<E> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            waiters: Vec::new(),
        }
    }
}

struct Inner<K, E>
where
    K: Eq + Hash,
{
    keyed: DashMap<K, Keyed<E>>,
    global: Mutex<Keyed<GlobalEvent<K, E>>>,
    errors: Mutex<Vec<Registered<DispatchError<K>>>>,
    next_id: AtomicU64,
}

/// Typed publish/subscribe broadcaster.
///
/// `K` is the event key (an opcode, an event-type string, ...); `E` is the
/// payload delivered to handlers registered under that key. Handlers run as
/// independent tasks; a panic-free failure returned by one handler does not
/// stop its siblings and is re-dispatched through [`Dispatcher::on_error`]
/// and the [`GlobalEvent::Error`] variant observed by global subscribers.
pub struct Dispatcher<K, E>
where
    K: Eq + Hash,
{
    inner: Arc<Inner<K, E>>,
}

impl<K, E> Clone for Dispatcher<K, E>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, E> Default for Dispatcher<K, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                keyed: DashMap::new(),
                global: Mutex::new(Keyed::default()),
                errors: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

/// Opaque handle identifying a registered listener for later removal.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionId(u64);

impl<K, E> Dispatcher<K, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a persistent async handler under `key`.
    ///
    /// The handler is spawned on the Tokio runtime once per matching
    /// dispatch; it must be `'static` and own everything it touches.
    pub fn listen<F, Fut>(&self, key: K, handler: F) -> SubscriptionId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id();
        let boxed: Handler<E> = Box::new(move |event| handler(event).boxed());

        self.inner
            .keyed
            .entry(key)
            .or_default()
            .listeners
            .push(Registered { id, handler: boxed });

        SubscriptionId(id)
    }

    /// Register a handler that observes every dispatch regardless of key.
    pub fn listen_global<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(GlobalEvent<K, E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id();
        let boxed: Handler<GlobalEvent<K, E>> = Box::new(move |event| handler(event).boxed());

        self.inner
            .global
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .push(Registered { id, handler: boxed });

        SubscriptionId(id)
    }

    /// Register a handler invoked whenever any listener under any key fails.
    pub fn on_error<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(DispatchError<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id();
        let boxed: Handler<DispatchError<K>> = Box::new(move |event| handler(event).boxed());

        self.inner
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registered { id, handler: boxed });

        SubscriptionId(id)
    }

    /// Deregister a previously registered listener for `key`.
    ///
    /// Returns whether a listener with that id was found and removed.
    pub fn unlisten(&self, key: &K, id: SubscriptionId) -> bool {
        if let Some(mut keyed) = self.inner.keyed.get_mut(key) {
            let before = keyed.listeners.len();
            keyed.listeners.retain(|l| l.id != id.0);
            return keyed.listeners.len() != before;
        }

        false
    }

    /// Resolve with the first future dispatch under `key` for which
    /// `predicate` returns `true`. The predicate runs synchronously inline
    /// with every dispatch until it matches or the dispatcher is dropped.
    pub fn wait_for<F>(&self, key: K, predicate: F) -> WaitForFuture<E>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();

        self.inner
            .keyed
            .entry(key)
            .or_default()
            .waiters
            .push(Waiter {
                id,
                predicate: Box::new(predicate),
                tx: Some(tx),
            });

        WaitForFuture { rx }
    }

    /// Dispatch `event` under `key`: run every matching keyed listener,
    /// resolve every matching `wait_for`, and notify global subscribers.
    ///
    /// A listener that panics does not stop its siblings; the panic is
    /// re-dispatched through [`Dispatcher::on_error`] and
    /// [`GlobalEvent::Error`] once it's observed.
    ///
    /// Returns a future that completes once every spawned handler has
    /// finished; awaiting it is optional.
    pub fn dispatch(&self, key: K, event: E) -> DispatchFuture {
        let mut handles = Vec::new();

        if let Some(mut keyed) = self.inner.keyed.get_mut(&key) {
            keyed.waiters.retain_mut(|waiter| {
                if (waiter.predicate)(&event) {
                    if let Some(tx) = waiter.tx.take() {
                        let _ = tx.send(event.clone());
                    }
                    false
                } else {
                    true
                }
            });

            for listener in &keyed.listeners {
                let fut = (listener.handler)(event.clone());
                handles.push(tokio::spawn(fut));
            }
        }

        {
            let global = self
                .inner
                .global
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for listener in &global.listeners {
                let fut = (listener.handler)(GlobalEvent::Dispatch(key.clone(), event.clone()));
                handles.push(tokio::spawn(fut));
            }
        }

        let dispatcher = self.clone();
        let error_key = key;

        DispatchFuture {
            inner: async move {
                let results = join_all(handles).await;

                for result in results {
                    if let Err(join_error) = result {
                        if join_error.is_panic() {
                            dispatcher.dispatch_error(error_key.clone(), Arc::new(join_error));
                        }
                    }
                }
            }
            .boxed(),
        }
    }

    /// Report a handler failure under `key`, running every registered error
    /// handler and notifying global subscribers with [`GlobalEvent::Error`].
    pub fn dispatch_error(&self, key: K, source: Arc<dyn StdError + Send + Sync>) {
        let error = DispatchError { key, source };

        let errors = self.inner.errors.lock().unwrap_or_else(|e| e.into_inner());
        for listener in errors.iter() {
            tokio::spawn((listener.handler)(error.clone()));
        }
        drop(errors);

        let global = self.inner.global.lock().unwrap_or_else(|e| e.into_inner());
        for listener in global.listeners.iter() {
            tokio::spawn((listener.handler)(GlobalEvent::Error(error.clone())));
        }
    }
}

/// Future returned by [`Dispatcher::dispatch`], resolving once every spawned
/// handler for that dispatch has finished.
pub struct DispatchFuture {
    inner: BoxFuture<'static, ()>,
}

impl Future for DispatchFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

/// Future returned by [`Dispatcher::wait_for`], resolving with the first
/// matching event or an error if the dispatcher is dropped first.
pub struct WaitForFuture<E> {
    rx: Receiver<E>,
}

impl<E> Future for WaitForFuture<E> {
    type Output = Result<E, Canceled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::{Dispatcher, GlobalEvent, SubscriptionId, WaitForFuture};
    use static_assertions::{assert_impl_all, assert_obj_safe};
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    assert_impl_all!(Dispatcher<u8, u32>: Clone, Send, Sync);
    assert_impl_all!(SubscriptionId: Clone, Copy, Send, Sync);
    assert_impl_all!(WaitForFuture<u32>: Send);
    assert_obj_safe!(std::error::Error);

    #[tokio::test]
    async fn dispatches_to_every_listener_under_key() {
        let dispatcher: Dispatcher<&'static str, u32> = Dispatcher::new();
        let hits = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            dispatcher.listen("ready", move |_event| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        dispatcher.dispatch("ready", 1).await;

        assert_eq!(3, hits.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unrelated_key_does_not_trigger_listener() {
        let dispatcher: Dispatcher<&'static str, u32> = Dispatcher::new();
        let hits = Arc::new(AtomicU32::new(0));
        let task_hits = Arc::clone(&hits);

        dispatcher.listen("ready", move |_| {
            let hits = Arc::clone(&task_hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });

        dispatcher.dispatch("resumed", 1).await;

        assert_eq!(0, hits.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn wait_for_resolves_on_matching_predicate() {
        let dispatcher: Dispatcher<&'static str, u32> = Dispatcher::new();
        let waiter = dispatcher.wait_for("message", |event: &u32| *event == 42);

        dispatcher.dispatch("message", 1).await;
        dispatcher.dispatch("message", 42).await;

        assert_eq!(42, waiter.await.unwrap());
    }

    #[tokio::test]
    async fn unlisten_removes_the_handler() {
        let dispatcher: Dispatcher<&'static str, u32> = Dispatcher::new();
        let hits = Arc::new(AtomicU32::new(0));
        let task_hits = Arc::clone(&hits);

        let id = dispatcher.listen("ready", move |_| {
            let hits = Arc::clone(&task_hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(dispatcher.unlisten(&"ready", id));
        dispatcher.dispatch("ready", 1).await;

        assert_eq!(0, hits.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_handler_is_re_dispatched_as_error() {
        let dispatcher: Dispatcher<&'static str, u32> = Dispatcher::new();
        let errors = Arc::new(AtomicU32::new(0));
        let task_errors = Arc::clone(&errors);

        dispatcher.listen("ready", |_event| async move {
            panic!("listener exploded");
        });
        dispatcher.on_error(move |error| {
            let errors = Arc::clone(&task_errors);
            async move {
                assert_eq!(&"ready", error.key());
                errors.fetch_add(1, Ordering::SeqCst);
            }
        });

        dispatcher.dispatch("ready", 1).await;
        tokio::task::yield_now().await;

        assert_eq!(1, errors.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn global_listener_observes_errors_and_dispatches() {
        let dispatcher: Dispatcher<&'static str, u32> = Dispatcher::new();
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let task_events = Arc::clone(&events);

        dispatcher.listen_global(move |event: GlobalEvent<&'static str, u32>| {
            let events = Arc::clone(&task_events);
            async move {
                let label = match event {
                    GlobalEvent::Dispatch(key, _) => key,
                    GlobalEvent::Error(_) => "error",
                };
                events.lock().unwrap().push(label);
            }
        });

        dispatcher.dispatch("ready", 7).await;
        dispatcher.dispatch_error(
            "ready",
            Arc::new(std::io::Error::new(std::io::ErrorKind::Other, "boom")),
        );

        tokio::task::yield_now().await;

        let seen = events.lock().unwrap();
        assert!(seen.contains(&"ready"));
        assert!(seen.contains(&"error"));
    }
}
