//! Per-consumer path watcher
//!
//! A [`PathWatcher`] is one consumer subscription. It resolves the requested
//! path once, attaches to whichever native handle the registry says covers
//! it, and turns that handle's raw events into events scoped to its own root.
//! Many path watchers may share one handle, each with a different root and
//! recursion scope.
//!
//! When the registry replaces or splits a handle, the path watcher follows
//! the should-detach signal to the replacement without the consumer
//! noticing. When its handle stops for good, its change streams end.

use crate::emitter::Subscription;
use crate::native::{Detach, HandleId, NativeWatcher};
use crate::registry::NativeWatcherRegistry;
use canopy_core::{
    ActionKind, CaseSensitivity, ChangeEvent, EntryKind, NativeOptions, NormalizedPath, Result, WatchError,
    WatchOptions,
};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, warn};

/// Attach attempts before giving up on a handle that keeps stopping underneath us
const MAX_ATTACH_ATTEMPTS: usize = 8;

/// Errors reported by the native handle this watcher is attached to
pub type ErrorStream = mpsc::UnboundedReceiver<WatchError>;

/// Consumer handle for one watched root. Cheap to clone.
#[derive(Clone)]
pub struct PathWatcher {
    inner: Arc<Inner>,
}

struct Inner {
    requested: PathBuf,
    options: WatchOptions,
    case: CaseSensitivity,
    registry: Arc<NativeWatcherRegistry>,
    resolved: OnceCell<Arc<Resolved>>,
    /// Serializes attach attempts
    attach_lock: tokio::sync::Mutex<()>,
    state: Mutex<State>,
    disposed: Arc<AtomicBool>,
}

/// Outcome of path resolution
struct Resolved {
    /// Directory the native handle must cover
    root: NormalizedPath,
    native: NativeOptions,
    filter: Arc<EventFilter>,
}

#[derive(Default)]
struct State {
    attached: Option<Attached>,
    subscribers: BTreeMap<u64, Subscriber>,
    next_subscriber: u64,
    error_listeners: Vec<mpsc::UnboundedSender<WatchError>>,
}

struct Attached {
    handle: Arc<NativeWatcher>,
    /// did-error, should-detach and will-stop listeners on `handle`
    controls: Vec<Subscription>,
}

struct Subscriber {
    tx: mpsc::UnboundedSender<Vec<ChangeEvent>>,
    /// Raw event subscription on the attached handle
    native: Option<Subscription>,
}

impl PathWatcher {
    pub(crate) fn new(
        requested: impl Into<PathBuf>,
        options: WatchOptions,
        registry: Arc<NativeWatcherRegistry>,
        case: CaseSensitivity,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                requested: requested.into(),
                options,
                case,
                registry,
                resolved: OnceCell::new(),
                attach_lock: tokio::sync::Mutex::new(()),
                state: Mutex::new(State::default()),
                disposed: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// The path as the consumer asked for it
    pub fn requested_path(&self) -> &Path {
        &self.inner.requested
    }

    pub fn options(&self) -> &WatchOptions {
        &self.inner.options
    }

    /// The directory the native handle watches for this consumer.
    ///
    /// Resolved once. For a single file this is its parent directory.
    pub async fn normalized_path(&self) -> Result<NormalizedPath> {
        Ok(self.inner.resolve().await?.root.clone())
    }

    /// Start receiving events.
    ///
    /// Attaches to a native handle if needed and returns once that handle is
    /// running. Dropping the stream unsubscribes it; the native handle stops
    /// once nobody listens to it anymore.
    pub async fn subscribe(&self) -> Result<ChangeStream> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(inner.disposed_error());
        }
        let resolved = inner.resolve().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = inner.state.lock();
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.insert(id, Subscriber { tx, native: None });
            id
        };
        let stream = ChangeStream {
            rx,
            disposed: Arc::clone(&inner.disposed),
            _guard: SubscriberGuard {
                inner: Arc::downgrade(inner),
                id,
            },
        };

        inner.ensure_attached(&resolved, id).await?;
        Ok(stream)
    }

    /// Receive errors from the attached native handle
    pub fn on_did_error(&self) -> ErrorStream {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.inner.is_disposed() {
            self.inner.state.lock().error_listeners.push(tx);
        }
        rx
    }

    /// The native handle currently serving this watcher
    pub fn attached_handle(&self) -> Option<Arc<NativeWatcher>> {
        self.inner.current_handle()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Stop delivering events to every stream of this watcher.
    ///
    /// No event is delivered once this returns, and if nothing else uses the
    /// native handle it has already been retired and evicted from the
    /// registry. The returned future resolves once the OS watch is released;
    /// dropping it lets the release finish in the background. Calling this
    /// again does nothing.
    pub fn dispose(&self) -> impl Future<Output = ()> + Send + 'static {
        let released = self.inner.dispose();
        async move {
            if let Some(handle) = released {
                handle.stop(true).await;
            }
        }
    }
}

impl Inner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn disposed_error(&self) -> WatchError {
        WatchError::Disposed {
            path: self.requested.clone(),
        }
    }

    async fn resolve(&self) -> Result<Arc<Resolved>> {
        let resolved = self
            .resolved
            .get_or_try_init(|| async {
                let requested = if self.requested.is_absolute() {
                    self.requested.clone()
                } else {
                    let cwd = std::env::current_dir().map_err(|e| WatchError::resolution(&self.requested, &e))?;
                    cwd.join(&self.requested)
                };

                let real = tokio::fs::canonicalize(&requested)
                    .await
                    .map_err(|e| WatchError::resolution(&requested, &e))?;
                let meta = tokio::fs::metadata(&real)
                    .await
                    .map_err(|e| WatchError::resolution(&requested, &e))?;

                let resolved = if meta.is_dir() {
                    let root = NormalizedPath::new(&real, self.case);
                    Resolved {
                        native: self.options.native(),
                        filter: Arc::new(EventFilter::new(
                            root.clone(),
                            requested.clone(),
                            self.options.clone(),
                            None,
                            self.case,
                        )),
                        root,
                    }
                } else {
                    let parent = real.parent().ok_or_else(|| WatchError::PathResolution {
                        path: requested.clone(),
                        reason: "file has no parent directory".to_string(),
                    })?;
                    let (requested_parent, name) = match (requested.parent(), requested.file_name()) {
                        (Some(dir), Some(name)) => (dir.to_path_buf(), name.to_os_string()),
                        _ => (parent.to_path_buf(), real.file_name().unwrap_or_default().to_os_string()),
                    };
                    let root = NormalizedPath::new(parent, self.case);
                    let only = SingleFile {
                        target: NormalizedPath::new(&real, self.case),
                        name,
                    };
                    let options = WatchOptions {
                        recursive: false,
                        include: self.options.include.clone(),
                    };
                    Resolved {
                        native: NativeOptions::NON_RECURSIVE,
                        filter: Arc::new(EventFilter::new(root.clone(), requested_parent, options, Some(only), self.case)),
                        root,
                    }
                };

                if resolved.root.path() != requested {
                    debug!("Resolved {} to {}", requested.display(), resolved.root);
                }
                Ok::<_, WatchError>(Arc::new(resolved))
            })
            .await?;
        Ok(Arc::clone(resolved))
    }

    async fn ensure_attached(self: &Arc<Self>, resolved: &Resolved, subscriber: u64) -> Result<()> {
        for _ in 0..MAX_ATTACH_ATTEMPTS {
            let candidate = {
                let _serial = self.attach_lock.lock().await;
                if self.is_disposed() {
                    return Err(self.disposed_error());
                }
                if !self.state.lock().subscribers.contains_key(&subscriber) {
                    return Err(WatchError::native(
                        resolved.root.path(),
                        "native watcher stopped before it could start",
                    ));
                }

                match self.current_handle().filter(|handle| !handle.is_retired()) {
                    Some(handle) => Some(handle),
                    None => {
                        let weak = Arc::downgrade(self);
                        self.registry
                            .attach(&resolved.root, resolved.native, move |attachment| {
                                if let Some(inner) = weak.upgrade() {
                                    inner.attach_to_native(&attachment.handle);
                                }
                            })
                            .await?;
                        self.current_handle().filter(|handle| !handle.is_retired())
                    }
                }
            };

            // The registry handed out a handle that retired before we could attach
            let Some(handle) = candidate else {
                tokio::task::yield_now().await;
                continue;
            };

            self.bind_pending(&handle);
            match handle.start().await {
                Ok(()) if handle.is_running() && !handle.is_retired() => return Ok(()),
                Ok(()) => {
                    debug!("{} stopped while {} was attaching, retrying", handle, self);
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(WatchError::native(
            resolved.root.path(),
            "native watcher kept stopping while attaching",
        ))
    }

    fn current_handle(&self) -> Option<Arc<NativeWatcher>> {
        self.state
            .lock()
            .attached
            .as_ref()
            .map(|attached| Arc::clone(&attached.handle))
    }

    /// Bind to `handle`, moving every existing subscriber onto it
    fn attach_to_native(self: &Arc<Self>, handle: &Arc<NativeWatcher>) {
        let Some(resolved) = self.resolved.get() else {
            return;
        };

        let (previous, released) = {
            let mut state = self.state.lock();
            if self.is_disposed() || state.subscribers.is_empty() {
                drop(state);
                handle.release_if_unused();
                return;
            }
            if let Some(attached) = &state.attached {
                if attached.handle.id() == handle.id() {
                    return;
                }
            }

            let Some(controls) = self.controls(handle) else {
                debug!("{} is retired, {} stays where it is", handle, self);
                return;
            };
            let previous = state.attached.replace(Attached {
                handle: Arc::clone(handle),
                controls,
            });

            let mut released = Vec::new();
            for subscriber in state.subscribers.values_mut() {
                let sub = self.change_subscription(handle, &resolved.filter, &subscriber.tx);
                if let Some(old) = subscriber.native.replace(sub) {
                    released.push(old);
                }
            }
            (previous, released)
        };

        match &previous {
            Some(previous) => debug!("{} moved from {} to {}", self, previous.handle, handle),
            None => debug!("{} attached to {}", self, handle),
        }

        drop(released);
        if let Some(previous) = previous {
            drop(previous.controls);
            previous.handle.release_if_unused();
        }
    }

    /// Subscribe subscribers added since the last attachment
    fn bind_pending(&self, handle: &Arc<NativeWatcher>) {
        let Some(resolved) = self.resolved.get() else {
            return;
        };
        let mut state = self.state.lock();
        let attached_here = state
            .attached
            .as_ref()
            .map_or(false, |attached| attached.handle.id() == handle.id());
        if !attached_here {
            return;
        }
        for subscriber in state.subscribers.values_mut() {
            if subscriber.native.is_none() {
                subscriber.native = Some(self.change_subscription(handle, &resolved.filter, &subscriber.tx));
            }
        }
    }

    fn change_subscription(
        &self,
        handle: &Arc<NativeWatcher>,
        filter: &Arc<EventFilter>,
        tx: &mpsc::UnboundedSender<Vec<ChangeEvent>>,
    ) -> Subscription {
        let filter = Arc::clone(filter);
        let tx = tx.clone();
        let disposed = Arc::clone(&self.disposed);
        handle.on_did_change(move |events| {
            if disposed.load(Ordering::SeqCst) {
                return;
            }
            let events = filter.apply(events);
            if !events.is_empty() {
                let _ = tx.send(events);
            }
        })
    }

    /// `None` if the handle retired before we could attach
    fn controls(self: &Arc<Self>, handle: &Arc<NativeWatcher>) -> Option<Vec<Subscription>> {
        let id = handle.id();
        let on_error = Arc::downgrade(self);
        let on_detach = Arc::downgrade(self);
        let on_stop = Arc::downgrade(self);

        handle.attach_consumer(
            move |error| {
                if let Some(inner) = on_error.upgrade() {
                    inner.handle_error(error);
                }
            },
            move |detach| {
                if let Some(inner) = on_detach.upgrade() {
                    inner.handle_detach(detach);
                }
            },
            move |split| {
                if let Some(inner) = on_stop.upgrade() {
                    inner.handle_will_stop(id, split);
                }
            },
        )
    }

    fn handle_error(&self, error: &WatchError) {
        let vanished_root = match error {
            WatchError::RootVanished { path } => Some(NormalizedPath::new(path, self.case)),
            _ => None,
        };

        let mut state = self.state.lock();
        state.error_listeners.retain(|tx| tx.send(error.clone()).is_ok());

        let (Some(vanished), Some(resolved)) = (vanished_root, self.resolved.get()) else {
            return;
        };
        if let Some(deleted) = resolved.filter.vanished(&vanished) {
            debug!("{} lost its root with {}", self, vanished);
            for subscriber in state.subscribers.values() {
                let _ = subscriber.tx.send(vec![deleted.clone()]);
            }
        }
    }

    fn handle_detach(self: &Arc<Self>, detach: &Detach) {
        let Some(resolved) = self.resolved.get() else {
            return;
        };
        if self.current_handle().map(|handle| handle.id()) == Some(detach.replacement.id()) {
            return;
        }
        if !resolved.root.is_within(&detach.root) {
            return;
        }
        if !detach.options.recursive && (resolved.native.recursive || resolved.root.segments() != detach.root.segments()) {
            return;
        }
        self.attach_to_native(&detach.replacement);
    }

    /// The attached handle is stopping and nothing moved us elsewhere
    fn handle_will_stop(&self, id: HandleId, split: bool) {
        let (attached, subscribers) = {
            let mut state = self.state.lock();
            match &state.attached {
                Some(attached) if attached.handle.id() == id => {}
                _ => return,
            }
            (state.attached.take(), std::mem::take(&mut state.subscribers))
        };

        if !subscribers.is_empty() {
            warn!(
                "{} lost its native watcher (split {}); ending {} streams",
                self,
                split,
                subscribers.len()
            );
        }
        drop(subscribers);
        drop(attached);
    }

    fn remove_subscriber(&self, id: u64) {
        let (removed, detached) = {
            let mut state = self.state.lock();
            let removed = state.subscribers.remove(&id);
            let detached = if state.subscribers.is_empty() {
                state.attached.take()
            } else {
                None
            };
            (removed, detached)
        };

        drop(removed);
        if let Some(attached) = detached {
            debug!("{} has no subscribers left, detaching from {}", self, attached.handle);
            drop(attached.controls);
            attached.handle.release_if_unused();
        }
    }

    /// The handle left to wait for, if this watcher was its last user
    fn dispose(&self) -> Option<Arc<NativeWatcher>> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return None;
        }

        let (attached, subscribers, errors) = {
            let mut state = self.state.lock();
            (
                state.attached.take(),
                std::mem::take(&mut state.subscribers),
                std::mem::take(&mut state.error_listeners),
            )
        };
        debug!("Disposing {}", self);

        drop(subscribers);
        drop(errors);
        let attached = attached?;
        drop(attached.controls);
        let handle = attached.handle;
        let stopping = handle.release_if_unused() || handle.is_retired();
        stopping.then_some(handle)
    }
}

impl fmt::Display for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[PathWatcher {}]", self.requested.display())
    }
}

impl fmt::Display for PathWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl fmt::Debug for PathWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathWatcher")
            .field("requested", &self.inner.requested)
            .field("recursive", &self.inner.options.recursive)
            .field("attached", &self.attached_handle().map(|handle| handle.id()))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Filtered, rewritten event batches for one subscription
///
/// Ends when the path watcher is disposed or loses its native handle.
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<Vec<ChangeEvent>>,
    disposed: Arc<AtomicBool>,
    _guard: SubscriberGuard,
}

impl fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeStream")
            .field("subscriber", &self._guard.id)
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ChangeStream {
    pub async fn recv(&mut self) -> Option<Vec<ChangeEvent>> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        let batch = self.rx.recv().await?;
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        Some(batch)
    }

    /// A batch if one is already queued
    pub fn try_recv(&mut self) -> Option<Vec<ChangeEvent>> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

impl Stream for ChangeStream {
    type Item = Vec<ChangeEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(_)) if self.disposed.load(Ordering::SeqCst) => Poll::Ready(None),
            other => other,
        }
    }
}

struct SubscriberGuard {
    inner: Weak<Inner>,
    id: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_subscriber(self.id);
        }
    }
}

/// The one file a single-file watch reports
struct SingleFile {
    /// Real path events arrive under
    target: NormalizedPath,
    /// File name as the consumer asked for it
    name: OsString,
}

/// Scopes and rewrites one handle's raw events for one path watcher
struct EventFilter {
    root: NormalizedPath,
    /// Leading components of event paths that make up `root`
    root_components: usize,
    /// Prefix substituted for `root` in reported paths
    requested_root: PathBuf,
    options: WatchOptions,
    only: Option<SingleFile>,
    case: CaseSensitivity,
}

impl EventFilter {
    fn new(
        root: NormalizedPath,
        requested_root: PathBuf,
        options: WatchOptions,
        only: Option<SingleFile>,
        case: CaseSensitivity,
    ) -> Self {
        Self {
            root_components: root.path().components().count(),
            root,
            requested_root,
            options,
            only,
            case,
        }
    }

    fn apply(&self, events: &[ChangeEvent]) -> Vec<ChangeEvent> {
        events.iter().filter_map(|event| self.translate(event)).collect()
    }

    fn translate(&self, event: &ChangeEvent) -> Option<ChangeEvent> {
        match (event.action, event.old_path()) {
            (ActionKind::Renamed, Some(old)) => {
                let from = self.accept(old, event.kind, ActionKind::Deleted);
                let to = self.accept(&event.path, event.kind, ActionKind::Created);
                match (from, to) {
                    (Some(old), Some(new)) => Some(ChangeEvent::renamed(event.kind, old, new)),
                    (Some(old), None) => Some(ChangeEvent::deleted(event.kind, old)),
                    (None, Some(new)) => Some(ChangeEvent::created(event.kind, new)),
                    (None, None) => None,
                }
            }
            (action, _) => self.accept(&event.path, event.kind, action).map(|path| ChangeEvent {
                action,
                kind: event.kind,
                path,
                old_path: None,
            }),
        }
    }

    /// The reported path if `path` is in scope for this watcher
    fn accept(&self, path: &Path, kind: EntryKind, action: ActionKind) -> Option<PathBuf> {
        let candidate = NormalizedPath::new(path, self.case);
        if !candidate.is_within(&self.root) {
            return None;
        }

        let reported = match &self.only {
            Some(only) if candidate.segments() != only.target.segments() => return None,
            Some(only) => self.requested_root.join(&only.name),
            None => {
                let depth = candidate.segments().len() - self.root.segments().len();
                let in_scope = match depth {
                    0 => self.options.recursive || action == ActionKind::Deleted,
                    1 => true,
                    _ => self.options.recursive,
                };
                if !in_scope {
                    return None;
                }

                let relative: PathBuf = path.components().skip(self.root_components).collect();
                if relative.as_os_str().is_empty() {
                    self.requested_root.clone()
                } else {
                    self.requested_root.join(relative)
                }
            }
        };

        self.options.includes(&reported, kind).then_some(reported)
    }

    /// The deletion to report when `vanished` disappeared beneath the handle
    fn vanished(&self, vanished: &NormalizedPath) -> Option<ChangeEvent> {
        if !self.root.is_within(vanished) {
            return None;
        }
        match &self.only {
            Some(only) => Some(ChangeEvent::deleted(EntryKind::File, self.requested_root.join(&only.name))),
            // The handle already reported its own root
            None if self.root.segments() == vanished.segments() => None,
            None => Some(ChangeEvent::deleted(EntryKind::Directory, self.requested_root.clone())),
        }
    }
}
