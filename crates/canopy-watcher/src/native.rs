//! Native watch handle
//!
//! A [`NativeWatcher`] wraps exactly one OS-level watch and moves through
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. Starts and stops
//! are idempotent; concurrent callers share one in-flight future. A handle is
//! never restarted after it stops; a replacement is always a new instance.
//!
//! Signals:
//! - `did-change`: raw event batches, in arrival order
//! - `did-error`: OS errors, including the terminal root-vanished error
//! - `should-detach`: a replacement handle now covers this one's consumers
//! - `will-stop(split)`: emitted exactly once, synchronously from whichever
//!   call began the stop and before the OS watch is released
//! - `did-stop`

use crate::backend::{NativeBackend, RawBatch, RawEventSink, WatchToken};
use crate::emitter::{Emitter, Subscription};
use canopy_core::{ChangeEvent, NativeOptions, NormalizedPath, Result, WatchError};
use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a native handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

type StartFuture = Shared<BoxFuture<'static, Result<()>>>;
type StopFuture = Shared<BoxFuture<'static, ()>>;

enum Lifecycle {
    Stopped,
    Starting(StartFuture),
    Running(WatchToken),
    Stopping(StopFuture),
}

enum StopStep {
    AwaitStart(StartFuture),
    Join(StopFuture),
    Done,
}

/// Payload of the should-detach signal
#[derive(Clone)]
pub struct Detach {
    pub replacement: Arc<NativeWatcher>,
    /// Root of the replacement handle
    pub root: NormalizedPath,
    pub options: NativeOptions,
}

impl fmt::Debug for Detach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detach")
            .field("replacement", &self.replacement.id())
            .field("root", &self.root)
            .field("options", &self.options)
            .finish()
    }
}

/// One OS-level watch subscription
pub struct NativeWatcher {
    id: HandleId,
    path: NormalizedPath,
    options: NativeOptions,
    backend: Arc<dyn NativeBackend>,
    lifecycle: Mutex<Lifecycle>,
    /// Set once the handle will never serve a new consumer
    retired: AtomicBool,
    /// Set once will-stop has been emitted
    stop_signaled: AtomicBool,

    did_change: Emitter<[ChangeEvent]>,
    did_error: Emitter<WatchError>,
    should_detach: Emitter<Detach>,
    will_stop: Emitter<bool>,
    did_stop: Emitter<()>,
}

impl NativeWatcher {
    pub fn new(path: NormalizedPath, options: NativeOptions, backend: Arc<dyn NativeBackend>) -> Arc<Self> {
        let handle = Arc::new(Self {
            id: HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)),
            path,
            options,
            backend,
            lifecycle: Mutex::new(Lifecycle::Stopped),
            retired: AtomicBool::new(false),
            stop_signaled: AtomicBool::new(false),
            did_change: Emitter::new(),
            did_error: Emitter::new(),
            should_detach: Emitter::new(),
            will_stop: Emitter::new(),
            did_stop: Emitter::new(),
        });
        debug!("Created {}", handle);
        handle
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    pub fn options(&self) -> NativeOptions {
        self.options
    }

    pub fn state(&self) -> HandleState {
        match &*self.lifecycle.lock() {
            Lifecycle::Stopped => HandleState::Stopped,
            Lifecycle::Starting(_) => HandleState::Starting,
            Lifecycle::Running(_) => HandleState::Running,
            Lifecycle::Stopping(_) => HandleState::Stopping,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == HandleState::Running
    }

    /// True once the handle has stopped, begun stopping or been released by its
    /// last consumer
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Number of path watchers currently attached
    pub fn attached_count(&self) -> usize {
        self.should_detach.listener_count()
    }

    /// Open the OS watch.
    ///
    /// Resolves immediately when already running, stopping or retired.
    /// Concurrent callers share a single attempt.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let start = {
            let mut lifecycle = self.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Running(_) | Lifecycle::Stopping(_) => return Ok(()),
                Lifecycle::Starting(start) => start.clone(),
                Lifecycle::Stopped => {
                    if self.is_retired() {
                        return Ok(());
                    }
                    debug!("Starting {}", self.id);
                    let start = Arc::clone(self).open().boxed().shared();
                    *lifecycle = Lifecycle::Starting(start.clone());
                    start
                }
            }
        };
        start.await
    }

    async fn open(self: Arc<Self>) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = RawEventSink::new(tx);
        let backend = Arc::clone(&self.backend);
        let path = self.path.path().to_path_buf();
        let options = self.options;

        let created = match tokio::task::spawn_blocking(move || backend.create_watch(&path, options, sink)).await {
            Ok(result) => result,
            Err(e) => Err(WatchError::native(self.path.path(), e)),
        };

        match created {
            Ok(token) => {
                *self.lifecycle.lock() = Lifecycle::Running(token);
                debug!("{} assigned {}", self, token);
                tokio::spawn(pump(Arc::downgrade(&self), rx));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to start {}: {}", self, e);
                {
                    let mut lifecycle = self.lifecycle.lock();
                    *lifecycle = Lifecycle::Stopped;
                    self.retired.store(true, Ordering::SeqCst);
                }
                self.did_error.emit(&e);
                self.signal_stop(false);
                self.did_stop.emit(&());
                self.clear_listeners();
                Err(e)
            }
        }
    }

    /// Release the OS watch.
    ///
    /// `split` tells will-stop listeners whether per-child replacement handles
    /// may be created for paths this handle had adopted. Waits for an
    /// in-flight start first. Stopping a handle that never started still
    /// retires it and emits will-stop.
    pub async fn stop(self: &Arc<Self>, split: bool) {
        loop {
            match self.begin_stop(split) {
                StopStep::AwaitStart(start) => {
                    let _ = start.await;
                }
                StopStep::Join(stop) => return stop.await,
                StopStep::Done => return,
            }
        }
    }

    /// Retire the handle and emit will-stop before returning.
    ///
    /// The registry evicts the handle from its will-stop listener, so once
    /// this returns no new consumer can be handed this handle. The returned
    /// step is what is left to wait for.
    fn begin_stop(self: &Arc<Self>, split: bool) -> StopStep {
        let mut release = None;
        let step = {
            let mut lifecycle = self.lifecycle.lock();
            self.retired.store(true, Ordering::SeqCst);
            match &*lifecycle {
                Lifecycle::Starting(start) => StopStep::AwaitStart(start.clone()),
                Lifecycle::Stopping(stop) => return StopStep::Join(stop.clone()),
                Lifecycle::Running(token) => {
                    let token = *token;
                    let (signaled_tx, signaled) = oneshot::channel();
                    let stop = Arc::clone(self).close(token, signaled).boxed().shared();
                    *lifecycle = Lifecycle::Stopping(stop.clone());
                    release = Some(signaled_tx);
                    StopStep::Join(stop)
                }
                Lifecycle::Stopped => StopStep::Done,
            }
        };

        let first = self.signal_stop(split);
        if let Some(signaled_tx) = release {
            let _ = signaled_tx.send(());
        }
        if first && matches!(step, StopStep::Done) {
            debug!("Retired {} before it started", self);
            self.did_stop.emit(&());
            self.clear_listeners();
        }
        step
    }

    /// Emit will-stop unless it was already emitted. Returns true if it was emitted now.
    fn signal_stop(&self, split: bool) -> bool {
        if self.stop_signaled.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("Stopping {} with split {}", self, split);
        self.will_stop.emit(&split);
        true
    }

    async fn close(self: Arc<Self>, token: WatchToken, signaled: oneshot::Receiver<()>) {
        // Released only after will-stop listeners have run
        let _ = signaled.await;

        let backend = Arc::clone(&self.backend);
        match tokio::task::spawn_blocking(move || backend.destroy_watch(token)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to release {}: {}", token, e),
            Err(e) => warn!("Failed to release {}: {}", token, e),
        }

        *self.lifecycle.lock() = Lifecycle::Stopped;
        debug!("{} has been stopped", self);
        self.did_stop.emit(&());
        self.clear_listeners();
    }

    fn clear_listeners(&self) {
        self.did_change.clear();
        self.did_error.clear();
        self.should_detach.clear();
        self.will_stop.clear();
        self.did_stop.clear();
    }

    /// Start in the background if a runtime is available
    pub(crate) fn spawn_start(self: &Arc<Self>) {
        if self.is_retired() {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let handle = Arc::clone(self);
            runtime.spawn(async move {
                let _ = handle.start().await;
            });
        }
    }

    /// Begin stopping now and finish in the background.
    ///
    /// Will-stop has been emitted by the time this returns.
    pub(crate) fn spawn_stop(self: &Arc<Self>, split: bool) {
        if let StopStep::Done = self.begin_stop(split) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = Arc::clone(self);
                runtime.spawn(async move { handle.stop(split).await });
            }
            Err(_) => warn!("No runtime available to release {}", self),
        }
    }

    /// Retire the handle if no consumer is attached to it or listening on it.
    ///
    /// Checked under the lifecycle lock, so a consumer either registers first
    /// and keeps the handle alive or sees it retired and moves on.
    pub(crate) fn try_retire(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        if self.is_retired() || self.did_change.listener_count() > 0 || self.should_detach.listener_count() > 0 {
            return false;
        }
        self.retired.store(true, Ordering::SeqCst);
        true
    }

    /// Stop with split once the last consumer has gone. Returns true if this
    /// call retired the handle.
    pub(crate) fn release_if_unused(self: &Arc<Self>) -> bool {
        if !self.try_retire() {
            return false;
        }
        debug!("Releasing unused {}", self);
        self.spawn_stop(true);
        true
    }

    /// Subscribe to raw events. Starts the handle lazily.
    ///
    /// Releasing the last change subscription stops the handle (with split)
    /// unless a path watcher is still attached.
    pub fn on_did_change(self: &Arc<Self>, listener: impl Fn(&[ChangeEvent]) + Send + Sync + 'static) -> Subscription {
        let sub = {
            let _lifecycle = self.lifecycle.lock();
            self.did_change.on(listener)
        };
        self.spawn_start();

        let weak = Arc::downgrade(self);
        Subscription::new(move || {
            sub.dispose();
            if let Some(handle) = weak.upgrade() {
                handle.release_if_unused();
            }
        })
    }

    /// Register a path watcher's control listeners in one step.
    ///
    /// Returns `None` once the handle is retired; the caller must find
    /// another handle.
    pub(crate) fn attach_consumer(
        &self,
        on_error: impl Fn(&WatchError) + Send + Sync + 'static,
        on_detach: impl Fn(&Detach) + Send + Sync + 'static,
        on_will_stop: impl Fn(bool) + Send + Sync + 'static,
    ) -> Option<Vec<Subscription>> {
        let _lifecycle = self.lifecycle.lock();
        if self.is_retired() {
            return None;
        }
        Some(vec![
            self.did_error.on(on_error),
            self.should_detach.on(on_detach),
            self.will_stop.on(move |split| on_will_stop(*split)),
        ])
    }

    pub fn on_did_error(&self, listener: impl Fn(&WatchError) + Send + Sync + 'static) -> Subscription {
        self.did_error.on(listener)
    }

    /// Listener receives the `split` flag
    pub fn on_will_stop(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.will_stop.on(move |split| listener(*split))
    }

    pub fn on_did_stop(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.did_stop.on(move |_| listener())
    }

    /// Ask attached path watchers to move to `replacement`
    pub fn reattach_to(&self, replacement: &Arc<NativeWatcher>, root: &NormalizedPath, options: NativeOptions) {
        debug!("{} asking consumers to move to {}", self, replacement);
        self.should_detach.emit(&Detach {
            replacement: Arc::clone(replacement),
            root: root.clone(),
            options,
        });
    }

    fn deliver(&self, events: &[ChangeEvent]) {
        trace!("{} delivering {} events", self.id, events.len());
        self.did_change.emit(events);
    }
}

/// Drain one handle's raw queue onto its listeners
async fn pump(handle: Weak<NativeWatcher>, mut rx: mpsc::UnboundedReceiver<RawBatch>) {
    while let Some(batch) = rx.recv().await {
        let Some(handle) = handle.upgrade() else {
            break;
        };

        match batch {
            Ok(events) if events.is_empty() => {}
            Ok(events) => handle.deliver(&events),
            Err(error) => {
                warn!("{} reported: {}", handle, error);
                handle.did_error.emit(&error);
                if error.is_terminal() {
                    handle.stop(false).await;
                    break;
                }
            }
        }
    }
}

impl Drop for NativeWatcher {
    fn drop(&mut self) {
        if let Lifecycle::Running(token) = &*self.lifecycle.get_mut() {
            debug!("Releasing {} of dropped handle {}", token, self.id);
            if let Err(e) = self.backend.destroy_watch(*token) {
                warn!("Failed to release {}: {}", token, e);
            }
        }
    }
}

impl fmt::Display for NativeWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.options.recursive { "recursive" } else { "non-recursive" };
        write!(f, "[NativeWatcher {} {} {}]", self.id, self.path, mode)
    }
}

impl fmt::Debug for NativeWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeWatcher")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}
