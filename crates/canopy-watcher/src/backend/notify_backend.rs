//! OS watch backend built on `notify`
//!
//! Each watch token owns one `notify` watcher (inotify, FSEvents,
//! ReadDirectoryChangesW, or the polling fallback) and one translator
//! thread. Dropping the watcher disconnects the translator's channel, which
//! ends the thread.

use super::translate::Translator;
use super::{BackendStatus, NativeBackend, RawEventSink, WatchToken};
use canopy_core::{BackendKind, NativeOptions, Result, WatchError, WatcherConfig};
use notify::{PollWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tracing::{debug, info, warn};

struct ActiveWatch {
    path: PathBuf,
    watcher: Box<dyn Watcher + Send>,
}

/// [`NativeBackend`] over `notify`
pub struct NotifyBackend {
    config: RwLock<WatcherConfig>,
    next_token: AtomicU64,
    watches: Mutex<HashMap<WatchToken, ActiveWatch>>,
}

impl NotifyBackend {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config: RwLock::new(config),
            next_token: AtomicU64::new(1),
            watches: Mutex::new(HashMap::new()),
        }
    }

    fn open_watcher(
        &self,
        config: &WatcherConfig,
        tx: crossbeam_channel::Sender<notify::Result<notify::Event>>,
    ) -> notify::Result<Box<dyn Watcher + Send>> {
        let handler = move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        };

        match config.backend {
            BackendKind::Native => Ok(Box::new(notify::recommended_watcher(handler)?)),
            BackendKind::Poll => {
                let notify_config = notify::Config::default().with_poll_interval(config.poll_interval());
                Ok(Box::new(PollWatcher::new(handler, notify_config)?))
            }
        }
    }
}

impl Default for NotifyBackend {
    fn default() -> Self {
        Self::new(WatcherConfig::default())
    }
}

impl NativeBackend for NotifyBackend {
    fn create_watch(&self, path: &Path, options: NativeOptions, sink: RawEventSink) -> Result<WatchToken> {
        let meta = std::fs::metadata(path).map_err(|e| WatchError::native(path, e))?;
        if !meta.is_dir() {
            return Err(WatchError::native(path, "not a directory"));
        }

        let config = self.config.read().clone();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut watcher = self
            .open_watcher(&config, tx)
            .map_err(|e| WatchError::native(path, e))?;

        let mode = if options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(path, mode).map_err(|e| WatchError::native(path, e))?;

        let token = WatchToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let translator = Translator::new(path.to_path_buf(), config.rename_window());
        thread::Builder::new()
            .name(format!("canopy-watch-{}", token.0))
            .spawn(move || translator.run(rx, sink))
            .map_err(|e| WatchError::native(path, e))?;

        debug!(
            "Created {:?} watch on {} ({:?}, {})",
            config.backend,
            path.display(),
            mode,
            token
        );

        self.watches.lock().insert(
            token,
            ActiveWatch {
                path: path.to_path_buf(),
                watcher,
            },
        );
        Ok(token)
    }

    fn destroy_watch(&self, token: WatchToken) -> Result<()> {
        let Some(mut active) = self.watches.lock().remove(&token) else {
            debug!("Ignoring unknown {}", token);
            return Ok(());
        };

        // The root may already be gone, in which case the OS dropped the watch itself
        if let Err(e) = active.watcher.unwatch(&active.path) {
            warn!("Failed to unwatch {}: {}", active.path.display(), e);
        }
        debug!("Destroyed watch on {} ({})", active.path.display(), token);
        Ok(())
    }

    fn describe(&self) -> BackendStatus {
        let config = self.config.read();
        BackendStatus {
            kind: config.backend,
            active_watches: self.watches.lock().len(),
            poll_interval_ms: match config.backend {
                BackendKind::Poll => Some(config.poll_interval_ms),
                BackendKind::Native => None,
            },
        }
    }

    fn configure(&self, config: &WatcherConfig) {
        info!(
            "Native backend now {:?} (poll {}ms, rename window {}ms)",
            config.backend, config.poll_interval_ms, config.rename_window_ms
        );
        *self.config.write() = config.clone();
    }
}
