//! notify event translation
//!
//! Runs on one thread per OS watch. Raw `notify` events are drained in
//! batches, rename halves are paired by tracker cookie, and anything left
//! unpaired after the rename window degrades to a deleted or created event.

use super::RawEventSink;
use canopy_core::{ActionKind, ChangeEvent, EntryKind, WatchError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::EventKind;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Half of a rename still waiting for its partner
#[derive(Debug)]
struct PendingRename {
    tracker: Option<usize>,
    path: PathBuf,
    kind: EntryKind,
    expires: Instant,
}

pub(crate) struct Translator {
    root: PathBuf,
    window: Duration,
    pending: Vec<PendingRename>,
    /// Trackers already reported as a rename, so a trailing `Both` is skipped
    completed: HashSet<usize>,
    vanished: bool,
}

impl Translator {
    pub(crate) fn new(root: PathBuf, window: Duration) -> Self {
        Self {
            root,
            window,
            pending: Vec::new(),
            completed: HashSet::new(),
            vanished: false,
        }
    }

    /// Drain `rx` until every sender is gone or the root disappears
    pub(crate) fn run(mut self, rx: Receiver<notify::Result<notify::Event>>, sink: RawEventSink) {
        debug!("Translator started for {}", self.root.display());

        loop {
            let first = match self.next_deadline() {
                Some(deadline) => match rx.recv_deadline(deadline) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(message) => Some(message),
                    Err(_) => break,
                },
            };

            let mut batch = Vec::new();
            let mut errors = Vec::new();
            for message in first.into_iter().chain(rx.try_iter()) {
                match message {
                    Ok(event) => batch.extend(self.translate(event, Instant::now())),
                    Err(e) => errors.push(self.classify_error(e)),
                }
            }
            batch.extend(self.expire(Instant::now()));

            let terminal = self.check_root(&mut batch);
            if !self.flush(&sink, batch, errors, terminal) {
                break;
            }
            if self.vanished {
                break;
            }
        }

        // Anything still waiting for a partner is reported before exiting
        let leftovers = self.expire_all();
        if !leftovers.is_empty() && !self.vanished {
            sink.deliver(Ok(leftovers));
        }

        debug!("Translator for {} exiting", self.root.display());
    }

    fn flush(
        &self,
        sink: &RawEventSink,
        batch: Vec<ChangeEvent>,
        errors: Vec<WatchError>,
        terminal: Option<WatchError>,
    ) -> bool {
        if !batch.is_empty() {
            trace!("Delivering {} events for {}", batch.len(), self.root.display());
            if !sink.deliver(Ok(batch)) {
                return false;
            }
        }
        for error in errors.into_iter().chain(terminal) {
            if !sink.deliver(Err(error)) {
                return false;
            }
        }
        true
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.expires).min()
    }

    /// Translate one notify event into zero or more change events
    pub(crate) fn translate(&mut self, event: notify::Event, now: Instant) -> Vec<ChangeEvent> {
        if self.vanished {
            return Vec::new();
        }

        let tracker = event.tracker();
        let mut out = Vec::new();

        match event.kind {
            EventKind::Create(kind) => {
                for path in event.paths {
                    let kind = match kind {
                        CreateKind::File => EntryKind::File,
                        CreateKind::Folder => EntryKind::Directory,
                        _ => entry_kind(&path),
                    };
                    out.push(ChangeEvent::created(kind, path));
                }
            }
            EventKind::Remove(kind) => {
                for path in event.paths {
                    let kind = match kind {
                        RemoveKind::File => EntryKind::File,
                        RemoveKind::Folder => EntryKind::Directory,
                        _ => EntryKind::Unknown,
                    };
                    out.push(ChangeEvent::deleted(kind, path));
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.translate_rename(mode, tracker, event.paths, now, &mut out);
            }
            EventKind::Modify(_) | EventKind::Any => {
                for path in event.paths {
                    let kind = entry_kind(&path);
                    out.push(ChangeEvent::modified(kind, path));
                }
            }
            EventKind::Access(_) | EventKind::Other => {}
        }

        out
    }

    fn translate_rename(
        &mut self,
        mode: RenameMode,
        tracker: Option<usize>,
        paths: Vec<PathBuf>,
        now: Instant,
        out: &mut Vec<ChangeEvent>,
    ) {
        match mode {
            RenameMode::From => {
                for path in paths {
                    self.pending.push(PendingRename {
                        tracker,
                        path,
                        kind: EntryKind::Unknown,
                        expires: now + self.window,
                    });
                }
            }
            RenameMode::To => {
                for path in paths {
                    match self.take_partner(tracker) {
                        Some(from) => {
                            if let Some(tracker) = tracker {
                                // Backends that never send `Both` would grow this forever
                                if self.completed.len() >= 1024 {
                                    self.completed.clear();
                                }
                                self.completed.insert(tracker);
                            }
                            let kind = entry_kind(&path);
                            out.push(ChangeEvent::renamed(kind, from.path, path));
                        }
                        None => out.push(ChangeEvent::created(entry_kind(&path), path)),
                    }
                }
            }
            RenameMode::Both | RenameMode::Any | RenameMode::Other if paths.len() >= 2 => {
                if let Some(tracker) = tracker {
                    if self.completed.remove(&tracker) {
                        return;
                    }
                }
                let mut paths = paths.into_iter();
                if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                    self.pending.retain(|p| p.path != from);
                    out.push(ChangeEvent::renamed(entry_kind(&to), from, to));
                }
            }
            // One side only and no cookie: decide by whether the entry is still there
            _ => {
                for path in paths {
                    match fs::symlink_metadata(&path) {
                        Ok(_) => out.push(ChangeEvent::created(entry_kind(&path), path)),
                        Err(_) => out.push(ChangeEvent::deleted(EntryKind::Unknown, path)),
                    }
                }
            }
        }
    }

    /// Find the `From` half matching a `To` event
    fn take_partner(&mut self, tracker: Option<usize>) -> Option<PendingRename> {
        let index = match tracker {
            Some(tracker) => self.pending.iter().position(|p| p.tracker == Some(tracker)),
            // Without cookies the most recent untracked half is the best guess
            None => self.pending.iter().rposition(|p| p.tracker.is_none()),
        }?;
        Some(self.pending.remove(index))
    }

    /// Degrade rename halves whose window has passed into deletions
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut expired = Vec::new();
        self.pending.retain(|p| {
            if p.expires <= now {
                expired.push(ChangeEvent::deleted(p.kind, p.path.clone()));
                false
            } else {
                true
            }
        });
        expired
    }

    fn expire_all(&mut self) -> Vec<ChangeEvent> {
        self.pending
            .drain(..)
            .map(|p| ChangeEvent::deleted(p.kind, p.path))
            .collect()
    }

    /// Detect the watch root going away.
    ///
    /// Returns the terminal error to deliver after `batch`, and makes sure the
    /// batch ends with a deleted-directory event for the root.
    pub(crate) fn check_root(&mut self, batch: &mut Vec<ChangeEvent>) -> Option<WatchError> {
        if self.vanished {
            return None;
        }

        let touches_root = batch
            .iter()
            .any(|e| e.path == self.root || e.old_path() == Some(self.root.as_path()));
        if !touches_root || fs::symlink_metadata(&self.root).is_ok() {
            return None;
        }

        warn!("Watch root {} vanished", self.root.display());
        self.vanished = true;
        self.pending.clear();

        let root = self.root.clone();
        batch.retain(|e| !(e.path == root && e.action == ActionKind::Deleted));
        batch.push(ChangeEvent::deleted(EntryKind::Directory, root.clone()));
        Some(WatchError::RootVanished { path: root })
    }

    fn classify_error(&mut self, error: notify::Error) -> WatchError {
        if fs::symlink_metadata(&self.root).is_err() {
            return WatchError::RootVanished {
                path: self.root.clone(),
            };
        }
        WatchError::native(&self.root, error)
    }
}

/// Entry kind from the filesystem. Symlinks are reported as such, not followed.
fn entry_kind(path: &Path) -> EntryKind {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => EntryKind::Symlink,
        Ok(meta) if meta.is_dir() => EntryKind::Directory,
        Ok(meta) if meta.is_file() => EntryKind::File,
        _ => EntryKind::Unknown,
    }
}
