//! Shared vocabulary for canopy
//!
//! Paths, events, options, errors and configuration used by both the
//! consolidating watcher and the CLI.

pub mod config;
pub mod error;
pub mod event;
pub mod options;
pub mod path;

pub use config::{BackendKind, CanopyConfig, CaseMode, LogTarget, LoggingConfig, WatcherConfig};
pub use error::{Result, WatchError};
pub use event::{ActionKind, ChangeEvent, EntryKind};
pub use options::{IncludeFilter, NativeOptions, WatchOptions};
pub use path::{CaseSensitivity, NormalizedPath, Segment};
