//! Filesystem change notifications for Linux, delivered as typed event and
//! error streams on top of inotify.

pub mod cli;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod source;
pub mod table;
pub mod watcher;

pub use config::WatcherConfig;
pub use decode::{Decoder, RawRecord};
pub use error::{DecodeError, Result, WatchError};
pub use events::*;
pub use source::{EventSource, InotifySource};
pub use table::WatchTable;
pub use watcher::Watcher;
