//! Error types for watcher operations and the notification stream.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`Watcher`](crate::Watcher) calls or delivered on its
/// error stream.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watcher is closed")]
    Closed,

    #[error("path is not watched: {}", .0.display())]
    NotWatched(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to open event source: {0}")]
    Init(#[source] io::Error),

    #[error("cannot watch {}: {source}", path.display())]
    Watch { path: PathBuf, source: io::Error },

    #[error("cannot remove watch for {}: {source}", path.display())]
    Unwatch { path: PathBuf, source: io::Error },

    #[error("failed to read events: {0}")]
    Read(#[source] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("event queue overflowed, events were lost")]
    QueueOverflow,
}

/// Malformed bytes in the kernel notification stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record name length {len} exceeds limit of {max} bytes")]
    NameTooLong { len: u32, max: usize },
}

pub type Result<T, E = WatchError> = std::result::Result<T, E>;
