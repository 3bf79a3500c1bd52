use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};
use crate::config::WatcherConfig;
use crate::decode::{Decoder, RawRecord};
use crate::error::{Result, WatchError};
use crate::events::{Event, EventMask, WatchMask};
use crate::source::{EventSource, InotifySource};
use crate::table::WatchTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    /// The source hit end of stream; only `close` is still meaningful.
    Exhausted,
    Closing,
    Closed,
}

/// First pause after a failed read; doubles per consecutive failure.
const READ_RETRY_BASE: Duration = Duration::from_millis(10);
const READ_RETRY_MAX: Duration = Duration::from_secs(1);

fn retry_delay(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(16);
    READ_RETRY_BASE.saturating_mul(factor).min(READ_RETRY_MAX)
}

/// Everything guarded by the watcher lock.
struct State<S> {
    phase: Phase,
    table: WatchTable,
    source: Option<Arc<S>>,
    /// Dropped on close; a blocked stream send gives up once it disconnects.
    shutdown: Option<Sender<()>>,
}

impl<S: EventSource> State<S> {
    /// Removes every live watch from the source, best effort, and empties
    /// the table.
    fn release_watches(&mut self) {
        if let Some(source) = self.source.as_ref() {
            for handle in self.table.snapshot_handles() {
                if let Err(err) = source.remove_watch(handle) {
                    debug!("ignoring failure to remove {}: {}", handle, err);
                }
            }
        }
        self.table.clear();
    }
}

type SharedState<S> = Arc<Mutex<State<S>>>;

fn lock<S>(state: &Mutex<State<S>>) -> MutexGuard<'_, State<S>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Watches explicitly registered paths and streams their change events.
///
/// A background thread reads the event source, decodes records and delivers
/// them on [`events`](Watcher::events) in kernel order. Failures inside that
/// thread arrive on [`errors`](Watcher::errors). Both streams end once
/// [`close`](Watcher::close) completes; dropping the watcher closes it.
pub struct Watcher<S: EventSource = InotifySource> {
    state: SharedState<S>,
    events: Receiver<Event>,
    errors: Receiver<WatchError>,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher<InotifySource> {
    /// Opens an inotify instance with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(WatcherConfig::default())
    }

    pub fn with_config(config: WatcherConfig) -> Result<Self> {
        let source = InotifySource::open().map_err(WatchError::Init)?;
        Self::with_source(source, config)
    }
}

impl<S: EventSource> Watcher<S> {
    /// Starts a watcher on an already opened event source.
    pub fn with_source(source: S, config: WatcherConfig) -> Result<Self> {
        config.validate().map_err(WatchError::Config)?;

        let source = Arc::new(source);
        let (event_tx, event_rx) = bounded(config.event_capacity);
        let (error_tx, error_rx) = bounded(config.error_capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let state = Arc::new(Mutex::new(State {
            phase: Phase::Open,
            table: WatchTable::new(),
            source: Some(Arc::clone(&source)),
            shutdown: Some(shutdown_tx),
        }));

        let decode_loop = DecodeLoop {
            source,
            decoder: Decoder::new(config.max_name_len),
            buffer: vec![0; config.read_buffer_size],
            dispatcher: Dispatcher {
                state: Arc::clone(&state),
                events: event_tx,
                errors: error_tx,
                shutdown: shutdown_rx,
            },
        };

        let handle = thread::Builder::new()
            .name("inwatch-decode".to_string())
            .spawn(move || decode_loop.run())
            .map_err(WatchError::Init)?;

        Ok(Self {
            state,
            events: event_rx,
            errors: error_rx,
            decode_thread: Mutex::new(Some(handle)),
        })
    }

    /// Watches `path` for every event kind.
    pub fn watch<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.add_watch(path, WatchMask::ALL_EVENTS)
    }

    /// Watches `path` for the events in `mask`.
    ///
    /// Watching a path again merges the new mask into the existing one.
    pub fn add_watch<P: AsRef<Path>>(&self, path: P, mask: WatchMask) -> Result<()> {
        let path = path.as_ref();
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        if state.phase != Phase::Open {
            return Err(WatchError::Closed);
        }
        let source = state.source.as_ref().ok_or(WatchError::Closed)?;

        let (kernel_mask, stored_mask) = match state.table.get(path) {
            Some(entry) => (mask | WatchMask::MASK_ADD, entry.mask | mask),
            None => (mask, mask),
        };

        let handle = source
            .add_watch(path, kernel_mask)
            .map_err(|source| WatchError::Watch {
                path: path.to_path_buf(),
                source,
            })?;

        let displaced = state.table.insert(
            path.to_path_buf(),
            handle,
            stored_mask.difference(WatchMask::MASK_ADD),
        );
        if let Some(other) = displaced {
            debug!("{} now owns {}, dropping {}", path.display(), handle, other.display());
        }

        debug!("watching {} as {}", path.display(), handle);
        Ok(())
    }

    /// Stops watching `path`.
    pub fn remove_watch<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        if state.phase != Phase::Open {
            return Err(WatchError::Closed);
        }
        let source = state.source.as_ref().ok_or(WatchError::Closed)?;
        let handle = state
            .table
            .get(path)
            .map(|entry| entry.handle)
            .ok_or_else(|| WatchError::NotWatched(path.to_path_buf()))?;

        let result = source.remove_watch(handle);
        state.table.remove(path);
        debug!("removed watch {} for {}", handle, path.display());

        match result {
            Ok(()) => Ok(()),
            // The kernel already discarded it; its IGNORED record is in flight.
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => Ok(()),
            Err(source) => Err(WatchError::Unwatch {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Shuts the watcher down. Idempotent; later and concurrent callers
    /// return immediately.
    ///
    /// Removes every live watch, stops the decode thread and releases the
    /// event source. Both streams end once this returns.
    pub fn close(&self) {
        let source = {
            let mut guard = lock(&self.state);
            if !matches!(guard.phase, Phase::Open | Phase::Exhausted) {
                return;
            }
            guard.phase = Phase::Closing;

            guard.release_watches();
            if let Some(source) = guard.source.as_ref() {
                source.close();
            }
            guard.shutdown.take();
            guard.source.take()
        };

        let decode_thread = self
            .decode_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = decode_thread {
            if handle.join().is_err() {
                warn!("decode loop panicked");
            }
        }
        drop(source);

        lock(&self.state).phase = Phase::Closed;
        debug!("watcher closed");
    }

    /// Stream of change events. Ends after [`close`](Watcher::close).
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Stream of failures from the decode loop. Ends after
    /// [`close`](Watcher::close).
    pub fn errors(&self) -> &Receiver<WatchError> {
        &self.errors
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).phase != Phase::Open
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        lock(&self.state).table.paths()
    }

    pub fn watch_count(&self) -> usize {
        lock(&self.state).table.len()
    }

    /// Whether the handle and path maps are exact inverses.
    pub fn is_consistent(&self) -> bool {
        lock(&self.state).table.is_consistent()
    }
}

impl<S: EventSource> Drop for Watcher<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background reader: pulls raw bytes, decodes records, hands them on.
struct DecodeLoop<S> {
    source: Arc<S>,
    decoder: Decoder,
    buffer: Vec<u8>,
    dispatcher: Dispatcher<S>,
}

impl<S: EventSource> DecodeLoop<S> {
    fn run(mut self) {
        debug!("decode loop started");

        let mut failures: u32 = 0;
        loop {
            let n = match self.source.read(&mut self.buffer) {
                Ok(0) => {
                    if self.dispatcher.mark_exhausted() {
                        warn!("event source reached end of stream");
                        self.dispatcher.error(WatchError::Read(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "event source reached end of stream",
                        )));
                    }
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    if !self.dispatcher.is_open() {
                        break;
                    }
                    failures = failures.saturating_add(1);
                    warn!("read from event source failed ({} in a row): {}", failures, err);
                    if !self.dispatcher.error(WatchError::Read(err))
                        || !self.dispatcher.pause(retry_delay(failures))
                    {
                        break;
                    }
                    continue;
                }
            };
            failures = 0;

            self.decoder.feed(&self.buffer[..n]);
            if !self.drain() {
                break;
            }
        }

        debug!("decode loop stopped");
    }

    /// Dispatches every complete record. Returns `false` once delivery has
    /// been abandoned for shutdown.
    fn drain(&mut self) -> bool {
        while let Some(item) = self.decoder.next_record() {
            let delivered = match item {
                Ok(record) => self.dispatcher.dispatch(record),
                Err(err) => {
                    warn!("discarding undecodable bytes: {}", err);
                    self.dispatcher.error(err.into())
                }
            };
            if !delivered {
                return false;
            }
        }
        true
    }
}

/// Resolves records against the watch table and delivers events.
struct Dispatcher<S> {
    state: SharedState<S>,
    events: Sender<Event>,
    errors: Sender<WatchError>,
    shutdown: Receiver<()>,
}

impl<S: EventSource> Dispatcher<S> {
    fn is_open(&self) -> bool {
        lock(&self.state).phase == Phase::Open
    }

    /// Moves an open watcher to `Exhausted` and drops its watches. Returns
    /// `false` if shutdown had already begun.
    fn mark_exhausted(&self) -> bool {
        let mut state = lock(&self.state);
        if state.phase != Phase::Open {
            return false;
        }
        state.phase = Phase::Exhausted;
        state.release_watches();
        true
    }

    /// Waits out `delay` unless shutdown begins first.
    fn pause(&self, delay: Duration) -> bool {
        matches!(
            self.shutdown.recv_timeout(delay),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn dispatch(&self, record: RawRecord) -> bool {
        if record.mask.contains(EventMask::Q_OVERFLOW) {
            warn!("kernel event queue overflowed");
            return self.error(WatchError::QueueOverflow);
        }

        let event = {
            let mut state = lock(&self.state);
            let path = match state.table.resolve(record.handle) {
                Some(path) => path.to_path_buf(),
                None => {
                    trace!("dropping {} record for unknown {}", record.mask, record.handle);
                    return true;
                }
            };

            let mut event = Event::new(path, record.mask).with_cookie(record.cookie);
            event.name = record.name;

            if record.mask.contains(EventMask::IGNORED) {
                state.table.remove_by_handle(record.handle);
                debug!("kernel discarded {} for {}", record.handle, event.path.display());
            }
            event
        };

        trace!("{}", event);
        self.deliver(&self.events, event)
    }

    fn error(&self, err: WatchError) -> bool {
        self.deliver(&self.errors, err)
    }

    /// Blocks until the consumer takes `value` or shutdown begins.
    fn deliver<T>(&self, tx: &Sender<T>, value: T) -> bool {
        select! {
            send(tx, value) -> res => res.is_ok(),
            recv(self.shutdown) -> _ => false,
        }
    }
}
