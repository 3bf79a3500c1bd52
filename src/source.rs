//! The kernel notification facility, behind a trait so the watcher can be
//! driven by a substitute source in tests.

use std::io;
use std::path::Path;
use crate::events::{WatchHandle, WatchMask};

/// A source of raw notification bytes plus per-path watch registration.
pub trait EventSource: Send + Sync + 'static {
    fn add_watch(&self, path: &Path, mask: WatchMask) -> io::Result<WatchHandle>;

    fn remove_watch(&self, handle: WatchHandle) -> io::Result<()>;

    /// Blocks until bytes are available. `Ok(0)` means the source is
    /// exhausted. Fails once [`close`](EventSource::close) has been called.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Wakes any blocked `read` and makes further reads fail. Idempotent.
    fn close(&self);
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "event source closed")
}

pub use self::inotify::InotifySource;

mod inotify {
    use std::ffi::CString;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use libc::c_void;
    use super::{closed_error, EventSource};
    use crate::events::{WatchHandle, WatchMask};

    /// Linux inotify instance paired with an eventfd used to interrupt reads.
    #[derive(Debug)]
    pub struct InotifySource {
        fd: OwnedFd,
        wake: OwnedFd,
        closed: AtomicBool,
    }

    impl InotifySource {
        pub fn open() -> io::Result<Self> {
            // SAFETY: plain syscalls; each descriptor is owned immediately
            // after a successful return.
            let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };

            let wake = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
            if wake == -1 {
                return Err(io::Error::last_os_error());
            }
            let wake = unsafe { OwnedFd::from_raw_fd(wake) };

            tracing::debug!("opened inotify fd {}", fd.as_raw_fd());
            Ok(Self {
                fd,
                wake,
                closed: AtomicBool::new(false),
            })
        }

        /// Waits until the inotify fd is readable. Returns `false` if the
        /// wake handle fired instead.
        fn wait_readable(&self) -> io::Result<bool> {
            let mut fds = [
                libc::pollfd {
                    fd: self.fd.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.wake.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];

            loop {
                let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
                if n == -1 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }
                if fds[1].revents != 0 || self.closed.load(Ordering::SeqCst) {
                    return Ok(false);
                }
                if fds[0].revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "inotify descriptor reported an error",
                    ));
                }
                if fds[0].revents != 0 {
                    return Ok(true);
                }
            }
        }
    }

    impl EventSource for InotifySource {
        fn add_watch(&self, path: &Path, mask: WatchMask) -> io::Result<WatchHandle> {
            let c_path = CString::new(path.as_os_str().as_bytes())?;
            let wd = unsafe {
                libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), mask.bits())
            };
            match wd {
                -1 => Err(io::Error::last_os_error()),
                _ => Ok(WatchHandle(wd)),
            }
        }

        fn remove_watch(&self, handle: WatchHandle) -> io::Result<()> {
            let result = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), handle.0) };
            match result {
                0 => Ok(()),
                _ => Err(io::Error::last_os_error()),
            }
        }

        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                if self.closed.load(Ordering::SeqCst) || !self.wait_readable()? {
                    return Err(closed_error());
                }

                let n = unsafe {
                    libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len())
                };
                if n >= 0 {
                    return Ok(n as usize);
                }

                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => continue,
                    _ => return Err(err),
                }
            }
        }

        fn close(&self) {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            let one: u64 = 1;
            let written = unsafe {
                libc::write(
                    self.wake.as_raw_fd(),
                    &one as *const u64 as *const c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if written == -1 {
                tracing::warn!("failed to signal inotify reader: {}", io::Error::last_os_error());
            }
        }
    }

}
