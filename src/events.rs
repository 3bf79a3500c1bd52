use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Interest mask passed to the kernel when adding a watch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WatchMask: u32 {
        const ACCESS        = 0x0000_0001;
        const MODIFY        = 0x0000_0002;
        const ATTRIB        = 0x0000_0004;
        const CLOSE_WRITE   = 0x0000_0008;
        const CLOSE_NOWRITE = 0x0000_0010;
        const OPEN          = 0x0000_0020;
        const MOVED_FROM    = 0x0000_0040;
        const MOVED_TO      = 0x0000_0080;
        const CREATE        = 0x0000_0100;
        const DELETE        = 0x0000_0200;
        const DELETE_SELF   = 0x0000_0400;
        const MOVE_SELF     = 0x0000_0800;

        const CLOSE         = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
        const MOVE          = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
        const ALL_EVENTS    = 0x0000_0fff;

        /// Only watch the path if it is a directory.
        const ONLYDIR       = 0x0100_0000;
        /// Don't dereference the path if it is a symbolic link.
        const DONT_FOLLOW   = 0x0200_0000;
        /// Ignore events for children unlinked from a watched directory.
        const EXCL_UNLINK   = 0x0400_0000;
        /// Merge with the existing mask instead of replacing it.
        const MASK_ADD      = 0x2000_0000;
        /// Remove the watch after the first event.
        const ONESHOT       = 0x8000_0000;
    }
}

bitflags! {
    /// Mask bits carried by a kernel notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EventMask: u32 {
        const ACCESS        = 0x0000_0001;
        const MODIFY        = 0x0000_0002;
        const ATTRIB        = 0x0000_0004;
        const CLOSE_WRITE   = 0x0000_0008;
        const CLOSE_NOWRITE = 0x0000_0010;
        const OPEN          = 0x0000_0020;
        const MOVED_FROM    = 0x0000_0040;
        const MOVED_TO      = 0x0000_0080;
        const CREATE        = 0x0000_0100;
        const DELETE        = 0x0000_0200;
        const DELETE_SELF   = 0x0000_0400;
        const MOVE_SELF     = 0x0000_0800;
        /// Filesystem holding the watched object was unmounted.
        const UNMOUNT       = 0x0000_2000;
        /// Kernel queue overflowed; events were lost.
        const Q_OVERFLOW    = 0x0000_4000;
        /// The kernel discarded the watch.
        const IGNORED       = 0x0000_8000;
        /// Subject of the event is a directory.
        const ISDIR         = 0x4000_0000;
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "0x{:x}", self.bits());
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            write!(f, "|0x{:x}", unknown)?;
        }
        Ok(())
    }
}

/// Kernel-assigned identifier of a single watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchHandle(pub i32);

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd{}", self.0)
    }
}

/// A change notification resolved against the watch table.
#[derive(Debug, Clone)]
pub struct Event {
    /// The watched path the notification was raised for.
    pub path: PathBuf,
    pub mask: EventMask,
    /// Pairs the `MOVED_FROM` and `MOVED_TO` halves of a rename.
    pub cookie: u32,
    /// Entry name inside a watched directory, absent when the event is
    /// about the watched object itself.
    pub name: Option<OsString>,
    pub timestamp: SystemTime,
}

impl Event {
    pub fn new(path: PathBuf, mask: EventMask) -> Self {
        Self {
            path,
            mask,
            cookie: 0,
            name: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_name(mut self, name: OsString) -> Self {
        self.name = Some(name);
        self
    }

    /// The watched path joined with the entry name, if any.
    pub fn full_path(&self) -> PathBuf {
        match &self.name {
            Some(name) => self.path.join(name),
            None => self.path.clone(),
        }
    }

    pub fn watched_path(&self) -> &Path {
        &self.path
    }

    pub fn is_create(&self) -> bool {
        self.mask.contains(EventMask::CREATE)
    }

    pub fn is_modify(&self) -> bool {
        self.mask.contains(EventMask::MODIFY)
    }

    pub fn is_delete(&self) -> bool {
        self.mask.contains(EventMask::DELETE)
    }

    pub fn is_delete_self(&self) -> bool {
        self.mask.contains(EventMask::DELETE_SELF)
    }

    pub fn is_rename(&self) -> bool {
        self.mask.intersects(EventMask::MOVED_FROM | EventMask::MOVED_TO)
    }

    pub fn is_ignored(&self) -> bool {
        self.mask.contains(EventMask::IGNORED)
    }

    pub fn is_dir(&self) -> bool {
        self.mask.contains(EventMask::ISDIR)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.full_path(), self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_path_joins_name() {
        let event = Event::new(PathBuf::from("/tmp/dir"), EventMask::CREATE)
            .with_name(OsString::from("file.txt"));

        assert_eq!(event.full_path(), PathBuf::from("/tmp/dir/file.txt"));
        assert_eq!(event.watched_path(), Path::new("/tmp/dir"));
    }

    #[test]
    fn test_full_path_without_name() {
        let event = Event::new(PathBuf::from("/tmp/dir"), EventMask::DELETE_SELF);
        assert_eq!(event.full_path(), PathBuf::from("/tmp/dir"));
        assert!(event.is_delete_self());
        assert!(!event.is_delete());
    }

    #[test]
    fn test_mask_display() {
        let mask = EventMask::CREATE | EventMask::ISDIR;
        assert_eq!(mask.to_string(), "CREATE|ISDIR");
        assert_eq!(EventMask::empty().to_string(), "0x0");
        assert_eq!(EventMask::from_bits_retain(0x1_0000 | 0x2).to_string(), "MODIFY|0x10000");
    }

    #[test]
    fn test_event_display() {
        let event = Event::new(PathBuf::from("/w"), EventMask::MOVED_FROM)
            .with_name(OsString::from("a"))
            .with_cookie(7);

        assert_eq!(event.to_string(), "\"/w/a\": MOVED_FROM");
        assert!(event.is_rename());
        assert_eq!(event.cookie, 7);
    }

    #[test]
    fn test_watch_mask_composites() {
        assert!(WatchMask::ALL_EVENTS.contains(WatchMask::CLOSE | WatchMask::MOVE));
        assert!(!WatchMask::ALL_EVENTS.contains(WatchMask::MASK_ADD));
        assert_eq!(WatchMask::ALL_EVENTS.bits(), EventMask::from_bits_retain(0xfff).bits());
    }
}
