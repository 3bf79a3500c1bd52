use std::fs;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};
use inwatch::{Event, EventMask, WatchError, WatchMask, Watcher};

fn collect_until<F>(watcher: &Watcher, timeout: Duration, mut done: F) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match watcher.events().recv_timeout(remaining) {
            Ok(event) => {
                let finished = done(&event);
                events.push(event);
                if finished {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    events
}

/// Checks that `wanted` appears in `events` in order, allowing unrelated
/// events in between.
fn contains_in_order(events: &[Event], wanted: &[(EventMask, Option<&str>)]) -> bool {
    let mut wanted = wanted.iter().peekable();
    for event in events {
        if let Some((mask, name)) = wanted.peek() {
            let name_matches = event.name.as_deref().and_then(|n| n.to_str()) == *name;
            if event.mask.contains(*mask) && name_matches {
                wanted.next();
            }
        }
    }
    wanted.peek().is_none()
}

#[test]
fn test_inotify_events() {
    let watcher = Watcher::new().expect("Failed to create watcher");
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path().to_path_buf();

    watcher.watch(&dir).expect("Failed to watch temp dir");

    let test_file = dir.join("TestInotifyEvents.testfile");

    // CREATE and OPEN
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(&test_file)
        .expect("Failed to create test file");
    // CLOSE_WRITE
    drop(file);
    // DELETE
    fs::remove_file(&test_file).expect("Failed to remove test file");
    // DELETE_SELF and IGNORED
    fs::remove_dir(&dir).expect("Failed to remove test dir");

    // Everything is expected almost immediately.
    let events = collect_until(&watcher, Duration::from_millis(100), |e| e.is_ignored());

    let name = Some("TestInotifyEvents.testfile");
    let expected = [
        (EventMask::CREATE, name),
        (EventMask::OPEN, name),
        (EventMask::CLOSE_WRITE, name),
        (EventMask::DELETE, name),
        (EventMask::DELETE_SELF, None),
        (EventMask::IGNORED, None),
    ];
    assert!(
        contains_in_order(&events, &expected),
        "unexpected event sequence: {:?}",
        events.iter().map(ToString::to_string).collect::<Vec<_>>()
    );
    // Six on current kernels; extra events depend on kernel version.
    assert!(events.len() >= 6);
    assert!(watcher.errors().try_recv().is_err());

    // The IGNORED record already dropped the entry.
    assert_eq!(watcher.watch_count(), 0);

    watcher.close();
    let started = Instant::now();
    while watcher.events().recv_timeout(Duration::from_secs(1)).is_ok() {}
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(watcher.watch_count(), 0);
}

#[test]
fn test_inotify_close() {
    let watcher = std::sync::Arc::new(Watcher::new().expect("Failed to create watcher"));
    watcher.close();

    let w = std::sync::Arc::clone(&watcher);
    let started = Instant::now();
    thread::spawn(move || w.close()).join().unwrap();
    assert!(started.elapsed() < Duration::from_millis(50));

    let result = watcher.watch(std::env::temp_dir());
    assert!(matches!(result, Err(WatchError::Closed)));
}

#[test]
fn test_close_with_live_watches() {
    let watcher = Watcher::new().expect("Failed to create watcher");
    let dirs: Vec<_> = (0..5)
        .map(|_| tempfile::tempdir().expect("Failed to create temp dir"))
        .collect();
    for dir in &dirs {
        watcher.watch(dir.path()).unwrap();
    }
    assert_eq!(watcher.watch_count(), 5);

    let started = Instant::now();
    watcher.close();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(watcher.watch_count(), 0);
    assert!(watcher.watched_paths().is_empty());
    assert!(watcher.events().iter().count() <= 5);
    assert!(watcher.errors().iter().next().is_none());
}

#[test]
fn test_rename_pairs_share_cookie() {
    let watcher = Watcher::new().expect("Failed to create watcher");
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let from = dir.path().join("before.txt");
    let to = dir.path().join("after.txt");
    fs::write(&from, "x").unwrap();

    watcher.add_watch(dir.path(), WatchMask::MOVE).unwrap();
    fs::rename(&from, &to).unwrap();

    let events = collect_until(&watcher, Duration::from_secs(1), |e| {
        e.mask.contains(EventMask::MOVED_TO)
    });

    let moved_from = events
        .iter()
        .find(|e| e.mask.contains(EventMask::MOVED_FROM))
        .expect("missing MOVED_FROM");
    let moved_to = events
        .iter()
        .find(|e| e.mask.contains(EventMask::MOVED_TO))
        .expect("missing MOVED_TO");

    assert_eq!(moved_from.full_path(), from);
    assert_eq!(moved_to.full_path(), to);
    assert_ne!(moved_from.cookie, 0);
    assert_eq!(moved_from.cookie, moved_to.cookie);
}

#[test]
fn test_watch_single_file() {
    let watcher = Watcher::new().expect("Failed to create watcher");
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("watched.log");
    fs::write(&path, "start\n").unwrap();

    watcher.add_watch(&path, WatchMask::MODIFY).unwrap();

    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "more").unwrap();

    let event = watcher
        .events()
        .recv_timeout(Duration::from_secs(1))
        .expect("no event for modified file");
    assert!(event.is_modify());
    assert_eq!(event.path, path);
    assert!(event.name.is_none());
}

#[test]
fn test_remove_watch_twice() {
    let watcher = Watcher::new().expect("Failed to create watcher");
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    watcher.watch(dir.path()).unwrap();
    assert!(watcher.remove_watch(dir.path()).is_ok());
    assert!(matches!(
        watcher.remove_watch(dir.path()),
        Err(WatchError::NotWatched(_))
    ));

    // The IGNORED record for the removed watch is not delivered.
    assert!(watcher.events().recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_watch_missing_path() {
    let watcher = Watcher::new().expect("Failed to create watcher");

    let err = watcher.watch("/definitely/not/here").unwrap_err();
    assert!(matches!(err, WatchError::Watch { .. }));

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    assert!(watcher.watch(dir.path()).is_ok());
}
