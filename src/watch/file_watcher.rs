use std::{
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    time::Duration,
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};

/// Represents a file system event for a file inside a watched directory.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FileEvent {
    /// The path of the file that changed
    pub(crate) path: PathBuf,
    /// The type of change that occurred
    pub(crate) kind: FileEventKind,
}

/// The type of file system change that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileEventKind {
    /// File was modified
    Modified,
    /// File was created
    Created,
    /// File was removed
    Removed,
}

/// One poll of the change feed.
#[derive(Debug)]
pub(crate) enum FeedPoll {
    /// Changes reported by the backend
    Events(Vec<FileEvent>),
    /// The backend reported an error
    Fault(String),
    /// Nothing arrived within the timeout
    Timeout,
    /// The backend is gone; no more events will arrive
    Closed,
}

/// Directory-level OS watches.
///
/// Wraps the platform's recommended `notify` watcher. Directories are
/// watched non-recursively; every event for a file inside them is forwarded
/// to the paired [`ChangeFeed`].
pub(crate) struct DirectoryWatcher {
    watcher: RecommendedWatcher,
}

/// Receiving side of a [`DirectoryWatcher`].
///
/// A lazy, non-restartable sequence of change events: once the watcher is
/// dropped the feed reports [`FeedPoll::Closed`] forever.
pub(crate) struct ChangeFeed {
    receiver: Receiver<notify::Result<Event>>,
}

/// Creates a directory watcher and the feed it reports to.
///
/// # Errors
/// Returns error if the underlying file system watcher cannot be initialized.
pub(crate) fn change_feed() -> notify::Result<(DirectoryWatcher, ChangeFeed)> {
    let (sender, receiver) = mpsc::channel();

    let watcher = recommended_watcher(move |res: notify::Result<Event>| {
        let _ = sender.send(res);
    })?;

    Ok((DirectoryWatcher { watcher }, ChangeFeed { receiver }))
}

impl DirectoryWatcher {
    /// Starts watching the files directly inside `dir`.
    ///
    /// # Errors
    /// Returns error if the OS refuses to watch the directory.
    pub(crate) fn watch_dir(&mut self, dir: &Path) -> notify::Result<()> {
        self.watcher.watch(dir, RecursiveMode::NonRecursive)
    }

    /// Stops watching `dir`.
    ///
    /// # Errors
    /// Returns error if the directory was not watched or the OS call fails.
    pub(crate) fn unwatch_dir(&mut self, dir: &Path) -> notify::Result<()> {
        self.watcher.unwatch(dir)
    }
}

impl ChangeFeed {
    /// Waits up to `timeout` for the next batch of changes.
    pub(crate) fn poll(&self, timeout: Duration) -> FeedPoll {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(event)) => FeedPoll::Events(convert(event)),
            Ok(Err(error)) => FeedPoll::Fault(error.to_string()),
            Err(RecvTimeoutError::Timeout) => FeedPoll::Timeout,
            Err(RecvTimeoutError::Disconnected) => FeedPoll::Closed,
        }
    }
}

/// Maps a backend event to file events, dropping access and other kinds.
fn convert(event: Event) -> Vec<FileEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FileEventKind::Created,
        EventKind::Modify(_) => FileEventKind::Modified,
        EventKind::Remove(_) => FileEventKind::Removed,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| FileEvent { path, kind })
        .collect()
}
