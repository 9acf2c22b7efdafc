use std::{
    any::Any,
    collections::HashMap,
    mem,
    panic::{self, AssertUnwindSafe},
    path::{self, Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, info, trace, warn};

use crate::core::{ConfigError, Result, WatchFault};

use super::file_watcher::{ChangeFeed, DirectoryWatcher, FeedPoll, FileEvent, change_feed};

/// Error returned by a change handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked on the dispatch thread when a watched file changes.
pub type ChangeHandler = Arc<dyn Fn() -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Callback receiving faults raised inside the dispatch loop.
pub type FaultHandler = Arc<dyn Fn(&WatchFault) + Send + Sync>;

const DISPATCH_THREAD_NAME: &str = "config-watcher";

/// Timing of a registry's dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Longest single wait for OS notifications
    pub poll_interval: Duration,
    /// Pause after a poll that returned nothing
    pub idle_backoff: Duration,
    /// Quiet period that ends a burst of events
    pub debounce: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(25),
            idle_backoff: Duration::from_millis(2),
            debounce: Duration::from_millis(50),
        }
    }
}

struct WatchedFile {
    dir: PathBuf,
    handler: ChangeHandler,
}

#[derive(Default)]
struct Registrations {
    /// `None` once the registry is stopped
    watcher: Option<DirectoryWatcher>,
    /// Watched directory -> number of registered files inside it
    directories: HashMap<PathBuf, usize>,
    files: HashMap<PathBuf, WatchedFile>,
}

struct RegistryShared {
    running: AtomicBool,
    registrations: Mutex<Registrations>,
    on_fault: FaultHandler,
    options: WatchOptions,
}

/// Multiplexes OS file change notifications into per-file callbacks.
///
/// One OS-level watch is kept per directory containing registered files and
/// shared by all of them. A single background thread polls the OS, and for
/// every changed path invokes the handler registered for exactly that path.
/// Creation, modification and removal all trigger the same handler.
///
/// Handler errors and panics are reported to the fault handler and never stop
/// the dispatch loop.
pub struct WatchRegistry {
    shared: Arc<RegistryShared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WatchRegistry {
    /// Creates a registry with default timing that logs faults.
    ///
    /// # Errors
    /// Returns `ConfigError::WatcherInit` if the OS watcher or the dispatch
    /// thread cannot be started.
    pub fn new() -> Result<Self> {
        Self::with_config(WatchOptions::default(), log_fault)
    }

    /// Creates a registry with custom timing that logs faults.
    ///
    /// # Errors
    /// Returns `ConfigError::WatcherInit` if the OS watcher or the dispatch
    /// thread cannot be started.
    pub fn with_options(options: WatchOptions) -> Result<Self> {
        Self::with_config(options, log_fault)
    }

    /// Creates a registry with default timing and a custom fault handler.
    ///
    /// # Errors
    /// Returns `ConfigError::WatcherInit` if the OS watcher or the dispatch
    /// thread cannot be started.
    pub fn with_fault_handler<F>(on_fault: F) -> Result<Self>
    where
        F: Fn(&WatchFault) + Send + Sync + 'static,
    {
        Self::with_config(WatchOptions::default(), on_fault)
    }

    /// Creates a registry with custom timing and fault handler.
    ///
    /// # Errors
    /// Returns `ConfigError::WatcherInit` if the OS watcher or the dispatch
    /// thread cannot be started.
    pub fn with_config<F>(options: WatchOptions, on_fault: F) -> Result<Self>
    where
        F: Fn(&WatchFault) + Send + Sync + 'static,
    {
        let (watcher, feed) = change_feed().map_err(|e| ConfigError::WatcherInit {
            details: e.to_string(),
        })?;

        let shared = Arc::new(RegistryShared {
            running: AtomicBool::new(true),
            registrations: Mutex::new(Registrations {
                watcher: Some(watcher),
                ..Registrations::default()
            }),
            on_fault: Arc::new(on_fault),
            options,
        });

        let loop_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || dispatch_loop(&loop_shared, &feed))
            .map_err(|e| ConfigError::WatcherInit {
                details: format!("failed to spawn dispatch thread: {e}"),
            })?;

        info!("Watch registry started");

        Ok(Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Returns the process-wide registry, starting it on first use.
    ///
    /// A registry that was stopped is replaced by a fresh one.
    ///
    /// # Errors
    /// Returns `ConfigError::WatcherInit` if a new registry cannot be started.
    pub fn shared() -> Result<Arc<WatchRegistry>> {
        static SHARED: Mutex<Option<Arc<WatchRegistry>>> = Mutex::new(None);

        let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(registry) = slot.as_ref().filter(|registry| registry.is_running()) {
            return Ok(Arc::clone(registry));
        }

        let registry = Arc::new(WatchRegistry::new()?);
        *slot = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// Watches a file unless it is already watched; the first handler wins.
    ///
    /// The file does not need to exist, but its directory does. Returns false
    /// if the file was already watched and `handler` was discarded.
    ///
    /// # Errors
    /// * `ConfigError::WatcherStopped` - If the registry was stopped
    /// * `ConfigError::Watch` - If the directory cannot be watched
    pub fn add_watch<F>(&self, path: impl AsRef<Path>, handler: F) -> Result<bool>
    where
        F: Fn() -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(path.as_ref(), Arc::new(handler), false)
    }

    /// Watches a file, replacing its handler if it is already watched.
    ///
    /// Returns true if the file was not watched before.
    ///
    /// # Errors
    /// * `ConfigError::WatcherStopped` - If the registry was stopped
    /// * `ConfigError::Watch` - If the directory cannot be watched
    pub fn set_watch<F>(&self, path: impl AsRef<Path>, handler: F) -> Result<bool>
    where
        F: Fn() -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(path.as_ref(), Arc::new(handler), true)
    }

    /// Stops watching a file.
    ///
    /// The directory watch is released when its last file is removed.
    /// Returns true if the file was watched.
    pub fn remove_watch(&self, path: impl AsRef<Path>) -> bool {
        let Ok((_, file)) = resolve(path.as_ref()) else {
            return false;
        };

        let mut guard = self.shared.lock();
        let registrations = &mut *guard;

        let Some(watched) = registrations.files.remove(&file) else {
            return false;
        };

        let now_unused = match registrations.directories.get_mut(&watched.dir) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };

        if now_unused {
            registrations.directories.remove(&watched.dir);
            if let Some(watcher) = registrations.watcher.as_mut() {
                if let Err(e) = watcher.unwatch_dir(&watched.dir) {
                    debug!(dir = %watched.dir.display(), error = %e, "Failed to release directory watch");
                }
            }
            debug!(dir = %watched.dir.display(), "Released directory watch");
        }
        drop(guard);

        debug!(path = %file.display(), "Removed file watch");
        true
    }

    /// Returns true if a handler is registered for the file.
    pub fn is_watched(&self, path: impl AsRef<Path>) -> bool {
        match resolve(path.as_ref()) {
            Ok((_, file)) => self.shared.lock().files.contains_key(&file),
            Err(_) => false,
        }
    }

    /// Directories currently holding an OS-level watch.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.shared.lock().directories.keys().cloned().collect()
    }

    /// Returns true until `stop` is called.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stops the dispatch loop and releases every watch.
    ///
    /// The registry is unusable afterwards. Calling `stop` again is a no-op.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        // Handlers are dropped outside the lock.
        let released = mem::take(&mut *self.shared.lock());
        drop(released);

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = dispatcher {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Watch dispatch thread panicked");
            }
        }

        info!("Watch registry stopped");
    }

    fn register(&self, path: &Path, handler: ChangeHandler, replace: bool) -> Result<bool> {
        if !self.is_running() {
            return Err(ConfigError::WatcherStopped);
        }

        let (dir, file) = resolve(path)?;

        let subscribed = self.subscribe(&dir, &file, handler, replace);
        if let Err(ConfigError::Watch { details, .. }) = &subscribed {
            self.shared.report(&WatchFault::Subscribe {
                dir,
                details: details.clone(),
            });
        }

        subscribed
    }

    /// Records the registration, watching `dir` if it is not watched yet.
    ///
    /// Returns true if `file` was newly registered.
    fn subscribe(
        &self,
        dir: &Path,
        file: &Path,
        handler: ChangeHandler,
        replace: bool,
    ) -> Result<bool> {
        let mut guard = self.shared.lock();
        let registrations = &mut *guard;

        let Some(watcher) = registrations.watcher.as_mut() else {
            return Err(ConfigError::WatcherStopped);
        };

        if let Some(existing) = registrations.files.get_mut(file) {
            if replace {
                existing.handler = handler;
                debug!(path = %file.display(), "Replaced file watch handler");
            }
            return Ok(false);
        }

        if !registrations.directories.contains_key(dir) {
            watcher
                .watch_dir(dir)
                .map_err(|e| ConfigError::watch(e, dir))?;
            debug!(dir = %dir.display(), "Watching directory");
        }

        *registrations.directories.entry(dir.to_path_buf()).or_insert(0) += 1;
        registrations.files.insert(
            file.to_path_buf(),
            WatchedFile {
                dir: dir.to_path_buf(),
                handler,
            },
        );

        debug!(path = %file.display(), "Added file watch");
        Ok(true)
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

impl RegistryShared {
    fn lock(&self) -> MutexGuard<'_, Registrations> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn report(&self, fault: &WatchFault) {
        (self.on_fault)(fault);
    }

    /// Invokes the handler registered for exactly `path`, if any.
    fn dispatch(&self, path: &Path) {
        let handler = self
            .lock()
            .files
            .get(path)
            .map(|watched| Arc::clone(&watched.handler));

        let Some(handler) = handler else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report(&WatchFault::Handler {
                path: path.to_path_buf(),
                details: e.to_string(),
            }),
            Err(payload) => self.report(&WatchFault::HandlerPanic {
                path: path.to_path_buf(),
                details: panic_message(payload.as_ref()),
            }),
        }
    }
}

/// Body of the dispatch thread.
///
/// Polls with a bounded timeout so that `stop` is observed promptly, then
/// gathers a burst of events until the feed stays quiet for the debounce
/// period and invokes each changed file's handler once.
fn dispatch_loop(shared: &RegistryShared, feed: &ChangeFeed) {
    let options = shared.options;

    while shared.is_running() {
        let first = match feed.poll(options.poll_interval) {
            FeedPoll::Events(events) => events,
            FeedPoll::Timeout => {
                thread::sleep(options.idle_backoff);
                continue;
            }
            FeedPoll::Fault(details) => {
                shared.report(&WatchFault::Backend { details });
                continue;
            }
            FeedPoll::Closed => break,
        };

        let mut changed: Vec<PathBuf> = Vec::new();
        collect_paths(&mut changed, first);

        let deadline = burst_deadline(options.debounce);
        while deadline.is_none_or(|deadline| Instant::now() < deadline) {
            match feed.poll(options.debounce) {
                FeedPoll::Events(events) => collect_paths(&mut changed, events),
                FeedPoll::Fault(details) => shared.report(&WatchFault::Backend { details }),
                FeedPoll::Timeout | FeedPoll::Closed => break,
            }
        }

        for path in &changed {
            if !shared.is_running() {
                break;
            }
            shared.dispatch(path);
        }
    }

    debug!("Watch dispatch loop exited");
}

/// Latest moment a burst keeps collecting events; `None` means unbounded.
pub(super) fn burst_deadline(debounce: Duration) -> Option<Instant> {
    Instant::now().checked_add(debounce.saturating_mul(10))
}

fn collect_paths(changed: &mut Vec<PathBuf>, events: Vec<FileEvent>) {
    for event in events {
        trace!(path = %event.path.display(), kind = ?event.kind, "File change");
        if !changed.contains(&event.path) {
            changed.push(event.path);
        }
    }
}

/// Resolves a file path to its canonical directory and the file inside it.
///
/// Only the directory is canonicalized, so files that do not exist yet can be
/// resolved. Falls back to the absolute directory if it cannot be resolved.
fn resolve(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let absolute = path::absolute(path).map_err(|e| ConfigError::watch(e, path))?;

    let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) else {
        return Err(ConfigError::watch("path has no parent directory", &absolute));
    };

    let dir = parent
        .canonicalize()
        .unwrap_or_else(|_| parent.to_path_buf());
    let file = dir.join(name);

    Ok((dir, file))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn log_fault(fault: &WatchFault) {
    warn!(error = %fault, "File watch fault");
}
