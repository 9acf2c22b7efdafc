use std::{
    mem,
    path::{Path, PathBuf},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use tokio::{runtime::Handle, sync::oneshot};
use tracing::{debug, trace};

use crate::core::{ConfigError, Result, WriteFault};

use super::{
    ByteSink, WritingMode,
    ticket::{CloseOutcome, CloseWait, WriteOutcome, WriteTicket},
};

/// Encodes the current tree into the bytes of one physical write.
pub(crate) type Producer = Arc<dyn Fn() -> std::result::Result<Vec<u8>, WriteFault> + Send + Sync>;

/// Receives async write failures in addition to the tickets of that write.
pub(crate) type WriteErrorHandler = Arc<dyn Fn(&Path, &WriteFault) + Send + Sync>;

/// Observable state of a handle's write scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No write outstanding
    Idle,
    /// Exactly one physical write in flight
    Writing,
    /// A write is in flight and another save was requested meanwhile
    WritingDirty,
    /// Closed, with no write left in flight
    Closed,
}

/// How physical writes are performed.
#[derive(Clone)]
pub(crate) enum Strategy {
    /// The saving thread writes and blocks until done
    Sync,
    /// Writes run on the runtime's blocking pool
    Async(Handle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Writing,
    WritingDirty,
}

type Waiter = oneshot::Sender<WriteOutcome>;

#[derive(Default)]
struct SchedulerInner {
    phase: Phase,
    closed: bool,
    closing: bool,
    close_interrupted: bool,
    /// Tickets resolved by the write currently in flight
    in_flight: Vec<Waiter>,
    /// Tickets resolved by the coalesced follow-up write
    next: Vec<Waiter>,
}

struct SchedulerShared {
    path: PathBuf,
    mode: WritingMode,
    strategy: Strategy,
    sink: Arc<dyn ByteSink>,
    producer: Producer,
    on_error: WriteErrorHandler,
    state: Mutex<SchedulerInner>,
    settled: Condvar,
    physical_writes: AtomicU64,
}

/// Per-handle write state machine.
///
/// Guarantees that at most one physical write is in flight and that saves
/// requested during a write collapse into a single follow-up write of the
/// tree as it is when that follow-up starts.
#[derive(Clone)]
pub(crate) struct WriteScheduler {
    shared: Arc<SchedulerShared>,
}

impl WriteScheduler {
    pub(crate) fn new(
        path: PathBuf,
        mode: WritingMode,
        strategy: Strategy,
        sink: Arc<dyn ByteSink>,
        producer: Producer,
        on_error: WriteErrorHandler,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                path,
                mode,
                strategy,
                sink,
                producer,
                on_error,
                state: Mutex::new(SchedulerInner::default()),
                settled: Condvar::new(),
                physical_writes: AtomicU64::new(0),
            }),
        }
    }

    /// Requests that the current tree be persisted.
    ///
    /// # Errors
    /// * `ConfigError::Closed` - If the handle was closed
    /// * `ConfigError::Write` - If a sync write failed
    pub(crate) fn request_save(&self) -> Result<WriteTicket> {
        match &self.shared.strategy {
            Strategy::Sync => self.save_sync(),
            Strategy::Async(runtime) => self.save_async(runtime),
        }
    }

    fn save_sync(&self) -> Result<WriteTicket> {
        let shared = &self.shared;

        {
            let mut inner = shared.lock();
            loop {
                if inner.closed {
                    return Err(shared.closed_error("save"));
                }
                if inner.phase == Phase::Idle {
                    break;
                }
                inner = shared
                    .settled
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            inner.phase = Phase::Writing;
        }

        let result = shared.write_now();

        shared.lock().phase = Phase::Idle;
        shared.settled.notify_all();

        match result {
            Ok(()) => Ok(WriteTicket::completed(shared.path.clone())),
            Err(source) => Err(ConfigError::Write {
                path: shared.path.clone(),
                source,
            }),
        }
    }

    fn save_async(&self, runtime: &Handle) -> Result<WriteTicket> {
        let shared = &self.shared;
        let (sender, receiver) = oneshot::channel();

        let start_now = {
            let mut inner = shared.lock();
            if inner.closed {
                return Err(shared.closed_error("save"));
            }

            match inner.phase {
                Phase::Idle => {
                    inner.phase = Phase::Writing;
                    inner.in_flight.push(sender);
                    true
                }
                Phase::Writing | Phase::WritingDirty => {
                    inner.phase = Phase::WritingDirty;
                    inner.next.push(sender);
                    trace!(path = %shared.path.display(), "Save coalesced into follow-up write");
                    false
                }
            }
        };

        if start_now {
            SchedulerShared::start_async_write(shared, runtime);
        }

        Ok(WriteTicket::pending(shared.path.clone(), receiver))
    }

    /// Marks the handle closed and waits for the in-flight write to settle.
    ///
    /// Only the first call closes; later calls return immediately. An
    /// abandoned wait leaves the write running in the background.
    pub(crate) fn drain_and_close(&self, wait: CloseWait) -> CloseOutcome {
        let shared = &self.shared;
        let mut inner = shared.lock();

        if inner.closed {
            return CloseOutcome::AlreadyClosed;
        }
        inner.closed = true;
        inner.closing = true;
        inner.close_interrupted = false;

        let deadline = match wait {
            CloseWait::Indefinitely => None,
            // A timeout past the representable range waits indefinitely.
            CloseWait::Timeout(timeout) => Instant::now().checked_add(timeout),
        };

        let outcome = loop {
            if inner.phase == Phase::Idle {
                break CloseOutcome::Drained;
            }
            if inner.close_interrupted {
                break CloseOutcome::Interrupted;
            }

            match deadline {
                None => {
                    inner = shared
                        .settled
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break CloseOutcome::TimedOut;
                    }
                    inner = shared
                        .settled
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };

        inner.closing = false;
        debug!(path = %shared.path.display(), ?outcome, "Config file closed");
        outcome
    }

    /// Wakes a `drain_and_close` blocked on an in-flight write.
    ///
    /// Returns true if a close was waiting.
    pub(crate) fn interrupt_close(&self) -> bool {
        let mut inner = self.shared.lock();
        if !inner.closing {
            return false;
        }

        inner.close_interrupted = true;
        drop(inner);
        self.shared.settled.notify_all();
        true
    }

    pub(crate) fn state(&self) -> SchedulerState {
        let inner = self.shared.lock();
        match (inner.phase, inner.closed) {
            (Phase::Writing, _) => SchedulerState::Writing,
            (Phase::WritingDirty, _) => SchedulerState::WritingDirty,
            (Phase::Idle, true) => SchedulerState::Closed,
            (Phase::Idle, false) => SchedulerState::Idle,
        }
    }

    pub(crate) fn is_writing(&self) -> bool {
        self.shared.lock().phase != Phase::Idle
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub(crate) fn is_async(&self) -> bool {
        matches!(self.shared.strategy, Strategy::Async(_))
    }

    pub(crate) fn physical_writes(&self) -> u64 {
        self.shared.physical_writes.load(Ordering::Acquire)
    }
}

impl SchedulerShared {
    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self, operation: &'static str) -> ConfigError {
        ConfigError::Closed {
            path: self.path.clone(),
            operation,
        }
    }

    /// Encodes the current tree and writes it on the calling thread.
    fn write_now(&self) -> std::result::Result<(), WriteFault> {
        let bytes = (self.producer)()?;
        self.sink.write_all(&self.path, self.mode, &bytes)?;
        self.physical_writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Encodes the current tree and hands the write to the blocking pool.
    fn start_async_write(shared: &Arc<Self>, runtime: &Handle) {
        let bytes = match (shared.producer)() {
            Ok(bytes) => bytes,
            Err(fault) => {
                Self::complete(shared, Err(fault), runtime);
                return;
            }
        };

        trace!(path = %shared.path.display(), len = bytes.len(), "Starting async write");

        let mut write = PendingWrite {
            shared: Arc::clone(shared),
            runtime: runtime.clone(),
            completed: false,
        };

        runtime.spawn_blocking(move || {
            let result = write
                .shared
                .sink
                .write_all(&write.shared.path, write.shared.mode, &bytes)
                .map_err(WriteFault::from);

            if result.is_ok() {
                write.shared.physical_writes.fetch_add(1, Ordering::AcqRel);
            }
            write.finish(result);
        });
    }

    /// Completion path of an async write.
    ///
    /// Resolves the tickets of the finished write, then either starts the
    /// coalesced follow-up write or returns to idle and wakes waiters.
    fn complete(shared: &Arc<Self>, result: WriteOutcome, runtime: &Handle) {
        if let Err(fault) = &result {
            (shared.on_error)(&shared.path, fault);
        }

        let (waiters, write_again) = {
            let mut inner = shared.lock();
            let waiters = mem::take(&mut inner.in_flight);

            if inner.phase == Phase::WritingDirty {
                inner.phase = Phase::Writing;
                inner.in_flight = mem::take(&mut inner.next);
                (waiters, true)
            } else {
                inner.phase = Phase::Idle;
                (waiters, false)
            }
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        if write_again {
            debug!(path = %shared.path.display(), "Writing again with latest state");
            Self::start_async_write(shared, runtime);
        } else {
            shared.settled.notify_all();
        }
    }
}

/// An async write handed to the blocking pool.
///
/// If the task is dropped without running, for example because the runtime
/// shut down, the write is completed as abandoned so the scheduler never
/// stays stuck in a writing phase.
struct PendingWrite {
    shared: Arc<SchedulerShared>,
    runtime: Handle,
    completed: bool,
}

impl PendingWrite {
    fn finish(&mut self, result: WriteOutcome) {
        self.completed = true;
        SchedulerShared::complete(&self.shared, result, &self.runtime);
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.completed {
            self.finish(Err(WriteFault::Abandoned));
        }
    }
}
