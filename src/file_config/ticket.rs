use std::{path::PathBuf, time::Duration};

use tokio::sync::oneshot;

use crate::core::{ConfigError, Result, WriteFault};

/// Outcome of one physical write, as delivered to waiting tickets.
pub(crate) type WriteOutcome = std::result::Result<(), WriteFault>;

/// Completion handle returned by `save()`.
///
/// Sync handles return tickets that are already complete, since the write
/// happened before `save()` returned. Async handles return pending tickets
/// that resolve when the physical write persisting the saved state finishes;
/// when several saves are coalesced, all of their tickets resolve with the
/// outcome of the same write.
///
/// Dropping a ticket does not cancel anything.
#[derive(Debug)]
#[must_use = "dropping a ticket discards the write outcome"]
pub struct WriteTicket {
    path: PathBuf,
    state: TicketState,
}

#[derive(Debug)]
enum TicketState {
    Done,
    Pending(oneshot::Receiver<WriteOutcome>),
}

impl WriteTicket {
    pub(crate) fn completed(path: PathBuf) -> Self {
        Self {
            path,
            state: TicketState::Done,
        }
    }

    pub(crate) fn pending(path: PathBuf, receiver: oneshot::Receiver<WriteOutcome>) -> Self {
        Self {
            path,
            state: TicketState::Pending(receiver),
        }
    }

    /// Returns true if the write has not reported completion yet.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, TicketState::Pending(_))
    }

    /// Waits for the write covering this save.
    ///
    /// # Errors
    /// Returns `ConfigError::Write` if the physical write failed.
    pub async fn wait(self) -> Result<()> {
        match self.state {
            TicketState::Done => Ok(()),
            TicketState::Pending(receiver) => Self::resolve(self.path, receiver.await.ok()),
        }
    }

    /// Blocks the current thread until the write covering this save finishes.
    ///
    /// # Errors
    /// Returns `ConfigError::Write` if the physical write failed.
    ///
    /// # Panics
    /// Panics if called from within an asynchronous execution context; use
    /// [`WriteTicket::wait`] there.
    pub fn wait_blocking(self) -> Result<()> {
        match self.state {
            TicketState::Done => Ok(()),
            TicketState::Pending(receiver) => Self::resolve(self.path, receiver.blocking_recv().ok()),
        }
    }

    fn resolve(path: PathBuf, outcome: Option<WriteOutcome>) -> Result<()> {
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(source)) => Err(ConfigError::Write { path, source }),
            None => Err(ConfigError::Write {
                path,
                source: WriteFault::Abandoned,
            }),
        }
    }
}

/// How long `close` may wait for an in-flight write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseWait {
    /// Wait until the write completes or the close is interrupted
    #[default]
    Indefinitely,
    /// Give up after the given duration
    Timeout(Duration),
}

/// Result of closing a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The handle is closed and no write is in flight
    Drained,
    /// The handle was already closed; nothing was done
    AlreadyClosed,
    /// The wait timed out; the in-flight write still completes in the background
    TimedOut,
    /// The wait was interrupted; the in-flight write still completes in the background
    Interrupted,
}

impl CloseOutcome {
    /// Returns true if the file content is final when `close` returns.
    pub fn is_drained(self) -> bool {
        matches!(self, CloseOutcome::Drained | CloseOutcome::AlreadyClosed)
    }
}

/// Result of a load that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The file was read and applied to the tree
    Loaded,
    /// A write was in flight for this handle, so the file was not read
    Skipped,
    /// The file does not exist and the tree was left untouched
    NotFound,
}
