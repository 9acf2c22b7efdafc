//! File-backed configuration handles.
//!
//! A [`FileConfig`] binds one [`ConfigTree`](crate::tree::ConfigTree) to one
//! file and one format. Saves go through a write scheduler that keeps at most
//! one physical write in flight and coalesces requests made meanwhile; loads
//! go through a gate that skips reading while this handle is writing; closing
//! drains the scheduler before disabling the handle.
//!
//! Autoreload, autosave and value checking are layered on top as decorators
//! implementing the same [`ConfigFile`] trait.

mod builder;
mod decorators;
mod handle;
mod load_gate;
mod scheduler;
mod sink;
mod ticket;

#[cfg(test)]
mod tests;

use std::{fs, io, path::Path, sync::Arc};

pub use builder::FileConfigBuilder;
pub use decorators::{AutoreloadFileConfig, AutosaveFileConfig, CheckedFileConfig};
pub use handle::{ConfigFile, FileConfig};
pub use scheduler::SchedulerState;
pub use sink::{ByteSink, DiskSink};
pub use ticket::{CloseOutcome, CloseWait, LoadOutcome, WriteTicket};

/// Where new content goes when the config is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritingMode {
    /// Truncates the file and writes from the start
    #[default]
    Replace,
    /// Writes after the existing content
    Append,
}

/// What a load does when the file does not exist.
#[derive(Debug, Clone, Default)]
pub enum FileNotFoundAction {
    /// Fails the load with a read error
    ThrowError,
    /// Creates the file with the format's empty document, then parses it
    #[default]
    CreateEmpty,
    /// Leaves the tree untouched, as if the file were empty
    ReadNothing,
    /// Creates the file with the given bytes, then parses it
    CopyData(Arc<[u8]>),
}

impl FileNotFoundAction {
    /// Uses the content of another file as the default document.
    ///
    /// The source is read immediately, not when the missing file is found.
    ///
    /// # Errors
    /// Returns the I/O error if `source` cannot be read.
    pub fn copy_from_file(source: impl AsRef<Path>) -> io::Result<Self> {
        let data = fs::read(source)?;
        Ok(Self::CopyData(data.into()))
    }
}
