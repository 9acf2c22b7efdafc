use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
};

use super::WritingMode;

/// Destination of a handle's physical writes.
///
/// The scheduler calls `write_all` once per physical write, from the saving
/// thread (sync strategy) or from a tokio blocking-pool thread (async
/// strategy). Implementations must write all bytes or fail.
pub trait ByteSink: Send + Sync {
    /// Writes `bytes` to `path` according to `mode`.
    ///
    /// # Errors
    /// Returns the I/O error that interrupted the write.
    fn write_all(&self, path: &Path, mode: WritingMode, bytes: &[u8]) -> io::Result<()>;
}

/// Writes straight to the filesystem, creating the file if needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSink;

impl ByteSink for DiskSink {
    fn write_all(&self, path: &Path, mode: WritingMode, bytes: &[u8]) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.create(true);

        match mode {
            WritingMode::Replace => options.write(true).truncate(true),
            WritingMode::Append => options.append(true),
        };

        let mut file = options.open(path)?;
        file.write_all(bytes)?;
        file.flush()
    }
}
