use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;
use toml::Value;

/// Error types for confsync operations.
///
/// Every handle, registry and codec operation reports failures through this
/// enum. Write failures carry a cloneable [`WriteFault`] so the same cause can
/// be delivered to every waiter of a coalesced write.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Operation attempted on a handle that has been closed
    #[error("cannot {operation} closed config file '{path}'")]
    Closed {
        /// Path of the closed handle
        path: PathBuf,
        /// The rejected operation ("save", "load")
        operation: &'static str,
    },

    /// I/O or encoding failure while writing the config file
    #[error("failed to write config to '{path}': {source}")]
    Write {
        /// Path being written
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: WriteFault,
    },

    /// I/O, decoding or parse failure while loading the config file
    #[error("failed to read config from '{path}': {details}")]
    Read {
        /// Path being read
        path: PathBuf,
        /// Read error details
        details: String,
    },

    /// Failure registering a file with the watch registry
    #[error("file watcher error for '{path}': {details}")]
    Watch {
        /// Path being watched when the error occurred
        path: PathBuf,
        /// File watcher error details
        details: String,
    },

    /// The watch registry could not start its backend or dispatch thread
    #[error("failed to initialize file watcher: {details}")]
    WatcherInit {
        /// File watcher initialization error details
        details: String,
    },

    /// The watch registry was stopped and accepts no registrations
    #[error("watch registry has been stopped")]
    WatcherStopped,

    /// No codec is registered for the file's extension
    #[error("no suitable format for '{path}'")]
    NoFormat {
        /// Path whose extension was not recognized
        path: PathBuf,
    },

    /// Async writes were requested outside of a tokio runtime
    #[error("async writes for '{path}' need a tokio runtime: {details}")]
    NoRuntime {
        /// Path of the handle being built
        path: PathBuf,
        /// Runtime lookup error details
        details: String,
    },

    /// The specified tree path does not exist or cannot be navigated
    #[error("Invalid config path: {0}")]
    InvalidPath(String),

    /// The value type does not match the requested type
    #[error("Type mismatch at {path}: Expected {expected_type}, got {actual_value:?}")]
    TypeMismatch {
        /// The path where the type mismatch occurred
        path: String,
        /// The expected type name
        expected_type: &'static str,
        /// The actual value found
        actual_value: Value,
    },

    /// The value cannot be represented by the handle's format
    #[error("{format} cannot store {value_type} at '{path}'")]
    UnsupportedValue {
        /// Tree path of the rejected value
        path: String,
        /// Name of the format
        format: &'static str,
        /// TOML type name of the rejected value
        value_type: &'static str,
    },
}

/// Cause of a failed physical write.
///
/// Cloneable so that one failed write can be reported to every save request
/// that was coalesced into it.
#[derive(Error, Debug, Clone)]
pub enum WriteFault {
    /// The file could not be opened or written
    #[error("I/O failure: {0}")]
    Io(Arc<io::Error>),

    /// The tree could not be encoded by the codec or charset
    #[error("encoding failure: {0}")]
    Encode(String),

    /// The write task was dropped before reporting completion
    #[error("write task ended before completing")]
    Abandoned,
}

impl From<io::Error> for WriteFault {
    fn from(error: io::Error) -> Self {
        WriteFault::Io(Arc::new(error))
    }
}

/// Codec failure with the name of the format that raised it.
#[derive(Error, Debug, Clone)]
#[error("{format} codec error: {details}")]
pub struct FormatError {
    /// Name of the failing format
    pub format: &'static str,
    /// Codec error details
    pub details: String,
}

impl FormatError {
    /// Creates a codec error for the given format.
    pub fn new(format: &'static str, details: impl std::fmt::Display) -> Self {
        Self {
            format,
            details: details.to_string(),
        }
    }
}

/// Fault reported to a watch registry's fault handler.
///
/// Faults raised inside the dispatch loop never abort it.
#[derive(Error, Debug, Clone)]
pub enum WatchFault {
    /// The OS refused to watch a directory
    #[error("failed to watch directory '{dir}': {details}")]
    Subscribe {
        /// Directory that could not be watched
        dir: PathBuf,
        /// Error details
        details: String,
    },

    /// The notification backend reported an error
    #[error("file notification backend error: {details}")]
    Backend {
        /// Error details
        details: String,
    },

    /// A change handler returned an error
    #[error("change handler for '{path}' failed: {details}")]
    Handler {
        /// Path whose handler failed
        path: PathBuf,
        /// Error details
        details: String,
    },

    /// A change handler panicked
    #[error("change handler for '{path}' panicked: {details}")]
    HandlerPanic {
        /// Path whose handler panicked
        path: PathBuf,
        /// Panic payload, when it was a string
        details: String,
    },
}

/// A specialized `Result` type for confsync operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    /// Creates a read error with path context.
    pub fn read(error: impl std::fmt::Display, path: impl Into<PathBuf>) -> Self {
        ConfigError::Read {
            path: path.into(),
            details: error.to_string(),
        }
    }

    /// Creates a watch registration error with path context.
    pub fn watch(error: impl std::fmt::Display, path: impl Into<PathBuf>) -> Self {
        ConfigError::Watch {
            path: path.into(),
            details: error.to_string(),
        }
    }
}
