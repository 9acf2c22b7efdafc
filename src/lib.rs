//! confsync - File-backed configuration trees with coalesced writes.
//!
//! confsync keeps an in-memory configuration tree in step with a file on disk:
//!
//! - Saves never overlap; requests made during a write collapse into one
//!   follow-up write of the latest state
//! - Loads are skipped while the same handle is writing
//! - Closing waits for in-flight writes to finish
//! - A shared watch registry reloads files changed by other processes
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use confsync::file_config::{ConfigFile, FileConfig};
//!
//! # fn main() -> confsync::Result<()> {
//! let config = FileConfig::builder("settings.toml")?.build()?;
//! config.load()?;
//!
//! config.set("general.theme", "dark".into())?;
//! config.save()?.wait_blocking()?;
//!
//! config.close();
//! # Ok(())
//! # }
//! ```

/// Core error types and result aliases.
pub mod core;

/// Shared in-memory configuration trees.
pub mod tree;

/// Document codecs and charsets.
pub mod format;

/// File-backed handles, the write scheduler and the load gate.
pub mod file_config;

/// Per-file change notification.
pub mod watch;

/// Logging setup.
pub mod tracing_config;

/// Re-exported core types for convenience.
pub use core::{ConfigError, Result};
