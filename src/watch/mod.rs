//! File change notification.
//!
//! A [`WatchRegistry`] maps individual file paths to change handlers. It holds
//! one OS-level watch per directory and dispatches events from a single
//! background thread.

mod file_watcher;
mod registry;


pub use registry::{ChangeHandler, FaultHandler, HandlerError, WatchOptions, WatchRegistry};
