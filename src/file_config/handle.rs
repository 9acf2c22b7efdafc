use std::{fmt, path::Path, sync::Arc};

use serde::de::DeserializeOwned;
use toml::Value;
use tracing::instrument;

use crate::{
    core::Result,
    format::{Charset, ConfigFormat},
    tree::{ConfigTree, ParsingMode},
};

use super::{
    CloseOutcome, CloseWait, FileConfigBuilder, LoadOutcome, SchedulerState, WriteTicket,
    load_gate::LoadGate, scheduler::WriteScheduler,
};

/// Save/load/close surface shared by handles and their decorators.
///
/// Decorators hold the handle they wrap and forward to it, adding behavior
/// before or after forwarding.
pub trait ConfigFile: Send + Sync {
    /// Absolute path of the backing file.
    fn path(&self) -> &Path;

    /// The shared in-memory tree.
    fn tree(&self) -> &ConfigTree;

    /// Format used to encode and parse the file.
    fn format(&self) -> &dyn ConfigFormat;

    /// Persists the current tree.
    ///
    /// # Errors
    /// * `ConfigError::Closed` - If the handle was closed
    /// * `ConfigError::Write` - If a sync write failed
    fn save(&self) -> Result<WriteTicket>;

    /// Reloads the tree from the file.
    ///
    /// # Errors
    /// * `ConfigError::Closed` - If the handle was closed
    /// * `ConfigError::Read` - If the file cannot be read or parsed
    fn load(&self) -> Result<LoadOutcome>;

    /// Drains pending writes and closes the handle, bounded by `wait`.
    fn close_with(&self, wait: CloseWait) -> CloseOutcome;

    /// Drains pending writes and closes the handle.
    fn close(&self) -> CloseOutcome {
        self.close_with(CloseWait::Indefinitely)
    }

    /// Retrieves the value at a dot path.
    ///
    /// # Errors
    /// * `ConfigError::InvalidPath` - If the path doesn't exist
    fn get(&self, path: &str) -> Result<Value> {
        self.tree().get(path)
    }

    /// Retrieves the value at a dot path and deserializes it.
    ///
    /// # Errors
    /// * `ConfigError::InvalidPath` - If the path doesn't exist
    /// * `ConfigError::TypeMismatch` - If the value cannot be deserialized into `T`
    fn get_as<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
        Self: Sized,
    {
        self.tree().get_as(path)
    }

    /// Sets the value at a dot path and returns the previous one.
    ///
    /// # Errors
    /// * `ConfigError::InvalidPath` - If the path is malformed
    fn set(&self, path: &str, value: Value) -> Result<Option<Value>> {
        self.tree().set(path, value)
    }

    /// Removes the value at a dot path and returns it.
    ///
    /// # Errors
    /// * `ConfigError::InvalidPath` - If the path is malformed
    fn remove(&self, path: &str) -> Result<Option<Value>> {
        self.tree().remove(path)
    }
}

impl<C: ConfigFile + ?Sized> ConfigFile for Arc<C> {
    fn path(&self) -> &Path {
        (**self).path()
    }

    fn tree(&self) -> &ConfigTree {
        (**self).tree()
    }

    fn format(&self) -> &dyn ConfigFormat {
        (**self).format()
    }

    fn save(&self) -> Result<WriteTicket> {
        (**self).save()
    }

    fn load(&self) -> Result<LoadOutcome> {
        (**self).load()
    }

    fn close_with(&self, wait: CloseWait) -> CloseOutcome {
        (**self).close_with(wait)
    }

    fn get(&self, path: &str) -> Result<Value> {
        (**self).get(path)
    }

    fn set(&self, path: &str, value: Value) -> Result<Option<Value>> {
        (**self).set(path, value)
    }

    fn remove(&self, path: &str) -> Result<Option<Value>> {
        (**self).remove(path)
    }
}

/// A configuration tree bound to one file and one format.
///
/// Clones share the same tree, scheduler and file.
///
/// # Example
///
/// ```rust,no_run
/// use confsync::file_config::{ConfigFile, FileConfig};
///
/// let config = FileConfig::builder("settings.toml")?.build()?;
/// config.load()?;
/// config.set("server.port", toml::Value::Integer(8080))?;
/// let _ = config.save()?;
/// config.close();
/// # Ok::<(), confsync::ConfigError>(())
/// ```
#[derive(Clone)]
pub struct FileConfig {
    scheduler: WriteScheduler,
    gate: Arc<LoadGate>,
}

impl FileConfig {
    /// Starts building a handle, detecting the format from the extension.
    ///
    /// # Errors
    /// Returns `ConfigError::NoFormat` if no built-in format handles the extension.
    pub fn builder(path: impl AsRef<Path>) -> Result<FileConfigBuilder> {
        FileConfigBuilder::detect(path.as_ref())
    }

    /// Starts building a handle with an explicit format.
    pub fn builder_with_format<F>(path: impl AsRef<Path>, format: F) -> FileConfigBuilder
    where
        F: ConfigFormat + 'static,
    {
        FileConfigBuilder::new(path.as_ref(), Arc::new(format))
    }

    pub(crate) fn from_parts(scheduler: WriteScheduler, gate: LoadGate) -> Self {
        Self {
            scheduler,
            gate: Arc::new(gate),
        }
    }

    /// Current state of the write scheduler.
    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.scheduler.is_closed()
    }

    /// Returns true if writes run in the background.
    pub fn is_async(&self) -> bool {
        self.scheduler.is_async()
    }

    /// Number of physical writes completed successfully.
    pub fn physical_writes(&self) -> u64 {
        self.scheduler.physical_writes()
    }

    /// Interrupts a `close` blocked on an in-flight write.
    ///
    /// The interrupted close returns `CloseOutcome::Interrupted`; the write
    /// itself keeps going. Returns true if a close was waiting.
    pub fn interrupt_close(&self) -> bool {
        self.scheduler.interrupt_close()
    }

    /// Text encoding of the file.
    pub fn charset(&self) -> Charset {
        self.gate.charset
    }

    /// How loads apply the parsed document.
    pub fn parsing_mode(&self) -> ParsingMode {
        self.gate.parsing_mode
    }
}

impl ConfigFile for FileConfig {
    fn path(&self) -> &Path {
        self.gate.path()
    }

    fn tree(&self) -> &ConfigTree {
        &self.gate.tree
    }

    fn format(&self) -> &dyn ConfigFormat {
        self.gate.format.as_ref()
    }

    #[instrument(skip_all, fields(path = %self.path().display()))]
    fn save(&self) -> Result<WriteTicket> {
        self.scheduler.request_save()
    }

    fn load(&self) -> Result<LoadOutcome> {
        self.gate.load(&self.scheduler)
    }

    fn close_with(&self, wait: CloseWait) -> CloseOutcome {
        self.scheduler.drain_and_close(wait)
    }
}

impl fmt::Debug for FileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileConfig")
            .field("path", &self.gate.path)
            .field("format", &self.gate.format.name())
            .field("state", &self.state())
            .finish()
    }
}
