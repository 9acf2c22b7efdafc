use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use toml::Value;
use tracing::{debug, warn};

use crate::{
    core::{ConfigError, Result},
    format::ConfigFormat,
    tree::ConfigTree,
    watch::WatchRegistry,
};

use super::{CloseOutcome, CloseWait, ConfigFile, LoadOutcome, WriteTicket};

/// Reloads the wrapped handle whenever its file changes on disk.
///
/// The handle's `load` is registered with the watch registry when the
/// decorator is created and unregistered when it is closed or dropped. A
/// decorator only unregisters a watch it registered itself.
pub struct AutoreloadFileConfig<C: ConfigFile + Clone + 'static> {
    inner: C,
    registry: Arc<WatchRegistry>,
    watching: AtomicBool,
}

impl<C: ConfigFile + Clone + 'static> AutoreloadFileConfig<C> {
    /// Wraps `inner` and starts watching its file.
    ///
    /// If the file is already watched by `registry`, the existing handler is
    /// kept and this decorator leaves it registered when closed.
    ///
    /// # Errors
    /// Returns `ConfigError::Watch` or `ConfigError::WatcherStopped` if the
    /// file cannot be registered.
    pub fn new(inner: C, registry: Arc<WatchRegistry>) -> Result<Self> {
        let target = inner.clone();

        let registered = registry.add_watch(inner.path(), move || {
            let outcome = target.load()?;
            debug!(path = %target.path().display(), ?outcome, "Reloaded after file change");
            Ok(())
        })?;
        if !registered {
            warn!(path = %inner.path().display(), "File already watched by another handle; keeping its reload handler");
        }

        Ok(Self {
            inner,
            registry,
            watching: AtomicBool::new(registered),
        })
    }

    /// The wrapped handle.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Returns true while this decorator owns the file's registration.
    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Acquire)
    }

    fn unwatch(&self) {
        if self.watching.swap(false, Ordering::AcqRel) {
            self.registry.remove_watch(self.inner.path());
        }
    }
}

impl<C: ConfigFile + Clone + 'static> ConfigFile for AutoreloadFileConfig<C> {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn tree(&self) -> &ConfigTree {
        self.inner.tree()
    }

    fn format(&self) -> &dyn ConfigFormat {
        self.inner.format()
    }

    fn save(&self) -> Result<WriteTicket> {
        self.inner.save()
    }

    fn load(&self) -> Result<LoadOutcome> {
        self.inner.load()
    }

    fn close_with(&self, wait: CloseWait) -> CloseOutcome {
        self.unwatch();
        self.inner.close_with(wait)
    }

    fn get(&self, path: &str) -> Result<Value> {
        self.inner.get(path)
    }

    fn set(&self, path: &str, value: Value) -> Result<Option<Value>> {
        self.inner.set(path, value)
    }

    fn remove(&self, path: &str) -> Result<Option<Value>> {
        self.inner.remove(path)
    }
}

impl<C: ConfigFile + Clone + 'static> Drop for AutoreloadFileConfig<C> {
    fn drop(&mut self) {
        self.unwatch();
    }
}

/// Saves the wrapped handle after every modification made through it.
///
/// Changes made directly on the shared tree bypass the decorator and are not
/// saved automatically.
#[derive(Clone)]
pub struct AutosaveFileConfig<C: ConfigFile> {
    inner: C,
}

impl<C: ConfigFile> AutosaveFileConfig<C> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// The wrapped handle.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn autosave(&self) -> Result<()> {
        match self.inner.save() {
            Ok(ticket) => {
                drop(ticket);
                Ok(())
            }
            Err(ConfigError::Closed { path, .. }) => {
                warn!(path = %path.display(), "Modified a closed config file; change not saved");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<C: ConfigFile> ConfigFile for AutosaveFileConfig<C> {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn tree(&self) -> &ConfigTree {
        self.inner.tree()
    }

    fn format(&self) -> &dyn ConfigFormat {
        self.inner.format()
    }

    fn save(&self) -> Result<WriteTicket> {
        self.inner.save()
    }

    fn load(&self) -> Result<LoadOutcome> {
        self.inner.load()
    }

    fn close_with(&self, wait: CloseWait) -> CloseOutcome {
        self.inner.close_with(wait)
    }

    fn get(&self, path: &str) -> Result<Value> {
        self.inner.get(path)
    }

    fn set(&self, path: &str, value: Value) -> Result<Option<Value>> {
        let previous = self.inner.set(path, value)?;
        self.autosave()?;
        Ok(previous)
    }

    fn remove(&self, path: &str) -> Result<Option<Value>> {
        let removed = self.inner.remove(path)?;
        self.autosave()?;
        Ok(removed)
    }
}

/// Rejects values the wrapped handle's format cannot store.
#[derive(Clone)]
pub struct CheckedFileConfig<C: ConfigFile> {
    inner: C,
}

impl<C: ConfigFile> CheckedFileConfig<C> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// The wrapped handle.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn check(&self, path: &str, value: &Value) -> Result<()> {
        let format = self.inner.format();
        if format.supports_value(value) {
            return Ok(());
        }

        Err(ConfigError::UnsupportedValue {
            path: path.to_string(),
            format: format.name(),
            value_type: value.type_str(),
        })
    }
}

impl<C: ConfigFile> ConfigFile for CheckedFileConfig<C> {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn tree(&self) -> &ConfigTree {
        self.inner.tree()
    }

    fn format(&self) -> &dyn ConfigFormat {
        self.inner.format()
    }

    fn save(&self) -> Result<WriteTicket> {
        self.inner.save()
    }

    fn load(&self) -> Result<LoadOutcome> {
        self.inner.load()
    }

    fn close_with(&self, wait: CloseWait) -> CloseOutcome {
        self.inner.close_with(wait)
    }

    fn get(&self, path: &str) -> Result<Value> {
        self.inner.get(path)
    }

    fn set(&self, path: &str, value: Value) -> Result<Option<Value>> {
        self.check(path, &value)?;
        self.inner.set(path, value)
    }

    fn remove(&self, path: &str) -> Result<Option<Value>> {
        self.inner.remove(path)
    }
}
