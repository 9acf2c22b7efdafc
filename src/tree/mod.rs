//! Shared in-memory configuration tree.
//!
//! The tree is a TOML table behind a reader-writer lock. Handles and callers
//! share it through cheap clones; loads replace or merge its content in place
//! and saves encode whatever it holds when the physical write starts.

mod path_ops;

#[cfg(test)]
mod tests;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Serialize, de::DeserializeOwned};
use toml::{Table, Value};

use crate::core::ConfigError;

use path_ops::{navigate_path, remove_value_at_path, set_value_at_path};

/// How a parsed document is applied to the in-memory tree on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParsingMode {
    /// The tree becomes exactly the parsed document
    #[default]
    Replace,
    /// Parsed values overwrite existing ones; untouched keys are kept
    Merge,
    /// Only keys missing from the tree are added
    Add,
}

/// Thread-safe configuration tree shared between a handle and its callers.
///
/// Cloning is cheap and every clone observes the same data.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    table: Arc<RwLock<Table>>,
}

impl ConfigTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tree holding the given table.
    pub fn from_table(table: Table) -> Self {
        Self {
            table: Arc::new(RwLock::new(table)),
        }
    }

    /// Retrieves a value at the specified path
    ///
    /// # Arguments
    /// * `path` - Dot-separated path to the field (e.g., "server.port")
    ///
    /// # Errors
    /// * `ConfigError::InvalidPath` - If the path doesn't exist
    pub fn get(&self, path: &str) -> Result<Value, ConfigError> {
        navigate_path(&self.read(), path).cloned()
    }

    /// Retrieves a value at the specified path and deserializes it.
    ///
    /// # Errors
    /// * `ConfigError::InvalidPath` - If the path doesn't exist
    /// * `ConfigError::TypeMismatch` - If the value cannot be deserialized into `T`
    pub fn get_as<T>(&self, path: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        let value = self.get(path)?;

        T::deserialize(value.clone()).map_err(|_| ConfigError::TypeMismatch {
            path: path.to_string(),
            expected_type: std::any::type_name::<T>(),
            actual_value: value,
        })
    }

    /// Returns true if a value is stored at the path.
    pub fn contains(&self, path: &str) -> bool {
        navigate_path(&self.read(), path).is_ok()
    }

    /// Sets a value at the specified path, creating intermediate tables
    ///
    /// # Returns
    /// The previous value at the path, if any
    ///
    /// # Errors
    /// * `ConfigError::InvalidPath` - If the path is malformed or crosses a scalar
    pub fn set(&self, path: &str, value: Value) -> Result<Option<Value>, ConfigError> {
        set_value_at_path(&mut self.write(), path, value)
    }

    /// Serializes `value` into TOML and stores it at the path.
    ///
    /// # Errors
    /// * `ConfigError::TypeMismatch` - If the value has no TOML representation
    /// * `ConfigError::InvalidPath` - If the path is malformed or crosses a scalar
    pub fn set_serialized<T>(&self, path: &str, value: &T) -> Result<Option<Value>, ConfigError>
    where
        T: Serialize,
    {
        let value = Value::try_from(value).map_err(|_| ConfigError::TypeMismatch {
            path: path.to_string(),
            expected_type: "toml::Value",
            actual_value: Value::String(std::any::type_name::<T>().to_string()),
        })?;

        self.set(path, value)
    }

    /// Removes the value at the path and returns it.
    ///
    /// # Errors
    /// * `ConfigError::InvalidPath` - If the path is malformed or crosses a scalar
    pub fn remove(&self, path: &str) -> Result<Option<Value>, ConfigError> {
        remove_value_at_path(&mut self.write(), path)
    }

    /// Returns a copy of the whole tree.
    pub fn snapshot(&self) -> Table {
        self.read().clone()
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Applies a parsed document according to `mode`.
    pub fn apply(&self, parsed: Table, mode: ParsingMode) {
        let mut table = self.write();

        match mode {
            ParsingMode::Replace => *table = parsed,
            ParsingMode::Merge => merge_into(&mut table, parsed),
            ParsingMode::Add => add_missing(&mut table, parsed),
        }
    }

    /// Shared access to the table, recovering from poisoned locks
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<Table> for ConfigTree {
    fn from(table: Table) -> Self {
        Self::from_table(table)
    }
}

fn merge_into(target: &mut Table, source: Table) {
    for (key, value) in source {
        match value {
            Value::Table(incoming) => match target.get_mut(&key) {
                Some(Value::Table(existing)) => merge_into(existing, incoming),
                _ => {
                    target.insert(key, Value::Table(incoming));
                }
            },
            value => {
                target.insert(key, value);
            }
        }
    }
}

fn add_missing(target: &mut Table, source: Table) {
    for (key, value) in source {
        match target.get_mut(&key) {
            Some(Value::Table(existing)) => {
                if let Value::Table(incoming) = value {
                    add_missing(existing, incoming);
                }
            }
            Some(_) => {}
            None => {
                target.insert(key, value);
            }
        }
    }
}
