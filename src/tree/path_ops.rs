use toml::{Table, Value};

use crate::core::ConfigError;

/// Splits a dot-separated path, rejecting empty paths and empty segments.
///
/// # Errors
/// * `ConfigError::InvalidPath` - If the path or one of its segments is empty
pub(super) fn split_path(path: &str) -> Result<Vec<&str>, ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::InvalidPath("Empty path".to_string()));
    }

    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath(format!(
            "Empty segment in path '{path}'"
        )));
    }

    Ok(parts)
}

/// Navigates through a TOML table following a dot-separated path
///
/// # Arguments
/// * `root` - The root table to navigate from
/// * `path` - Dot-separated path (e.g., "server.port" or "array.0.field")
///
/// # Errors
/// * `ConfigError::InvalidPath` - If the path doesn't exist or is malformed
pub(super) fn navigate_path<'a>(root: &'a Table, path: &str) -> Result<&'a Value, ConfigError> {
    let parts = split_path(path)?;

    let first = root.get(parts[0]).ok_or_else(|| {
        ConfigError::InvalidPath(format!("Key '{}' not found at root", parts[0]))
    })?;

    let mut current = first;
    for (i, part) in parts.iter().enumerate().skip(1) {
        current = navigate_step(current, part, &parts[..i])?;
    }

    Ok(current)
}

fn navigate_step<'a>(
    current: &'a Value,
    key: &str,
    path_so_far: &[&str],
) -> Result<&'a Value, ConfigError> {
    match current {
        Value::Table(table) => table.get(key).ok_or_else(|| {
            ConfigError::InvalidPath(format!(
                "Key '{}' not found in table at path '{}'",
                key,
                path_so_far.join(".")
            ))
        }),
        Value::Array(array) => {
            let index = parse_index(key, path_so_far)?;
            array.get(index).ok_or_else(|| {
                ConfigError::InvalidPath(format!(
                    "Array index '{}' out of bounds at path '{}'",
                    index,
                    path_so_far.join(".")
                ))
            })
        }
        _ => Err(ConfigError::InvalidPath(format!(
            "Cannot navigate into {} at path '{}'",
            current.type_str(),
            path_so_far.join(".")
        ))),
    }
}

/// Sets a value at the specified path, creating missing intermediate tables
///
/// # Arguments
/// * `root` - The root table to modify
/// * `path` - Dot-separated path to the target location
/// * `new_value` - The value to insert at the path
///
/// # Returns
/// The value previously stored at the path, if any
///
/// # Errors
/// * `ConfigError::InvalidPath` - If the path is malformed or crosses a non-container value
pub(super) fn set_value_at_path(
    root: &mut Table,
    path: &str,
    new_value: Value,
) -> Result<Option<Value>, ConfigError> {
    let parts = split_path(path)?;
    let (last_key, parents) = match parts.split_last() {
        Some(split) => split,
        None => return Err(ConfigError::InvalidPath("Empty path".to_string())),
    };

    if parents.is_empty() {
        return Ok(root.insert((*last_key).to_string(), new_value));
    }

    let mut current = root
        .entry(parents[0].to_string())
        .or_insert_with(|| Value::Table(Table::new()));

    for (i, part) in parents.iter().enumerate().skip(1) {
        current = step_or_create_mut(current, part, &parents[..i])?;
    }

    insert_value(current, last_key, new_value, &parts)
}

/// Removes the value at the specified path
///
/// # Returns
/// The removed value, or `None` if nothing was stored there
///
/// # Errors
/// * `ConfigError::InvalidPath` - If the path is malformed or crosses a non-container value
pub(super) fn remove_value_at_path(
    root: &mut Table,
    path: &str,
) -> Result<Option<Value>, ConfigError> {
    let parts = split_path(path)?;
    let (last_key, parents) = match parts.split_last() {
        Some(split) => split,
        None => return Err(ConfigError::InvalidPath("Empty path".to_string())),
    };

    if parents.is_empty() {
        return Ok(root.remove(*last_key));
    }

    let Some(mut current) = root.get_mut(parents[0]) else {
        return Ok(None);
    };

    for part in &parents[1..] {
        current = match current {
            Value::Table(table) => match table.get_mut(*part) {
                Some(next) => next,
                None => return Ok(None),
            },
            Value::Array(array) => {
                let index = parse_index(part, parents)?;
                match array.get_mut(index) {
                    Some(next) => next,
                    None => return Ok(None),
                }
            }
            other => {
                return Err(ConfigError::InvalidPath(format!(
                    "Cannot navigate into {} at path '{}'",
                    other.type_str(),
                    path
                )));
            }
        };
    }

    match current {
        Value::Table(table) => Ok(table.remove(*last_key)),
        other => Err(ConfigError::InvalidPath(format!(
            "Cannot remove from {} at path '{}'",
            other.type_str(),
            path
        ))),
    }
}

/// Performs a single mutable navigation step, creating a table for missing keys
///
/// # Errors
/// * `ConfigError::InvalidPath` - If the index is invalid or the value is not a container
fn step_or_create_mut<'a>(
    current: &'a mut Value,
    key: &str,
    path_so_far: &[&str],
) -> Result<&'a mut Value, ConfigError> {
    match current {
        Value::Table(table) => Ok(table
            .entry(key.to_string())
            .or_insert_with(|| Value::Table(Table::new()))),
        Value::Array(arr) => {
            let index = parse_index(key, path_so_far)?;

            arr.get_mut(index).ok_or_else(|| {
                ConfigError::InvalidPath(format!(
                    "Array index {} out of bounds at path '{}'",
                    index,
                    path_so_far.join(".")
                ))
            })
        }
        _ => Err(ConfigError::InvalidPath(format!(
            "Cannot navigate into {} at path '{}'",
            current.type_str(),
            path_so_far.join(".")
        ))),
    }
}

/// Inserts a value into a TOML container (table or array)
///
/// # Errors
/// * `ConfigError::InvalidPath` - If the container type doesn't support insertion or index is invalid
fn insert_value(
    container: &mut Value,
    key: &str,
    new_value: Value,
    full_path: &[&str],
) -> Result<Option<Value>, ConfigError> {
    match container {
        Value::Table(table) => Ok(table.insert(key.to_string(), new_value)),
        Value::Array(arr) => {
            let index = parse_index(key, full_path)?;

            arr.get_mut(index)
                .map(|elem| Some(std::mem::replace(elem, new_value)))
                .ok_or_else(|| {
                    ConfigError::InvalidPath(format!("Array index {index} out of bounds"))
                })
        }
        _ => Err(ConfigError::InvalidPath(format!(
            "Cannot insert into {} at path '{}'",
            container.type_str(),
            full_path.join(".")
        ))),
    }
}

fn parse_index(key: &str, path_so_far: &[&str]) -> Result<usize, ConfigError> {
    key.parse::<usize>().map_err(|_| {
        ConfigError::InvalidPath(format!(
            "Invalid array index '{}' at path '{}'",
            key,
            path_so_far.join(".")
        ))
    })
}
