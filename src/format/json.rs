use toml::{Table, Value};

use crate::core::FormatError;

use super::ConfigFormat;

const NAME: &str = "JSON";

/// JSON documents backed by `serde_json`.
///
/// The root must be an object. JSON has no datetime type, and `null` has no
/// TOML counterpart, so both are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl ConfigFormat for JsonFormat {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn write(&self, tree: &Table) -> Result<String, FormatError> {
        if let Some(path) = first_datetime(tree, "") {
            return Err(FormatError::new(
                NAME,
                format!("datetime at '{path}' has no JSON representation"),
            ));
        }

        serde_json::to_string_pretty(tree).map_err(|e| FormatError::new(NAME, e))
    }

    fn parse(&self, text: &str) -> Result<Table, FormatError> {
        if text.trim().is_empty() {
            return Ok(Table::new());
        }

        serde_json::from_str(text).map_err(|e| FormatError::new(NAME, e))
    }

    fn supports_value(&self, value: &Value) -> bool {
        match value {
            Value::Datetime(_) => false,
            Value::Array(items) => items.iter().all(|item| self.supports_value(item)),
            Value::Table(table) => table.values().all(|item| self.supports_value(item)),
            _ => true,
        }
    }

    fn empty_document(&self) -> &'static str {
        "{}"
    }
}

fn first_datetime(table: &Table, prefix: &str) -> Option<String> {
    table.iter().find_map(|(key, value)| {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        datetime_in_value(value, path)
    })
}

fn datetime_in_value(value: &Value, path: String) -> Option<String> {
    match value {
        Value::Datetime(_) => Some(path),
        Value::Table(table) => first_datetime(table, &path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| datetime_in_value(item, format!("{path}.{i}"))),
        _ => None,
    }
}
