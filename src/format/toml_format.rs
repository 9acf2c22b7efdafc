use toml::Table;

use crate::core::FormatError;

use super::ConfigFormat;

const NAME: &str = "TOML";

/// TOML documents backed by the `toml` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlFormat;

impl ConfigFormat for TomlFormat {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["toml"]
    }

    fn write(&self, tree: &Table) -> Result<String, FormatError> {
        toml::to_string_pretty(tree).map_err(|e| FormatError::new(NAME, e))
    }

    fn parse(&self, text: &str) -> Result<Table, FormatError> {
        toml::from_str(text).map_err(|e| FormatError::new(NAME, e))
    }
}
