//! Codec ports turning configuration trees into text and back.
//!
//! A [`ConfigFormat`] only deals with text; the handle encodes that text with
//! its [`Charset`] before writing and decodes file bytes before parsing.

mod json;
mod toml_format;


use std::{fmt, path::Path, sync::Arc};

use toml::{Table, Value};

use crate::core::FormatError;

pub use json::JsonFormat;
pub use toml_format::TomlFormat;

/// A configuration file format.
///
/// Implementations are used synchronously by the handle, whether the
/// surrounding write is sync or async.
pub trait ConfigFormat: Send + Sync + fmt::Debug {
    /// Human readable format name.
    fn name(&self) -> &'static str;

    /// File extensions handled by this format, without the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Serializes a tree into a document.
    ///
    /// # Errors
    /// Returns `FormatError` if the tree holds values the format cannot express.
    fn write(&self, tree: &Table) -> Result<String, FormatError>;

    /// Parses a document into a tree.
    ///
    /// # Errors
    /// Returns `FormatError` if the document is malformed.
    fn parse(&self, text: &str) -> Result<Table, FormatError>;

    /// Returns true if the format can store `value`, nested values included.
    fn supports_value(&self, _value: &Value) -> bool {
        true
    }

    /// Content written when a missing file is created empty.
    fn empty_document(&self) -> &'static str {
        ""
    }
}

/// Text encoding used between a format's documents and the file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// UTF-8
    #[default]
    Utf8,
    /// ISO-8859-1; characters above U+00FF cannot be encoded
    Latin1,
}

impl Charset {
    /// Encodes a document into bytes.
    ///
    /// # Errors
    /// Returns an error message naming the first unencodable character.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, String> {
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c))
                        .map_err(|_| format!("character {c:?} is not representable in ISO-8859-1"))
                })
                .collect(),
        }
    }

    /// Decodes file bytes into a document.
    ///
    /// # Errors
    /// Returns an error message if the bytes are not valid for this charset.
    pub fn decode(self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string()),
            Charset::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// Returns the built-in formats, TOML first.
pub fn builtin_formats() -> Vec<Arc<dyn ConfigFormat>> {
    vec![Arc::new(TomlFormat), Arc::new(JsonFormat)]
}

/// Detects the format of a file from its extension.
///
/// Returns `None` when no built-in format handles the extension.
pub fn detect_format(path: &Path) -> Option<Arc<dyn ConfigFormat>> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();

    builtin_formats()
        .into_iter()
        .find(|format| format.extensions().contains(&extension.as_str()))
}
