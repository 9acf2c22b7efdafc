//! Unit tests for the config tree and its path operations.
//! No filesystem or timing dependencies.

#![allow(clippy::unwrap_used, clippy::panic)]

use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::core::ConfigError;
use crate::tree::{ConfigTree, ParsingMode};

fn tree_from(text: &str) -> ConfigTree {
    ConfigTree::from_table(toml::from_str(text).unwrap())
}

#[test]
fn get_nested_value() {
    let tree = tree_from(
        r#"
[server]
host = "localhost"
port = 8080
"#,
    );

    assert_eq!(tree.get("server.port").unwrap(), Value::Integer(8080));
    assert_eq!(
        tree.get("server.host").unwrap(),
        Value::String("localhost".to_string())
    );
}

#[test]
fn get_array_element_by_index() {
    let tree = tree_from(
        r#"
[[servers]]
name = "alpha"

[[servers]]
name = "beta"
"#,
    );

    assert_eq!(
        tree.get("servers.1.name").unwrap(),
        Value::String("beta".to_string())
    );
}

#[test]
fn get_missing_key_is_invalid_path() {
    let tree = tree_from("a = 1");

    assert!(matches!(tree.get("b"), Err(ConfigError::InvalidPath(_))));
    assert!(matches!(tree.get("a.b"), Err(ConfigError::InvalidPath(_))));
}

#[test]
fn empty_paths_are_rejected() {
    let tree = ConfigTree::new();

    assert!(matches!(tree.get(""), Err(ConfigError::InvalidPath(_))));
    assert!(matches!(
        tree.set("a..b", Value::Integer(1)),
        Err(ConfigError::InvalidPath(_))
    ));
}

#[test]
fn set_creates_intermediate_tables() {
    let tree = ConfigTree::new();

    let previous = tree.set("a.b.c", Value::Boolean(true)).unwrap();

    assert_eq!(previous, None);
    assert_eq!(tree.get("a.b.c").unwrap(), Value::Boolean(true));
    assert!(tree.get("a.b").unwrap().is_table());
}

#[test]
fn set_returns_previous_value() {
    let tree = tree_from("level = 1");

    let previous = tree.set("level", Value::Integer(2)).unwrap();

    assert_eq!(previous, Some(Value::Integer(1)));
    assert_eq!(tree.get("level").unwrap(), Value::Integer(2));
}

#[test]
fn set_through_scalar_fails() {
    let tree = tree_from("name = \"x\"");

    let result = tree.set("name.inner", Value::Integer(1));

    assert!(matches!(result, Err(ConfigError::InvalidPath(_))));
}

#[test]
fn set_replaces_array_element() {
    let tree = tree_from("ports = [1, 2, 3]");

    let previous = tree.set("ports.1", Value::Integer(20)).unwrap();

    assert_eq!(previous, Some(Value::Integer(2)));
    assert_eq!(tree.get("ports.1").unwrap(), Value::Integer(20));
}

#[test]
fn remove_returns_value_and_ignores_missing() {
    let tree = tree_from(
        r#"
[server]
port = 1
"#,
    );

    assert_eq!(tree.remove("server.port").unwrap(), Some(Value::Integer(1)));
    assert_eq!(tree.remove("server.port").unwrap(), None);
    assert_eq!(tree.remove("missing.key").unwrap(), None);
    assert!(!tree.contains("server.port"));
}

#[test]
fn clones_share_data() {
    let tree = ConfigTree::new();
    let other = tree.clone();

    tree.set("shared", Value::Integer(7)).unwrap();

    assert_eq!(other.get("shared").unwrap(), Value::Integer(7));
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Window {
    width: u32,
    title: String,
}

#[test]
fn typed_round_trip() {
    let tree = ConfigTree::new();
    let window = Window {
        width: 640,
        title: "main".to_string(),
    };

    tree.set_serialized("ui.window", &window).unwrap();

    assert_eq!(tree.get_as::<Window>("ui.window").unwrap(), window);
    assert_eq!(tree.get_as::<u32>("ui.window.width").unwrap(), 640);
}

#[test]
fn typed_get_reports_mismatch() {
    let tree = tree_from("width = \"wide\"");

    let result = tree.get_as::<u32>("width");

    match result {
        Err(ConfigError::TypeMismatch {
            path, actual_value, ..
        }) => {
            assert_eq!(path, "width");
            assert_eq!(actual_value, Value::String("wide".to_string()));
        }
        other => panic!("expected type mismatch, got {other:?}"),
    }
}

#[test]
fn apply_replace_discards_old_keys() {
    let tree = tree_from("old = 1");
    let parsed: Table = toml::from_str("new = 2").unwrap();

    tree.apply(parsed, ParsingMode::Replace);

    assert!(!tree.contains("old"));
    assert_eq!(tree.get("new").unwrap(), Value::Integer(2));
}

#[test]
fn apply_merge_overwrites_and_keeps_untouched() {
    let tree = tree_from(
        r#"
keep = true

[server]
port = 1
host = "a"
"#,
    );
    let parsed: Table = toml::from_str(
        r#"
[server]
port = 2
"#,
    )
    .unwrap();

    tree.apply(parsed, ParsingMode::Merge);

    assert_eq!(tree.get("keep").unwrap(), Value::Boolean(true));
    assert_eq!(tree.get("server.port").unwrap(), Value::Integer(2));
    assert_eq!(
        tree.get("server.host").unwrap(),
        Value::String("a".to_string())
    );
}

#[test]
fn apply_add_only_fills_missing_keys() {
    let tree = tree_from(
        r#"
[server]
port = 1
"#,
    );
    let parsed: Table = toml::from_str(
        r#"
extra = "x"

[server]
port = 2
host = "b"
"#,
    )
    .unwrap();

    tree.apply(parsed, ParsingMode::Add);

    assert_eq!(tree.get("server.port").unwrap(), Value::Integer(1));
    assert_eq!(
        tree.get("server.host").unwrap(),
        Value::String("b".to_string())
    );
    assert_eq!(tree.get("extra").unwrap(), Value::String("x".to_string()));
}

#[test]
fn apply_same_document_twice_is_stable() {
    let tree = ConfigTree::new();
    let parsed: Table = toml::from_str("a = 1\n[b]\nc = 2").unwrap();

    tree.apply(parsed.clone(), ParsingMode::Merge);
    let first = tree.snapshot();
    tree.apply(parsed, ParsingMode::Merge);

    assert_eq!(tree.snapshot(), first);
}
