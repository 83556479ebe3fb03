//! Build configuration documents.
//!
//! This module turns a `buildconf.*` document into resolved task parameters:
//! - `loader`: discovery and loading of JSON/YAML documents, defaults
//! - `manager`: the hierarchy of documents linked by `subdirs`
//! - `yaml`: YAML documents with `$NAME` substitution
//! - `schema`: the static description of valid documents
//! - `validator`: recursive structural checks against the schema
//! - `sugar`: expansion of shorthand lists into overlay rules
//! - `types`: typed config sections, conditions and overlay rules
//! - `merge`: shallow and one-level merge of parameter maps
//! - `resolver`: buildtype selection, per-task resolution and `.select` params

pub mod loader;
pub mod manager;
pub mod merge;
pub mod resolver;
pub mod schema;
pub mod sugar;
pub mod types;
pub mod validator;
pub mod yaml;

pub use loader::{ConfigLoader, Document, load_config, load_sub_config};
pub use manager::ConfManager;
pub use merge::{merge_one_level, shallow_merge};
pub use resolver::{BuildConf, TaskMap};
pub use schema::{Allowed, Kind, SchemaKey, SchemaNode, Trait, conf_schema};
pub use sugar::expand;
pub use types::{Condition, IfFilter, NamedCondition, OverlayRule, RawConfig};
pub use validator::{validate, validate_document};

use serde_yaml::Value;

/// Base name of configuration files.
pub const BUILDCONF_NAME: &str = "buildconf";

/// Split a param into words: strings on whitespace, lists element-wise.
///
/// Non-string scalars become their textual form; null yields nothing.
pub fn to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Sequence(items) => items.iter().map(scalar_text).collect(),
        other => vec![scalar_text(other)],
    }
}

/// Textual form of a scalar, as it would be written in a document.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => display_value(other),
    }
}

/// Compact single-line rendering of a value for messages.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{s}'"),
        Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().map(display_value).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Mapping(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", display_value(k), display_value(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::Tagged(tagged) => format!("{} {}", tagged.tag, display_value(&tagged.value)),
    }
}

/// Join a dotted param path.
pub(crate) fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Name of a function reference (`!func name`), if the value is one.
pub fn func_ref(value: &Value) -> Option<&str> {
    match value {
        Value::Tagged(tagged) if tagged.tag == "func" => tagged.value.as_str(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_list() {
        let v: Value = serde_yaml::from_str("'-O2  -Wall'").unwrap();
        assert_eq!(to_list(&v), ["-O2", "-Wall"]);
        let v: Value = serde_yaml::from_str("[a, 1, true]").unwrap();
        assert_eq!(to_list(&v), ["a", "1", "true"]);
        assert!(to_list(&Value::Null).is_empty());
    }

    #[test]
    fn test_display_value() {
        let v: Value = serde_yaml::from_str("{a: [1, x], b: null}").unwrap();
        assert_eq!(display_value(&v), "{'a': [1, 'x'], 'b': null}");
    }

    #[test]
    fn test_func_ref() {
        let v: Value = serde_yaml::from_str("!func check").unwrap();
        assert_eq!(func_ref(&v), Some("check"));
        assert_eq!(func_ref(&Value::String("check".into())), None);
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "tasks"), "tasks");
        assert_eq!(join_key("tasks", "app"), "tasks.app");
    }
}
