//! Recursive structural validation of documents against a [`SchemaNode`].
//!
//! Union schemas try their kinds in order. A value of the wrong outer shape
//! moves on to the next kind, but once a kind's shape matched, any error from
//! its contents is reported as is.

use super::loader::Document;
use super::schema::{Allowed, DictVars, Kind, SchemaKey, SchemaNode, Vars, conf_schema};
use super::{display_value, func_ref, join_key, scalar_text};
use crate::error::{ConfigError, Result};
use serde_yaml::{Mapping, Value};
use std::borrow::Cow;
use tracing::debug;

/// Validate `node` against `schema`; `path` is the dotted path of `node`.
pub fn validate(node: &Value, schema: &SchemaNode, path: &str) -> Result<()> {
    Validator { root: node }
        .check(node, schema, path)
        .map_err(Fault::into_error)
}

/// Validate a whole document against the configuration schema.
///
/// Errors are wrapped with the document path.
pub fn validate_document(doc: &Document) -> Result<()> {
    debug!(path = %doc.path.display(), "validating buildconf");
    let root = Value::Mapping(doc.attrs.clone());
    validate(&root, conf_schema(), "").map_err(|err| ConfigError::in_file(&doc.path, err))
}

/// Failure of one check.
enum Fault {
    /// The value does not have the kind being tried.
    Shape(ConfigError),
    /// The kind matched but the value or its contents are invalid.
    Inner(ConfigError),
}

impl Fault {
    fn into_error(self) -> ConfigError {
        match self {
            Fault::Shape(err) | Fault::Inner(err) => err,
        }
    }

    /// Anything failing below a matched container is reported as is.
    fn nested(self) -> Fault {
        Fault::Inner(self.into_error())
    }
}

type Checked = std::result::Result<(), Fault>;

struct Validator<'a> {
    root: &'a Value,
}

impl Validator<'_> {
    fn check(&self, node: &Value, schema: &SchemaNode, path: &str) -> Checked {
        match schema.kinds.as_slice() {
            [kind] => self.check_kind(*kind, node, schema, path),
            _ => self.check_union(node, schema, path),
        }
    }

    fn check_union(&self, node: &Value, schema: &SchemaNode, path: &str) -> Checked {
        // A bare string for an allowed-values `str | list-of-strs` is checked as a word list.
        let mut kinds = schema.kinds.clone();
        let coerce = schema.allowed.is_some() && {
            let mut sorted = kinds.clone();
            sorted.sort();
            sorted == [Kind::Str, Kind::ListOfStrs]
        };
        if coerce {
            kinds = vec![Kind::ListOfStrs, Kind::Str];
        }

        for kind in kinds {
            let result = match (kind, node) {
                (Kind::ListOfStrs, Value::String(s)) if coerce => {
                    let words = Value::Sequence(
                        s.split_whitespace()
                            .map(|w| Value::String(w.to_string()))
                            .collect(),
                    );
                    self.check_kind(kind, &words, schema, path)
                }
                _ => self.check_kind(kind, node, schema, path),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(Fault::Shape(_)) => continue,
                Err(inner) => return Err(inner),
            }
        }

        Err(Fault::Shape(ConfigError::TypeMismatch {
            path: path.to_string(),
            value: display_value(node),
            expected: schema.describe(),
        }))
    }

    fn check_kind(&self, kind: Kind, node: &Value, schema: &SchemaNode, path: &str) -> Checked {
        let mismatch = || {
            Fault::Shape(ConfigError::TypeMismatch {
                path: path.to_string(),
                value: display_value(node),
                expected: kind.describe().to_string(),
            })
        };

        match kind {
            Kind::Bool => node.as_bool().map(|_| ()).ok_or_else(mismatch),
            Kind::Int => match node {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                _ => Err(mismatch()),
            },
            Kind::Func => func_ref(node).map(|_| ()).ok_or_else(mismatch),
            Kind::Str => {
                let s = node.as_str().ok_or_else(mismatch)?;
                self.check_allowed(s, node, schema, path)
                    .map_err(Fault::Inner)
            }
            Kind::ListOfStrs => {
                let items = node.as_sequence().ok_or_else(mismatch)?;
                let mut words = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => words.push(s),
                        None => return Err(mismatch()),
                    }
                }
                for word in words {
                    self.check_allowed(word, node, schema, path)
                        .map_err(Fault::Inner)?;
                }
                Ok(())
            }
            Kind::List => {
                let items = node.as_sequence().ok_or_else(mismatch)?;
                self.check_list(items, node, schema, path)
                    .map_err(Fault::nested)
            }
            Kind::Dict => {
                let map = node.as_mapping().ok_or_else(mismatch)?;
                self.check_dict(map, schema, path).map_err(Fault::Inner)
            }
        }
    }

    fn check_list(&self, items: &[Value], node: &Value, schema: &SchemaNode, path: &str) -> Checked {
        for (i, elem) in items.iter().enumerate() {
            if schema.allowed.is_some() {
                self.check_allowed(&scalar_text(elem), node, schema, path)
                    .map_err(Fault::Inner)?;
            }
            if let Some(elem_schema) = &schema.vars_type {
                let elem_path = format!("{path}.[{i}]");
                self.check(elem, elem_schema, &elem_path)?;
            }
        }
        Ok(())
    }

    fn check_dict(&self, map: &Mapping, schema: &SchemaNode, path: &str) -> Result<()> {
        let vars: Cow<'_, Vars> = match &schema.vars {
            // keys are not checked
            None => return Ok(()),
            Some(DictVars::Static(vars)) => Cow::Borrowed(vars),
            Some(DictVars::Computed(f)) => Cow::Owned(f(map, path)?),
        };
        let wildcard = vars.get(&SchemaKey::Wildcard);

        for key in &schema.required_keys {
            if !map.contains_key(key.as_str()) {
                return Err(ConfigError::MissingKey {
                    path: path.to_string(),
                    key: key.clone(),
                });
            }
        }

        for (key, value) in map {
            let Some(name) = key.as_str() else {
                if wildcard.is_some() {
                    return Err(ConfigError::KeyType {
                        path: path.to_string(),
                        key: display_value(key),
                    });
                }
                if schema.allow_unknown_keys {
                    continue;
                }
                return Err(unknown_key(path, &display_value(key), &vars));
            };

            if schema.disallowed_keys.iter().any(|k| k == name) {
                return Err(ConfigError::DisallowedKey {
                    path: path.to_string(),
                    key: name.to_string(),
                });
            }

            let key_path = join_key(path, name);
            if let Some(check) = schema.key_check {
                check(name, &key_path)?;
            }
            if let Some(node_schema) = vars.get(&SchemaKey::Named(name.to_string())) {
                if value.is_null() {
                    continue;
                }
                self.check(value, node_schema, &key_path)
                    .map_err(Fault::into_error)?;
            } else if let Some(node_schema) = wildcard {
                self.check(value, node_schema, &key_path)
                    .map_err(Fault::into_error)?;
            } else if !schema.allow_unknown_keys {
                return Err(unknown_key(path, name, &vars));
            }
        }

        Ok(())
    }

    fn check_allowed(&self, value: &str, node: &Value, schema: &SchemaNode, path: &str) -> Result<()> {
        let allowed = match &schema.allowed {
            None => return Ok(()),
            Some(Allowed::Check(f)) => return f(value, path),
            Some(Allowed::Values(values)) => Cow::Borrowed(values),
            Some(Allowed::Computed(f)) => Cow::Owned(f(self.root, node, path)?),
        };
        if allowed.iter().any(|a| a == value) {
            Ok(())
        } else {
            Err(ConfigError::ValueNotAllowed {
                path: path.to_string(),
                value: value.to_string(),
                allowed: allowed.into_owned(),
            })
        }
    }
}

fn unknown_key(path: &str, key: &str, vars: &Vars) -> ConfigError {
    let valid = vars
        .keys()
        .filter_map(|k| match k {
            SchemaKey::Named(name) => Some(name.clone()),
            SchemaKey::Wildcard => None,
        })
        .collect();
    ConfigError::UnknownKey {
        path: path.to_string(),
        key: key.to_string(),
        valid,
    }
}
