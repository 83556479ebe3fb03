//! Error types for loading, validating and resolving build configurations.
//!
//! Every validation error carries the dotted path of the offending param
//! (`tasks.app.features`, `matrix.[0].for`). Errors raised while checking a
//! whole document are wrapped with [`ConfigError::InFile`] so that the file
//! identity is printed in front of every message line.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Coarse error categories for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong structural kind at a path (ConfigTypeError).
    Type,
    /// Value outside of an allowed set (ConfigValueError).
    Value,
    /// Generic structural problem: unknown key, missing reference, bad document.
    Config,
    /// Malformed or failing condition expression.
    Expression,
    /// API misuse, e.g. reading buildtype-scoped data before selection.
    Logic,
    /// Filesystem failure.
    Io,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Value `{value}` is invalid for the param '{path}'. It should be {expected}.")]
    TypeMismatch {
        path: String,
        value: String,
        expected: String,
    },

    #[error("Value `{value}` is invalid for the param '{path}'. Allowed values: {}", join_quoted(.allowed))]
    ValueNotAllowed {
        path: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("Value `{value}` is invalid for the param '{path}'. {reason}")]
    InvalidValue {
        path: String,
        value: String,
        reason: String,
    },

    #[error("Unknown key `{key}` is in the param '{path}'. Only string keys are valid.")]
    KeyType { path: String, key: String },

    #[error("Unknown key '{key}' is in the param '{path}'. Unknown keys aren't allowed here.\nValid values: {}", join_quoted(.valid))]
    UnknownKey {
        path: String,
        key: String,
        valid: Vec<String>,
    },

    #[error("The key '{key}' is not allowed in the param '{path}'.")]
    DisallowedKey { path: String, key: String },

    #[error("There is no '{key}' in the param '{path}'.")]
    MissingKey { path: String, key: String },

    #[error("{0}")]
    Config(String),

    #[error("Invalid syntax in the expression '{expr}' at position {location}: {message}")]
    ExpressionSyntax {
        expr: String,
        location: usize,
        message: String,
    },

    #[error("Error in the expression '{expr}': {message}")]
    Expression { expr: String, message: String },

    #[error("{0}")]
    Logic(String),

    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Error in the file '{}':\n{}", .path.display(), indent_lines(.source))]
    InFile {
        path: PathBuf,
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap an error with the identity of the document it came from.
    ///
    /// An error that is already wrapped is returned unchanged.
    pub fn in_file(path: &Path, err: ConfigError) -> Self {
        match err {
            wrapped @ ConfigError::InFile { .. } => wrapped,
            other => Self::InFile {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TypeMismatch { .. } | Self::KeyType { .. } => ErrorKind::Type,
            Self::ValueNotAllowed { .. } | Self::InvalidValue { .. } => ErrorKind::Value,
            Self::UnknownKey { .. }
            | Self::DisallowedKey { .. }
            | Self::MissingKey { .. }
            | Self::Config(_) => ErrorKind::Config,
            Self::ExpressionSyntax { .. } | Self::Expression { .. } => ErrorKind::Expression,
            Self::Logic(_) => ErrorKind::Logic,
            Self::Io { .. } => ErrorKind::Io,
            Self::InFile { source, .. } => source.kind(),
        }
    }

    /// The innermost error, skipping any file wrappers.
    pub fn root(&self) -> &ConfigError {
        match self {
            Self::InFile { source, .. } => source.root(),
            other => other,
        }
    }
}

fn indent_lines(err: &ConfigError) -> String {
    err.to_string()
        .lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_quoted(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(format!("YAML syntax error: {err}"))
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON syntax error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_file_prefixes_every_line() {
        let err = ConfigError::UnknownKey {
            path: "tasks.app".into(),
            key: "bogus".into(),
            valid: vec!["features".into(), "source".into()],
        };
        let wrapped = ConfigError::in_file(Path::new("buildconf.yaml"), err);
        let text = wrapped.to_string();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Error in the file 'buildconf.yaml':"));
        assert!(lines.all(|l| l.starts_with("  ")));
        assert_eq!(wrapped.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_in_file_does_not_double_wrap() {
        let err = ConfigError::in_file(Path::new("a.yaml"), ConfigError::config("boom"));
        let again = ConfigError::in_file(Path::new("b.yaml"), err);
        assert!(again.to_string().starts_with("Error in the file 'a.yaml'"));
    }

    #[test]
    fn test_kind_mapping() {
        let err = ConfigError::ValueNotAllowed {
            path: "toolchain".into(),
            value: "foo".into(),
            allowed: vec!["gcc".into()],
        };
        assert_eq!(err.kind(), ErrorKind::Value);
        assert_eq!(ConfigError::logic("x").kind(), ErrorKind::Logic);
        assert!(err.to_string().ends_with("Allowed values: 'gcc'"));
    }
}
