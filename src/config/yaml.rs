//! YAML documents with variable substitution.
//!
//! A YAML buildconf may start with a header document holding variables and
//! the substitution mode, separated from the main document by `---`:
//!
//! ```yaml
//! substmode: preparse
//! fragment: |
//!   program
//!   end program
//! ---
//! tasks:
//!   app: { text: $fragment }
//! ```
//!
//! `$NAME` and `${{ NAME }}` are replaced by header variables or environment
//! variables (environment wins, unless the mode ends with `-noenv`). Unknown
//! names are left as written.

use super::display_value;
use crate::error::{ConfigError, Result};
use crate::platform::Environ;
use regex_lite::{Captures, Regex};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

const SUBST_PATTERN: &str = r"\$\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\$([A-Za-z_][A-Za-z0-9_]*)";

/// How variables are substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstMode {
    /// Substitute in parsed string scalars.
    #[default]
    YamlTag,
    YamlTagNoEnv,
    /// Substitute in the text before parsing.
    Preparse,
    PreparseNoEnv,
}

impl SubstMode {
    pub fn uses_env(self) -> bool {
        matches!(self, SubstMode::YamlTag | SubstMode::Preparse)
    }

    pub fn is_preparse(self) -> bool {
        matches!(self, SubstMode::Preparse | SubstMode::PreparseNoEnv)
    }
}

impl FromStr for SubstMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "yaml-tag" => Ok(SubstMode::YamlTag),
            "yaml-tag-noenv" => Ok(SubstMode::YamlTagNoEnv),
            "preparse" => Ok(SubstMode::Preparse),
            "preparse-noenv" => Ok(SubstMode::PreparseNoEnv),
            other => Err(ConfigError::ValueNotAllowed {
                path: "substmode".to_string(),
                value: other.to_string(),
                allowed: ["yaml-tag", "yaml-tag-noenv", "preparse", "preparse-noenv"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        }
    }
}

/// Variables available for substitution.
struct Variables<'a> {
    header: BTreeMap<String, String>,
    environ: Option<&'a Environ>,
}

impl Variables<'_> {
    fn get(&self, name: &str) -> Option<&str> {
        self.environ
            .and_then(|env| env.get(name))
            .or_else(|| self.header.get(name).map(String::as_str))
    }
}

/// Parse YAML text into the top-level mapping of the main document.
pub fn parse(text: &str, environ: &Environ) -> Result<Mapping> {
    let (header_text, main_text) = split_documents(text)?;

    let (mode, header) = match header_text {
        Some(header_text) => parse_header(header_text)?,
        None => (SubstMode::default(), BTreeMap::new()),
    };
    debug!(?mode, vars = header.len(), "parsing YAML buildconf");

    let vars = Variables {
        header,
        environ: mode.uses_env().then_some(environ),
    };
    let re = Regex::new(SUBST_PATTERN)
        .map_err(|err| ConfigError::config(format!("invalid substitution pattern: {err}")))?;

    let value: Value = if mode.is_preparse() {
        let text = substitute(&re, main_text, &vars, quote_multiline);
        serde_yaml::from_str(&text)?
    } else {
        let mut value: Value = serde_yaml::from_str(main_text)?;
        substitute_scalars(&re, &mut value, &vars);
        value
    };

    match value {
        Value::Null => Err(ConfigError::config("The document has no config data")),
        Value::Mapping(map) => {
            if let Some(key) = map.keys().find(|k| !k.is_string()) {
                return Err(ConfigError::config(format!(
                    "The variable {} is not string",
                    display_value(key)
                )));
            }
            Ok(map)
        }
        _ => Err(ConfigError::config("The document has invalid structure")),
    }
}

/// Split into an optional header and the main document.
fn split_documents(text: &str) -> Result<(Option<&str>, &str)> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if is_doc_marker(line) {
            parts.push(&text[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    parts.push(&text[start..]);

    if parts.first().is_some_and(|first| is_blank(first)) && parts.len() > 1 {
        parts.remove(0);
    }

    match parts.as_slice() {
        [main] if is_blank(main) => Err(ConfigError::config("The document has no config data")),
        [main] => Ok((None, main)),
        [header, main] => {
            if is_blank(main) {
                return Err(ConfigError::config("The document has no config data"));
            }
            Ok((Some(header), main))
        }
        _ => Err(ConfigError::config(
            "Too many YAML documents: only a header and a main document are supported",
        )),
    }
}

fn is_doc_marker(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ")
}

fn is_blank(text: &str) -> bool {
    text.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with('#')
    })
}

fn parse_header(text: &str) -> Result<(SubstMode, BTreeMap<String, String>)> {
    let value: Value = serde_yaml::from_str(text)?;
    let map = match value {
        Value::Null => return Ok((SubstMode::default(), BTreeMap::new())),
        Value::Mapping(map) => map,
        _ => return Err(ConfigError::config("The header document has invalid structure")),
    };

    let mut mode = SubstMode::default();
    let mut vars = BTreeMap::new();
    for (key, value) in map {
        let Some(name) = key.as_str() else {
            return Err(ConfigError::config(format!(
                "The variable {} is not string",
                display_value(&key)
            )));
        };
        let text = match &value {
            Value::String(s) => s.clone(),
            Value::Bool(_) | Value::Number(_) => display_value(&value),
            other => {
                return Err(ConfigError::config(format!(
                    "The variable '{name}' has unsupported value {}",
                    display_value(other)
                )));
            }
        };
        if name == "substmode" {
            mode = text.parse()?;
        } else {
            vars.insert(name.to_string(), text);
        }
    }
    Ok((mode, vars))
}

fn substitute(re: &Regex, text: &str, vars: &Variables<'_>, render: fn(&str) -> String) -> String {
    re.replace_all(text, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        match vars.get(name) {
            Some(value) => render(value),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

/// Multi-line values become double-quoted scalars with escaped newlines.
fn quote_multiline(value: &str) -> String {
    if value.contains('\n') {
        serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

fn substitute_scalars(re: &Regex, value: &mut Value, vars: &Variables<'_>) {
    match value {
        Value::String(s) => {
            *s = substitute(re, s, vars, str::to_string);
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_scalars(re, item, vars);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute_scalars(re, item, vars);
            }
        }
        Value::Tagged(tagged) if tagged.tag == "subst" => {
            let mut inner = std::mem::replace(&mut tagged.value, Value::Null);
            substitute_scalars(re, &mut inner, vars);
            *value = inner;
        }
        Value::Tagged(tagged) => substitute_scalars(re, &mut tagged.value, vars),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_noenv(text: &str) -> Mapping {
        parse(text, &Environ::empty()).unwrap()
    }

    fn text_of<'a>(map: &'a Mapping, key: &str) -> &'a str {
        map.get(key).and_then(Value::as_str).unwrap()
    }

    #[test]
    fn test_plain_document() {
        let map = parse_noenv("a: 1\nb: [x, y]\n");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_header_vars_both_syntaxes() {
        let map = parse_noenv(
            "PATH_PART: /ddd\nPATH_PART2: GBV\n---\npath: /one${{PATH_PART}}/sss/${{ PATH_PART2 }}/two$PATH_PART/three\n",
        );
        assert_eq!(text_of(&map, "path"), "/one/ddd/sss/GBV/two/ddd/three");
    }

    #[test]
    fn test_unknown_var_left_literal() {
        let map = parse_noenv("x: 1\n---\nv: $UNKNOWN_VAR and ${{ OTHER }}\n");
        assert_eq!(text_of(&map, "v"), "$UNKNOWN_VAR and ${{ OTHER }}");
    }

    #[test]
    fn test_env_overrides_header_unless_noenv() {
        let env: Environ = [("OPT", "-O1")].into_iter().collect();
        let text = "OPT: -O2\n---\nflags: -O2 $OPT -Wall\n";
        let map = parse(text, &env).unwrap();
        assert_eq!(text_of(&map, "flags"), "-O2 -O1 -Wall");

        let text = "substmode: yaml-tag-noenv\nOPT: -O2\n---\nflags: -O2 $OPT -Wall\n";
        let map = parse(text, &env).unwrap();
        assert_eq!(text_of(&map, "flags"), "-O2 -O2 -Wall");
    }

    #[test]
    fn test_preparse_multiline_value() {
        let text = "substmode: preparse\nfragment: |\n  program\n  end program\n---\ntext: $fragment\n";
        let map = parse_noenv(text);
        assert_eq!(text_of(&map, "text"), "program\nend program\n");
    }

    #[test]
    fn test_preparse_can_build_structure() {
        let env: Environ = [("LIBS", "[m, dl]")].into_iter().collect();
        let map = parse("substmode: preparse\n---\nlibs: $LIBS\n", &env).unwrap();
        assert_eq!(map.get("libs").and_then(Value::as_sequence).map(Vec::len), Some(2));
    }

    #[test]
    fn test_subst_tag_is_removed() {
        let map = parse_noenv("NAME: app\n---\ntarget: !subst $NAME-bin\n");
        assert_eq!(map.get("target"), Some(&Value::String("app-bin".into())));
    }

    #[test]
    fn test_leading_marker_without_header() {
        let map = parse_noenv("---\na: 1\n");
        assert!(map.contains_key("a"));
    }

    #[test]
    fn test_empty_documents_are_errors() {
        let env = Environ::empty();
        assert!(parse("", &env).is_err());
        assert!(parse("---\n", &env).is_err());
        assert!(parse("# only a comment\n", &env).is_err());
        assert!(parse("a: 1\n---\n", &env).is_err());
    }

    #[test]
    fn test_invalid_documents_are_errors() {
        let env = Environ::empty();
        assert!(parse("a: [1, 2\n", &env).is_err());
        assert!(parse("- a\n- b\n", &env).is_err());
        assert!(parse("1: a\n", &env).is_err());
        assert!(parse("substmode: magic\n---\na: 1\n", &env).is_err());
    }
}
