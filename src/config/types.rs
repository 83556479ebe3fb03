//! Typed sections of a validated configuration.
//!
//! [`RawConfig`] is built once from a validated document with defaults
//! applied. Param sets stay as YAML mappings since their keys are open
//! ended; everything the resolver inspects has an explicit field.

use super::{display_value, join_key, to_list};
use crate::error::{ConfigError, Result};
use crate::platform::Environ;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Sections a sub-config inherits from its parent.
pub const INHERITED_SECTIONS: &[&str] = &["project", "features", "buildtypes", "toolchains", "platforms"];

/// `project` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_root() -> String {
    ".".to_string()
}

/// `features` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturesSection {
    #[serde(default = "default_true")]
    pub autoconfig: bool,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for FeaturesSection {
    fn default() -> Self {
        Self {
            autoconfig: true,
            other: BTreeMap::new(),
        }
    }
}

/// One entry of the `platforms` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlatformSection {
    pub valid: Vec<String>,
    pub default: Option<String>,
}

/// `buildtypes.default`: one name, or names per platform with `_` as fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildtypeDefault {
    Name(String),
    ByPlatform(BTreeMap<String, String>),
}

impl BuildtypeDefault {
    pub fn for_platform(&self, platform: &str) -> Option<&str> {
        match self {
            BuildtypeDefault::Name(name) => Some(name),
            BuildtypeDefault::ByPlatform(map) => map
                .get(platform)
                .or_else(|| map.get("_"))
                .map(String::as_str),
        }
    }
}

/// One entry of the `tasks` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSection {
    /// Params without the nested `buildtypes`.
    pub params: Mapping,
    /// Task-specific params per buildtype.
    pub buildtypes: BTreeMap<String, Mapping>,
}

/// Declared custom toolchain.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomToolchain {
    pub kind: String,
    pub vars: BTreeMap<String, PathBuf>,
}

/// A validated configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct RawConfig {
    /// Path of the document.
    pub path: PathBuf,
    /// Directory relative paths of the document are resolved against.
    pub startdir: PathBuf,
    pub project: ProjectSection,
    pub features: FeaturesSection,
    pub toolchains: BTreeMap<String, Mapping>,
    pub platforms: BTreeMap<String, PlatformSection>,
    pub buildtypes: BTreeMap<String, Mapping>,
    pub buildtype_default: Option<BuildtypeDefault>,
    pub tasks: BTreeMap<String, TaskSection>,
    pub conditions: BTreeMap<String, NamedCondition>,
    /// Overlay rules in application order, inherited ones first.
    pub matrix: Vec<OverlayRule>,
    /// How many leading `matrix` rules come from parent configs.
    pub inherited_rules: usize,
    pub buildroot: String,
    pub srcroot: String,
    pub realbuildroot: Option<String>,
    /// Sub-config directories as written, relative to the document.
    pub subdirs: Vec<String>,
    /// Startdir of the topmost config of the hierarchy.
    pub rootdir: PathBuf,
    /// `project`, `features`, `buildtypes`, `toolchains` and `platforms`
    /// after defaults and inheritance; sub-configs merge over these.
    pub inheritable: Mapping,
}

impl RawConfig {
    /// Build typed sections from a validated mapping with defaults applied.
    ///
    /// `matrix` holds the rules of the document, sugar rules included.
    pub fn from_mapping(
        path: PathBuf,
        startdir: PathBuf,
        attrs: &Mapping,
        matrix: Vec<OverlayRule>,
    ) -> Result<Self> {
        let project = section(attrs, "project")?;
        let conditions = string_keyed(attrs.get("conditions"), "conditions")?
            .into_iter()
            .map(|(name, value)| {
                let condition = NamedCondition::from_value(&value, &join_key("conditions", &name))?;
                Ok((name, condition))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        let inheritable: Mapping = INHERITED_SECTIONS
            .iter()
            .filter_map(|key| attrs.get(*key).map(|v| (Value::from(*key), v.clone())))
            .collect();
        let features = section(attrs, "features")?;

        let toolchains = string_keyed(attrs.get("toolchains"), "toolchains")?
            .into_iter()
            .map(|(name, value)| {
                let vars = as_mapping(&value, &join_key("toolchains", &name))?;
                Ok((name, vars))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let mut platforms = BTreeMap::new();
        for (name, value) in string_keyed(attrs.get("platforms"), "platforms")? {
            let valid = to_list(value.get("valid").unwrap_or(&Value::Null));
            let default = value
                .get("default")
                .and_then(Value::as_str)
                .map(str::to_string);
            platforms.insert(name, PlatformSection { valid, default });
        }

        let mut buildtypes = BTreeMap::new();
        let mut buildtype_default = None;
        for (name, value) in string_keyed(attrs.get("buildtypes"), "buildtypes")? {
            if name == "default" {
                buildtype_default = Some(serde_yaml::from_value(value)?);
            } else {
                let params = as_mapping(&value, &join_key("buildtypes", &name))?;
                buildtypes.insert(name, params);
            }
        }

        let mut tasks = BTreeMap::new();
        for (name, value) in string_keyed(attrs.get("tasks"), "tasks")? {
            let key_path = join_key("tasks", &name);
            let mut params = as_mapping(&value, &key_path)?;
            let nested = params.remove("buildtypes").unwrap_or(Value::Null);
            let buildtypes = string_keyed(Some(&nested), &join_key(&key_path, "buildtypes"))?
                .into_iter()
                .map(|(bt, v)| {
                    let bt_path = join_key(&key_path, &bt);
                    Ok((bt, as_mapping(&v, &bt_path)?))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            tasks.insert(name, TaskSection { params, buildtypes });
        }

        let text = |key: &str| attrs.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            path,
            rootdir: startdir.clone(),
            startdir,
            project,
            features,
            toolchains,
            platforms,
            buildtypes,
            buildtype_default,
            tasks,
            conditions,
            matrix,
            inherited_rules: 0,
            buildroot: text("buildroot").unwrap_or_default(),
            srcroot: text("srcroot").unwrap_or_default(),
            realbuildroot: text("realbuildroot"),
            subdirs: to_list(attrs.get("subdirs").unwrap_or(&Value::Null)),
            inheritable,
        })
    }

    /// Directory holding the document.
    pub fn confdir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Rules declared by this config itself.
    pub fn own_rules(&self) -> &[OverlayRule] {
        self.matrix.get(self.inherited_rules..).unwrap_or_default()
    }

    /// All buildtype names declared globally or inside tasks.
    pub fn declared_buildtypes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buildtypes.keys().cloned().collect();
        for task in self.tasks.values() {
            names.extend(task.buildtypes.keys().cloned());
        }
        names.sort();
        names.dedup();
        names
    }
}

fn section<T: serde::de::DeserializeOwned + Default>(attrs: &Mapping, key: &str) -> Result<T> {
    match attrs.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_yaml::from_value(value.clone())
            .map_err(|err| ConfigError::config(format!("Invalid param '{key}': {err}"))),
    }
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            root: default_root(),
        }
    }
}

fn as_mapping(value: &Value, path: &str) -> Result<Mapping> {
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(map) => Ok(map.clone()),
        other => Err(ConfigError::TypeMismatch {
            path: path.to_string(),
            value: display_value(other),
            expected: "dict/another map type".to_string(),
        }),
    }
}

/// Entries of a string-keyed map section, in document order.
fn string_keyed(value: Option<&Value>, path: &str) -> Result<Vec<(String, Value)>> {
    let map = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(value) => as_mapping(value, path)?,
    };
    map.into_iter()
        .map(|(k, v)| match k {
            Value::String(name) => Ok((name, v)),
            other => Err(ConfigError::KeyType {
                path: path.to_string(),
                key: display_value(&other),
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Conditions and rules

/// What a rule condition is matched against.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub task: &'a str,
    pub buildtype: &'a str,
    pub platform: &'a str,
    pub environ: &'a Environ,
}

/// Filter of a `for` or `not-for` clause. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    pub task: Option<Vec<String>>,
    pub buildtype: Option<Vec<String>>,
    pub platform: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
    pub expr: Option<String>,
}

impl Condition {
    /// Condition matching everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse `all`, a condition dict, or nothing.
    pub fn from_value(value: &Value, path: &str) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::all()),
            Value::String(s) if s == "all" => return Ok(Self::all()),
            Value::Mapping(map) => map,
            other => {
                return Err(ConfigError::TypeMismatch {
                    path: path.to_string(),
                    value: display_value(other),
                    expected: "dict/another map type or 'all'".to_string(),
                });
            }
        };

        let words = |key: &str| {
            map.get(key)
                .map(to_list)
                .filter(|names| !names.is_empty())
        };
        let env = match map.get("env") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                string_keyed(Some(value), &join_key(path, "env"))?
                    .into_iter()
                    .map(|(k, v)| (k, super::scalar_text(&v)))
                    .collect(),
            ),
        };

        Ok(Self {
            task: words("task"),
            buildtype: words("buildtype"),
            platform: words("platform"),
            env,
            expr: map.get("expr").and_then(Value::as_str).map(str::to_string),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether every set field matches; `eval` evaluates the `expr` field.
    pub fn matches<F>(&self, ctx: &MatchContext<'_>, eval: F) -> Result<bool>
    where
        F: FnOnce(&str) -> Result<bool>,
    {
        let contains = |names: &Option<Vec<String>>, name: &str| {
            names.as_ref().is_none_or(|names| names.iter().any(|n| n == name))
        };
        if !contains(&self.task, ctx.task)
            || !contains(&self.buildtype, ctx.buildtype)
            || !contains(&self.platform, ctx.platform)
        {
            return Ok(false);
        }
        if let Some(env) = &self.env {
            if env.iter().any(|(k, v)| ctx.environ.get(k) != Some(v.as_str())) {
                return Ok(false);
            }
        }
        match &self.expr {
            Some(expr) => eval(expr),
            None => Ok(true),
        }
    }
}

/// Entry of the `conditions` section, referenced by `.select` labels.
///
/// Unset fields match anything. `toolchain` matches when every listed
/// toolchain is used by the task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedCondition {
    pub platform: Option<Vec<String>>,
    pub host_os: Option<Vec<String>>,
    pub distro: Option<Vec<String>>,
    pub cpu_arch: Option<Vec<String>>,
    pub toolchain: Option<Vec<String>>,
    pub task: Option<Vec<String>>,
    pub buildtype: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
}

impl NamedCondition {
    pub fn from_value(value: &Value, path: &str) -> Result<Self> {
        let map = as_mapping(value, path)?;
        let words = |key: &str| map.get(key).map(to_list);
        let env = string_keyed(map.get("env"), &join_key(path, "env"))?
            .into_iter()
            .map(|(k, v)| (k, super::scalar_text(&v)))
            .collect();
        Ok(Self {
            platform: words("platform"),
            host_os: words("host-os"),
            distro: words("distro"),
            cpu_arch: words("cpu-arch"),
            toolchain: words("toolchain"),
            task: words("task"),
            buildtype: words("buildtype"),
            env,
        })
    }

    /// Condition matching one platform.
    pub fn for_platform(name: &str) -> Self {
        Self {
            platform: Some(vec![name.to_string()]),
            ..Self::default()
        }
    }

    /// Condition matching tasks that use one toolchain.
    pub fn for_toolchain(name: &str) -> Self {
        Self {
            toolchain: Some(vec![name.to_string()]),
            ..Self::default()
        }
    }
}

/// `if` filter of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfFilter {
    Bool(bool),
    Expr(String),
}

impl IfFilter {
    fn from_value(value: &Value, path: &str) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(IfFilter::Bool(*b))),
            Value::String(s) => Ok(Some(IfFilter::Expr(s.clone()))),
            other => Err(ConfigError::TypeMismatch {
                path: path.to_string(),
                value: display_value(other),
                expected: "string or bool".to_string(),
            }),
        }
    }
}

/// Conditional param overlay: `set` applies where `for` matches and `not-for` does not.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRule {
    pub for_: Condition,
    pub not_for: Condition,
    pub if_: Option<IfFilter>,
    pub set: Mapping,
    /// Whether the rule declared `for` or `not-for` at all.
    pub has_condition: bool,
    identity: u64,
}

impl OverlayRule {
    /// Build a rule from the raw `for`, `not-for` and `if` values.
    pub fn new(for_: &Value, not_for: &Value, if_: &Value, set: Mapping, path: &str) -> Result<Self> {
        Ok(Self {
            for_: Condition::from_value(for_, &join_key(path, "for"))?,
            not_for: Condition::from_value(not_for, &join_key(path, "not-for"))?,
            if_: IfFilter::from_value(if_, &join_key(path, "if"))?,
            set,
            has_condition: !for_.is_null() || !not_for.is_null(),
            identity: condition_identity(for_, not_for, if_),
        })
    }

    /// Parse one `matrix` item.
    pub fn from_value(item: &Value, path: &str) -> Result<Self> {
        let Some(map) = item.as_mapping() else {
            return Err(ConfigError::TypeMismatch {
                path: path.to_string(),
                value: display_value(item),
                expected: "dict/another map type".to_string(),
            });
        };
        let get = |key: &str| map.get(key).cloned().unwrap_or(Value::Null);
        let set = as_mapping(&get("set"), &join_key(path, "set"))?;
        Self::new(&get("for"), &get("not-for"), &get("if"), set, path)
    }

    /// Hash of the condition values; rules with equal conditions share it.
    pub fn identity(&self) -> u64 {
        self.identity
    }

    /// `set.default-buildtype`, if the rule declares one.
    pub fn default_buildtype(&self) -> Option<&str> {
        self.set.get("default-buildtype").and_then(Value::as_str)
    }

    /// Whether the rule applies in `ctx`; `eval` evaluates expressions.
    ///
    /// An empty `not-for` excludes nothing.
    pub fn applies<F>(&self, ctx: &MatchContext<'_>, eval: F) -> Result<bool>
    where
        F: Fn(&str) -> Result<bool>,
    {
        if !self.for_.matches(ctx, &eval)? {
            return Ok(false);
        }
        if !self.not_for.is_empty() && self.not_for.matches(ctx, &eval)? {
            return Ok(false);
        }
        match &self.if_ {
            None => Ok(true),
            Some(IfFilter::Bool(b)) => Ok(*b),
            Some(IfFilter::Expr(expr)) => eval(expr),
        }
    }
}

/// Stable hash of a rule condition.
pub fn condition_identity(for_: &Value, not_for: &Value, if_: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    for_.hash(&mut hasher);
    not_for.hash(&mut hasher);
    if_.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn ctx<'a>(task: &'a str, buildtype: &'a str, environ: &'a Environ) -> MatchContext<'a> {
        MatchContext {
            task,
            buildtype,
            platform: "linux",
            environ,
        }
    }

    #[test]
    fn test_condition_from_value() {
        let cond = Condition::from_value(&yaml("{task: 'a b', platform: [linux]}"), "for").unwrap();
        assert_eq!(cond.task, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(cond.platform, Some(vec!["linux".to_string()]));
        assert!(cond.buildtype.is_none());
        assert!(Condition::from_value(&yaml("all"), "for").unwrap().is_empty());
        assert!(Condition::from_value(&yaml("5"), "for").is_err());
    }

    #[test]
    fn test_condition_matches() {
        let env: Environ = [("MODE", "ci")].into_iter().collect();
        let cond = Condition::from_value(&yaml("{task: app, env: {MODE: ci}}"), "for").unwrap();
        let never = |_: &str| -> Result<bool> { unreachable!() };
        assert!(cond.matches(&ctx("app", "debug", &env), never).unwrap());
        assert!(!cond.matches(&ctx("lib", "debug", &env), never).unwrap());
        let empty = Environ::empty();
        assert!(!cond.matches(&ctx("app", "debug", &empty), never).unwrap());
    }

    #[test]
    fn test_rule_applies_with_not_for_and_if() {
        let env = Environ::empty();
        let rule = OverlayRule::from_value(
            &yaml("{for: all, not-for: {buildtype: release}, if: false, set: {libs: m}}"),
            "matrix.[0]",
        )
        .unwrap();
        let eval = |_: &str| Ok(true);
        assert!(!rule.applies(&ctx("app", "debug", &env), eval).unwrap());

        let rule = OverlayRule::from_value(
            &yaml("{not-for: {buildtype: release}, set: {libs: m}}"),
            "matrix.[0]",
        )
        .unwrap();
        assert!(rule.applies(&ctx("app", "debug", &env), eval).unwrap());
        assert!(!rule.applies(&ctx("app", "release", &env), eval).unwrap());
    }

    #[test]
    fn test_empty_not_for_excludes_nothing() {
        let env = Environ::empty();
        let rule = OverlayRule::new(&yaml("all"), &yaml("{}"), &Value::Null, Mapping::new(), "r").unwrap();
        assert!(rule.applies(&ctx("any", "debug", &env), |_| Ok(true)).unwrap());
    }

    #[test]
    fn test_identity_depends_on_condition_only() {
        let a = OverlayRule::from_value(&yaml("{for: {task: a}, set: {x: 1}}"), "m").unwrap();
        let b = OverlayRule::from_value(&yaml("{for: {task: a}, set: {y: 2}}"), "m").unwrap();
        let c = OverlayRule::from_value(&yaml("{for: {task: b}, set: {x: 1}}"), "m").unwrap();
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn test_named_condition_from_value() {
        let cond = NamedCondition::from_value(
            &yaml("{platform: 'linux darwin', cpu-arch: x86_64, env: {CI: 1}}"),
            "conditions.unix",
        )
        .unwrap();
        assert_eq!(cond.platform, Some(vec!["linux".to_string(), "darwin".to_string()]));
        assert_eq!(cond.cpu_arch, Some(vec!["x86_64".to_string()]));
        assert_eq!(cond.env["CI"], "1");
        assert!(cond.toolchain.is_none());
        assert!(NamedCondition::from_value(&yaml("[linux]"), "conditions.x").is_err());
    }

    #[test]
    fn test_raw_config_sections() {
        let attrs: Mapping = serde_yaml::from_str(
            r#"
project: { name: demo }
platforms: { linux: { valid: "debug release", default: release } }
buildtypes: { debug: { cxxflags: -O0 }, default: { linux: debug, _: release } }
tasks: { app: { features: cxx, buildtypes: { profile: { cxxflags: -pg } } } }
"#,
        )
        .unwrap();
        let conf = RawConfig::from_mapping("b.yaml".into(), "/p".into(), &attrs, Vec::new()).unwrap();
        assert_eq!(conf.project.name, "demo");
        assert_eq!(conf.project.root, ".");
        assert!(conf.features.autoconfig);
        assert_eq!(conf.platforms["linux"].valid, ["debug", "release"]);
        assert_eq!(
            conf.buildtype_default.as_ref().and_then(|d| d.for_platform("windows")),
            Some("release")
        );
        assert!(!conf.tasks["app"].params.contains_key("buildtypes"));
        assert_eq!(conf.declared_buildtypes(), ["debug", "profile"]);
    }
}
