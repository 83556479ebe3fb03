//! Static schema of configuration documents.
//!
//! A [`SchemaNode`] lists the kinds a param may have (more than one kind
//! makes a union), the schema of dict keys or list elements, and optional
//! allowed values. The full document schema is built once on first use by
//! [`conf_schema`].

use crate::error::{ConfigError, Result};
use crate::platform::KNOWN_PLATFORMS;
use crate::toolchains;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Primitive kind of a param.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kind {
    Bool,
    Int,
    Str,
    ListOfStrs,
    List,
    Dict,
    Func,
}

impl Kind {
    pub fn describe(self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::Int => "integer",
            Kind::Str => "string",
            Kind::ListOfStrs => "list of strings",
            Kind::List => "list",
            Kind::Dict => "dict/another map type",
            Kind::Func => "function",
        }
    }
}

/// Key of a dict schema: a named key or the wildcard matching any other string key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaKey {
    Named(String),
    Wildcard,
}

pub type Vars = BTreeMap<SchemaKey, SchemaNode>;

/// Dict vars computed from the node being validated (e.g. keyed by its `do`).
pub type VarsFn = fn(&Mapping, &str) -> Result<Vars>;

#[derive(Debug, Clone)]
pub enum DictVars {
    Static(Vars),
    Computed(VarsFn),
}

/// Allowed values of a string or of list elements.
#[derive(Debug, Clone)]
pub enum Allowed {
    Values(Vec<String>),
    /// Computed from `(root document, node, path)`.
    Computed(fn(&Value, &Value, &str) -> Result<Vec<String>>),
    /// Per-value check returning its own error.
    Check(fn(&str, &str) -> Result<()>),
}

/// Tags consumed after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trait {
    /// The string(s) are filesystem paths.
    Path,
}

#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub kinds: Vec<Kind>,
    pub vars: Option<DictVars>,
    pub allow_unknown_keys: bool,
    pub disallowed_keys: Vec<String>,
    pub required_keys: Vec<String>,
    pub vars_type: Option<Box<SchemaNode>>,
    pub allowed: Option<Allowed>,
    /// Check applied to every string key of a dict.
    pub key_check: Option<fn(&str, &str) -> Result<()>>,
    pub traits: Vec<Trait>,
}

impl SchemaNode {
    pub fn new(kinds: &[Kind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            vars: None,
            allow_unknown_keys: false,
            disallowed_keys: Vec::new(),
            required_keys: Vec::new(),
            vars_type: None,
            allowed: None,
            key_check: None,
            traits: Vec::new(),
        }
    }

    pub fn of(kind: Kind) -> Self {
        Self::new(&[kind])
    }

    pub fn vars<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, SchemaNode)>,
    {
        let mut map = match self.vars.take() {
            Some(DictVars::Static(existing)) => existing,
            _ => Vars::new(),
        };
        map.extend(
            vars.into_iter()
                .map(|(k, v)| (SchemaKey::Named(k.to_string()), v)),
        );
        self.vars = Some(DictVars::Static(map));
        self
    }

    pub fn with_vars(mut self, vars: Vars) -> Self {
        self.vars = Some(DictVars::Static(vars));
        self
    }

    pub fn wildcard(mut self, node: SchemaNode) -> Self {
        let mut map = match self.vars.take() {
            Some(DictVars::Static(existing)) => existing,
            _ => Vars::new(),
        };
        map.insert(SchemaKey::Wildcard, node);
        self.vars = Some(DictVars::Static(map));
        self
    }

    pub fn computed_vars(mut self, f: VarsFn) -> Self {
        self.vars = Some(DictVars::Computed(f));
        self
    }

    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown_keys = true;
        self
    }

    pub fn disallow(mut self, keys: &[&str]) -> Self {
        self.disallowed_keys
            .extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn require(mut self, keys: &[&str]) -> Self {
        self.required_keys.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn elements(mut self, node: SchemaNode) -> Self {
        self.vars_type = Some(Box::new(node));
        self
    }

    pub fn allowed_values(mut self, values: &[&str]) -> Self {
        self.allowed = Some(Allowed::Values(
            values.iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    pub fn allowed_by(mut self, f: fn(&Value, &Value, &str) -> Result<Vec<String>>) -> Self {
        self.allowed = Some(Allowed::Computed(f));
        self
    }

    pub fn checked_by(mut self, f: fn(&str, &str) -> Result<()>) -> Self {
        self.allowed = Some(Allowed::Check(f));
        self
    }

    pub fn keys_checked_by(mut self, f: fn(&str, &str) -> Result<()>) -> Self {
        self.key_check = Some(f);
        self
    }

    pub fn path(mut self) -> Self {
        self.traits.push(Trait::Path);
        self
    }

    pub fn has_trait(&self, t: Trait) -> bool {
        self.traits.contains(&t)
    }

    /// Human readable list of the candidate kinds (`string or list of strings`).
    pub fn describe(&self) -> String {
        self.kinds
            .iter()
            .map(|k| k.describe())
            .collect::<Vec<_>>()
            .join(" or ")
    }

    /// Schema of a named dict key, if statically known.
    pub fn var(&self, key: &str) -> Option<&SchemaNode> {
        match &self.vars {
            Some(DictVars::Static(vars)) => vars
                .get(&SchemaKey::Named(key.to_string()))
                .or_else(|| vars.get(&SchemaKey::Wildcard)),
            _ => None,
        }
    }
}

fn named(key: &str) -> SchemaKey {
    SchemaKey::Named(key.to_string())
}

fn str_node() -> SchemaNode {
    SchemaNode::of(Kind::Str)
}

fn bool_node() -> SchemaNode {
    SchemaNode::of(Kind::Bool)
}

fn strs_node() -> SchemaNode {
    SchemaNode::new(&[Kind::Str, Kind::ListOfStrs])
}

// ---------------------------------------------------------------------------
// Allowed-value checks

/// `N`, `N.N` or `N.N.N` without leading zeros.
fn is_ver_num(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() <= 3
        && parts.iter().all(|p| {
            !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) && (*p == "0" || !p.starts_with('0'))
        })
}

fn check_ver_num(value: &str, path: &str) -> Result<()> {
    if !value.is_empty() && !is_ver_num(value) {
        return Err(ConfigError::InvalidValue {
            path: path.to_string(),
            value: value.to_string(),
            reason: "It is not a valid version number.".to_string(),
        });
    }
    Ok(())
}

fn check_feature(value: &str, path: &str) -> Result<()> {
    if toolchains::is_known_feature(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            path: path.to_string(),
            value: value.to_string(),
            reason: "Unknown task feature.".to_string(),
        })
    }
}

/// Known toolchain kinds plus the names of custom toolchains.
fn allowed_toolchains(root: &Value, _node: &Value, _path: &str) -> Result<Vec<String>> {
    let mut names = toolchains::known_toolchains();
    if let Some(custom) = root.get("toolchains").and_then(Value::as_mapping) {
        names.extend(custom.keys().filter_map(Value::as_str).map(str::to_string));
    }
    Ok(names)
}

// ---------------------------------------------------------------------------
// Task params

fn paths_keys() -> [(&'static str, SchemaNode); 4] {
    [
        ("incl", strs_node()),
        ("excl", strs_node()),
        ("ignorecase", bool_node()),
        ("startdir", str_node()),
    ]
}

/// A path, a list of paths or path patterns, or a single pattern dict.
fn paths_node() -> SchemaNode {
    SchemaNode::new(&[Kind::Str, Kind::List, Kind::Dict])
        .vars(paths_keys())
        .elements(SchemaNode::new(&[Kind::Str, Kind::Dict]).vars(paths_keys()))
        .path()
}

fn conf_action_common() -> Vars {
    let actions: Vec<&str> = CONF_ACTIONS.iter().map(|(name, _)| *name).collect();
    let mut vars = Vars::new();
    vars.insert(named("do"), str_node().allowed_values(&actions));
    vars.insert(named("mandatory"), bool_node());
    vars
}

const CONF_ACTIONS: &[(&str, fn() -> Vec<(&'static str, SchemaNode)>)] = &[
    ("call-pyfunc", || vec![("func", SchemaNode::of(Kind::Func))]),
    ("find-program", || {
        vec![("names", strs_node()), ("paths", strs_node()), ("var", str_node())]
    }),
    ("find-file", || {
        vec![("names", strs_node()), ("paths", strs_node()), ("var", str_node())]
    }),
    ("check-headers", || {
        vec![("names", strs_node()), ("defname", str_node()), ("defines", strs_node())]
    }),
    ("check-libs", || {
        vec![
            ("names", strs_node()),
            ("fromtask", bool_node()),
            ("autodefine", bool_node()),
            ("defines", strs_node()),
        ]
    }),
    ("check-code", || {
        vec![
            ("label", str_node()),
            ("text", str_node()),
            ("file", str_node()),
            ("defname", str_node()),
            ("defines", strs_node()),
            ("execute", bool_node()),
        ]
    }),
    ("pkgconfig", || {
        vec![
            ("toolname", str_node()),
            ("toolpaths", strs_node()),
            ("packages", str_node()),
            ("cflags", bool_node()),
            ("libs", bool_node()),
            ("static", bool_node()),
            ("tool-atleast-version", str_node()),
            ("pkg-version", bool_node()),
        ]
    }),
    ("toolconfig", || {
        vec![
            ("msg", str_node()),
            ("toolname", str_node()),
            ("toolpaths", strs_node()),
            ("args", strs_node()),
            (
                "parse-as",
                str_node().allowed_values(&["none", "entire", "flags-libs"]),
            ),
            ("static", bool_node()),
            ("defname", str_node()),
            ("var", str_node()),
        ]
    }),
    ("write-config-header", || {
        vec![
            ("file", str_node()),
            ("guard", str_node()),
            ("remove-defines", bool_node()),
        ]
    }),
];

/// Vars of one configuration action, chosen by its `do` key.
fn conf_action_vars(node: &Mapping, _path: &str) -> Result<Vars> {
    let mut vars = conf_action_common();
    if let Some(action) = node.get("do").and_then(Value::as_str) {
        if let Some((_, extra)) = CONF_ACTIONS.iter().find(|(name, _)| *name == action) {
            vars.extend(extra().into_iter().map(|(k, v)| (named(k), v)));
        }
    }
    Ok(vars)
}

fn conf_actions_node(item_vars: VarsFn) -> SchemaNode {
    SchemaNode::of(Kind::List).elements(SchemaNode::new(&[Kind::Dict, Kind::Func]).computed_vars(item_vars))
}

/// Vars of one install-files item, chosen by its (possibly implied) `do` key.
fn install_files_vars(node: &Mapping, path: &str) -> Result<Vars> {
    let action = match node.get("do").and_then(Value::as_str) {
        Some(action) => action,
        None if node.contains_key("symlink") => "symlink",
        None => "copy",
    };

    if !node.contains_key("src") {
        return Err(ConfigError::MissingKey {
            path: path.to_string(),
            key: "src".to_string(),
        });
    }
    let dst_key = if action == "symlink" { "symlink" } else { "dst" };
    if !node.contains_key(dst_key) {
        return Err(ConfigError::MissingKey {
            path: path.to_string(),
            key: dst_key.to_string(),
        });
    }

    let mut vars = Vars::new();
    vars.insert(
        named("do"),
        str_node().allowed_values(&["copy", "copy-as", "symlink"]),
    );
    vars.insert(named("user"), str_node());
    vars.insert(named("group"), str_node());
    let chmod = SchemaNode::new(&[Kind::Int, Kind::Str]);
    let extra: Vec<(&str, SchemaNode)> = match action {
        "copy" => vec![
            ("src", paths_node()),
            ("dst", str_node()),
            ("chmod", chmod),
            ("follow-symlinks", bool_node()),
        ],
        "copy-as" => vec![
            ("src", str_node()),
            ("dst", str_node()),
            ("chmod", chmod),
            ("follow-symlinks", bool_node()),
        ],
        _ => vec![
            ("src", str_node()),
            ("symlink", str_node()),
            ("relative", bool_node()),
        ],
    };
    vars.extend(extra.into_iter().map(|(k, v)| (named(k), v)));
    Ok(vars)
}

fn install_files_node(item_vars: VarsFn) -> SchemaNode {
    SchemaNode::of(Kind::List).elements(SchemaNode::of(Kind::Dict).computed_vars(item_vars))
}

fn run_node() -> SchemaNode {
    SchemaNode::new(&[Kind::Str, Kind::Dict, Kind::Func]).vars([
        ("cmd", SchemaNode::new(&[Kind::Str, Kind::Func])),
        ("cwd", str_node()),
        ("env", SchemaNode::of(Kind::Dict).wildcard(str_node())),
        ("timeout", SchemaNode::of(Kind::Int)),
        ("shell", bool_node()),
        ("repeat", SchemaNode::of(Kind::Int)),
    ])
}

/// Params accepted by a task, by a buildtype and by the `set` of a rule.
pub fn task_params() -> Vars {
    let mut vars = Vars::new();
    let mut add = |k: &str, v: SchemaNode| {
        vars.insert(named(k), v);
    };
    add("target", str_node());
    add("features", strs_node().checked_by(check_feature));
    add("use", strs_node());
    add("source", paths_node());
    add(
        "toolchain",
        strs_node().allowed_by(allowed_toolchains),
    );
    add("libs", strs_node());
    add("libpath", strs_node().path());
    add("monitlibs", SchemaNode::new(&[Kind::Bool, Kind::Str, Kind::ListOfStrs]));
    add("stlibs", strs_node());
    add("stlibpath", strs_node().path());
    add("monitstlibs", SchemaNode::new(&[Kind::Bool, Kind::Str, Kind::ListOfStrs]));
    add("rpath", strs_node());
    add("ver-num", str_node().checked_by(check_ver_num));
    add("includes", strs_node().path());
    add("export-includes", SchemaNode::new(&[Kind::Bool, Kind::Str, Kind::ListOfStrs]));
    add("defines", strs_node());
    add("export-defines", SchemaNode::new(&[Kind::Bool, Kind::Str, Kind::ListOfStrs]));
    for flag in [
        "cflags", "cxxflags", "cppflags", "asflags", "dflags", "fcflags", "linkflags", "ldflags",
    ] {
        add(flag, strs_node());
    }
    add("install-path", SchemaNode::new(&[Kind::Bool, Kind::Str]));
    add("install-files", install_files_node(install_files_vars));
    add("configure", conf_actions_node(conf_action_vars));
    add("run", run_node());
    add("group-dependent-tasks", bool_node());
    add("normalize-target-name", bool_node());
    add("enabled", bool_node());
    add("objfile-index", SchemaNode::of(Kind::Int));
    with_select_variants(vars)
}

/// Add `<param>.select` for every param but `features`: a dict from
/// condition labels (and `default`) to values of the param itself.
fn with_select_variants(mut vars: Vars) -> Vars {
    let selects: Vec<(SchemaKey, SchemaNode)> = vars
        .iter()
        .filter_map(|(key, node)| match key {
            SchemaKey::Named(name) if name != "features" => {
                let select = SchemaNode::of(Kind::Dict)
                    .vars([("default", node.clone())])
                    .wildcard(node.clone());
                Some((named(&format!("{name}{SELECT_SUFFIX}")), select))
            }
            _ => None,
        })
        .collect();
    vars.extend(selects);
    vars
}

/// Suffix of params whose value is chosen by named conditions.
pub const SELECT_SUFFIX: &str = ".select";

// ---------------------------------------------------------------------------
// Rules and conditions

fn condition_vars() -> Vec<(&'static str, SchemaNode)> {
    vec![
        ("task", strs_node()),
        ("buildtype", strs_node()),
        ("platform", strs_node().allowed_values(KNOWN_PLATFORMS)),
        ("env", SchemaNode::of(Kind::Dict).wildcard(str_node())),
        ("expr", str_node()),
    ]
}

/// Names of `conditions` entries: non-empty words of letters, digits,
/// `_`, `+` and `-`, other than `default`.
fn check_condition_name(name: &str, path: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "Value cannot be empty."
    } else if name == "default" {
        "The 'default' value is not allowed."
    } else if !name.chars().all(|c| c.is_ascii_alphanumeric() || "_+-".contains(c)) {
        "It is not a valid condition name."
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidValue {
        path: path.to_string(),
        value: name.to_string(),
        reason: reason.to_string(),
    })
}

/// The `conditions` section: named conditions used by `.select` params.
fn conditions_node() -> SchemaNode {
    let condition = SchemaNode::of(Kind::Dict).vars([
        ("platform", strs_node()),
        ("host-os", strs_node()),
        ("distro", strs_node()),
        ("cpu-arch", strs_node()),
        ("toolchain", strs_node()),
        ("task", strs_node()),
        ("buildtype", strs_node()),
        ("env", SchemaNode::of(Kind::Dict).wildcard(str_node())),
    ]);
    SchemaNode::of(Kind::Dict)
        .wildcard(condition)
        .keys_checked_by(check_condition_name)
}

fn for_node() -> SchemaNode {
    SchemaNode::new(&[Kind::Dict, Kind::Str])
        .vars(condition_vars())
        .allowed_values(&["all"])
}

fn not_for_node() -> SchemaNode {
    SchemaNode::of(Kind::Dict).vars(condition_vars())
}

fn if_node() -> SchemaNode {
    SchemaNode::new(&[Kind::Str, Kind::Bool])
}

fn rule_node() -> SchemaNode {
    let mut set_vars = task_params();
    set_vars.insert(named("default-buildtype"), str_node());
    SchemaNode::of(Kind::Dict).vars([
        ("for", for_node()),
        ("not-for", not_for_node()),
        ("if", if_node()),
        ("set", SchemaNode::of(Kind::Dict).with_vars(set_vars)),
    ])
}

fn with_condition_keys(mut vars: Vars) -> Vars {
    vars.insert(named("for"), for_node());
    vars.insert(named("not-for"), not_for_node());
    vars.insert(named("if"), if_node());
    vars
}

fn sugar_conf_action_vars(node: &Mapping, path: &str) -> Result<Vars> {
    conf_action_vars(node, path).map(with_condition_keys)
}

fn sugar_install_vars(node: &Mapping, path: &str) -> Result<Vars> {
    install_files_vars(node, path).map(with_condition_keys)
}

// ---------------------------------------------------------------------------
// Document

fn build_conf_schema() -> SchemaNode {
    let platform = SchemaNode::of(Kind::Dict).vars([("valid", strs_node()), ("default", str_node())]);
    let platforms = SchemaNode::of(Kind::Dict).vars(KNOWN_PLATFORMS.iter().map(|p| (*p, platform.clone())));

    let mut default_by_platform: Vec<(&str, SchemaNode)> =
        KNOWN_PLATFORMS.iter().map(|p| (*p, str_node())).collect();
    default_by_platform.push(("_", str_node()));
    let buildtypes = SchemaNode::of(Kind::Dict)
        .wildcard(SchemaNode::of(Kind::Dict).with_vars(task_params()))
        .vars([(
            "default",
            SchemaNode::new(&[Kind::Str, Kind::Dict]).vars(default_by_platform),
        )]);

    let toolchains = SchemaNode::of(Kind::Dict).wildcard(
        SchemaNode::of(Kind::Dict)
            .vars([("kind", str_node())])
            .wildcard(str_node()),
    );

    let tasks = SchemaNode::of(Kind::Dict).wildcard(
        SchemaNode::of(Kind::Dict)
            .with_vars(task_params())
            .vars([(
                "buildtypes",
                SchemaNode::of(Kind::Dict).wildcard(SchemaNode::of(Kind::Dict).with_vars(task_params())),
            )]),
    );

    SchemaNode::of(Kind::Dict)
        .vars([
            ("startdir", str_node().path()),
            ("buildroot", str_node().path()),
            ("realbuildroot", str_node().path()),
            ("srcroot", str_node().path()),
            (
                "features",
                SchemaNode::of(Kind::Dict).vars([
                    ("autoconfig", bool_node()),
                    ("monitor-files", strs_node()),
                    ("hash-algo", str_node().allowed_values(&["sha1", "md5"])),
                    ("db-format", str_node().allowed_values(&["py", "pickle", "msgpack"])),
                    ("provide-edep-targets", bool_node()),
                    ("build-work-dir-name", str_node()),
                ]),
            ),
            ("subdirs", SchemaNode::of(Kind::ListOfStrs)),
            (
                "project",
                SchemaNode::of(Kind::Dict).vars([
                    ("name", str_node()),
                    ("version", str_node()),
                    ("root", str_node()),
                ]),
            ),
            ("conditions", conditions_node()),
            ("toolchains", toolchains),
            ("platforms", platforms),
            ("buildtypes", buildtypes),
            ("tasks", tasks),
            ("matrix", SchemaNode::of(Kind::List).elements(rule_node())),
            ("configure", conf_actions_node(sugar_conf_action_vars)),
            ("install", install_files_node(sugar_install_vars)),
        ])
        .allow_unknown()
}

static CONF_SCHEMA: LazyLock<SchemaNode> = LazyLock::new(build_conf_schema);

/// Schema of a whole configuration document.
pub fn conf_schema() -> &'static SchemaNode {
    &CONF_SCHEMA
}

/// Whether a resolved task param holds filesystem paths.
pub fn is_path_param(name: &str) -> bool {
    static TASK_PARAMS: LazyLock<Vars> = LazyLock::new(task_params);
    TASK_PARAMS
        .get(&named(name))
        .is_some_and(|node| node.has_trait(Trait::Path))
}
