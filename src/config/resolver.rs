//! Buildtype selection and per-task parameter resolution.
//!
//! [`BuildConf`] wraps a [`RawConfig`] for one platform and environment.
//! Task params for a buildtype are merged in this order, later wins:
//! 1. the global `buildtypes.<bt>` params
//! 2. the task's own params
//! 3. the task's nested `buildtypes.<bt>` params
//! 4. every applicable overlay rule, in rule order
//! 5. `<param>.select` values chosen by named conditions
//! 6. flag and compiler variables from the environment
//!
//! Results are memoized per buildtype.

use super::merge::shallow_merge;
use super::schema::{SELECT_SUFFIX, is_path_param};
use super::to_list;
use super::types::{
    CustomToolchain, FeaturesSection, MatchContext, NamedCondition, OverlayRule, RawConfig,
};
use crate::error::{ConfigError, Result};
use crate::expression::{self, Resolved, Value as ExprValue};
use crate::paths::{PathValue, unfold_path};
use crate::platform::{Environ, KNOWN_PLATFORMS, Platform};
use crate::toolchains::{self, LANGUAGES};
use serde_yaml::{Mapping, Value};
use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolved params of every task for one buildtype.
pub type TaskMap = BTreeMap<String, Mapping>;

/// A loaded configuration resolved against a platform and an environment.
#[derive(Debug)]
pub struct BuildConf {
    raw: RawConfig,
    platform: Platform,
    environ: Environ,
    cpu_arch: String,
    distro: Option<String>,
    /// Buildtype chosen by [`BuildConf::apply_buildtype`]
    selected: Option<String>,
    supported: OnceCell<Vec<String>>,
    default: OnceCell<String>,
    tasks: RefCell<HashMap<String, Arc<TaskMap>>>,
}

impl BuildConf {
    pub fn new(raw: RawConfig, platform: Platform, environ: Environ) -> Self {
        Self {
            raw,
            platform,
            environ,
            cpu_arch: std::env::consts::ARCH.to_string(),
            distro: None,
            selected: None,
            supported: OnceCell::new(),
            default: OnceCell::new(),
            tasks: RefCell::new(HashMap::new()),
        }
    }

    /// Host details matched by the `cpu-arch` and `distro` fields of
    /// named conditions. The CPU defaults to the running one; without a
    /// distro, conditions naming one never match.
    pub fn with_host(mut self, cpu_arch: impl Into<String>, distro: Option<String>) -> Self {
        self.cpu_arch = cpu_arch.into();
        self.distro = distro;
        self
    }

    pub fn raw(&self) -> &RawConfig {
        &self.raw
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn path(&self) -> &Path {
        &self.raw.path
    }

    pub fn startdir(&self) -> &Path {
        &self.raw.startdir
    }

    /// Startdir of the topmost config of the hierarchy.
    pub fn rootdir(&self) -> &Path {
        &self.raw.rootdir
    }

    pub fn project_name(&self) -> &str {
        &self.raw.project.name
    }

    pub fn project_version(&self) -> &str {
        &self.raw.project.version
    }

    pub fn features(&self) -> &FeaturesSection {
        &self.raw.features
    }

    /// Names of declared tasks and of tasks named by own rule conditions, sorted.
    ///
    /// Rules inherited from a parent config never add tasks.
    pub fn task_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.raw.tasks.keys().cloned().collect();
        for rule in self.raw.own_rules() {
            if let Some(tasks) = &rule.for_.task {
                names.extend(tasks.iter().cloned());
            }
        }
        names.into_iter().collect()
    }

    // -----------------------------------------------------------------------
    // Buildtypes

    /// Buildtypes valid on the current platform, sorted.
    ///
    /// Never empty: a config without any buildtype supports only `""`.
    pub fn supported_buildtypes(&self) -> Result<&[String]> {
        if let Some(supported) = self.supported.get() {
            return Ok(supported);
        }
        let computed = self.compute_supported()?;
        Ok(self.supported.get_or_init(|| computed))
    }

    fn compute_supported(&self) -> Result<Vec<String>> {
        let platform = self.platform.as_str();
        let (mut supported, mut platform_found): (BTreeSet<String>, bool) =
            match self.raw.platforms.get(platform) {
                Some(section) => (section.valid.iter().cloned().collect(), true),
                None => (self.raw.declared_buildtypes().into_iter().collect(), false),
            };

        for rule in &self.raw.matrix {
            for (condition, is_for) in [(&rule.for_, true), (&rule.not_for, false)] {
                let Some(buildtypes) = &condition.buildtype else {
                    continue;
                };
                match &condition.platform {
                    None => supported.extend(buildtypes.iter().cloned()),
                    Some(platforms) => {
                        let named = platforms.iter().any(|p| p == platform);
                        if named == is_for {
                            platform_found = true;
                            supported.extend(buildtypes.iter().cloned());
                        }
                    }
                }
            }
        }
        supported.remove("default");

        if supported.is_empty() {
            if platform_found {
                return Err(ConfigError::config(format!(
                    "No valid build types for platform '{platform}' in config"
                )));
            }
            return Ok(vec![String::new()]);
        }
        Ok(supported.into_iter().collect())
    }

    /// Buildtype used when none is chosen explicitly.
    pub fn default_buildtype(&self) -> Result<&str> {
        if let Some(default) = self.default.get() {
            return Ok(default);
        }
        let computed = self.compute_default()?;
        Ok(self.default.get_or_init(|| computed))
    }

    fn compute_default(&self) -> Result<String> {
        let platform = self.platform.as_str();
        let supported = self.supported_buildtypes()?;

        let from_rules = |scoped: bool| {
            self.raw
                .matrix
                .iter()
                .rev()
                .filter(|rule| rule_scope(rule, platform) == Some(scoped))
                .find_map(OverlayRule::default_buildtype)
        };

        let (buildtype, source) = if let Some(bt) = self
            .raw
            .platforms
            .get(platform)
            .and_then(|p| p.default.as_deref())
        {
            (bt.to_string(), "platforms")
        } else if let Some(bt) = from_rules(true).or_else(|| from_rules(false)) {
            (bt.to_string(), "matrix")
        } else if let Some(bt) = self
            .raw
            .buildtype_default
            .as_ref()
            .and_then(|d| d.for_platform(platform))
        {
            (bt.to_string(), "buildtypes")
        } else if let [only] = supported {
            (only.clone(), "buildtypes")
        } else {
            (String::new(), "buildtypes")
        };

        if !supported.contains(&buildtype) {
            return Err(ConfigError::config(format!(
                "Default build type '{buildtype}' from the config variable '{source}' is invalid \
                 for the current supported values.\nSupported values: {}.",
                quoted_list(supported)
            )));
        }
        debug!(buildtype = %buildtype, source, "default buildtype");
        Ok(buildtype)
    }

    /// Select the buildtype all buildtype-dependent reads use.
    ///
    /// Selecting the same buildtype again is a no-op; selecting another one
    /// is an error.
    pub fn apply_buildtype(&mut self, buildtype: &str) -> Result<()> {
        if let Some(selected) = &self.selected {
            if selected == buildtype {
                return Ok(());
            }
            return Err(ConfigError::logic(format!(
                "Build type '{selected}' is already applied, can not change it to '{buildtype}'"
            )));
        }

        self.check_buildtype(buildtype)?;
        info!(buildtype, "buildtype selected");
        self.selected = Some(buildtype.to_string());
        Ok(())
    }

    /// A config with tasks accepts only its supported buildtypes.
    fn check_buildtype(&self, buildtype: &str) -> Result<()> {
        let supported = self.supported_buildtypes()?;
        if !supported.iter().any(|bt| bt == buildtype) && !self.task_names().is_empty() {
            return Err(ConfigError::config(format!(
                "Invalid build type: '{buildtype}' for config '{}'\nChoose from: [{}]",
                self.raw.path.display(),
                quoted_list(supported)
            )));
        }
        Ok(())
    }

    pub fn selected_buildtype(&self) -> Result<&str> {
        self.selected.as_deref().ok_or_else(|| {
            ConfigError::logic(
                "Build type wasn't applied yet. Call apply_buildtype before reading tasks.",
            )
        })
    }

    // -----------------------------------------------------------------------
    // Tasks

    /// Resolved params of every task for the selected buildtype.
    pub fn tasks(&self) -> Result<Arc<TaskMap>> {
        let buildtype = self.selected_buildtype()?;
        self.tasks_for(buildtype)
    }

    /// Resolved params of every task for `buildtype`, which must be
    /// supported just as for [`BuildConf::apply_buildtype`].
    ///
    /// Does not select `buildtype`.
    pub fn tasks_for(&self, buildtype: &str) -> Result<Arc<TaskMap>> {
        if let Some(tasks) = self.tasks.borrow().get(buildtype) {
            return Ok(Arc::clone(tasks));
        }
        self.check_buildtype(buildtype)?;
        let tasks = Arc::new(self.resolve_tasks(buildtype)?);
        self.tasks
            .borrow_mut()
            .insert(buildtype.to_string(), Arc::clone(&tasks));
        Ok(tasks)
    }

    fn resolve_tasks(&self, buildtype: &str) -> Result<TaskMap> {
        debug!(buildtype, "resolving tasks");
        let global = self.raw.buildtypes.get(buildtype);

        let mut tasks = TaskMap::new();
        for name in self.task_names() {
            let mut params = Mapping::new();
            if let Some(global) = global {
                shallow_merge(&mut params, global);
            }
            if let Some(task) = self.raw.tasks.get(&name) {
                shallow_merge(&mut params, &task.params);
                if let Some(own) = task.buildtypes.get(buildtype) {
                    shallow_merge(&mut params, own);
                }
            }
            tasks.insert(name, params);
        }

        for (index, rule) in self.raw.matrix.iter().enumerate() {
            if !rule.has_condition {
                warn!(index, "matrix has an item without 'for' and 'not-for', it's probably a mistake");
            }
            for (name, params) in tasks.iter_mut() {
                let ctx = MatchContext {
                    task: name,
                    buildtype,
                    platform: self.platform.as_str(),
                    environ: &self.environ,
                };
                let current: &Mapping = params;
                let applies = rule.applies(&ctx, |expr| self.eval_condition(expr, &ctx, current))?;
                if applies {
                    shallow_merge(params, &rule.set);
                    params.remove("default-buildtype");
                }
            }
        }

        for (name, params) in tasks.iter_mut() {
            self.apply_selects(name, buildtype, params)?;
            self.apply_env_overrides(params);
        }
        Ok(tasks)
    }

    /// Replace every `<param>.select` with the value of its first label
    /// whose conditions all match, else its `default`, else the current
    /// value. A null result removes the param.
    ///
    /// `toolchain.select` goes first since toolchain conditions of the
    /// others look at the chosen toolchain.
    fn apply_selects(&self, task: &str, buildtype: &str, params: &mut Mapping) -> Result<()> {
        let mut names: Vec<String> = params
            .keys()
            .filter_map(Value::as_str)
            .filter_map(|key| key.strip_suffix(SELECT_SUFFIX))
            .map(str::to_string)
            .collect();
        names.sort_by_key(|name| name != "toolchain");

        for name in names {
            let key = format!("{name}{SELECT_SUFFIX}");
            let Some(Value::Mapping(select)) = params.remove(key.as_str()) else {
                continue;
            };

            let mut chosen = None;
            for (label, value) in &select {
                let Some(label) = label.as_str() else { continue };
                if label == "default" || value.is_null() {
                    continue;
                }
                let mut matched = true;
                for condition in label.split_whitespace() {
                    if !self.select_condition_matches(condition, &name, task, buildtype, params)? {
                        matched = false;
                        break;
                    }
                }
                if matched {
                    debug!(task, param = %name, label, "select label matched");
                    chosen = Some(value.clone());
                    break;
                }
            }
            let chosen = match (chosen, select.get("default")) {
                (Some(value), _) => Some(value),
                (None, Some(default)) => Some(default.clone()).filter(|v| !v.is_null()),
                (None, None) => params.get(name.as_str()).cloned(),
            };
            match chosen {
                Some(value) => {
                    params.insert(name.into(), value);
                }
                None => {
                    params.remove(name.as_str());
                }
            }
        }
        Ok(())
    }

    /// Whether the condition `name` from `conditions` (or a built-in one
    /// named after a platform or toolchain) holds for one task.
    fn select_condition_matches(
        &self,
        name: &str,
        param: &str,
        task: &str,
        buildtype: &str,
        params: &Mapping,
    ) -> Result<bool> {
        let builtin;
        let condition = match self.raw.conditions.get(name) {
            Some(condition) => condition,
            None => {
                builtin = builtin_condition(name).ok_or_else(|| {
                    ConfigError::config(format!(
                        "Error in the task '{task}': there is no condition '{name}' in buildconf.conditions"
                    ))
                })?;
                &builtin
            }
        };

        let admits = |names: &Option<Vec<String>>, value: &str| {
            names.as_ref().is_none_or(|names| names.iter().any(|n| n == value))
        };
        let platform = self.platform.as_str();
        if !admits(&condition.platform, platform)
            || !admits(&condition.host_os, platform)
            || !admits(&condition.cpu_arch, &self.cpu_arch)
            || !admits(&condition.task, task)
            || !admits(&condition.buildtype, buildtype)
        {
            return Ok(false);
        }
        if let Some(distros) = &condition.distro {
            if !self.distro.as_ref().is_some_and(|d| distros.contains(d)) {
                return Ok(false);
            }
        }
        if let Some(wanted) = &condition.toolchain {
            if param == "toolchain" {
                return Err(ConfigError::config(format!(
                    "Error in the task '{task}': condition '{name}' can not be used to select \
                     toolchain because it contains 'toolchain'"
                )));
            }
            let used = to_list(params.get("toolchain").unwrap_or(&Value::Null));
            if !wanted.iter().all(|t| used.contains(t)) {
                return Ok(false);
            }
        }
        Ok(condition
            .env
            .iter()
            .all(|(k, v)| self.environ.get(k) == Some(v.as_str())))
    }

    /// Replace flag and toolchain params from environment variables.
    fn apply_env_overrides(&self, params: &mut Mapping) {
        let features = to_list(params.get("features").unwrap_or(&Value::Null));
        let langs = toolchains::languages_of(features.iter().map(String::as_str));

        for lang in &langs {
            for var in lang.flag_vars {
                if let Some(value) = self.environ.non_empty(var) {
                    let words = value
                        .split_whitespace()
                        .map(|w| Value::String(w.to_string()))
                        .collect();
                    params.insert(var.to_lowercase().into(), Value::Sequence(words));
                }
            }
            if let Some(toolchain) = self.environ.non_empty(lang.toolchain_var) {
                params.insert("toolchain".into(), Value::String(toolchain.to_string()));
            }
        }
    }

    /// Evaluate an `if` or `expr` condition for one task.
    fn eval_condition(&self, expr: &str, ctx: &MatchContext<'_>, params: &Mapping) -> Result<bool> {
        let task = ctx.task.to_string();
        let buildtype = ctx.buildtype.to_string();
        let platform = ctx.platform.to_string();
        let task_toolchains = to_list(params.get("toolchain").unwrap_or(&Value::Null));
        let task_names = self.task_names();
        let buildtypes = self.raw.declared_buildtypes();
        let custom: Vec<&String> = self.raw.toolchains.keys().collect();

        expression::evaluate_condition(expr, |word| match word {
            "task" => Some(Resolved::Value(task.as_str().into())),
            "buildtype" => Some(Resolved::Value(buildtype.as_str().into())),
            "platform" => Some(Resolved::Value(platform.as_str().into())),
            "toolchain" => Some(Resolved::Value(ExprValue::List(
                task_toolchains.iter().map(|t| t.as_str().into()).collect(),
            ))),
            _ if task_names.iter().any(|n| n == word) => {
                let task = task.clone();
                Some(Resolved::func(move |name| (name == task).into()))
            }
            _ if buildtypes.iter().any(|bt| bt == word) => {
                let buildtype = buildtype.clone();
                Some(Resolved::func(move |name| (name == buildtype).into()))
            }
            _ if KNOWN_PLATFORMS.contains(&word) => {
                let platform = platform.clone();
                Some(Resolved::func(move |name| (name == platform).into()))
            }
            _ if is_toolchain_name(word) || custom.iter().any(|c| *c == word) => {
                let task_toolchains = task_toolchains.clone();
                Some(Resolved::func(move |name| {
                    task_toolchains.iter().any(|t| t == name).into()
                }))
            }
            _ => None,
        })
    }

    /// Unique toolchain names over the tasks of the selected buildtype.
    pub fn toolchain_names(&self) -> Result<Vec<String>> {
        let tasks = self.tasks()?;
        let names: BTreeSet<String> = tasks
            .values()
            .flat_map(|params| to_list(params.get("toolchain").unwrap_or(&Value::Null)))
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Declared toolchains with their vars unfolded against the startdir.
    pub fn custom_toolchains(&self) -> Result<BTreeMap<String, CustomToolchain>> {
        let mut result = BTreeMap::new();
        for (name, vars) in &self.raw.toolchains {
            let kind = vars.get("kind").and_then(Value::as_str).ok_or_else(|| {
                ConfigError::config(format!("Toolchain '{name}': field 'kind' not found"))
            })?;

            let mut unfolded = BTreeMap::new();
            for (key, value) in vars {
                let (Some(key), Some(value)) = (key.as_str(), value.as_str()) else {
                    continue;
                };
                if key == "kind" {
                    continue;
                }
                let path = unfold_path(Path::new(value), &self.raw.startdir);
                if !path.exists() {
                    warn!(path = %path.display(), toolchain = %name, "path to toolchain doesn't exist");
                }
                unfolded.insert(key.to_string(), path);
            }

            result.insert(
                name.clone(),
                CustomToolchain {
                    kind: kind.to_string(),
                    vars: unfolded,
                },
            );
        }
        Ok(result)
    }

    /// Path-valued params of one task, anchored at the config startdir.
    ///
    /// Pattern dicts (`incl`/`excl`) are left to the path resolver and skipped.
    pub fn task_paths(&self, task: &str) -> Result<BTreeMap<String, PathValue>> {
        let tasks = self.tasks()?;
        let params = tasks
            .get(task)
            .ok_or_else(|| ConfigError::config(format!("Unknown task '{task}'")))?;

        let mut paths = BTreeMap::new();
        for (key, value) in params {
            let Some(key) = key.as_str().filter(|k| is_path_param(k)) else {
                continue;
            };
            let words: Vec<String> = match value {
                Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
                Value::Sequence(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .flat_map(str::split_whitespace)
                    .map(str::to_string)
                    .collect(),
                _ => continue,
            };
            if words.is_empty() {
                continue;
            }
            paths.insert(key.to_string(), PathValue::new(words, &self.raw.startdir));
        }
        Ok(paths)
    }

    pub fn buildroot(&self) -> PathBuf {
        unfold_path(Path::new(&self.raw.buildroot), &self.raw.startdir)
    }

    /// Directory the build output is really written to: `realbuildroot`
    /// when set, else the buildroot.
    pub fn realbuildroot(&self) -> PathBuf {
        let dir = self.raw.realbuildroot.as_deref().unwrap_or(&self.raw.buildroot);
        unfold_path(Path::new(dir), &self.raw.startdir)
    }

    /// Directory of one buildtype's output below the buildroot.
    pub fn buildtype_dir(&self) -> Result<PathBuf> {
        let buildtype = self.selected_buildtype()?;
        Ok(self.buildroot().join(buildtype))
    }
}

/// Conditions available without declaring them: one per platform and
/// one per toolchain name.
fn builtin_condition(name: &str) -> Option<NamedCondition> {
    if KNOWN_PLATFORMS.contains(&name) {
        Some(NamedCondition::for_platform(name))
    } else if is_toolchain_name(name) {
        Some(NamedCondition::for_toolchain(name))
    } else {
        None
    }
}

/// Platform scope of a rule: `Some(true)` when its `for` names the current
/// platform, `Some(false)` when it is not restricted to any platform, `None`
/// when it does not apply to the current platform.
fn rule_scope(rule: &OverlayRule, platform: &str) -> Option<bool> {
    let excluded = rule
        .not_for
        .platform
        .as_ref()
        .is_some_and(|ps| ps.iter().any(|p| p == platform));
    if excluded {
        return None;
    }
    match &rule.for_.platform {
        None => Some(false),
        Some(ps) if ps.iter().any(|p| p == platform) => Some(true),
        Some(_) => None,
    }
}

fn is_toolchain_name(word: &str) -> bool {
    LANGUAGES.iter().any(|lang| {
        lang.toolchains.contains(&word) || toolchains::auto_toolchain(lang) == word
    })
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::{Document, load_config};
    use crate::error::ErrorKind;

    fn conf_on(text: &str, platform: &str, environ: Environ) -> BuildConf {
        let attrs: Mapping = serde_yaml::from_str(text).unwrap();
        let doc = Document::new("/work/demo/buildconf.yaml", attrs);
        let raw = load_config(&doc).unwrap();
        BuildConf::new(raw, Platform::new(platform), environ)
    }

    fn conf(text: &str) -> BuildConf {
        conf_on(text, "linux", Environ::empty())
    }

    fn param<'a>(tasks: &'a TaskMap, task: &str, key: &str) -> Option<&'a Value> {
        tasks.get(task).and_then(|p| p.get(key))
    }

    fn text<'a>(tasks: &'a TaskMap, task: &str, key: &str) -> Option<&'a str> {
        param(tasks, task, key).and_then(Value::as_str)
    }

    const BASIC: &str = r#"
buildtypes:
  debug: { cxxflags: -O0 }
  release: { cxxflags: -O2 }
tasks:
  app:
    features: cxxprogram
    buildtypes:
      debug: { defines: APP_DEBUG }
  util:
    features: cxxshlib
    cxxflags: -fPIC
"#;

    #[test]
    fn test_reads_before_selection_fail() {
        let conf = conf(BASIC);
        for err in [
            conf.tasks().unwrap_err(),
            conf.toolchain_names().unwrap_err(),
            conf.selected_buildtype().unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::Logic);
        }
    }

    #[test]
    fn test_apply_buildtype_twice() {
        let mut conf = conf(BASIC);
        conf.apply_buildtype("debug").unwrap();
        conf.apply_buildtype("debug").unwrap();
        let err = conf.apply_buildtype("release").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert_eq!(conf.selected_buildtype().unwrap(), "debug");
    }

    #[test]
    fn test_unknown_buildtype_is_config_error() {
        let mut conf = conf(BASIC);
        let err = conf.apply_buildtype("profile").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("'debug', 'release'"));
    }

    #[test]
    fn test_merge_order() {
        let mut conf = conf(BASIC);
        conf.apply_buildtype("debug").unwrap();
        let tasks = conf.tasks().unwrap();
        assert_eq!(text(&tasks, "app", "cxxflags"), Some("-O0"));
        assert_eq!(text(&tasks, "app", "defines"), Some("APP_DEBUG"));
        assert_eq!(text(&tasks, "util", "cxxflags"), Some("-fPIC"));
        assert!(param(&tasks, "app", "buildtypes").is_none());

        let release = conf.tasks_for("release").unwrap();
        assert!(param(&release, "app", "defines").is_none());
    }

    #[test]
    fn test_tasks_are_memoized() {
        let mut conf = conf(BASIC);
        conf.apply_buildtype("release").unwrap();
        let first = conf.tasks().unwrap();
        let second = conf.tasks().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, conf.resolve_tasks("release").unwrap());
    }

    #[test]
    fn test_later_rules_win() {
        let mut conf = conf(
            r#"
buildtypes: { debug: {} }
tasks: { app: { features: cxxprogram } }
matrix:
  - { for: { task: app }, set: { defines: A } }
  - { for: { task: app, buildtype: debug }, set: { defines: B } }
  - { for: { task: app, buildtype: release }, set: { defines: C } }
"#,
        );
        conf.apply_buildtype("debug").unwrap();
        let tasks = conf.tasks().unwrap();
        assert_eq!(text(&tasks, "app", "defines"), Some("B"));
    }

    #[test]
    fn test_rule_tasks_are_added() {
        let mut conf = conf(
            r#"
tasks: { app: { features: cxxprogram } }
matrix:
  - { for: { task: extra }, set: { features: cprogram, source: main.c } }
"#,
        );
        assert_eq!(conf.task_names(), ["app", "extra"]);
        conf.apply_buildtype("").unwrap();
        let tasks = conf.tasks().unwrap();
        assert_eq!(text(&tasks, "extra", "source"), Some("main.c"));
    }

    #[test]
    fn test_not_for_and_if_filters() {
        let mut conf = conf(
            r#"
buildtypes: { debug: {}, release: {} }
tasks: { app: { features: cxxprogram }, lib: { features: cxxshlib } }
matrix:
  - { not-for: { task: lib }, set: { libs: m } }
  - { for: all, if: "debug and linux", set: { rpath: /opt } }
  - { for: all, if: "lib", set: { defines: IS_LIB } }
"#,
        );
        conf.apply_buildtype("debug").unwrap();
        let tasks = conf.tasks().unwrap();
        assert_eq!(text(&tasks, "app", "libs"), Some("m"));
        assert!(param(&tasks, "lib", "libs").is_none());
        assert_eq!(text(&tasks, "app", "rpath"), Some("/opt"));
        assert_eq!(text(&tasks, "lib", "defines"), Some("IS_LIB"));
        assert!(param(&tasks, "app", "defines").is_none());

        let release = conf.tasks_for("release").unwrap();
        assert!(param(&release, "app", "rpath").is_none());
    }

    #[test]
    fn test_toolchain_predicate() {
        let mut conf = conf(
            r#"
tasks:
  a: { features: cxxprogram, toolchain: clang++ }
  b: { features: cxxprogram, toolchain: g++ }
matrix:
  - { for: all, if: "clang++", set: { cxxflags: -stdlib=libc++ } }
"#,
        );
        conf.apply_buildtype("").unwrap();
        let tasks = conf.tasks().unwrap();
        assert_eq!(text(&tasks, "a", "cxxflags"), Some("-stdlib=libc++"));
        assert!(param(&tasks, "b", "cxxflags").is_none());
        assert_eq!(conf.toolchain_names().unwrap(), ["clang++", "g++"]);
    }

    #[test]
    fn test_env_overrides_replace() {
        let env: Environ = [("CXXFLAGS", "-O3 -g"), ("CXX", "clang++"), ("FCFLAGS", "-x")]
            .into_iter()
            .collect();
        let mut conf = conf_on(
            r#"
tasks:
  app: { features: cxxprogram, cxxflags: -O0, toolchain: g++ }
  tool: { features: cprogram, cflags: -Wall }
"#,
            "linux",
            env,
        );
        conf.apply_buildtype("").unwrap();
        let tasks = conf.tasks().unwrap();
        let flags: Vec<&str> = param(&tasks, "app", "cxxflags")
            .and_then(Value::as_sequence)
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(flags, ["-O3", "-g"]);
        assert_eq!(text(&tasks, "app", "toolchain"), Some("clang++"));
        assert_eq!(text(&tasks, "tool", "cflags"), Some("-Wall"));
        assert!(param(&tasks, "tool", "toolchain").is_none());
        assert!(param(&tasks, "app", "fcflags").is_none());
    }

    #[test]
    fn test_supported_from_platform_and_rules() {
        let text = r#"
buildtypes: { debug: {}, release: {} }
platforms: { linux: { valid: [debug] } }
tasks: { app: { features: cxxprogram } }
matrix:
  - { for: { buildtype: profile, platform: linux }, set: {} }
  - { for: { buildtype: win-only, platform: windows }, set: {} }
  - { for: { buildtype: [asan, default] }, set: {} }
"#;
        let conf = conf(text);
        assert_eq!(
            conf.supported_buildtypes().unwrap(),
            ["asan", "debug", "profile"]
        );

        let conf = conf_on(text, "windows", Environ::empty());
        assert_eq!(
            conf.supported_buildtypes().unwrap(),
            ["asan", "debug", "release", "win-only"]
        );
    }

    #[test]
    fn test_supported_empty() {
        let conf = conf("tasks: { app: { features: cxxprogram } }");
        assert_eq!(conf.supported_buildtypes().unwrap(), [""]);
        assert_eq!(conf.default_buildtype().unwrap(), "");

        let conf = conf_on(
            "platforms: { linux: { valid: [] } }\ntasks: { app: { features: c } }",
            "linux",
            Environ::empty(),
        );
        assert_eq!(conf.supported_buildtypes().unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn test_default_precedence() {
        let base = r#"
buildtypes: { b1: {}, b2: {}, b3: {}, b4: {}, default: b4 }
tasks: { app: { features: cxxprogram } }
"#;
        assert_eq!(conf(base).default_buildtype().unwrap(), "b4");

        let with_global_rule = format!("{base}matrix:\n  - {{ for: all, set: {{ default-buildtype: b3 }} }}\n");
        assert_eq!(conf(&with_global_rule).default_buildtype().unwrap(), "b3");

        let with_platform_rule = format!(
            "{with_global_rule}  - {{ for: {{ platform: linux }}, set: {{ default-buildtype: b2 }} }}\n"
        );
        assert_eq!(conf(&with_platform_rule).default_buildtype().unwrap(), "b2");
        let elsewhere = conf_on(&with_platform_rule, "windows", Environ::empty());
        assert_eq!(elsewhere.default_buildtype().unwrap(), "b3");

        let with_platform = format!(
            "{with_platform_rule}platforms: {{ linux: {{ valid: [b1, b2, b3, b4], default: b1 }} }}\n"
        );
        assert_eq!(conf(&with_platform).default_buildtype().unwrap(), "b1");
    }

    #[test]
    fn test_default_single_supported_and_invalid() {
        let conf = conf("buildtypes: { only: {} }\ntasks: { app: { features: c } }");
        assert_eq!(conf.default_buildtype().unwrap(), "only");

        let bad = self::conf("buildtypes: { a: {}, default: missing }\ntasks: { app: { features: c } }");
        let err = bad.default_buildtype().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("'buildtypes'"));
    }

    #[test]
    fn test_default_by_platform_map() {
        let text = "buildtypes: { a: {}, b: {}, default: { linux: a, _: b } }\ntasks: { t: { features: c } }";
        assert_eq!(conf(text).default_buildtype().unwrap(), "a");
        let darwin = conf_on(text, "darwin", Environ::empty());
        assert_eq!(darwin.default_buildtype().unwrap(), "b");
    }

    #[test]
    fn test_default_buildtype_is_not_a_task_param() {
        let mut conf = conf(
            r#"
buildtypes: { debug: {} }
tasks: { app: { features: c } }
matrix:
  - { for: all, set: { default-buildtype: debug, defines: X } }
"#,
        );
        conf.apply_buildtype("debug").unwrap();
        let tasks = conf.tasks().unwrap();
        assert!(param(&tasks, "app", "default-buildtype").is_none());
        assert_eq!(text(&tasks, "app", "defines"), Some("X"));
    }

    #[test]
    fn test_custom_toolchains() {
        let conf = conf(
            r#"
toolchains:
  my-gcc: { kind: gcc, CC: bin/my-gcc, AR: /usr/bin/ar }
"#,
        );
        let custom = conf.custom_toolchains().unwrap();
        let tc = &custom["my-gcc"];
        assert_eq!(tc.kind, "gcc");
        assert_eq!(tc.vars["CC"], Path::new("/work/demo/bin/my-gcc"));
        assert_eq!(tc.vars["AR"], Path::new("/usr/bin/ar"));

        let missing = self::conf("toolchains: { t: { CC: cc } }");
        assert_eq!(missing.custom_toolchains().unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn test_task_paths() {
        let mut conf = conf(
            r#"
tasks:
  app: { features: cprogram, source: "src/a.c src/b.c", includes: [inc, ../shared], libs: m }
"#,
        );
        conf.apply_buildtype("").unwrap();
        let paths = conf.task_paths("app").unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths["source"].relative(), ["src/a.c", "src/b.c"]);
        assert_eq!(paths["includes"].absolute()[1], Path::new("/work/shared"));
        assert!(conf.task_paths("nope").is_err());
    }

    #[test]
    fn test_project_accessors() {
        let conf = conf("project: { version: 1.2.3 }");
        assert_eq!(conf.project_name(), "demo");
        assert_eq!(conf.project_version(), "1.2.3");
        assert_eq!(conf.startdir(), Path::new("/work/demo"));
        assert!(conf.features().autoconfig);
    }
}
