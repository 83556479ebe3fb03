//! Discovery and loading of buildconf documents.
//!
//! A document is either JSON (`buildconf.json`), YAML (`buildconf.yaml`,
//! `buildconf.yml`) or an attribute map built by host code. Loading yields a
//! [`Document`]; [`load_config`] turns it into a validated [`RawConfig`].

use super::merge::merge_one_level;
use super::schema::is_path_param;
use super::types::{INHERITED_SECTIONS, OverlayRule, RawConfig};
use super::validator::validate_document;
use super::{BUILDCONF_NAME, sugar, yaml};
use crate::error::{ConfigError, Result};
use crate::paths::unfold_path;
use crate::platform::Environ;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable with extra directories to search for a buildconf.
pub const SEARCH_PATH_VAR: &str = "BUILDCONF_PATH";

/// File names tried during discovery, in order.
pub const BUILDCONF_FILENAMES: &[&str] = &["buildconf.json", "buildconf.yaml", "buildconf.yml"];

/// Top-level attributes of one buildconf.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Absolute path of the document. Documents built in memory use a
    /// path inside the directory they describe.
    pub path: PathBuf,
    pub attrs: Mapping,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, attrs: Mapping) -> Self {
        Self {
            path: path.into(),
            attrs,
        }
    }

    /// Document with no attributes for a directory without a buildconf.
    pub fn empty(dir: &Path) -> Self {
        Self::new(dir.join(BUILDCONF_NAME), Mapping::new())
    }

    /// Directory holding the document.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Finds and reads buildconf documents.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Directories searched when no directory is given
    search_path: Vec<PathBuf>,
    /// Variables visible to YAML substitution
    environ: Environ,
}

impl ConfigLoader {
    /// Loader whose search path comes from `BUILDCONF_PATH` in `environ`.
    pub fn new(environ: Environ) -> Self {
        let search_path = environ
            .non_empty(SEARCH_PATH_VAR)
            .map(|value| std::env::split_paths(value).collect())
            .unwrap_or_default();
        Self {
            search_path,
            environ,
        }
    }

    /// Replace the search path.
    pub fn with_search_path<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_path = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Look for a buildconf in `dir`: `name` only if given, otherwise each
    /// of [`BUILDCONF_FILENAMES`] in order.
    pub fn find_conf_file(dir: &Path, name: Option<&str>) -> Option<PathBuf> {
        match name {
            Some(name) => Some(dir.join(name)).filter(|p| p.is_file()),
            None => BUILDCONF_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.is_file()),
        }
    }

    /// Locate a buildconf in `dir`, or across the search path when `dir`
    /// is not given.
    pub fn discover(&self, dir: Option<&Path>, name: Option<&str>) -> Option<PathBuf> {
        match dir {
            Some(dir) => Self::find_conf_file(dir, name),
            None => self
                .search_path
                .iter()
                .find_map(|dir| Self::find_conf_file(dir, name)),
        }
    }

    /// Load the buildconf of `dir` (or the first one on the search path).
    ///
    /// When nothing is found an empty document for `dir`, or for the
    /// current directory, is returned.
    pub fn load(&self, dir: Option<&Path>, name: Option<&str>) -> Result<Document> {
        if let Some(path) = self.discover(dir, name) {
            return self.load_file(&path);
        }

        let dir = match dir {
            Some(dir) => absolute(dir)?,
            None => std::env::current_dir().map_err(|err| ConfigError::io(".", err))?,
        };
        info!(dir = %dir.display(), "no buildconf found, using an empty one");
        Ok(Document::empty(&dir))
    }

    /// Read one document; the format follows the file extension.
    pub fn load_file(&self, path: &Path) -> Result<Document> {
        let path = absolute(path)?;
        debug!(path = %path.display(), "loading buildconf");

        let content = std::fs::read_to_string(&path).map_err(|err| ConfigError::io(&path, err))?;
        let attrs = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => parse_json(&content),
            Some("yaml" | "yml") => yaml::parse(&content, &self.environ),
            _ => Err(ConfigError::config(format!(
                "Unsupported buildconf format: {}",
                path.display()
            ))),
        }
        .map_err(|err| ConfigError::in_file(&path, err))?;

        Ok(Document::new(path, attrs))
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|err| ConfigError::io(path, err))
}

fn parse_json(content: &str) -> Result<Mapping> {
    match serde_json::from_str::<Value>(content)? {
        Value::Mapping(map) => Ok(map),
        _ => Err(ConfigError::config("The document has invalid structure")),
    }
}

/// Fill in params a document may leave out.
///
/// `features.autoconfig` defaults to true, `project.root` to `.`,
/// `project.name` to the name of the document's directory, `buildroot` to
/// `<root>/build` and `srcroot` to the project root.
pub fn apply_defaults(doc: &mut Document) {
    let dir_name = doc
        .dir()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let attrs = &mut doc.attrs;

    with_section(attrs, "features", |features| {
        if !features.contains_key("autoconfig") {
            features.insert("autoconfig".into(), Value::Bool(true));
        }
    });

    let root = with_section(attrs, "project", |project| {
        for (key, default) in [("root", "."), ("name", dir_name.as_str()), ("version", "")] {
            if project.get(key).is_none_or(Value::is_null) {
                project.insert(key.into(), Value::String(default.to_string()));
            }
        }
        project
            .get("root")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string()
    });

    for key in ["toolchains", "platforms", "buildtypes", "tasks"] {
        with_section(attrs, key, |_| ());
    }
    if attrs.get("matrix").is_none_or(Value::is_null) {
        attrs.insert("matrix".into(), Value::Sequence(Vec::new()));
    }

    if attrs.get("buildroot").is_none_or(Value::is_null) {
        let buildroot = Path::new(&root).join("build");
        attrs.insert(
            "buildroot".into(),
            Value::String(buildroot.to_string_lossy().into_owned()),
        );
    }
    if attrs.get("srcroot").is_none_or(Value::is_null) {
        attrs.insert("srcroot".into(), Value::String(root));
    }
}

/// Run `f` on the mapping under `key`, created empty when missing or null.
fn with_section<R>(attrs: &mut Mapping, key: &str, f: impl FnOnce(&mut Mapping) -> R) -> R {
    if let Some(Value::Mapping(section)) = attrs.get_mut(key) {
        return f(section);
    }
    let mut section = Mapping::new();
    let out = f(&mut section);
    attrs.insert(key.into(), Value::Mapping(section));
    out
}

/// Directory relative paths of the document resolve against.
fn startdir_of(doc: &Document) -> PathBuf {
    match doc.attrs.get("startdir").and_then(Value::as_str) {
        Some(dir) => unfold_path(Path::new(dir), doc.dir()),
        None => doc.dir().to_path_buf(),
    }
}

/// Validate a document and build its [`RawConfig`].
///
/// Runs validation, defaults, sugar expansion and `matrix` parsing; every
/// error is reported against the document path.
pub fn load_config(doc: &Document) -> Result<RawConfig> {
    validate_document(doc)?;
    build_config(doc.clone(), None).map_err(|err| ConfigError::in_file(&doc.path, err))
}

/// Like [`load_config`], for a document listed in the `subdirs` of `parent`.
///
/// The sections of [`INHERITED_SECTIONS`] are merged over the parent's one
/// level deep, the parent's rules run before the document's own, and the
/// build directories are the parent's.
pub fn load_sub_config(doc: &Document, parent: &RawConfig) -> Result<RawConfig> {
    validate_document(doc)?;
    build_config(doc.clone(), Some(parent)).map_err(|err| ConfigError::in_file(&doc.path, err))
}

fn build_config(mut doc: Document, parent: Option<&RawConfig>) -> Result<RawConfig> {
    apply_defaults(&mut doc);

    let mut rules = Vec::new();
    if let Some(Value::Sequence(items)) = doc.attrs.get("matrix") {
        for (i, item) in items.iter().enumerate() {
            rules.push(OverlayRule::from_value(item, &format!("matrix.[{i}]"))?);
        }
    }
    sugar::apply(&mut doc.attrs, &mut rules)?;
    check_buildtype_names(&doc.attrs, &rules)?;
    debug!(rules = rules.len(), "overlay rules ready");

    let startdir = startdir_of(&doc);
    let Some(parent) = parent else {
        return RawConfig::from_mapping(doc.path.clone(), startdir, &doc.attrs, rules);
    };

    for key in INHERITED_SECTIONS {
        let mut merged = match parent.inheritable.get(*key) {
            Some(Value::Mapping(section)) => section.clone(),
            _ => Mapping::new(),
        };
        match *key {
            "toolchains" => anchor_toolchains(&mut merged, &parent.startdir),
            "buildtypes" => merged
                .values_mut()
                .filter_map(Value::as_mapping_mut)
                .for_each(|params| anchor_path_params(params, &parent.startdir)),
            _ => {}
        }
        if let Some(Value::Mapping(own)) = doc.attrs.get(*key) {
            merge_one_level(&mut merged, own);
        }
        doc.attrs.insert((*key).into(), Value::Mapping(merged));
    }

    let mut inherited: Vec<OverlayRule> = parent.matrix.clone();
    for rule in &mut inherited {
        anchor_path_params(&mut rule.set, &parent.startdir);
    }
    let inherited_rules = inherited.len();
    inherited.extend(rules);

    let mut conf = RawConfig::from_mapping(doc.path.clone(), startdir, &doc.attrs, inherited)?;
    conf.inherited_rules = inherited_rules;
    conf.rootdir = parent.rootdir.clone();
    conf.buildroot = anchored(&parent.buildroot, &parent.startdir);
    conf.realbuildroot = Some(anchored(
        parent.realbuildroot.as_deref().unwrap_or(&parent.buildroot),
        &parent.startdir,
    ));
    debug!(
        path = %conf.path.display(),
        parent = %parent.path.display(),
        inherited_rules,
        "sub-config merged"
    );
    Ok(conf)
}

/// Buildtype names that clash with files kept in the build directory.
pub const RESERVED_BUILDTYPES: &[&str] = &["config.log", "c4che", ".lock-wafbuild"];

/// Prefix of configuration check directories; no buildtype may start with it.
pub const CONFTEST_DIR_PREFIX: &str = ".cfgchk";

/// Reject buildtype names declared in `buildtypes` or named by rules that
/// would collide with reserved build directory entries.
fn check_buildtype_names(attrs: &Mapping, rules: &[OverlayRule]) -> Result<()> {
    let declared = attrs
        .get("buildtypes")
        .and_then(Value::as_mapping)
        .into_iter()
        .flat_map(|section| section.keys().filter_map(Value::as_str));
    let from_rules = rules
        .iter()
        .flat_map(|rule| [&rule.for_.buildtype, &rule.not_for.buildtype])
        .flatten()
        .flatten()
        .map(String::as_str);

    for name in declared.chain(from_rules) {
        if RESERVED_BUILDTYPES.contains(&name) || name.starts_with(CONFTEST_DIR_PREFIX) {
            return Err(ConfigError::config(format!(
                "Name '{name}' is invalid for a buildtype. Set a different name."
            )));
        }
    }
    Ok(())
}

fn anchored(path: &str, startdir: &Path) -> String {
    unfold_path(Path::new(path), startdir)
        .to_string_lossy()
        .into_owned()
}

/// Make the path vars of custom toolchains absolute against `startdir`.
fn anchor_toolchains(toolchains: &mut Mapping, startdir: &Path) {
    for vars in toolchains.values_mut().filter_map(Value::as_mapping_mut) {
        for (key, value) in vars.iter_mut() {
            if key.as_str() == Some("kind") {
                continue;
            }
            if let Value::String(path) = value {
                *path = anchored(path, startdir);
            }
        }
    }
}

/// Make the words of path params absolute against `startdir`.
///
/// Pattern dicts carry their own `startdir` and are left alone.
fn anchor_path_params(params: &mut Mapping, startdir: &Path) {
    for (key, value) in params.iter_mut() {
        if !key.as_str().is_some_and(is_path_param) {
            continue;
        }
        match value {
            Value::String(words) => {
                let paths: Vec<String> = words
                    .split_whitespace()
                    .map(|w| anchored(w, startdir))
                    .collect();
                *value = Value::Sequence(paths.into_iter().map(Value::String).collect());
            }
            Value::Sequence(items) => {
                for item in items.iter_mut() {
                    if let Value::String(path) = item {
                        *path = anchored(path, startdir);
                    }
                }
            }
            _ => {}
        }
    }
}
