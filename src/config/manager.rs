//! Hierarchy of buildconf documents linked by `subdirs`.
//!
//! The root document is loaded first, then every directory in its `subdirs`
//! depth first. Each sub-config is built over its parent, see
//! [`load_sub_config`].

use super::loader::{BUILDCONF_FILENAMES, ConfigLoader, Document, load_config, load_sub_config};
use super::types::RawConfig;
use crate::error::{ConfigError, Result};
use crate::paths::unfold_path;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loaded configs in load order; the root comes first.
#[derive(Debug)]
pub struct ConfManager {
    configs: Vec<RawConfig>,
    /// Document directories and startdirs to indexes into `configs`
    by_dir: HashMap<PathBuf, usize>,
}

impl ConfManager {
    /// Load `doc` as the root and every sub-config below it.
    pub fn new(loader: &ConfigLoader, doc: &Document) -> Result<Self> {
        let root = load_config(doc)?;
        let mut manager = Self {
            configs: Vec::new(),
            by_dir: HashMap::new(),
        };
        let index = manager.insert(root);
        manager.load_subdirs(loader, index)?;
        info!(configs = manager.configs.len(), "buildconf hierarchy loaded");
        Ok(manager)
    }

    fn load_subdirs(&mut self, loader: &ConfigLoader, parent: usize) -> Result<()> {
        for dir in self.subdirs_of(parent)? {
            let parent_conf = &self.configs[parent];
            if self.by_dir.contains_key(&dir) {
                return Err(ConfigError::in_file(
                    &parent_conf.path,
                    ConfigError::config(format!(
                        "Directory '{}' from the 'subdirs' is already loaded.",
                        dir.display()
                    )),
                ));
            }
            let Some(path) = ConfigLoader::find_conf_file(&dir, None) else {
                return Err(ConfigError::config(format!(
                    "No {} found in the directory '{}'",
                    BUILDCONF_FILENAMES.join("/"),
                    dir.display()
                )));
            };
            debug!(path = %path.display(), "loading sub-config");
            let doc = loader.load_file(&path)?;
            let conf = load_sub_config(&doc, parent_conf)?;
            let index = self.insert(conf);
            self.load_subdirs(loader, index)?;
        }
        Ok(())
    }

    /// `subdirs` of one config as absolute directories, all existing.
    fn subdirs_of(&self, index: usize) -> Result<Vec<PathBuf>> {
        let conf = &self.configs[index];
        conf.subdirs
            .iter()
            .map(|sub| {
                let dir = unfold_path(Path::new(sub), conf.confdir());
                if !dir.is_dir() {
                    return Err(ConfigError::in_file(
                        &conf.path,
                        ConfigError::config(format!(
                            "Directory '{sub}' from the 'subdirs' doesn't exist."
                        )),
                    ));
                }
                Ok(dir)
            })
            .collect()
    }

    fn insert(&mut self, conf: RawConfig) -> usize {
        let index = self.configs.len();
        self.by_dir.insert(conf.confdir().to_path_buf(), index);
        self.by_dir.entry(conf.startdir.clone()).or_insert(index);
        self.configs.push(conf);
        index
    }

    /// The topmost config.
    pub fn root(&self) -> &RawConfig {
        &self.configs[0]
    }

    pub fn configs(&self) -> &[RawConfig] {
        &self.configs
    }

    /// Config whose document directory or startdir is `dir`.
    pub fn config(&self, dir: &Path) -> Option<&RawConfig> {
        let dir = std::path::absolute(dir).ok()?;
        let dir = unfold_path(&dir, &dir);
        self.by_dir.get(&dir).map(|&index| &self.configs[index])
    }

    pub fn into_configs(self) -> Vec<RawConfig> {
        self.configs
    }
}
