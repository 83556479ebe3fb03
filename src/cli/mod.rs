//! CLI command definitions for buildconf
//!
//! This module defines the CLI structure using clap's derive macros and the
//! handlers of the subcommands. The main entry point is the `Cli` struct.

pub mod tasks;

use crate::config::{BuildConf, ConfManager, ConfigLoader};
use crate::platform::{Environ, Platform};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tasks::TasksArgs;
use tracing::debug;

/// Inspect and resolve buildconf files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory with the buildconf file (default: search BUILDCONF_PATH)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Explicit buildconf file (overrides --dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Buildtype to resolve (default: the config's default buildtype)
    #[arg(short, long, global = true)]
    pub buildtype: Option<String>,

    /// Resolve for this platform instead of the current one
    #[arg(long, global = true)]
    pub platform: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate the buildconf (default if no subcommand given)
    Check,

    /// List supported buildtypes and the default one
    Buildtypes,

    /// Print resolved task params for the selected buildtype
    Tasks(TasksArgs),

    /// List toolchains used by tasks and declared custom toolchains
    Toolchains,
}

impl Cli {
    /// Load, validate and wrap the buildconf selected by the arguments.
    ///
    /// The buildtype is applied: `--buildtype` if given, else the default.
    pub fn load(&self, environ: Environ) -> Result<BuildConf> {
        match self.load_all(environ)?.into_iter().next() {
            Some(conf) => Ok(conf),
            None => bail!("no buildconf loaded"),
        }
    }

    /// Like [`Cli::load`], for the root buildconf and all its sub-configs.
    ///
    /// Every config gets the buildtype chosen for the root.
    pub fn load_all(&self, environ: Environ) -> Result<Vec<BuildConf>> {
        let loader = ConfigLoader::new(environ.clone());
        let doc = match &self.file {
            Some(file) => loader.load_file(file)?,
            None => loader.load(self.dir.as_deref(), None)?,
        };
        debug!(path = %doc.path.display(), "buildconf document");

        let manager = ConfManager::new(&loader, &doc)?;
        let platform = self
            .platform
            .as_deref()
            .map(Platform::new)
            .unwrap_or_else(Platform::current);
        let mut confs: Vec<BuildConf> = manager
            .into_configs()
            .into_iter()
            .map(|raw| BuildConf::new(raw, platform.clone(), environ.clone()))
            .collect();

        let buildtype = match (&self.buildtype, confs.first()) {
            (Some(bt), _) => bt.clone(),
            (None, Some(root)) => root.default_buildtype()?.to_string(),
            (None, None) => bail!("no buildconf loaded"),
        };
        for conf in &mut confs {
            conf.apply_buildtype(&buildtype).with_context(|| {
                format!("cannot select buildtype '{buildtype}' for {}", conf.path().display())
            })?;
        }
        Ok(confs)
    }
}

/// Report that the buildconf is valid.
pub fn run_check(conf: &BuildConf, out: &mut impl Write) -> Result<()> {
    let tasks = conf.tasks()?;
    writeln!(
        out,
        "{}: ok ({} tasks, buildtype '{}')",
        conf.path().display(),
        tasks.len(),
        conf.selected_buildtype()?
    )?;
    Ok(())
}

/// Print supported buildtypes, marking the default one.
pub fn run_buildtypes(conf: &BuildConf, out: &mut impl Write) -> Result<()> {
    let default = conf.default_buildtype()?;
    for bt in conf.supported_buildtypes()? {
        let marker = if bt == default { " (default)" } else { "" };
        let name = if bt.is_empty() { "''" } else { bt.as_str() };
        writeln!(out, "{name}{marker}")?;
    }
    Ok(())
}

/// Print toolchains used by tasks, then declared custom toolchains.
pub fn run_toolchains(conf: &BuildConf, out: &mut impl Write) -> Result<()> {
    for name in conf.toolchain_names()? {
        writeln!(out, "{name}")?;
    }
    for (name, toolchain) in conf.custom_toolchains()? {
        writeln!(out, "{name}: custom, kind {}", toolchain.kind)?;
        for (var, path) in &toolchain.vars {
            writeln!(out, "  {var} = {}", path.display())?;
        }
    }
    Ok(())
}
