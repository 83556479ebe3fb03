//! Tasks subcommand for buildconf CLI
//!
//! Prints the resolved params of every task, or of one task, as YAML or JSON.

use crate::config::{BuildConf, TaskMap};
use anyhow::{Result, bail};
use clap::Args;
use serde_yaml::{Mapping, Value};
use std::io::Write;

/// Arguments for the tasks subcommand
#[derive(Args, Debug)]
pub struct TasksArgs {
    /// Only print this task
    #[arg(value_name = "TASK")]
    pub task: Option<String>,

    /// Output format: yaml (default) or json
    #[arg(long, default_value = "yaml", value_name = "FORMAT")]
    pub format: OutputFormat,
}

/// Output format for resolved params
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format '{}'. Valid options: yaml, json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Yaml => write!(f, "yaml"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render task params in the given format.
pub fn render(tasks: &TaskMap, format: OutputFormat) -> Result<String> {
    let map: Mapping = tasks
        .iter()
        .map(|(name, params)| (Value::String(name.clone()), Value::Mapping(params.clone())))
        .collect();
    let text = match format {
        OutputFormat::Yaml => serde_yaml::to_string(&map)?,
        OutputFormat::Json => {
            let mut text = serde_json::to_string_pretty(&map)?;
            text.push('\n');
            text
        }
    };
    Ok(text)
}

/// Run the tasks command.
pub fn run_tasks(conf: &BuildConf, args: &TasksArgs, out: &mut impl Write) -> Result<()> {
    let tasks = conf.tasks()?;
    let text = match &args.task {
        Some(name) => {
            let Some(params) = tasks.get(name) else {
                bail!("unknown task '{name}', known tasks: {}", conf.task_names().join(", "));
            };
            let single = TaskMap::from([(name.clone(), params.clone())]);
            render(&single, args.format)?
        }
        None => render(&tasks, args.format)?,
    };
    out.write_all(text.as_bytes())?;
    Ok(())
}
