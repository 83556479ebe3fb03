//! buildconf command-line tool
//!
//! Loads a buildconf, validates it and prints resolved buildtypes, tasks or
//! toolchains.

use anyhow::Result;
use buildconf::cli::tasks::run_tasks;
use buildconf::cli::{Cli, Command, run_buildtypes, run_check, run_toolchains};
use buildconf::logging;
use buildconf::platform::Environ;
use clap::Parser;
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log, cli.verbose)?;

    let confs = cli.load_all(Environ::from_process())?;
    let Some(conf) = confs.first() else {
        return Ok(());
    };
    debug!(platform = %conf.platform(), configs = confs.len(), "buildconf loaded");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match &cli.command {
        None | Some(Command::Check) => confs.iter().try_for_each(|conf| run_check(conf, &mut out)),
        Some(Command::Buildtypes) => run_buildtypes(conf, &mut out),
        Some(Command::Tasks(args)) => run_tasks(conf, args, &mut out),
        Some(Command::Toolchains) => run_toolchains(conf, &mut out),
    }
}
