//! linefan - fan input lines out to a pool of worker commands

mod cli;
mod dispatch;
mod error;
mod logging;
pub mod version;

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::process;

use anyhow::Result;
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use tracing::debug;

use cli::{Cli, InputSource};
use dispatch::signals;
use dispatch::{Dispatcher, Outcome, WorkerPool};
use error::LinefanError;
use logging::LogConfig;

/// Program entry point: parses CLI arguments, runs the dispatch loop, and handles
/// top-level errors.
///
/// Exit status is 0 when every input line was delivered and all workers were
/// collected, and 1 on usage errors, fatal runtime errors, or a signal-requested
/// shutdown. `--help` and `--version` exit 0.
fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap uses exit code 2 for usage problems; we report those as 1
            // and keep 0 for --help and --version.
            let code = if e.exit_code() == 0 { 0 } else { 1 };
            let _ = e.print();
            process::exit(code);
        }
    };

    logging::init(
        LogConfig::new()
            .with_level(cli.log_level())
            .with_target(cli.verbose >= 3)
            .with_env_overrides(),
    );

    match run(&cli) {
        Ok(Outcome::Completed) => {}
        Ok(Outcome::Terminated) => process::exit(1),
        Err(e) => {
            eprintln!(
                "{}: {}",
                "error"
                    .if_supports_color(Stderr, |text| text.red())
                    .if_supports_color(Stderr, |text| text.bold()),
                e
            );
            // Print the error chain if there are causes
            for cause in e.chain().skip(1) {
                eprintln!(
                    "  {}: {}",
                    "caused by".if_supports_color(Stderr, |text| text.yellow()),
                    cause
                );
            }
            process::exit(1);
        }
    }
}

/// Spawns the worker pool, feeds it from the selected input source, and waits
/// for every worker to exit.
///
/// A termination signal observed at any point forces the `Terminated` outcome,
/// even when dispatch itself finished cleanly first.
fn run(cli: &Cli) -> Result<Outcome> {
    signals::install()?;

    debug!(
        command = %cli.command,
        workers = cli.mapper,
        input = %cli.input,
        "Configuration resolved"
    );

    let mut pool = WorkerPool::spawn(cli.mapper, &cli.command)?;

    let outcome = match &cli.input {
        InputSource::None => {
            // Nothing to dispatch: closing the pipes gives every worker an
            // immediate EOF on stdin.
            pool.close_pipes();
            Outcome::Completed
        }
        InputSource::Stdin => {
            let mut input = io::stdin().lock();
            let fd = input.as_raw_fd();
            Dispatcher::new(&mut pool)?.run(&mut input, Some(fd))?
        }
        InputSource::File(path) => {
            let mut input = File::open(path).map_err(|source| LinefanError::InputOpen {
                path: path.clone(),
                source,
            })?;
            let fd = input.as_raw_fd();
            Dispatcher::new(&mut pool)?.run(&mut input, Some(fd))?
        }
    };

    pool.reap(true);

    Ok(if signals::termination_requested() {
        Outcome::Terminated
    } else {
        outcome
    })
}
