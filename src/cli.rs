//! Command-line interface definitions using clap.

use crate::version;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// Distribute lines of input across a pool of parallel shell commands.
#[derive(Parser, Debug)]
#[command(name = "linefan")]
#[command(author, long_about = None)]
#[command(version = version::short(), long_version = version::long())]
pub struct Cli {
    /// Shell command to run in each worker (executed via $SHELL -c).
    #[arg(value_name = "COMMAND")]
    pub command: String,

    /// Number of worker processes to spawn.
    #[arg(
        short,
        long,
        value_name = "N",
        default_value_t = 2,
        value_parser = parse_pool_size
    )]
    pub mapper: usize,

    /// Input source: a file path, '-' for stdin, or 'none' to skip input.
    #[arg(short = 'f', long = "file", value_name = "PATH", default_value = "-")]
    pub input: InputSource,

    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Where input lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Read from standard input.
    Stdin,
    /// Read from a file on disk.
    File(PathBuf),
    /// No input at all; workers only get closed pipes.
    None,
}

impl FromStr for InputSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "-" {
            Ok(Self::Stdin)
        } else if s.eq_ignore_ascii_case("none") {
            Ok(Self::None)
        } else {
            Ok(Self::File(PathBuf::from(s)))
        }
    }
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdin => write!(f, "-"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::None => write!(f, "none"),
        }
    }
}

/// Parse the worker count, rejecting zero.
fn parse_pool_size(s: &str) -> Result<usize, String> {
    let count: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a number", s))?;
    if count == 0 {
        return Err("at least one worker is required".to_string());
    }
    Ok(count)
}

impl Cli {
    /// Get the log level based on -q / -v flags.
    pub fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}
