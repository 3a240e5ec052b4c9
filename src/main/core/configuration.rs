//! Command-line options using [clap].
//!
//! This code only parses options. It doesn't check that scenario files exist or are valid; that is
//! left to the loader so that option parsing doesn't depend on the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::utility::units::Time;

const START_HELP_TEXT: &str = "\
    Run a packet-processing handler against scripted test scenarios.\n\n\
    Each scenario is an ordered list of packets the handler should receive and send.";

const END_HELP_TEXT: &str = "\
    If units are not specified, times are given in seconds. Units can optionally be specified \
    (for example: '500 ms', '2 s', '1 min').";

#[derive(Debug, Clone, Parser)]
#[clap(name = "netproctor", about = START_HELP_TEXT, after_help = END_HELP_TEXT)]
#[clap(version)]
#[clap(next_display_order = None)]
pub struct CliOptions {
    /// Paths to the scenario files to run
    #[clap(required = true, value_name = "scenario")]
    pub scenarios: Vec<PathBuf>,

    /// Only load and check the scenarios, don't run any code
    #[clap(long)]
    pub dry_run: bool,

    /// Exit after printing the final configuration
    #[clap(long)]
    pub show_config: bool,

    /// Log level of output written on stdout
    #[clap(long, short = 'l', value_name = "level", default_value = "info")]
    pub log_level: LogLevel,

    /// Deadline for the handler to act on each event, overriding every scenario's own deadline
    #[clap(long, value_name = "seconds")]
    pub timeout: Option<Time>,

    /// Also write error-level log messages to stderr
    #[clap(long)]
    pub log_errors_to_stderr: bool,
}

/// Configuration options after processing command-line options.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigOptions {
    pub scenarios: Vec<PathBuf>,
    pub dry_run: bool,
    pub log_level: LogLevel,
    pub timeout_override: Option<Duration>,
    pub log_errors_to_stderr: bool,
}

impl ConfigOptions {
    pub fn new(options: CliOptions) -> Self {
        Self {
            scenarios: options.scenarios,
            dry_run: options.dry_run,
            log_level: options.log_level,
            timeout_override: options.timeout.map(Duration::from),
            log_errors_to_stderr: options.log_errors_to_stderr,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = serde_yaml::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s)
    }
}

impl LogLevel {
    pub fn to_level_filter(&self) -> LevelFilter {
        log::Level::from(*self).to_level_filter()
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
