use std::borrow::Borrow;
use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use crate::core::configuration::{CliOptions, ConfigOptions};
use crate::core::loader::load_scenario;
use crate::core::logger::harness_logger;
use crate::proctor::{run_scenario, Device, Verdict};
use crate::scenario::Scenario;

type Handler = dyn Fn(Device) -> anyhow::Result<()> + Send + Sync;

/// Main entry point for the `netproctor` binary. With no handler linked in, this loads and checks
/// the scenarios. Returns whether everything passed.
pub fn run_netproctor(args: Vec<OsString>) -> anyhow::Result<bool> {
    run(args, None)
}

/// Main entry point for a handler crate: runs `handler` against every scenario named on the
/// command line. Returns whether every scenario passed.
pub fn main_test<F>(args: Vec<OsString>, handler: F) -> anyhow::Result<bool>
where
    F: Fn(Device) -> anyhow::Result<()> + Send + Sync + 'static,
{
    run(args, Some(Arc::new(handler)))
}

fn run(args: Vec<OsString>, handler: Option<Arc<Handler>>) -> anyhow::Result<bool> {
    // parse the options from the command line
    let options = match CliOptions::try_parse_from(args.clone()) {
        Ok(x) => x,
        Err(e) => {
            if e.use_stderr() {
                eprint!("{}", e);
                std::process::exit(1);
            } else {
                print!("{}", e);
                std::process::exit(0);
            }
        }
    };

    let show_config = options.show_config;
    let config = ConfigOptions::new(options);

    if show_config {
        eprintln!("{:#?}", config);
        return Ok(true);
    }

    // a handler crate may have installed its own logger
    if let Err(e) =
        harness_logger::init(config.log_level.to_level_filter(), config.log_errors_to_stderr)
    {
        eprintln!("** Could not initialize the logger: {e}");
    }

    // check if some log levels have been compiled out
    let log_level = config.log_level.to_level_filter();
    if log_level > log::STATIC_MAX_LEVEL {
        log::warn!(
            "Log level set to {}, but messages higher than {} have been compiled out",
            log_level,
            log::STATIC_MAX_LEVEL,
        );
    }

    log_environment(&args);

    // load every scenario before running any of them
    let mut scenarios = Vec::with_capacity(config.scenarios.len());
    for path in &config.scenarios {
        let mut scenario =
            load_scenario(path).with_context(|| format!("Could not load scenario {path:?}"))?;
        if let Some(timeout) = config.timeout_override {
            scenario.set_timeout(timeout);
        }
        scenarios.push(scenario);
    }

    let handler = match handler {
        Some(handler) if !config.dry_run => handler,
        other => {
            if other.is_none() && !config.dry_run {
                log::warn!("In test mode, but no user code supplied; only checking the scenarios");
            }
            for scenario in &scenarios {
                print_summary(scenario);
            }
            return Ok(true);
        }
    };

    let mut all_passed = true;
    for scenario in &mut scenarios {
        let handler = Arc::clone(&handler);
        let result = run_scenario(scenario, move |device| (*handler)(device));
        print!("{result}");
        all_passed &= result.verdict() == Verdict::AllPassed;
    }
    log::logger().flush();

    Ok(all_passed)
}

fn print_summary(scenario: &Scenario) {
    println!("Doing sanity check on scenario {}", scenario.name());
    print!("{scenario}");
}

fn log_environment(args: &[OsString]) {
    for arg in args {
        log::info!("arg: {}", arg.to_string_lossy());
    }

    for (key, value) in std::env::vars_os() {
        let level = match key.to_string_lossy().borrow() {
            "RUST_BACKTRACE" | "RUST_LOG" => log::Level::Info,
            _ => log::Level::Trace,
        };
        log::log!(level, "env: {:?}={:?}", key, value);
    }
}

/// Log the outcome of a run and convert it to the process exit code.
pub fn exit_code(result: anyhow::Result<bool>) -> ExitCode {
    log::logger().flush();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("** Some scenarios did not pass");
            ExitCode::FAILURE
        }
        Err(e) => {
            // log the full error, its context, and its backtrace if enabled
            if log::log_enabled!(log::Level::Error) {
                for line in format!("{:?}", e).split('\n') {
                    log::error!("{}", line);
                }
                log::logger().flush();

                // print the short error
                eprintln!("** netproctor did not complete successfully: {}", e);
                eprintln!("** See the log for details");
            } else {
                eprintln!("{:?}", e);
            }
            ExitCode::FAILURE
        }
    }
}
