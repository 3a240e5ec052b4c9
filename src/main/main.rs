use std::process::ExitCode;

use netproctor::core::main::{exit_code, run_netproctor};

fn main() -> ExitCode {
    exit_code(run_netproctor(std::env::args_os().collect()))
}
