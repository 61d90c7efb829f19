//! CLI entry point for satseg.
//!
//! Parses command-line arguments with clap, executes the selected command,
//! and maps failures to the documented exit codes: 0 success, 1 invalid
//! arguments, 2 invalid input, 3 output error. Logging is initialised
//! eagerly so subsequent operations can emit structured diagnostics via
//! `tracing`.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::error;

use satseg_cli::{
    cli::{Cli, run_cli},
    logging::{self, LoggingError},
};

fn main() -> ExitCode {
    if let Err(err) = logging::init_logging() {
        report_logging_init_error(&err);
        return ExitCode::FAILURE;
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    match run_cli(cli, &mut writer) {
        Ok(()) => match writer.flush() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %err, "failed to flush output");
                ExitCode::from(3)
            }
        },
        Err(err) => {
            error!(error = %err, "command execution failed");
            ExitCode::from(err.exit_code())
        }
    }
}

#[expect(
    clippy::print_stderr,
    reason = "Emit one-off diagnostic before tracing is initialised"
)]
fn report_logging_init_error(err: &LoggingError) {
    eprintln!("failed to initialize logging: {err}");
}
