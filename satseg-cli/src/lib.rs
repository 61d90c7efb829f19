//! Library surface of the satseg command-line tool.
//!
//! Exposes the clap command tree, the CSV emitters, and the logging
//! bootstrap so integration tests can drive commands without spawning a
//! process.

pub mod cli;
pub mod csv;
pub mod logging;
