//! Command-line interface orchestration for satseg.
//!
//! Four commands cover the pipeline: `cnf-info` inspects a DIMACS file,
//! `vig-info` builds the variable incidence graph and reports statistics,
//! `segment` runs the full segmentation pipeline with optional CSV outputs,
//! and `eval` sweeps segmentation parameters into a CSV table.

mod commands;

pub use commands::{
    AmbiguousArg, BuilderArgs, Cli, CliError, Command, CnfInfoCommand, EvalCommand, InputArgs,
    SegmentCommand, SegmentationArgs, Tau, VigInfoCommand, run_cli,
};
