//! Command implementations and argument parsing for the satseg CLI.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;

use clap::{Args, Parser, Subcommand, ValueEnum};
use satseg_core::{
    AmbiguousPolicy, BatchedConfig, Cnf, CnfError, Segmenter, SegmenterConfig, Vig, VigError,
    VigErrorCode, build_batched, build_naive, component_sizes, modularity, summarize_components,
};
use thiserror::Error;
use tracing::{info, instrument};

use crate::csv::{CsvWriter, float_cell};

/// Top-level CLI options parsed by [`clap`].
#[derive(Debug, Parser, Clone)]
#[command(
    name = "satseg",
    about = "Analyze the community structure of CNF variable incidence graphs."
)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Show basic information about a DIMACS CNF file.
    CnfInfo(CnfInfoCommand),
    /// Build the variable incidence graph and report statistics.
    VigInfo(VigInfoCommand),
    /// Segment the variable incidence graph of a CNF.
    Segment(SegmentCommand),
    /// Sweep segmentation parameters and write one CSV row per combination.
    Eval(EvalCommand),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::CnfInfo(_) => "cnf-info",
            Command::VigInfo(_) => "vig-info",
            Command::Segment(_) => "segment",
            Command::Eval(_) => "eval",
        }
    }
}

/// Input selection and parsing toggles shared by every command.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Path to a DIMACS CNF file, or `-` for stdin.
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Disable variable compaction during parsing.
    #[arg(long = "no-compact")]
    pub no_compact: bool,

    /// Disable clause normalization (literal sort, dedup, tautology drop).
    #[arg(long = "no-normalize")]
    pub no_normalize: bool,
}

/// Clause-size threshold: a number or `inf` for no limit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tau(pub Option<usize>);

impl fmt::Display for Tau {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(limit) => write!(f, "{limit}"),
            None => f.write_str("inf"),
        }
    }
}

/// VIG builder selection shared by graph-building commands.
#[derive(Debug, Args, Clone)]
pub struct BuilderArgs {
    /// Clause size threshold; clauses with more distinct variables are
    /// ignored. Accepts `inf` for no limit.
    #[arg(long = "tau", value_parser = parse_tau, default_value = "inf")]
    pub tau: Tau,

    /// Use the naive single-threaded builder.
    #[arg(long = "naive", conflicts_with = "opt")]
    pub naive: bool,

    /// Use the batched multi-threaded builder (default).
    #[arg(long = "opt")]
    pub opt: bool,

    /// Worker threads for the batched builder; 0 selects the available
    /// parallelism.
    #[arg(short = 't', long = "threads", default_value_t = 0)]
    pub threads: usize,

    /// Buffer budget for the batched builder, in pair contributions.
    #[arg(long = "maxbuf", default_value_t = 50_000_000)]
    pub maxbuf: usize,
}

impl BuilderArgs {
    fn impl_label(&self) -> &'static str {
        if self.naive { "naive" } else { "opt" }
    }

    fn resolved_threads(&self) -> usize {
        if self.naive {
            1
        } else if self.threads == 0 {
            thread::available_parallelism().map_or(1, usize::from)
        } else {
            self.threads
        }
    }
}

/// Action when the modularity-guard bounds are indecisive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AmbiguousArg {
    /// Merge the components.
    Accept,
    /// Record the edge as a cross-component candidate.
    Reject,
    /// Merge only when the gate leaves a relative margin.
    Margin,
}

impl From<AmbiguousArg> for AmbiguousPolicy {
    fn from(arg: AmbiguousArg) -> Self {
        match arg {
            AmbiguousArg::Accept => AmbiguousPolicy::Accept,
            AmbiguousArg::Reject => AmbiguousPolicy::Reject,
            AmbiguousArg::Margin => AmbiguousPolicy::GateMargin,
        }
    }
}

/// Segmentation knobs mirroring [`SegmenterConfig`].
#[derive(Debug, Args, Clone)]
pub struct SegmentationArgs {
    /// Gate scale parameter.
    #[arg(short = 'k', long = "k", default_value_t = Segmenter::DEFAULT_K)]
    pub k: f64,

    /// Size exponent in the gate denominator.
    #[arg(long = "size-exp", default_value_t = SegmenterConfig::default().size_exponent)]
    pub size_exponent: f64,

    /// Disable distance normalization by the top-edge median.
    #[arg(long = "no-normalize-distances")]
    pub no_normalize_distances: bool,

    /// Top-edge sample size for the normalization median.
    #[arg(long = "norm-sample", default_value_t = SegmenterConfig::default().norm_sample_edges)]
    pub norm_sample: usize,

    /// Disable the modularity guard.
    #[arg(long = "no-mod-guard")]
    pub no_mod_guard: bool,

    /// Modularity resolution used by the guard.
    #[arg(long = "gamma", default_value_t = SegmenterConfig::default().gamma)]
    pub gamma: f64,

    /// Disable annealing of the ΔQ tolerance.
    #[arg(long = "no-anneal")]
    pub no_anneal: bool,

    /// Initial ΔQ tolerance magnitude.
    #[arg(long = "dq-tol0", default_value_t = SegmenterConfig::default().dq_tolerance0)]
    pub dq_tolerance0: f64,

    /// ΔQ annealing volume scale; 0 selects max(1, 2m/n).
    #[arg(long = "dq-vscale", default_value_t = SegmenterConfig::default().dq_vscale)]
    pub dq_vscale: f64,

    /// Action when the guard bounds are indecisive.
    #[arg(long = "ambiguous", value_enum, default_value = "margin")]
    pub ambiguous: AmbiguousArg,

    /// Relative gate headroom required by the margin policy.
    #[arg(long = "gate-margin", default_value_t = SegmenterConfig::default().gate_margin_ratio)]
    pub gate_margin: f64,
}

impl SegmentationArgs {
    fn to_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            normalize_distances: !self.no_normalize_distances,
            norm_sample_edges: self.norm_sample,
            size_exponent: self.size_exponent,
            use_modularity_guard: !self.no_mod_guard,
            gamma: self.gamma,
            anneal_modularity_guard: !self.no_anneal,
            dq_tolerance0: self.dq_tolerance0,
            dq_vscale: self.dq_vscale,
            ambiguous_policy: self.ambiguous.into(),
            gate_margin_ratio: self.gate_margin,
        }
    }
}

/// Options accepted by the `cnf-info` command.
#[derive(Debug, Args, Clone)]
pub struct CnfInfoCommand {
    #[command(flatten)]
    pub input: InputArgs,
}

/// Options accepted by the `vig-info` command.
#[derive(Debug, Args, Clone)]
pub struct VigInfoCommand {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub builder: BuilderArgs,
}

/// Options accepted by the `segment` command.
#[derive(Debug, Args, Clone)]
pub struct SegmentCommand {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub builder: BuilderArgs,
    #[command(flatten)]
    pub segmentation: SegmentationArgs,

    /// Write per-component rows: component_id, size, min_internal_weight.
    #[arg(long = "components-csv")]
    pub components_csv: Option<PathBuf>,

    /// Write node rows: id, component.
    #[arg(long = "nodes-csv")]
    pub nodes_csv: Option<PathBuf>,

    /// Write edge rows: u, v, w.
    #[arg(long = "edges-csv")]
    pub edges_csv: Option<PathBuf>,

    /// Write the strongest cross-component edges: u, v, w (component roots).
    #[arg(long = "cross-csv")]
    pub cross_csv: Option<PathBuf>,
}

/// Options accepted by the `eval` command.
#[derive(Debug, Args, Clone)]
pub struct EvalCommand {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub builder: BuilderArgs,

    /// Comma-separated gate scale values to sweep.
    #[arg(short = 'k', long = "k", value_delimiter = ',', default_value = "50.0")]
    pub k: Vec<f64>,

    /// Comma-separated size exponents to sweep.
    #[arg(long = "size-exp", value_delimiter = ',', default_value = "1.2")]
    pub size_exponents: Vec<f64>,

    /// Comma-separated modularity-guard settings to sweep (on/off).
    #[arg(
        long = "mod-guard",
        value_delimiter = ',',
        value_parser = parse_switch,
        default_value = "on"
    )]
    pub mod_guard: Vec<bool>,

    /// Output CSV path.
    #[arg(long = "out-csv")]
    pub out_csv: PathBuf,
}

/// Errors surfaced while executing CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// An input source could not be opened or read.
    #[error("failed to open `{path}`: {source}")]
    Input {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// CNF parsing or validation failed.
    #[error(transparent)]
    Cnf(#[from] CnfError),
    /// Graph construction failed.
    #[error(transparent)]
    Vig(#[from] VigError),
    /// An output could not be created or written.
    #[error("failed to write `{path}`: {source}")]
    Output {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
}

impl CliError {
    /// Process exit code for this failure: 1 invalid arguments, 2 invalid
    /// input, 3 output error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Input { .. } | Self::Cnf(_) => 2,
            Self::Vig(err) => match err.code() {
                VigErrorCode::EmptyBuffer | VigErrorCode::ZeroThreads => 1,
                _ => 2,
            },
            Self::Output { .. } => 3,
        }
    }
}

/// Executes the CLI command represented by `cli`, writing payload to `out`.
///
/// # Errors
/// Returns [`CliError`] when loading, building, or writing fails.
#[instrument(name = "cli.run", err, skip_all, fields(command = %cli.command.name()))]
pub fn run_cli(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    match cli.command {
        Command::CnfInfo(command) => run_cnf_info(&command, out),
        Command::VigInfo(command) => run_vig_info(&command, out),
        Command::Segment(command) => run_segment(&command, out),
        Command::Eval(command) => run_eval(&command, out),
    }
}

#[instrument(name = "cli.cnf_info", err, skip_all, fields(input = %path_label(&command.input.input)))]
fn run_cnf_info(command: &CnfInfoCommand, out: &mut impl Write) -> Result<(), CliError> {
    let cnf = load_cnf(&command.input)?;
    stdout_write(writeln!(
        out,
        "variables={} clauses={}",
        cnf.variable_count(),
        cnf.clause_count()
    ))?;
    for (index, clause) in cnf.clauses().iter().take(5).enumerate() {
        let rendered: Vec<String> = clause.iter().map(ToString::to_string).collect();
        stdout_write(writeln!(out, "{index}: {} 0", rendered.join(" ")))?;
    }
    Ok(())
}

#[instrument(name = "cli.vig_info", err, skip_all, fields(input = %path_label(&command.input.input)))]
fn run_vig_info(command: &VigInfoCommand, out: &mut impl Write) -> Result<(), CliError> {
    let cnf = load_cnf(&command.input)?;
    let vig = build_vig(&cnf, &command.builder, command.builder.tau)?;
    stdout_write(writeln!(
        out,
        "vars={} edges={} impl={} tau={} threads={} agg_memory={}",
        vig.n,
        vig.edges.len(),
        command.builder.impl_label(),
        command.builder.tau,
        command.builder.resolved_threads(),
        vig.aggregation_memory
    ))?;
    info!(vars = vig.n, edges = vig.edges.len(), "vig built");
    Ok(())
}

#[instrument(name = "cli.segment", err, skip_all, fields(input = %path_label(&command.input.input), k = command.segmentation.k))]
fn run_segment(command: &SegmentCommand, out: &mut impl Write) -> Result<(), CliError> {
    let cnf = load_cnf(&command.input)?;
    let vig = build_vig(&cnf, &command.builder, command.builder.tau)?;

    let mut segmenter = Segmenter::new(vig.n, command.segmentation.k);
    segmenter.set_config(command.segmentation.to_config());
    let mut edges = vig.edges.clone();
    segmenter.run(&mut edges);

    let sizes = component_sizes(vig.n, |v| segmenter.component_no_compress(v));
    let summary = summarize_components(&sizes);
    let q = modularity(
        vig.n,
        &vig.edges,
        |v| segmenter.component_no_compress(v),
        1.0,
    );

    stdout_write(writeln!(
        out,
        "vars={} edges={} comps={} k={} tau={} impl={} threads={} agg_memory={}",
        vig.n,
        vig.edges.len(),
        segmenter.num_components(),
        command.segmentation.k,
        command.builder.tau,
        command.builder.impl_label(),
        command.builder.resolved_threads(),
        vig.aggregation_memory
    ))?;
    stdout_write(writeln!(
        out,
        "keff={} gini={} pmax={} entropyJ={} modularity={}",
        summary.keff, summary.gini, summary.pmax, summary.entropy_j, q
    ))?;
    stdout_write(writeln!(
        out,
        "guard: lb_accepts={} ub_rejects={} ambiguous={}",
        segmenter.guard_lb_accepts(),
        segmenter.guard_ub_rejects(),
        segmenter.guard_ambiguous()
    ))?;

    if let Some(path) = &command.components_csv {
        write_components_csv(path, &segmenter)?;
    }
    if let Some(path) = &command.nodes_csv {
        write_nodes_csv(path, &segmenter)?;
    }
    if let Some(path) = &command.edges_csv {
        write_edges_csv(path, &vig)?;
    }
    if let Some(path) = &command.cross_csv {
        write_cross_csv(path, &segmenter)?;
    }

    info!(
        comps = segmenter.num_components(),
        modularity = q,
        "segmentation complete"
    );
    Ok(())
}

#[instrument(name = "cli.eval", err, skip_all, fields(input = %path_label(&command.input.input)))]
fn run_eval(command: &EvalCommand, out: &mut impl Write) -> Result<(), CliError> {
    let cnf = load_cnf(&command.input)?;
    // Baseline graph for modularity evaluation keeps every clause; the user
    // threshold applies only to the segmented graph.
    let vig_inf = build_vig(&cnf, &command.builder, Tau(None))?;
    let vig_user = build_vig(&cnf, &command.builder, command.builder.tau)?;

    let path = &command.out_csv;
    let mut csv = open_csv(path)?;
    output_write(
        path,
        csv.write_row([
            "vars",
            "edges_user",
            "edges_inf",
            "comps",
            "k",
            "tau_user",
            "impl",
            "threads",
            "agg_memory_inf",
            "agg_memory_user",
            "keff",
            "gini",
            "pmax",
            "entropyJ",
            "modularity",
            "size_exp",
            "modGuard",
            "modGateAcc",
            "modGateRej",
            "modGateAmb",
        ]),
    )?;

    let mut rows = 0u64;
    for &k in &command.k {
        for &size_exponent in &command.size_exponents {
            for &guard in &command.mod_guard {
                let mut segmenter = Segmenter::new(vig_user.n, k);
                segmenter.set_config(SegmenterConfig {
                    size_exponent,
                    use_modularity_guard: guard,
                    ..SegmenterConfig::default()
                });
                let mut edges = vig_user.edges.clone();
                segmenter.run(&mut edges);

                let sizes = component_sizes(vig_user.n, |v| segmenter.component_no_compress(v));
                let summary = summarize_components(&sizes);
                let q = modularity(
                    vig_inf.n,
                    &vig_inf.edges,
                    |v| segmenter.component_no_compress(v),
                    1.0,
                );

                output_write(
                    path,
                    csv.write_row([
                        vig_user.n.to_string(),
                        vig_user.edges.len().to_string(),
                        vig_inf.edges.len().to_string(),
                        segmenter.num_components().to_string(),
                        float_cell(k),
                        command.builder.tau.to_string(),
                        command.builder.impl_label().to_string(),
                        command.builder.resolved_threads().to_string(),
                        vig_inf.aggregation_memory.to_string(),
                        vig_user.aggregation_memory.to_string(),
                        float_cell(summary.keff),
                        float_cell(summary.gini),
                        float_cell(summary.pmax),
                        float_cell(summary.entropy_j),
                        float_cell(q),
                        float_cell(size_exponent),
                        u8::from(guard).to_string(),
                        segmenter.guard_lb_accepts().to_string(),
                        segmenter.guard_ub_rejects().to_string(),
                        segmenter.guard_ambiguous().to_string(),
                    ]),
                )?;
                rows += 1;
            }
        }
    }
    output_write(path, csv.finish().map(drop))?;

    stdout_write(writeln!(out, "eval: wrote {rows} rows to {}", path.display()))?;
    info!(rows, "eval sweep complete");
    Ok(())
}

fn load_cnf(args: &InputArgs) -> Result<Cnf, CliError> {
    let mut cnf = if args.input.as_os_str() == "-" {
        Cnf::parse(io::stdin().lock())?
    } else {
        let file = File::open(&args.input).map_err(|source| CliError::Input {
            path: args.input.clone(),
            source,
        })?;
        Cnf::parse(BufReader::new(file))?
    };
    // Normalization may drop clauses, so it runs before compaction to keep
    // the variable range dense.
    if !args.no_normalize {
        cnf.normalize();
    }
    if !args.no_compact {
        cnf.compact_variables();
    }
    Ok(cnf)
}

fn build_vig(cnf: &Cnf, args: &BuilderArgs, tau: Tau) -> Result<Vig, CliError> {
    if args.naive {
        return Ok(build_naive(cnf, tau.0, true));
    }
    let config = BatchedConfig {
        clause_size_threshold: tau.0,
        max_buffer_contributions: args.maxbuf,
        num_threads: args.resolved_threads(),
        sort_edges: true,
    };
    Ok(build_batched(cnf, &config)?)
}

fn write_components_csv(path: &Path, segmenter: &Segmenter) -> Result<(), CliError> {
    let mut csv = open_csv(path)?;
    output_write(
        path,
        csv.write_row(["component_id", "size", "min_internal_weight"]),
    )?;
    for root in segmenter.roots() {
        output_write(
            path,
            csv.write_row([
                root.to_string(),
                segmenter.comp_size(root).to_string(),
                float_cell(segmenter.comp_min_weight(root)),
            ]),
        )?;
    }
    output_write(path, csv.finish().map(drop))
}

fn write_nodes_csv(path: &Path, segmenter: &Segmenter) -> Result<(), CliError> {
    let mut csv = open_csv(path)?;
    output_write(path, csv.write_row(["id", "component"]))?;
    for node in 0..segmenter.node_count() {
        output_write(
            path,
            csv.write_row([
                node.to_string(),
                segmenter.component_no_compress(node).to_string(),
            ]),
        )?;
    }
    output_write(path, csv.finish().map(drop))
}

fn write_edges_csv(path: &Path, vig: &Vig) -> Result<(), CliError> {
    let mut csv = open_csv(path)?;
    output_write(path, csv.write_row(["u", "v", "w"]))?;
    for edge in &vig.edges {
        output_write(
            path,
            csv.write_row([edge.u.to_string(), edge.v.to_string(), float_cell(edge.w)]),
        )?;
    }
    output_write(path, csv.finish().map(drop))
}

fn write_cross_csv(path: &Path, segmenter: &Segmenter) -> Result<(), CliError> {
    let mut csv = open_csv(path)?;
    output_write(path, csv.write_row(["u", "v", "w"]))?;
    for edge in segmenter.strongest_inter_component_edges() {
        output_write(
            path,
            csv.write_row([edge.u.to_string(), edge.v.to_string(), float_cell(edge.w)]),
        )?;
    }
    output_write(path, csv.finish().map(drop))
}

fn open_csv(path: &Path) -> Result<CsvWriter<BufWriter<File>>, CliError> {
    let file = File::create(path).map_err(|source| CliError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(CsvWriter::new(BufWriter::new(file)))
}

fn output_write<T>(path: &Path, result: io::Result<T>) -> Result<(), CliError> {
    result.map(drop).map_err(|source| CliError::Output {
        path: path.to_path_buf(),
        source,
    })
}

fn stdout_write(result: io::Result<()>) -> Result<(), CliError> {
    result.map_err(|source| CliError::Output {
        path: PathBuf::from("<stdout>"),
        source,
    })
}

/// Produce a label for a path that avoids leaking absolute directories.
fn path_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<unknown>".to_owned())
}

pub(super) fn parse_tau(raw: &str) -> Result<Tau, String> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("inf") {
        return Ok(Tau(None));
    }
    trimmed
        .parse()
        .map(|limit| Tau(Some(limit)))
        .map_err(|_| format!("expected a clause size or `inf`, got `{raw}`"))
}

pub(super) fn parse_switch(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(format!("expected on/off, got `{other}`")),
    }
}
