//! Memory-bounded, multi-threaded batched VIG construction.
//!
//! The pipeline runs in two phases. A sequential counting pass records, for
//! every variable `a`, how many `(b, w)` pair entries it will emit (those
//! with `b > a`). Variables are then partitioned into contiguous batches
//! whose combined entry counts fit the per-thread buffer capacity, and the
//! batches are processed in rounds of up to one batch per worker.
//!
//! Each round advances through three barrier-separated phases on a fixed
//! pool of workers:
//!
//! - **FILL**: every worker walks its own clause range and appends entries
//!   into the active batch buffers. A relaxed `fetch_add` on the per-variable
//!   write cursor claims a contiguous run of slots, so writers never overlap.
//! - **ACCUM**: worker `t` reduces active batch `t` alone: each variable's
//!   segment is sorted by neighbour id and run-length summed into the
//!   worker-local edge buffer. Segment order before the sort is irrelevant,
//!   so the result does not depend on FILL interleaving.
//! - **TEARDOWN**: worker 0 releases the round's buffers and clears the
//!   variable-to-batch map, bounded by barriers on both sides.
//!
//! The edge multiset is identical to [`build_naive`](super::build_naive) on
//! the same input; per-edge weights agree up to floating-point summation
//! order.

use std::cell::UnsafeCell;
use std::mem::size_of;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Barrier, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use rayon::slice::ParallelSliceMut;
use tracing::debug;

use crate::cnf::Cnf;

use super::{Edge, Vig, VigError, clause_vars, descending_weight, pair_weight, within_threshold};

const INACTIVE: u32 = u32::MAX;

/// Configuration for [`build_batched`].
#[derive(Clone, Debug)]
pub struct BatchedConfig {
    /// Clauses with more distinct variables than this are dropped; `None`
    /// keeps every clause of size ≥ 2.
    pub clause_size_threshold: Option<usize>,
    /// Transient buffer budget, counted in `(b, w)` entries rather than
    /// bytes. The per-thread capacity is derived from this and may be raised
    /// to fit the single largest per-variable contribution.
    pub max_buffer_contributions: usize,
    /// Number of worker threads; must be positive.
    pub num_threads: usize,
    /// Sort the final edge list descending by weight.
    pub sort_edges: bool,
}

impl Default for BatchedConfig {
    fn default() -> Self {
        Self {
            clause_size_threshold: None,
            max_buffer_contributions: 50_000_000,
            num_threads: thread::available_parallelism().map_or(1, usize::from),
            sort_edges: true,
        }
    }
}

/// Builds the VIG through the batched pipeline.
///
/// Produces the same edge set as the naive builder on the same input, with
/// per-edge weights equal up to floating-point summation order. The returned
/// [`Vig::aggregation_memory`] accounts for the peak transient buffers, the
/// worker edge buffers, the final edge vector, and the planning arrays.
///
/// # Errors
///
/// Returns [`VigError`] when the configuration is invalid
/// (`max_buffer_contributions` or `num_threads` of zero) or when a
/// contribution count or batch buffer size overflows its representation.
pub fn build_batched(cnf: &Cnf, config: &BatchedConfig) -> Result<Vig, VigError> {
    if config.max_buffer_contributions == 0 {
        return Err(VigError::EmptyBuffer);
    }
    if config.num_threads == 0 {
        return Err(VigError::ZeroThreads);
    }

    let n = cnf.variable_count();
    if n == 0 {
        return Ok(Vig::default());
    }

    let threads = config.num_threads;
    let plan = plan_build(cnf, config, threads)?;
    debug!(
        variables = n,
        batches = plan.batches.len(),
        rounds = plan.rounds,
        per_thread_capacity = plan.per_thread_capacity,
        "batched build planned"
    );

    let barrier = Barrier::new(threads);
    let shared = RwLock::new(RoundState::new(n as usize));
    let clause_ranges = split_ranges(cnf.clauses().len(), threads);

    let outputs: Vec<WorkerOutput> = thread::scope(|scope| {
        let handles: Vec<_> = clause_ranges
            .into_iter()
            .enumerate()
            .map(|(worker, clause_range)| {
                let plan = &plan;
                let shared = &shared;
                let barrier = &barrier;
                let threshold = config.clause_size_threshold;
                scope.spawn(move || {
                    worker_loop(worker, threads, plan, cnf, threshold, shared, barrier, clause_range)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(output) => output,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    let peak_round_bytes = outputs
        .iter()
        .map(|output| output.peak_buffer_bytes)
        .max()
        .unwrap_or(0);
    let worker_edge_bytes: usize = outputs
        .iter()
        .map(|output| output.edges.len().saturating_mul(size_of::<Edge>()))
        .sum();

    let mut edges: Vec<Edge> =
        Vec::with_capacity(outputs.iter().map(|output| output.edges.len()).sum());
    for output in outputs {
        edges.extend(output.edges);
    }
    if config.sort_edges {
        edges.par_sort_unstable_by(descending_weight);
    }

    let misc_bytes = plan
        .contrib
        .len()
        .saturating_mul(size_of::<u32>())
        .saturating_add(plan.weights.len().saturating_mul(size_of::<f64>()))
        .saturating_add(plan.batches.len().saturating_mul(size_of::<BatchSpan>()))
        .saturating_add((n as usize).saturating_mul(size_of::<u32>()));
    let edge_bytes = edges.len().saturating_mul(size_of::<Edge>());
    let aggregation_memory = peak_round_bytes
        .saturating_add(worker_edge_bytes)
        .saturating_add(edge_bytes)
        .saturating_add(misc_bytes);
    debug!(
        peak_round_bytes,
        worker_edge_bytes, edge_bytes, misc_bytes, aggregation_memory, "memory breakdown"
    );

    Ok(Vig {
        n,
        edges,
        aggregation_memory,
    })
}

struct BuildPlan {
    /// Outgoing pair slots per variable.
    contrib: Vec<u32>,
    /// Pair weight indexed by clause size.
    weights: Vec<f64>,
    batches: Vec<BatchSpan>,
    rounds: usize,
    per_thread_capacity: u64,
}

/// Contiguous variable range `[first, end)` with its total entry count.
#[derive(Clone, Copy, Debug)]
struct BatchSpan {
    first: u32,
    end: u32,
    entries: u64,
}

fn plan_build(cnf: &Cnf, config: &BatchedConfig, threads: usize) -> Result<BuildPlan, VigError> {
    let n = cnf.variable_count() as usize;
    let mut counts: Vec<u64> = vec![0; n];
    let mut vars = Vec::with_capacity(64);
    let mut max_clause_size = 0usize;

    for clause in cnf.clauses() {
        clause_vars(clause, cnf.variable_count(), &mut vars);
        let s = vars.len();
        if !within_threshold(s, config.clause_size_threshold) {
            continue;
        }
        max_clause_size = max_clause_size.max(s);
        // The variable at sorted position i owns the (s - 1 - i) pairs with
        // larger partners.
        for (i, &a) in vars[..s - 1].iter().enumerate() {
            counts[a as usize] += (s - 1 - i) as u64;
        }
    }

    let mut contrib: Vec<u32> = Vec::with_capacity(n);
    for (variable, &count) in counts.iter().enumerate() {
        let slot = u32::try_from(count).map_err(|_| VigError::ContributionOverflow {
            variable: variable as u32,
            contributions: count,
        })?;
        contrib.push(slot);
    }

    let mut weights = vec![0.0; max_clause_size + 1];
    for (s, weight) in weights.iter_mut().enumerate().skip(2) {
        *weight = pair_weight(s);
    }

    let largest = contrib.iter().copied().max().unwrap_or(0) as u64;
    let budget = (config.max_buffer_contributions / threads.saturating_sub(1).max(1)) as u64;
    let per_thread_capacity = if budget < largest {
        debug!(budget, largest, "per-thread capacity raised to fit largest contribution");
        largest
    } else {
        budget.max(1)
    };

    let mut batches = Vec::new();
    let mut first = 0u32;
    let mut accum = 0u64;
    for v in 0..n as u32 {
        let count = contrib[v as usize] as u64;
        if accum + count > per_thread_capacity && v > first {
            batches.push(BatchSpan {
                first,
                end: v,
                entries: accum,
            });
            first = v;
            accum = count;
        } else {
            accum += count;
        }
    }
    if (first as usize) < n {
        batches.push(BatchSpan {
            first,
            end: n as u32,
            entries: accum,
        });
    }

    for batch in &batches {
        let bytes = batch.entries.checked_mul(size_of::<FillEntry>() as u64);
        if bytes.and_then(|bytes| usize::try_from(bytes).ok()).is_none() {
            return Err(VigError::BufferOverflow {
                entries: batch.entries,
            });
        }
    }

    let rounds = batches.len().div_ceil(threads);
    Ok(BuildPlan {
        contrib,
        weights,
        batches,
        rounds,
        per_thread_capacity,
    })
}

#[derive(Clone, Copy)]
struct FillEntry {
    b: u32,
    w: f64,
}

/// Flat slot array shared by all workers during FILL.
///
/// Exclusive ownership of each slot is handed out through the per-variable
/// atomic cursors: a `fetch_add` claims a contiguous run, and only the
/// claiming worker writes it. After the FILL barrier the slots are read and
/// mutated by exactly one worker per batch.
struct FillSlots {
    cells: Box<[UnsafeCell<FillEntry>]>,
}

// SAFETY: concurrent access is coordinated by the atomic cursors (disjoint
// writes during FILL) and the phase barrier (exclusive access during ACCUM).
unsafe impl Sync for FillSlots {}

impl FillSlots {
    fn new(len: usize) -> Self {
        let cells = (0..len)
            .map(|_| UnsafeCell::new(FillEntry { b: 0, w: 0.0 }))
            .collect();
        Self { cells }
    }

    /// Writes one entry.
    ///
    /// # Safety
    ///
    /// The caller must hold the claim on `index` obtained from the owning
    /// variable's cursor `fetch_add`; no other thread may touch the slot
    /// until the next barrier.
    unsafe fn write(&self, index: usize, entry: FillEntry) {
        unsafe { *self.cells[index].get() = entry };
    }

    /// Borrows a variable's segment mutably for reduction.
    ///
    /// # Safety
    ///
    /// FILL must have completed (barrier crossed) and the caller must be the
    /// only worker reducing the batch that owns this segment.
    #[allow(clippy::mut_from_ref)]
    unsafe fn segment_mut(&self, start: usize, len: usize) -> &mut [FillEntry] {
        debug_assert!(start + len <= self.cells.len());
        let base = self.cells.as_ptr().cast::<FillEntry>().cast_mut();
        unsafe { std::slice::from_raw_parts_mut(base.add(start), len) }
    }
}

struct ActiveBatch {
    first: u32,
    /// Per-variable start offset into `slots`.
    offsets: Vec<u64>,
    /// Per-variable claimed entry count.
    cursors: Vec<AtomicU32>,
    slots: FillSlots,
}

struct RoundState {
    active: Vec<ActiveBatch>,
    /// Variable to active-batch index, [`INACTIVE`] outside the round.
    var_batch: Vec<u32>,
}

impl RoundState {
    fn new(n: usize) -> Self {
        Self {
            active: Vec::new(),
            var_batch: vec![INACTIVE; n],
        }
    }
}

struct WorkerOutput {
    edges: Vec<Edge>,
    peak_buffer_bytes: usize,
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    worker: usize,
    threads: usize,
    plan: &BuildPlan,
    cnf: &Cnf,
    threshold: Option<usize>,
    shared: &RwLock<RoundState>,
    barrier: &Barrier,
    clause_range: Range<usize>,
) -> WorkerOutput {
    let mut edges = Vec::new();
    let mut vars = Vec::with_capacity(64);
    let mut peak_buffer_bytes = 0usize;

    for round in 0..plan.rounds {
        if worker == 0 {
            let mut state = write_shared(shared);
            let bytes = prepare_round(&mut state, plan, round, threads);
            peak_buffer_bytes = peak_buffer_bytes.max(bytes);
        }
        barrier.wait();

        {
            let state = read_shared(shared);
            fill_clause_range(&state, plan, cnf, threshold, clause_range.clone(), &mut vars);
        }
        barrier.wait();

        {
            let state = read_shared(shared);
            if let Some(batch) = state.active.get(worker) {
                reduce_batch(batch, plan, &mut edges);
            }
        }
        barrier.wait();

        if worker == 0 {
            let mut state = write_shared(shared);
            teardown_round(&mut state);
        }
    }

    WorkerOutput {
        edges,
        peak_buffer_bytes,
    }
}

/// Allocates the round's batch buffers and maps their variables; returns the
/// buffer bytes charged against the peak.
fn prepare_round(state: &mut RoundState, plan: &BuildPlan, round: usize, threads: usize) -> usize {
    let begin = round * threads;
    let end = (begin + threads).min(plan.batches.len());
    let mut bytes = 0usize;

    for batch in &plan.batches[begin..end] {
        let len = (batch.end - batch.first) as usize;
        let mut offsets = Vec::with_capacity(len);
        let mut total = 0u64;
        for v in batch.first..batch.end {
            offsets.push(total);
            total += plan.contrib[v as usize] as u64;
        }
        let cursors: Vec<AtomicU32> = (0..len).map(|_| AtomicU32::new(0)).collect();
        bytes = bytes
            .saturating_add((total as usize).saturating_mul(size_of::<FillEntry>()))
            .saturating_add(len.saturating_mul(size_of::<u64>() + size_of::<AtomicU32>()));

        let index = state.active.len() as u32;
        for v in batch.first..batch.end {
            state.var_batch[v as usize] = index;
        }
        state.active.push(ActiveBatch {
            first: batch.first,
            offsets,
            cursors,
            slots: FillSlots::new(total as usize),
        });
    }
    bytes
}

fn fill_clause_range(
    state: &RoundState,
    plan: &BuildPlan,
    cnf: &Cnf,
    threshold: Option<usize>,
    clause_range: Range<usize>,
    vars: &mut Vec<u32>,
) {
    let n = cnf.variable_count();
    for clause in &cnf.clauses()[clause_range] {
        clause_vars(clause, n, vars);
        let s = vars.len();
        if !within_threshold(s, threshold) {
            continue;
        }
        let w = plan.weights[s];
        for i in 0..s - 1 {
            let a = vars[i];
            let batch_index = state.var_batch[a as usize];
            if batch_index == INACTIVE {
                continue;
            }
            let batch = &state.active[batch_index as usize];
            let slot = (a - batch.first) as usize;
            let run = (s - 1 - i) as u32;
            let claimed = batch.cursors[slot].fetch_add(run, Ordering::Relaxed);
            let base = batch.offsets[slot] as usize + claimed as usize;
            for (j, &b) in vars[i + 1..].iter().enumerate() {
                // SAFETY: the fetch_add above claimed [base, base + run)
                // exclusively for this worker.
                unsafe { batch.slots.write(base + j, FillEntry { b, w }) };
            }
        }
    }
}

/// Reduces one batch: sort each variable's segment by partner id and
/// run-length sum into the worker-local edge buffer.
fn reduce_batch(batch: &ActiveBatch, plan: &BuildPlan, edges: &mut Vec<Edge>) {
    for (slot, &offset) in batch.offsets.iter().enumerate() {
        let a = batch.first + slot as u32;
        let count = plan.contrib[a as usize] as usize;
        if count == 0 {
            continue;
        }
        debug_assert_eq!(
            batch.cursors[slot].load(Ordering::Relaxed) as usize,
            count,
            "FILL must claim exactly the counted contributions"
        );
        // SAFETY: FILL finished at the preceding barrier and this worker is
        // the only reducer of this batch.
        let segment = unsafe { batch.slots.segment_mut(offset as usize, count) };
        segment.sort_unstable_by_key(|entry| entry.b);

        let mut index = 0;
        while index < segment.len() {
            let b = segment[index].b;
            let mut w = 0.0;
            while index < segment.len() && segment[index].b == b {
                w += segment[index].w;
                index += 1;
            }
            edges.push(Edge { u: a, v: b, w });
        }
    }
}

fn teardown_round(state: &mut RoundState) {
    for batch in &state.active {
        let end = batch.first + batch.offsets.len() as u32;
        for v in batch.first..end {
            state.var_batch[v as usize] = INACTIVE;
        }
    }
    state.active.clear();
}

/// Splits `len` items into `parts` contiguous ranges differing by at most one.
fn split_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let chunk = len / parts;
    let remainder = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for part in 0..parts {
        let extra = usize::from(part < remainder);
        let end = start + chunk + extra;
        ranges.push(start..end);
        start = end;
    }
    ranges
}

fn read_shared(lock: &RwLock<RoundState>) -> RwLockReadGuard<'_, RoundState> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_shared(lock: &RwLock<RoundState>) -> RwLockWriteGuard<'_, RoundState> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    use crate::cnf::Cnf;
    use crate::vig::build_naive;

    fn parse(text: &str) -> Cnf {
        Cnf::parse(text.as_bytes()).expect("valid CNF")
    }

    fn config(max_buffer_contributions: usize, num_threads: usize) -> BatchedConfig {
        BatchedConfig {
            clause_size_threshold: None,
            max_buffer_contributions,
            num_threads,
            sort_edges: true,
        }
    }

    fn assert_same_edges(actual: &[Edge], expected: &[Edge]) {
        assert_eq!(actual.len(), expected.len(), "edge count differs");
        for (a, e) in actual.iter().zip(expected) {
            assert_eq!((a.u, a.v), (e.u, e.v));
            assert!(
                (a.w - e.w).abs() < 1e-12,
                "weight mismatch on ({}, {}): {} vs {}",
                a.u,
                a.v,
                a.w,
                e.w
            );
        }
    }

    #[test]
    fn rejects_zero_buffer() {
        let cnf = parse("p cnf 2 1\n1 2 0\n");
        let err = build_batched(&cnf, &config(0, 2)).expect_err("zero buffer");
        assert_eq!(err, VigError::EmptyBuffer);
    }

    #[test]
    fn rejects_zero_threads() {
        let cnf = parse("p cnf 2 1\n1 2 0\n");
        let err = build_batched(&cnf, &config(16, 0)).expect_err("zero threads");
        assert_eq!(err, VigError::ZeroThreads);
    }

    #[test]
    fn empty_formula_yields_empty_graph() {
        let cnf = Cnf::from_clauses(0, Vec::new());
        let vig = build_batched(&cnf, &config(16, 2)).expect("build succeeds");
        assert_eq!(vig.n, 0);
        assert!(vig.edges.is_empty());
    }

    #[rstest]
    #[case::single_thread(1)]
    #[case::two_threads(2)]
    #[case::four_threads(4)]
    fn matches_naive_builder(#[case] threads: usize) {
        let cnf = parse(concat!(
            "p cnf 6 6\n",
            "1 2 3 0\n",
            "-1 -2 0\n",
            "4 5 6 1 0\n",
            "2 -6 0\n",
            "3 4 0\n",
            "-5 1 2 0\n",
        ));
        let expected = build_naive(&cnf, None, true);
        let vig = build_batched(&cnf, &config(1_000, threads)).expect("build succeeds");
        assert_same_edges(&vig.edges, &expected.edges);
    }

    #[test]
    fn tiny_buffer_forces_multiple_rounds_with_identical_output() {
        // Per-variable contributions exceed the nominal per-thread share, so
        // the capacity is bumped and every batch holds few variables.
        let cnf = parse(concat!(
            "p cnf 8 5\n",
            "1 2 3 4 5 6 7 8 0\n",
            "1 3 5 7 0\n",
            "2 4 6 8 0\n",
            "1 8 0\n",
            "-2 -7 0\n",
        ));
        let expected = build_naive(&cnf, None, true);
        let vig = build_batched(&cnf, &config(8, 4)).expect("build succeeds");
        assert_same_edges(&vig.edges, &expected.edges);
        assert!(vig.aggregation_memory > 0);
    }

    #[test]
    fn threshold_drops_wide_clauses() {
        let cnf = parse("p cnf 4 2\n1 2 3 4 0\n1 2 0\n");
        let cfg = BatchedConfig {
            clause_size_threshold: Some(2),
            ..config(64, 2)
        };
        let vig = build_batched(&cnf, &cfg).expect("build succeeds");
        assert_eq!(vig.edges.len(), 1);
        assert!((vig.edges[0].w - 1.0).abs() < 1e-12);
    }

    #[test]
    fn more_threads_than_batches_is_harmless() {
        let cnf = parse("p cnf 3 2\n1 2 3 0\n-1 -2 0\n");
        let expected = build_naive(&cnf, None, true);
        let vig = build_batched(&cnf, &config(1_000_000, 8)).expect("build succeeds");
        assert_same_edges(&vig.edges, &expected.edges);
    }

    #[test]
    fn split_ranges_cover_all_items() {
        let ranges = split_ranges(10, 4);
        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);
        let ranges = split_ranges(2, 4);
        assert_eq!(ranges, vec![0..1, 1..2, 2..2, 2..2]);
    }
}
