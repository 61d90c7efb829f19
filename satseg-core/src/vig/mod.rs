//! Variable incidence graph (VIG) construction.
//!
//! A clause of normalized size `s` (distinct variables) distributes a total
//! mass of 1 across its unordered variable pairs: each pair receives
//! `2 / (s · (s − 1))`. Aggregating those contributions over every kept
//! clause yields a canonical undirected weighted edge set with at most one
//! edge per pair and `u < v` on every edge.
//!
//! Two builders produce that edge set. [`build_naive`] aggregates through a
//! hash map and serves as the reference oracle. [`build_batched`] replaces
//! map probes with dense per-variable buffers filled by a fixed pool of
//! worker threads under a caller-supplied memory budget; it must produce the
//! identical edge multiset on the same input.

mod batched;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::cnf::Cnf;

pub use self::batched::{BatchedConfig, build_batched};

/// Stable codes describing [`VigError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum VigErrorCode {
    /// The contribution buffer capacity was zero.
    EmptyBuffer,
    /// The worker thread count was zero.
    ZeroThreads,
    /// A per-variable contribution count exceeded 32 bits.
    ContributionOverflow,
    /// A batch buffer byte size exceeded the platform word.
    BufferOverflow,
}

impl VigErrorCode {
    /// Returns the symbolic identifier for logging surfaces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyBuffer => "VIG_EMPTY_BUFFER",
            Self::ZeroThreads => "VIG_ZERO_THREADS",
            Self::ContributionOverflow => "VIG_CONTRIBUTION_OVERFLOW",
            Self::BufferOverflow => "VIG_BUFFER_OVERFLOW",
        }
    }
}

impl fmt::Display for VigErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while building a VIG with the batched pipeline.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum VigError {
    /// `max_buffer_contributions` must be positive.
    #[error("max_buffer_contributions must be greater than zero")]
    EmptyBuffer,
    /// `num_threads` must be positive.
    #[error("num_threads must be greater than zero")]
    ZeroThreads,
    /// A single variable would produce more pair contributions than fit in 32 bits.
    #[error("variable {variable} produces {contributions} pair contributions, exceeding u32")]
    ContributionOverflow {
        /// 0-based variable id.
        variable: u32,
        /// Contribution count that overflowed.
        contributions: u64,
    },
    /// A batch buffer would exceed the addressable size on this platform.
    #[error("batch buffer of {entries} entries exceeds addressable memory")]
    BufferOverflow {
        /// Number of entries the batch required.
        entries: u64,
    },
}

impl VigError {
    /// Retrieve the stable [`VigErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> VigErrorCode {
        match self {
            Self::EmptyBuffer => VigErrorCode::EmptyBuffer,
            Self::ZeroThreads => VigErrorCode::ZeroThreads,
            Self::ContributionOverflow { .. } => VigErrorCode::ContributionOverflow,
            Self::BufferOverflow { .. } => VigErrorCode::BufferOverflow,
        }
    }
}

/// An aggregated undirected edge in canonical form (`u < v`, `w > 0`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    /// Smaller endpoint, 0-based variable id.
    pub u: u32,
    /// Larger endpoint, 0-based variable id.
    pub v: u32,
    /// Aggregated similarity weight.
    pub w: f64,
}

/// The variable incidence graph of a CNF formula.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vig {
    /// Number of variables the graph ranges over.
    pub n: u32,
    /// Aggregated edges, canonical `u < v`.
    pub edges: Vec<Edge>,
    /// Bytes of transient and final storage the build touched.
    pub aggregation_memory: usize,
}

/// Descending weight, ties broken by `(u, v)` ascending for determinism.
pub(crate) fn descending_weight(a: &Edge, b: &Edge) -> Ordering {
    b.w.total_cmp(&a.w)
        .then_with(|| a.u.cmp(&b.u))
        .then_with(|| a.v.cmp(&b.v))
}

/// Sorts an edge list into the canonical descending-weight order.
pub fn sort_edges_descending(edges: &mut [Edge]) {
    edges.sort_unstable_by(descending_weight);
}

/// Collects a clause's distinct 0-based variables in ascending order.
///
/// Polarity is ignored; out-of-range variables are skipped. The scratch
/// vector is reused across calls.
pub(crate) fn clause_vars(clause: &[i32], n: u32, scratch: &mut Vec<u32>) {
    scratch.clear();
    for &literal in clause {
        if literal == 0 {
            continue;
        }
        let var = literal.unsigned_abs() - 1;
        if var < n {
            scratch.push(var);
        }
    }
    scratch.sort_unstable();
    scratch.dedup();
}

/// Weight each unordered pair receives from a clause of `s` distinct variables.
pub(crate) fn pair_weight(s: usize) -> f64 {
    2.0 / (s as f64 * (s as f64 - 1.0))
}

pub(crate) fn within_threshold(s: usize, threshold: Option<usize>) -> bool {
    s >= 2 && threshold.map_or(true, |tau| s <= tau)
}

/// Builds the VIG by hash-map aggregation over clause variable pairs.
///
/// Clauses with more than `clause_size_threshold` distinct variables are
/// dropped entirely; `None` keeps every clause of size ≥ 2. When
/// `sort_edges` is set the result is ordered by descending weight with
/// `(u, v)` ascending tie-break.
///
/// # Examples
///
/// ```
/// use satseg_core::{Cnf, build_naive};
///
/// let cnf = Cnf::parse("p cnf 3 2\n1 2 3 0\n-1 -2 0\n".as_bytes())?;
/// let vig = build_naive(&cnf, None, true);
/// assert_eq!(vig.edges.len(), 3);
/// // The pair (0, 1) collects 1/3 from the ternary clause plus 1 from the
/// // binary clause.
/// assert!((vig.edges[0].w - 4.0 / 3.0).abs() < 1e-12);
/// # Ok::<(), satseg_core::CnfError>(())
/// ```
#[must_use]
pub fn build_naive(cnf: &Cnf, clause_size_threshold: Option<usize>, sort_edges: bool) -> Vig {
    let n = cnf.variable_count();
    let mut aggregate: HashMap<(u32, u32), f64> =
        HashMap::with_capacity(cnf.clause_count() as usize * 2);
    let mut vars = Vec::with_capacity(64);

    for clause in cnf.clauses() {
        clause_vars(clause, n, &mut vars);
        let s = vars.len();
        if !within_threshold(s, clause_size_threshold) {
            continue;
        }
        let w = pair_weight(s);
        for i in 0..s - 1 {
            let a = vars[i];
            for &b in &vars[i + 1..] {
                *aggregate.entry((a, b)).or_insert(0.0) += w;
            }
        }
    }

    let mut edges: Vec<Edge> = aggregate
        .into_iter()
        .map(|((u, v), w)| Edge { u, v, w })
        .collect();
    if sort_edges {
        sort_edges_descending(&mut edges);
    }

    Vig {
        n,
        edges,
        aggregation_memory: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    use crate::cnf::Cnf;

    fn parse(text: &str) -> Cnf {
        Cnf::parse(text.as_bytes()).expect("valid CNF")
    }

    #[test]
    fn aggregates_pair_weights_across_clauses() {
        // Size-3 clause contributes 1/3 per pair; size-2 clause contributes 1.
        let cnf = parse("p cnf 3 2\n1 2 3 0\n-1 -2 0\n");
        let vig = build_naive(&cnf, None, true);
        assert_eq!(vig.n, 3);
        assert_eq!(vig.edges.len(), 3);

        let expected = [
            (0, 1, 4.0 / 3.0),
            (0, 2, 1.0 / 3.0),
            (1, 2, 1.0 / 3.0),
        ];
        for (edge, (u, v, w)) in vig.edges.iter().zip(expected) {
            assert_eq!((edge.u, edge.v), (u, v));
            assert!((edge.w - w).abs() < 1e-12, "weight {} != {w}", edge.w);
        }
    }

    #[test]
    fn each_kept_clause_contributes_unit_mass() {
        let cnf = parse("p cnf 5 3\n1 2 3 4 0\n-2 5 0\n1 -5 3 0\n");
        let vig = build_naive(&cnf, None, false);
        let total: f64 = vig.edges.iter().map(|e| e.w).sum();
        assert!((total - 3.0).abs() < 1e-12, "total mass {total}");
    }

    #[rstest]
    #[case::drops_everything(Some(1), 0)]
    #[case::keeps_binary_only(Some(2), 1)]
    #[case::keeps_all(None, 4)]
    fn clause_size_threshold_filters(#[case] tau: Option<usize>, #[case] expected: usize) {
        let cnf = parse("p cnf 3 2\n1 2 3 0\n-1 -2 0\n");
        let vig = build_naive(&cnf, tau, false);
        assert_eq!(vig.edges.len(), expected);
    }

    #[test]
    fn duplicate_literals_collapse_before_weighting() {
        // `1 1 -2` has two distinct variables, so the pair weight is 1.
        let cnf = parse("p cnf 2 1\n1 1 -2 0\n");
        let vig = build_naive(&cnf, None, false);
        assert_eq!(vig.edges.len(), 1);
        assert!((vig.edges[0].w - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_variable_clauses_produce_no_edges() {
        let cnf = parse("p cnf 2 2\n1 0\n-2 0\n");
        let vig = build_naive(&cnf, None, false);
        assert!(vig.edges.is_empty());
    }

    #[test]
    fn edges_are_canonical() {
        let cnf = parse("p cnf 4 3\n4 1 0\n3 -2 0\n-4 2 0\n");
        let vig = build_naive(&cnf, None, true);
        for edge in &vig.edges {
            assert!(edge.u < edge.v, "edge ({}, {}) not canonical", edge.u, edge.v);
            assert!(edge.w > 0.0);
        }
    }

    #[test]
    fn sort_is_deterministic_under_weight_ties() {
        let mut edges = vec![
            Edge { u: 2, v: 3, w: 0.5 },
            Edge { u: 0, v: 4, w: 0.5 },
            Edge { u: 0, v: 1, w: 2.0 },
            Edge { u: 0, v: 2, w: 0.5 },
        ];
        sort_edges_descending(&mut edges);
        let order: Vec<(u32, u32)> = edges.iter().map(|e| (e.u, e.v)).collect();
        assert_eq!(order, [(0, 1), (0, 2), (0, 4), (2, 3)]);
    }
}
