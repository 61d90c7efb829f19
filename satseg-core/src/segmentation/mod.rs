//! Felzenszwalb–Huttenlocher style graph segmentation with a modularity guard.
//!
//! Input edges carry similarity weights (larger = more similar). The
//! segmenter converts each weight to a distance `d = 1/w`, optionally
//! normalized by the median distance over the heaviest edges so `k` has a
//! comparable effect across graphs, and processes edges in descending weight
//! order. An edge may merge its endpoint components when the distance stays
//! within both component gates:
//!
//! ```text
//! gate(C) = max_dist(C) + k / |C|^size_exponent
//! ```
//!
//! where `max_dist` is the largest internal edge distance observed so far.
//!
//! The optional modularity guard wraps every gate-passing merge in a pair of
//! O(1) tests around the modularity change ΔQ at resolution `gamma`: a
//! lower-bound accept (the worst case is still non-negative, up to an
//! annealed tolerance) and an upper-bound reject (even the best case is
//! negative). Edges that merge nothing are recorded as inter-component
//! candidates, from which the strongest connection per component pair can be
//! recovered after the run.

mod union_find;

use std::collections::HashSet;

use crate::vig::{Edge, sort_edges_descending};

pub use self::union_find::DisjointSet;

/// Action taken when both modularity-guard bound tests are indecisive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AmbiguousPolicy {
    /// Merge the components.
    Accept,
    /// Record the edge as a cross-component candidate.
    Reject,
    /// Merge only when the gate leaves a configurable relative margin.
    #[default]
    GateMargin,
}

/// Behavior knobs for [`Segmenter`]; defaults keep the classic FH predicate
/// plus the modularity guard.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmenterConfig {
    /// Normalize distances by the median of `1/w` over the heaviest edges.
    pub normalize_distances: bool,
    /// Number of top edges sampled for the normalization median.
    pub norm_sample_edges: usize,
    /// Exponent of the component size in the gate denominator. `1.0`
    /// reproduces classic FH; larger values make big components harder to
    /// grow.
    pub size_exponent: f64,
    /// Enable the ΔQ lower-bound accept / upper-bound reject tests.
    pub use_modularity_guard: bool,
    /// Modularity resolution.
    pub gamma: f64,
    /// Allow a small negative ΔQ tolerance that tightens as components grow.
    pub anneal_modularity_guard: bool,
    /// Initial ΔQ tolerance magnitude.
    pub dq_tolerance0: f64,
    /// Annealing volume scale; `0` selects `max(1, 2m/n)`.
    pub dq_vscale: f64,
    /// Action for indecisive guard outcomes.
    pub ambiguous_policy: AmbiguousPolicy,
    /// Relative gate headroom required by [`AmbiguousPolicy::GateMargin`].
    pub gate_margin_ratio: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            normalize_distances: true,
            norm_sample_edges: 1000,
            size_exponent: 1.2,
            use_modularity_guard: true,
            gamma: 1.0,
            anneal_modularity_guard: true,
            dq_tolerance0: 5e-4,
            dq_vscale: 0.0,
            ambiguous_policy: AmbiguousPolicy::GateMargin,
            gate_margin_ratio: 0.05,
        }
    }
}

/// FH graph segmenter over a union-find forest.
///
/// Owns the disjoint-set and all per-component state for the duration of a
/// [`run`](Self::run); accessors remain valid until the next
/// [`reset`](Self::reset).
///
/// # Examples
///
/// ```
/// use satseg_core::{Edge, Segmenter, SegmenterConfig};
///
/// let mut segmenter = Segmenter::new(3, 1.0);
/// segmenter.set_config(SegmenterConfig {
///     normalize_distances: false,
///     use_modularity_guard: false,
///     ..SegmenterConfig::default()
/// });
/// let mut edges = vec![
///     Edge { u: 0, v: 1, w: 4.0 / 3.0 },
///     Edge { u: 0, v: 2, w: 1.0 / 3.0 },
///     Edge { u: 1, v: 2, w: 1.0 / 3.0 },
/// ];
/// segmenter.run(&mut edges);
/// assert_eq!(segmenter.num_components(), 2);
/// assert_eq!(segmenter.component_no_compress(0), segmenter.component_no_compress(1));
/// ```
#[derive(Clone, Debug)]
pub struct Segmenter {
    dsu: DisjointSet,
    comp_size: Vec<u32>,
    max_dist: Vec<f64>,
    comp_vol: Vec<f64>,
    internal_lb: Vec<f64>,
    k: f64,
    config: SegmenterConfig,
    d_scale: f64,
    sum_weights: f64,
    candidates: Vec<Edge>,
    lb_accepts: u64,
    ub_rejects: u64,
    ambiguous: u64,
}

impl Segmenter {
    /// Default gate scale parameter.
    pub const DEFAULT_K: f64 = 50.0;

    /// Creates a segmenter over `n` singleton components with parameter `k`.
    #[must_use]
    pub fn new(n: u32, k: f64) -> Self {
        let mut segmenter = Self {
            dsu: DisjointSet::default(),
            comp_size: Vec::new(),
            max_dist: Vec::new(),
            comp_vol: Vec::new(),
            internal_lb: Vec::new(),
            k,
            config: SegmenterConfig::default(),
            d_scale: 1.0,
            sum_weights: 0.0,
            candidates: Vec::new(),
            lb_accepts: 0,
            ub_rejects: 0,
            ambiguous: 0,
        };
        segmenter.reset(n, k);
        segmenter
    }

    /// Resets to `n` singleton components, clearing any previous run state.
    /// The configuration is preserved.
    pub fn reset(&mut self, n: u32, k: f64) {
        self.dsu.reset(n);
        self.comp_size.clear();
        self.comp_size.resize(n as usize, 1);
        self.max_dist.clear();
        self.max_dist.resize(n as usize, 0.0);
        self.comp_vol.clear();
        self.comp_vol.resize(n as usize, 0.0);
        self.internal_lb.clear();
        self.internal_lb.resize(n as usize, 0.0);
        self.k = k;
        self.d_scale = 1.0;
        self.sum_weights = 0.0;
        self.candidates.clear();
        self.lb_accepts = 0;
        self.ub_rejects = 0;
        self.ambiguous = 0;
    }

    /// Replaces the configuration; call before [`run`](Self::run).
    #[rustfmt::skip]
    pub fn set_config(&mut self, config: SegmenterConfig) { self.config = config; }

    /// The active configuration.
    #[must_use]
    #[rustfmt::skip]
    pub fn config(&self) -> &SegmenterConfig { &self.config }

    /// Runs segmentation in place; `edges` is sorted descending by weight.
    ///
    /// Edges with non-positive weight are ignored entirely: they contribute
    /// neither to the total weight nor to component volumes and are never
    /// processed.
    pub fn run(&mut self, edges: &mut [Edge]) {
        sort_edges_descending(edges);
        let positive = edges.iter().take_while(|edge| edge.w > 0.0).count();
        let edges = &edges[..positive];

        self.sum_weights = edges.iter().map(|edge| edge.w).sum();
        if self.config.use_modularity_guard {
            for edge in edges {
                self.comp_vol[edge.u as usize] += edge.w;
                self.comp_vol[edge.v as usize] += edge.w;
            }
        }
        if self.config.normalize_distances {
            self.d_scale = median_top_distance(edges, self.config.norm_sample_edges);
        }

        for &edge in edges {
            self.process_edge(edge);
        }
    }

    /// One strongest edge per unordered pair of final components.
    ///
    /// Candidates are stored in descending weight order, so the first
    /// occurrence per component pair is the heaviest. Edge endpoints in the
    /// result are the final component roots; candidates whose endpoints
    /// ended up merged after they were recorded are skipped.
    #[must_use]
    pub fn strongest_inter_component_edges(&self) -> Vec<Edge> {
        let mut seen: HashSet<(u32, u32)> = HashSet::new();
        let mut strongest = Vec::new();
        for edge in &self.candidates {
            let ra = self.dsu.find_no_compress(edge.u);
            let rb = self.dsu.find_no_compress(edge.v);
            if ra == rb {
                continue;
            }
            let key = (ra.min(rb), ra.max(rb));
            if seen.insert(key) {
                strongest.push(Edge {
                    u: key.0,
                    v: key.1,
                    w: edge.w,
                });
            }
        }
        strongest
    }

    /// Cross-component candidate edges in processing order.
    #[must_use]
    #[rustfmt::skip]
    pub fn inter_component_candidates(&self) -> &[Edge] { &self.candidates }

    /// Number of nodes under segmentation.
    #[must_use]
    #[rustfmt::skip]
    pub fn node_count(&self) -> u32 { self.dsu.len() }

    /// Number of components after the run.
    #[must_use]
    #[rustfmt::skip]
    pub fn num_components(&self) -> u32 { self.dsu.components() }

    /// Roots of the component forest, ascending.
    #[must_use]
    #[rustfmt::skip]
    pub fn roots(&self) -> Vec<u32> { self.dsu.roots() }

    /// Representative of `x`, compressing the path.
    #[rustfmt::skip]
    pub fn component(&mut self, x: u32) -> u32 { self.dsu.find(x) }

    /// Representative of `x` without mutation; safe for shared readers.
    #[must_use]
    #[rustfmt::skip]
    pub fn component_no_compress(&self, x: u32) -> u32 { self.dsu.find_no_compress(x) }

    /// Size of the component rooted at `r`.
    #[must_use]
    #[rustfmt::skip]
    pub fn comp_size(&self, r: u32) -> u32 { self.comp_size[r as usize] }

    /// Minimum similarity weight observed inside the component rooted at `r`
    /// (infinite for singletons).
    #[must_use]
    pub fn comp_min_weight(&self, r: u32) -> f64 {
        let max_dist = self.max_dist[r as usize];
        if max_dist > 0.0 {
            1.0 / max_dist
        } else {
            f64::INFINITY
        }
    }

    /// Distance normalization factor applied during the run.
    #[must_use]
    #[rustfmt::skip]
    pub fn k_scale(&self) -> f64 { self.d_scale }

    /// Merges forced through by the guard's lower-bound test.
    #[must_use]
    #[rustfmt::skip]
    pub fn guard_lb_accepts(&self) -> u64 { self.lb_accepts }

    /// Merges refused by the guard's upper-bound test.
    #[must_use]
    #[rustfmt::skip]
    pub fn guard_ub_rejects(&self) -> u64 { self.ub_rejects }

    /// Guard outcomes where neither bound was decisive.
    #[must_use]
    #[rustfmt::skip]
    pub fn guard_ambiguous(&self) -> u64 { self.ambiguous }

    fn process_edge(&mut self, edge: Edge) {
        let a = self.dsu.find(edge.u);
        let b = self.dsu.find(edge.v);
        if a == b {
            if self.config.use_modularity_guard {
                self.internal_lb[a as usize] += edge.w;
            }
            return;
        }

        let distance = (1.0 / edge.w) / self.d_scale;
        let gate = self.gate(a).min(self.gate(b));
        if distance > gate {
            self.candidates.push(edge);
            return;
        }

        if self.config.use_modularity_guard
            && self.sum_weights > 0.0
            && !self.guard_allows(a, b, edge, distance, gate)
        {
            return;
        }

        self.merge(a, b, edge.w, distance);
    }

    /// Applies the ΔQ bound tests; pushes the candidate itself on refusal.
    fn guard_allows(&mut self, a: u32, b: u32, edge: Edge, distance: f64, gate: f64) -> bool {
        let m = self.sum_weights;
        let vol_a = self.comp_vol[a as usize];
        let vol_b = self.comp_vol[b as usize];
        let expected = self.config.gamma * vol_a * vol_b / (2.0 * m * m);

        let tolerance = self.anneal_tolerance(vol_a, vol_b);
        if edge.w / m - expected >= tolerance {
            self.lb_accepts += 1;
            return true;
        }

        // Upper bound on the true cross-component weight: each side's cut is
        // at most its volume minus twice the known internal weight.
        let cut_a = (vol_a - 2.0 * self.internal_lb[a as usize]).max(0.0);
        let cut_b = (vol_b - 2.0 * self.internal_lb[b as usize]).max(0.0);
        let e_ab_ub = cut_a.min(cut_b).min(vol_a).min(vol_b);
        if e_ab_ub / m - expected < 0.0 {
            self.ub_rejects += 1;
            self.candidates.push(edge);
            return false;
        }

        self.ambiguous += 1;
        match self.config.ambiguous_policy {
            AmbiguousPolicy::Accept => true,
            AmbiguousPolicy::Reject => {
                self.candidates.push(edge);
                false
            }
            AmbiguousPolicy::GateMargin => {
                if gate - distance >= self.config.gate_margin_ratio * gate {
                    true
                } else {
                    self.candidates.push(edge);
                    false
                }
            }
        }
    }

    fn merge(&mut self, a: u32, b: u32, weight: f64, distance: f64) {
        let size = self.comp_size[a as usize] + self.comp_size[b as usize];
        let max_dist = self.max_dist[a as usize]
            .max(self.max_dist[b as usize])
            .max(distance);
        let vol = self.comp_vol[a as usize] + self.comp_vol[b as usize];
        let internal = self.internal_lb[a as usize] + self.internal_lb[b as usize] + weight;

        let r = self.dsu.unite(a, b) as usize;
        self.comp_size[r] = size;
        self.max_dist[r] = max_dist;
        if self.config.use_modularity_guard {
            self.comp_vol[r] = vol;
            self.internal_lb[r] = internal;
        }
    }

    fn gate(&self, r: u32) -> f64 {
        let size_term = f64::from(self.comp_size[r as usize]).powf(self.config.size_exponent);
        let tau = self.k / if size_term > 0.0 { size_term } else { 1.0 };
        self.max_dist[r as usize] + tau
    }

    /// Annealed ΔQ tolerance: slightly negative for small volumes, tending
    /// to zero as the larger component matures.
    fn anneal_tolerance(&self, vol_a: f64, vol_b: f64) -> f64 {
        if !self.config.anneal_modularity_guard {
            return 0.0;
        }
        let mut vscale = self.config.dq_vscale;
        if !(vscale > 0.0) {
            let n = f64::from(self.node_count());
            vscale = if n > 0.0 {
                (2.0 * self.sum_weights / n).max(1.0)
            } else {
                1.0
            };
        }
        -self.config.dq_tolerance0 * (-vol_a.max(vol_b) / vscale).exp()
    }
}

/// Median of `1/w` over the heaviest `sample` edges; `1.0` when the sample
/// is empty or degenerate.
fn median_top_distance(edges: &[Edge], sample: usize) -> f64 {
    let take = sample.min(edges.len());
    if take == 0 {
        return 1.0;
    }
    // Edges are already descending by weight, so distances are ascending.
    let median = 1.0 / edges[..take][take / 2].w;
    if median.is_finite() && median > 0.0 {
        median
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn edge(u: u32, v: u32, w: f64) -> Edge {
        Edge { u, v, w }
    }

    /// Guard off, no distance normalization: the bare FH predicate.
    fn plain_config() -> SegmenterConfig {
        SegmenterConfig {
            normalize_distances: false,
            use_modularity_guard: false,
            ..SegmenterConfig::default()
        }
    }

    /// Partition of nodes into sorted component member lists.
    fn partition(segmenter: &Segmenter) -> Vec<Vec<u32>> {
        let mut groups: std::collections::BTreeMap<u32, Vec<u32>> = Default::default();
        for x in 0..segmenter.node_count() {
            groups
                .entry(segmenter.component_no_compress(x))
                .or_default()
                .push(x);
        }
        let mut parts: Vec<Vec<u32>> = groups.into_values().collect();
        parts.sort();
        parts
    }

    #[test]
    fn triangle_with_heavy_edge_splits_into_two_components() {
        // VIG of `1 2 3` + `-1 -2`: edge (0,1) weight 4/3, the rest 1/3.
        let mut edges = vec![
            edge(0, 1, 4.0 / 3.0),
            edge(0, 2, 1.0 / 3.0),
            edge(1, 2, 1.0 / 3.0),
        ];
        let mut segmenter = Segmenter::new(3, 1.0);
        segmenter.set_config(plain_config());
        segmenter.run(&mut edges);

        assert_eq!(segmenter.num_components(), 2);
        assert_eq!(partition(&segmenter), vec![vec![0, 1], vec![2]]);

        let root = segmenter.component_no_compress(0);
        assert_eq!(segmenter.comp_size(root), 2);
        // The only internal edge has weight 4/3, distance 0.75.
        assert!((segmenter.comp_min_weight(root) - 4.0 / 3.0).abs() < 1e-12);

        let strongest = segmenter.strongest_inter_component_edges();
        assert_eq!(strongest.len(), 1);
        assert!((strongest[0].w - 1.0 / 3.0).abs() < 1e-12);
        let other = segmenter.component_no_compress(2);
        assert_eq!(
            (strongest[0].u, strongest[0].v),
            (root.min(other), root.max(other))
        );
    }

    #[test]
    fn empty_edge_list_leaves_singletons() {
        let mut segmenter = Segmenter::new(5, 1.0);
        segmenter.run(&mut []);
        assert_eq!(segmenter.num_components(), 5);
        for x in 0..5 {
            assert_eq!(segmenter.comp_size(segmenter.component_no_compress(x)), 1);
            assert!(segmenter.comp_min_weight(x).is_infinite());
        }
    }

    #[test]
    fn single_binary_clause_edge_merges_under_defaults() {
        let mut edges = vec![edge(0, 1, 1.0)];
        let mut segmenter = Segmenter::new(4, 1.0);
        segmenter.run(&mut edges);
        assert_eq!(segmenter.num_components(), 3);
        let root = segmenter.component_no_compress(0);
        assert_eq!(root, segmenter.component_no_compress(1));
        assert_eq!(segmenter.comp_size(root), 2);
    }

    #[test]
    fn guard_disabled_keeps_counters_at_zero() {
        let mut edges = vec![
            edge(0, 1, 2.0),
            edge(1, 2, 1.0),
            edge(2, 3, 0.5),
            edge(0, 3, 0.25),
        ];
        let mut segmenter = Segmenter::new(4, 1.0);
        segmenter.set_config(plain_config());
        segmenter.run(&mut edges);
        assert_eq!(segmenter.guard_lb_accepts(), 0);
        assert_eq!(segmenter.guard_ub_rejects(), 0);
        assert_eq!(segmenter.guard_ambiguous(), 0);
    }

    #[test]
    fn non_positive_weights_are_ignored() {
        let mut edges = vec![edge(0, 1, 1.0), edge(1, 2, 0.0), edge(2, 3, -2.0)];
        let mut segmenter = Segmenter::new(4, 1.0);
        segmenter.set_config(plain_config());
        segmenter.run(&mut edges);
        assert_eq!(segmenter.num_components(), 3);
        assert!(segmenter.inter_component_candidates().is_empty());
    }

    #[test]
    fn intra_component_edges_accumulate_internal_weight_not_candidates() {
        // A triangle that fully merges: the closing edge is intra-component.
        let mut edges = vec![edge(0, 1, 2.0), edge(0, 2, 2.0), edge(1, 2, 1.9)];
        let mut segmenter = Segmenter::new(3, 10.0);
        segmenter.set_config(SegmenterConfig {
            normalize_distances: false,
            ..SegmenterConfig::default()
        });
        segmenter.run(&mut edges);
        assert_eq!(segmenter.num_components(), 1);
        assert!(segmenter.inter_component_candidates().is_empty());
    }

    #[test]
    fn distance_normalization_scales_the_gate_comparison() {
        // Same topology at two weight scales; normalization makes the
        // outcome identical.
        let mut small = vec![edge(0, 1, 0.01), edge(1, 2, 0.002)];
        let mut large = vec![edge(0, 1, 10.0), edge(1, 2, 2.0)];
        let config = SegmenterConfig {
            use_modularity_guard: false,
            ..SegmenterConfig::default()
        };

        let mut seg_small = Segmenter::new(3, 1.0);
        seg_small.set_config(config);
        seg_small.run(&mut small);

        let mut seg_large = Segmenter::new(3, 1.0);
        seg_large.set_config(config);
        seg_large.run(&mut large);

        assert_eq!(partition(&seg_small), partition(&seg_large));
    }

    #[test]
    fn rerun_after_reset_reproduces_the_partition() {
        let mut edges = vec![
            edge(0, 1, 3.0),
            edge(1, 2, 2.5),
            edge(3, 4, 2.0),
            edge(2, 3, 0.2),
            edge(4, 5, 1.8),
            edge(0, 5, 0.1),
        ];
        let mut segmenter = Segmenter::new(6, 1.0);
        let mut replay = edges.clone();
        segmenter.run(&mut edges);
        let first = partition(&segmenter);

        segmenter.reset(6, 1.0);
        segmenter.run(&mut replay);
        assert_eq!(partition(&segmenter), first);
    }

    #[rstest]
    #[case::accept(AmbiguousPolicy::Accept)]
    #[case::reject(AmbiguousPolicy::Reject)]
    fn ambiguous_policy_is_honoured(#[case] policy: AmbiguousPolicy) {
        // Star around node 0 with uniform weights: volumes grow quickly, the
        // lower bound turns indecisive and the policy decides.
        let mut edges: Vec<Edge> = (1..8).map(|v| edge(0, v, 1.0)).collect();
        edges.push(edge(1, 2, 1.0));
        edges.push(edge(3, 4, 1.0));

        let mut with_policy = Segmenter::new(8, 5.0);
        with_policy.set_config(SegmenterConfig {
            ambiguous_policy: policy,
            anneal_modularity_guard: false,
            ..SegmenterConfig::default()
        });
        let mut replay = edges.clone();
        with_policy.run(&mut replay);

        if with_policy.guard_ambiguous() > 0 {
            match policy {
                AmbiguousPolicy::Reject => assert!(
                    !with_policy.inter_component_candidates().is_empty(),
                    "rejected ambiguous edges must be recorded"
                ),
                AmbiguousPolicy::Accept | AmbiguousPolicy::GateMargin => {}
            }
        }
    }

    #[test]
    fn anneal_tolerance_is_zero_when_disabled() {
        let mut segmenter = Segmenter::new(4, 1.0);
        segmenter.set_config(SegmenterConfig {
            anneal_modularity_guard: false,
            ..SegmenterConfig::default()
        });
        segmenter.sum_weights = 10.0;
        assert_eq!(segmenter.anneal_tolerance(1.0, 2.0), 0.0);
    }

    #[test]
    fn anneal_tolerance_shrinks_toward_zero_with_volume() {
        let mut segmenter = Segmenter::new(4, 1.0);
        segmenter.sum_weights = 10.0;
        let tiny = segmenter.anneal_tolerance(0.1, 0.1);
        let mature = segmenter.anneal_tolerance(100.0, 100.0);
        assert!(tiny < 0.0, "annealing starts negative, got {tiny}");
        assert!(
            mature > tiny && mature <= 0.0,
            "tolerance must tighten with volume: {tiny} -> {mature}"
        );
    }

    #[test]
    fn gate_uses_size_exponent() {
        let mut segmenter = Segmenter::new(3, 1.0);
        segmenter.set_config(plain_config());
        let mut edges = vec![edge(0, 1, 4.0 / 3.0)];
        segmenter.run(&mut edges);
        let root = segmenter.component_no_compress(0);
        // size 2, max_dist 0.75: gate = 0.75 + 1 / 2^1.2
        let expected = 0.75 + 1.0 / 2f64.powf(1.2);
        assert!((segmenter.gate(root) - expected).abs() < 1e-12);
    }
}
