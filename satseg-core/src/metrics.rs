//! Read-only metrics over a labelled weighted graph.
//!
//! [`modularity`] evaluates the Newman–Girvan quality score with a
//! resolution parameter; [`component_sizes`] and [`summarize_components`]
//! condense a component labelling into a handful of scale-free balance
//! metrics (effective count, Gini, largest share, entropy evenness).

use crate::vig::Edge;

/// Newman–Girvan modularity with resolution `gamma`.
///
/// The graph is given as an undirected weighted edge list (each unordered
/// edge once) over `n` vertices; `comm_of` maps a vertex to its community
/// label. Labels may be sparse and non-contiguous; they are compacted before
/// accumulation.
///
/// ```text
/// Q = Σ_c [ Σ_in(c)/m − gamma · (Σ_tot(c)/(2m))² ]
/// ```
///
/// Returns 0 for an empty graph or zero total weight.
///
/// # Examples
///
/// ```
/// use satseg_core::{Edge, modularity};
///
/// // Two disjoint triangles, one community each.
/// let edges: Vec<Edge> = [(0, 1), (0, 2), (1, 2), (3, 4), (3, 5), (4, 5)]
///     .into_iter()
///     .map(|(u, v)| Edge { u, v, w: 1.0 })
///     .collect();
/// let q = modularity(6, &edges, |v| v / 3, 1.0);
/// assert!((q - 0.5).abs() < 1e-12);
/// ```
#[must_use]
pub fn modularity(n: u32, edges: &[Edge], comm_of: impl Fn(u32) -> u32, gamma: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }

    let mut strength = vec![0.0_f64; n as usize];
    let mut m = 0.0_f64;
    for edge in edges {
        strength[edge.u as usize] += edge.w;
        strength[edge.v as usize] += edge.w;
        m += edge.w;
    }
    if m == 0.0 {
        return 0.0;
    }
    let two_m = 2.0 * m;

    // Compact arbitrary labels to 0..C.
    let labels: Vec<u32> = (0..n).map(&comm_of).collect();
    let max_label = labels.iter().copied().max().unwrap_or(0);
    let mut remap = vec![u32::MAX; max_label as usize + 1];
    let mut communities = 0u32;
    for &label in &labels {
        if remap[label as usize] == u32::MAX {
            remap[label as usize] = communities;
            communities += 1;
        }
    }

    let mut sum_tot = vec![0.0_f64; communities as usize];
    let mut sum_in = vec![0.0_f64; communities as usize];
    for (vertex, &label) in labels.iter().enumerate() {
        sum_tot[remap[label as usize] as usize] += strength[vertex];
    }
    for edge in edges {
        let cu = remap[labels[edge.u as usize] as usize];
        let cv = remap[labels[edge.v as usize] as usize];
        if cu == cv {
            sum_in[cu as usize] += edge.w;
        }
    }

    sum_in
        .iter()
        .zip(&sum_tot)
        .map(|(&in_c, &tot_c)| in_c / m - gamma * (tot_c / two_m) * (tot_c / two_m))
        .sum()
}

/// Counts nodes per component into a compact vector of non-empty sizes.
///
/// Labels are queried for every vertex in `0..n` and need not be
/// contiguous; the result holds one entry per non-empty label, in label
/// order.
#[must_use]
pub fn component_sizes(n: u32, get_component: impl Fn(u32) -> u32) -> Vec<u32> {
    let mut counts: Vec<u32> = Vec::new();
    for vertex in 0..n {
        let label = get_component(vertex) as usize;
        if label >= counts.len() {
            counts.resize(label + 1, 0);
        }
        counts[label] += 1;
    }
    counts.retain(|&count| count != 0);
    counts
}

/// Scale-free summary of a component size distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComponentSummary {
    /// Number of non-empty components.
    pub k: u32,
    /// Total number of nodes.
    pub n: u32,
    /// Effective number of components, `1 / Σ p_i²` (Hill number of order 2).
    pub keff: f64,
    /// Gini coefficient over sizes, in `[0, 1]`; 0 is perfectly balanced.
    pub gini: f64,
    /// Share of the largest component.
    pub pmax: f64,
    /// Entropy evenness `H / ln K` in `[0, 1]`; 1 when `K ≤ 1`.
    pub entropy_j: f64,
}

/// Computes the summary metrics from a vector of component sizes.
///
/// Conventions for degenerate inputs: `K = 0` or zero total size yields
/// `keff = 0`, `gini = 0`, `pmax = 0`, `entropy_j = 1`; a single component
/// yields `gini = 0` and `entropy_j = 1`.
///
/// # Examples
///
/// ```
/// use satseg_core::summarize_components;
///
/// let summary = summarize_components(&[4, 4]);
/// assert_eq!(summary.keff, 2.0);
/// assert_eq!(summary.pmax, 0.5);
/// ```
#[must_use]
pub fn summarize_components(sizes: &[u32]) -> ComponentSummary {
    let k = sizes.len() as u32;
    let total: u64 = sizes.iter().map(|&size| u64::from(size)).sum();
    let mut summary = ComponentSummary {
        k,
        n: u32::try_from(total).unwrap_or(u32::MAX),
        keff: 0.0,
        gini: 0.0,
        pmax: 0.0,
        entropy_j: 1.0,
    };
    if k == 0 || total == 0 {
        return summary;
    }
    let total = total as f64;

    let mut sum_p2 = 0.0;
    let mut pmax = 0.0_f64;
    for &size in sizes {
        if size == 0 {
            continue;
        }
        let p = f64::from(size) / total;
        sum_p2 += p * p;
        pmax = pmax.max(p);
    }
    summary.keff = if sum_p2 > 0.0 { 1.0 / sum_p2 } else { 0.0 };
    summary.pmax = pmax;

    if k > 1 {
        let mut sorted = sizes.to_vec();
        sorted.sort_unstable();
        let weighted: f64 = sorted
            .iter()
            .enumerate()
            .map(|(i, &size)| (i + 1) as f64 * f64::from(size))
            .sum();
        let k_f = f64::from(k);
        let gini = 2.0 * weighted / (k_f * total) - (k_f + 1.0) / k_f;
        summary.gini = gini.clamp(0.0, 1.0);

        let mut entropy = 0.0;
        for &size in sizes {
            if size == 0 {
                continue;
            }
            let p = f64::from(size) / total;
            entropy -= p * p.ln();
        }
        summary.entropy_j = (entropy / k_f.ln()).clamp(0.0, 1.0);
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn edge(u: u32, v: u32, w: f64) -> Edge {
        Edge { u, v, w }
    }

    fn triangle(base: u32) -> Vec<Edge> {
        vec![
            edge(base, base + 1, 1.0),
            edge(base, base + 2, 1.0),
            edge(base + 1, base + 2, 1.0),
        ]
    }

    #[test]
    fn two_disjoint_triangles_score_one_half_at_unit_gamma() {
        let mut edges = triangle(0);
        edges.extend(triangle(3));
        let q = modularity(6, &edges, |v| v / 3, 1.0);
        assert!((q - 0.5).abs() < 1e-12, "Q = {q}");
    }

    #[test]
    fn resolution_scales_the_degree_penalty() {
        let mut edges = triangle(0);
        edges.extend(triangle(3));
        // Q = 1 − 0.5 γ for the two-triangle labelling.
        let q = modularity(6, &edges, |v| v / 3, 2.0);
        assert!((q - 0.0).abs() < 1e-12, "Q = {q}");
    }

    #[test]
    fn single_community_scores_zero() {
        let q = modularity(3, &triangle(0), |_| 0, 1.0);
        assert!(q.abs() < 1e-12, "Q = {q}");
    }

    #[rstest]
    #[case::empty_graph(0)]
    #[case::no_edges(4)]
    fn degenerate_graphs_score_zero(#[case] n: u32) {
        assert_eq!(modularity(n, &[], |v| v, 1.0), 0.0);
    }

    #[test]
    fn sparse_labels_are_compacted() {
        let mut edges = triangle(0);
        edges.extend(triangle(3));
        let dense = modularity(6, &edges, |v| v / 3, 1.0);
        let sparse = modularity(6, &edges, |v| if v < 3 { 17 } else { 92 }, 1.0);
        assert!((dense - sparse).abs() < 1e-12);
    }

    #[test]
    fn modularity_stays_in_range() {
        let edges = vec![edge(0, 1, 3.0), edge(2, 3, 0.5), edge(1, 2, 1.0)];
        for labelling in [[0, 0, 1, 1], [0, 1, 2, 3], [0, 0, 0, 0], [1, 0, 0, 1]] {
            let q = modularity(4, &edges, |v| labelling[v as usize], 1.0);
            assert!((-0.5..=1.0).contains(&q), "Q = {q} out of range");
        }
    }

    #[test]
    fn component_sizes_collects_non_empty_labels() {
        let labels = [5u32, 0, 5, 2, 5, 0];
        let sizes = component_sizes(6, |v| labels[v as usize]);
        assert_eq!(sizes, vec![2, 1, 3]);
    }

    #[test]
    fn component_sizes_empty_graph() {
        assert!(component_sizes(0, |v| v).is_empty());
    }

    #[test]
    fn summary_of_balanced_partition() {
        let summary = summarize_components(&[4, 4, 4, 4]);
        assert_eq!(summary.k, 4);
        assert_eq!(summary.n, 16);
        assert!((summary.keff - 4.0).abs() < 1e-12);
        assert!(summary.gini.abs() < 1e-12);
        assert!((summary.pmax - 0.25).abs() < 1e-12);
        assert!((summary.entropy_j - 1.0).abs() < 1e-12);
    }

    #[test]
    fn summary_of_skewed_partition() {
        let summary = summarize_components(&[97, 1, 1, 1]);
        assert!(summary.keff > 1.0 && summary.keff < 2.0);
        assert!(summary.gini > 0.5);
        assert!((summary.pmax - 0.97).abs() < 1e-12);
        assert!(summary.entropy_j < 0.2);
    }

    #[rstest]
    #[case::empty(&[], 0, 0.0, 1.0)]
    #[case::single(&[9], 9, 1.0, 1.0)]
    fn summary_degenerate_conventions(
        #[case] sizes: &[u32],
        #[case] n: u32,
        #[case] keff: f64,
        #[case] entropy_j: f64,
    ) {
        let summary = summarize_components(sizes);
        assert_eq!(summary.n, n);
        assert!((summary.keff - keff).abs() < 1e-12);
        assert_eq!(summary.gini, 0.0);
        assert!((summary.entropy_j - entropy_j).abs() < 1e-12);
    }

    #[test]
    fn keff_bounded_by_component_count() {
        for sizes in [vec![1, 2, 3], vec![10, 10], vec![1, 1, 1, 1, 1]] {
            let summary = summarize_components(&sizes);
            assert!(summary.keff >= 1.0);
            assert!(summary.keff <= f64::from(summary.k) + 1e-12);
        }
    }
}
