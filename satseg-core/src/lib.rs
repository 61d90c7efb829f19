//! Structural analysis of CNF formulas through their variable incidence graph.
//!
//! The crate covers three tightly coupled stages:
//!
//! 1. [`cnf`]: a DIMACS CNF model with optional variable compaction and
//!    clause normalization.
//! 2. [`vig`]: construction of the weighted variable incidence graph (VIG),
//!    either through a straightforward hash-map aggregation or through a
//!    memory-bounded, multi-threaded batched pipeline that produces the same
//!    edge set.
//! 3. [`segmentation`]: Felzenszwalb–Huttenlocher style merging of graph
//!    components over a union-find forest, gated by a size-sensitive
//!    tolerance predicate and an optional modularity guard.
//!
//! [`metrics`] provides read-only consumers of the segmentation result:
//! Newman–Girvan modularity with a resolution parameter and scale-free
//! summaries of the component size distribution.

pub mod cnf;
pub mod metrics;
pub mod segmentation;
pub mod vig;

pub use crate::{
    cnf::{Cnf, CnfError, CnfErrorCode},
    metrics::{ComponentSummary, component_sizes, modularity, summarize_components},
    segmentation::{AmbiguousPolicy, DisjointSet, Segmenter, SegmenterConfig},
    vig::{BatchedConfig, Edge, Vig, VigError, VigErrorCode, build_batched, build_naive},
};
