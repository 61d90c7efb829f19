//! Disjoint-set forest with union by rank and path compression.
//!
//! The segmenter merges components by processing edges in descending weight
//! order; this structure tracks component membership and keeps a live count
//! of components so termination statistics need no extra pass.

/// Disjoint-set (union-find) over elements `0..n`.
///
/// # Examples
///
/// ```
/// use satseg_core::DisjointSet;
///
/// let mut set = DisjointSet::new(3);
/// set.unite(0, 1);
/// assert!(set.same(0, 1));
/// assert_eq!(set.components(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct DisjointSet {
    parent: Vec<u32>,
    rank: Vec<u8>,
    components: u32,
}

impl DisjointSet {
    /// Creates `n` singleton sets.
    #[must_use]
    pub fn new(n: u32) -> Self {
        let mut set = Self::default();
        set.reset(n);
        set
    }

    /// Resets to `n` singleton sets, discarding previous state.
    pub fn reset(&mut self, n: u32) {
        self.parent = (0..n).collect();
        self.rank.clear();
        self.rank.resize(n as usize, 0);
        self.components = n;
    }

    /// Number of elements managed.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.parent.len() as u32
    }

    /// Whether no elements are managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Returns the representative of `x`, compressing the traversed path.
    pub fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut node = x;
        while self.parent[node as usize] != node {
            let next = self.parent[node as usize];
            self.parent[node as usize] = root;
            node = next;
        }
        root
    }

    /// Returns the representative of `x` without mutating the forest.
    ///
    /// Identical result to [`find`](Self::find); safe to call through a
    /// shared reference from read-only consumers.
    #[must_use]
    pub fn find_no_compress(&self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        root
    }

    /// Unites the sets containing `a` and `b`; returns the new representative.
    ///
    /// Attaches the lower-rank tree under the higher; on equal ranks `b`'s
    /// root is attached under `a`'s, whose rank grows. A successful unite
    /// decrements the component count.
    pub fn unite(&mut self, a: u32, b: u32) -> u32 {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        self.components -= 1;
        match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            std::cmp::Ordering::Less => {
                self.parent[ra as usize] = rb;
                rb
            }
            std::cmp::Ordering::Greater => {
                self.parent[rb as usize] = ra;
                ra
            }
            std::cmp::Ordering::Equal => {
                self.parent[rb as usize] = ra;
                self.rank[ra as usize] = self.rank[ra as usize].saturating_add(1);
                ra
            }
        }
    }

    /// Whether `a` and `b` are in the same set.
    #[must_use]
    pub fn same(&self, a: u32, b: u32) -> bool {
        self.find_no_compress(a) == self.find_no_compress(b)
    }

    /// Current number of disjoint components.
    #[must_use]
    pub fn components(&self) -> u32 {
        self.components
    }

    /// Roots of the current forest, ascending.
    #[must_use]
    pub fn roots(&self) -> Vec<u32> {
        (0..self.len())
            .filter(|&x| self.parent[x as usize] == x)
            .collect()
    }
}
