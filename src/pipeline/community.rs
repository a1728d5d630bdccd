//! Modularity-based community detection on weighted undirected graphs.

use std::collections::BTreeMap;

use super::error::AnalysisError;

/// Undirected weighted edge between node indices.
pub type WeightedEdge = (usize, usize, f64);

/// A partitioning algorithm for the similarity graph.
pub trait CommunityDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Community id per node, numbered from 0 in order of first appearance.
    fn detect(&self, n_nodes: usize, edges: &[WeightedEdge]) -> Result<Vec<usize>, AnalysisError>;
}

/// Deterministic weighted Louvain: local moving in node-index order, then
/// aggregation, repeated until no node changes community.
#[derive(Debug, Clone, Copy)]
pub struct Louvain {
    pub max_passes: usize,
}

impl Default for Louvain {
    fn default() -> Self {
        Self { max_passes: 100 }
    }
}

/// Adjacency with self-loops kept apart so degrees stay exact after aggregation.
#[derive(Debug, Clone)]
struct WeightedGraph {
    adj: Vec<BTreeMap<usize, f64>>,
    self_loops: Vec<f64>,
}

impl WeightedGraph {
    fn from_edges(n: usize, edges: &[WeightedEdge]) -> Self {
        let mut adj = vec![BTreeMap::new(); n];
        let mut self_loops = vec![0.0; n];
        for &(a, b, w) in edges {
            if a == b {
                self_loops[a] += w;
            } else {
                *adj[a].entry(b).or_insert(0.0) += w;
                *adj[b].entry(a).or_insert(0.0) += w;
            }
        }
        Self { adj, self_loops }
    }

    fn n(&self) -> usize {
        self.adj.len()
    }

    fn degree(&self, i: usize) -> f64 {
        self.adj[i].values().sum::<f64>() + 2.0 * self.self_loops[i]
    }

    fn total_weight(&self) -> f64 {
        (0..self.n()).map(|i| self.degree(i)).sum::<f64>() / 2.0
    }

    /// Collapse each community into one node.
    fn aggregate(&self, community: &[usize], n_communities: usize) -> Self {
        let mut adj = vec![BTreeMap::new(); n_communities];
        let mut self_loops = vec![0.0; n_communities];
        for i in 0..self.n() {
            let ci = community[i];
            self_loops[ci] += self.self_loops[i];
            for (&j, &w) in &self.adj[i] {
                let cj = community[j];
                if ci == cj {
                    // each internal edge is visited from both ends
                    self_loops[ci] += w / 2.0;
                } else {
                    *adj[ci].entry(cj).or_insert(0.0) += w;
                }
            }
        }
        Self { adj, self_loops }
    }
}

/// Renumber labels from 0 in order of first appearance.
fn renumber(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(labels.len());
    for &l in labels {
        let next = mapping.len();
        out.push(*mapping.entry(l).or_insert(next));
    }
    (out, mapping.len())
}

impl Louvain {
    /// One local-moving phase. Returns the community per node and whether anything moved.
    fn local_moving(&self, graph: &WeightedGraph) -> (Vec<usize>, bool) {
        let n = graph.n();
        let m2 = 2.0 * graph.total_weight();
        let mut community: Vec<usize> = (0..n).collect();
        let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();
        let mut totals = degrees.clone();
        let mut moved_any = false;

        for _ in 0..self.max_passes {
            let mut moved = false;
            for i in 0..n {
                let current = community[i];
                let k_i = degrees[i];
                totals[current] -= k_i;

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for (&j, &w) in &graph.adj[i] {
                    *links.entry(community[j]).or_insert(0.0) += w;
                }

                let gain = |c: usize, w_to: f64| w_to - totals[c] * k_i / m2;
                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
                for (&c, &w_to) in &links {
                    let g = gain(c, w_to);
                    if g > best_gain + 1e-12 {
                        best = c;
                        best_gain = g;
                    }
                }

                totals[best] += k_i;
                if best != current {
                    community[i] = best;
                    moved = true;
                    moved_any = true;
                }
            }
            if !moved {
                break;
            }
        }
        (community, moved_any)
    }
}

impl CommunityDetector for Louvain {
    fn name(&self) -> &'static str {
        "louvain"
    }

    fn detect(&self, n_nodes: usize, edges: &[WeightedEdge]) -> Result<Vec<usize>, AnalysisError> {
        if edges.iter().any(|&(a, b, w)| a >= n_nodes || b >= n_nodes || !w.is_finite() || w < 0.0) {
            return Err(AnalysisError::degenerate(
                "similarity graph",
                "edge references an unknown node or has an invalid weight",
            ));
        }
        let mut graph = WeightedGraph::from_edges(n_nodes, edges);
        let mut membership: Vec<usize> = (0..n_nodes).collect();
        if graph.total_weight() <= 0.0 {
            return Ok(membership);
        }

        loop {
            let (local, moved) = self.local_moving(&graph);
            if !moved {
                break;
            }
            let (local, n_communities) = renumber(&local);
            if n_communities == graph.n() {
                break;
            }
            for m in membership.iter_mut() {
                *m = local[*m];
            }
            graph = graph.aggregate(&local, n_communities);
        }
        Ok(renumber(&membership).0)
    }
}

/// Newman modularity of a partition of a weighted undirected graph.
pub fn modularity(n_nodes: usize, edges: &[WeightedEdge], community: &[usize]) -> f64 {
    let graph = WeightedGraph::from_edges(n_nodes, edges);
    let m = graph.total_weight();
    if m <= 0.0 {
        return 0.0;
    }
    let n_communities = community.iter().copied().max().map_or(0, |c| c + 1);
    let mut internal = vec![0.0; n_communities];
    let mut totals = vec![0.0; n_communities];
    for &(a, b, w) in edges {
        if community[a] == community[b] {
            internal[community[a]] += w;
        }
    }
    for i in 0..n_nodes {
        totals[community[i]] += graph.degree(i);
    }
    internal
        .iter()
        .zip(&totals)
        .map(|(inside, tot)| inside / m - (tot / (2.0 * m)).powi(2))
        .sum()
}
