use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::LinkGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRankConfig {
    pub damping: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

/// Power iteration over the weighted link graph. Sinks redistribute
/// their mass uniformly, so total rank is conserved; the result is
/// normalized to sum to exactly 1.
pub fn pagerank(graph: &LinkGraph, config: &PageRankConfig) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let d = config.damping;
    let base = (1.0 - d) / n as f64;
    let mut rank = vec![1.0 / n as f64; n];

    for iteration in 0..config.max_iterations {
        let mut next = vec![base; n];
        let mut sink_mass = 0.0;

        for source in 0..n {
            let edges = graph.out_edges(source);
            let total_weight: f64 = edges.iter().map(|(_, w)| w).sum();
            if total_weight == 0.0 {
                sink_mass += rank[source];
                continue;
            }
            for (target, weight) in edges {
                next[*target] += d * rank[source] * weight / total_weight;
            }
        }

        let sink_share = d * sink_mass / n as f64;
        for value in &mut next {
            *value += sink_share;
        }

        let residual = rank
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);
        rank = next;

        if residual < config.tolerance {
            debug!(iteration, residual, "pagerank converged");
            break;
        }
    }

    let sum: f64 = rank.iter().sum();
    if sum > 0.0 {
        for value in &mut rank {
            *value /= sum;
        }
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks_for(edges: &[(&str, &str, bool)]) -> (LinkGraph, Vec<f64>) {
        let mut graph = LinkGraph::new();
        for (source, target, nofollow) in edges {
            graph.add_edge(source, target, *nofollow);
        }
        let ranks = pagerank(&graph, &PageRankConfig::default());
        (graph, ranks)
    }

    #[test]
    fn empty_graph_yields_no_scores() {
        let graph = LinkGraph::new();
        assert!(pagerank(&graph, &PageRankConfig::default()).is_empty());
    }

    #[test]
    fn scores_sum_to_one() {
        let (_, ranks) = ranks_for(&[
            ("a", "b", false),
            ("b", "c", false),
            ("c", "a", false),
            ("a", "c", true),
        ]);
        let sum: f64 = ranks.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn symmetric_cycle_is_uniform() {
        let (_, ranks) = ranks_for(&[("a", "b", false), ("b", "a", false)]);
        assert!((ranks[0] - 0.5).abs() < 1e-6);
        assert!((ranks[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn popular_target_outranks_its_sources() {
        let (graph, ranks) = ranks_for(&[
            ("a", "hub", false),
            ("b", "hub", false),
            ("c", "hub", false),
        ]);
        let hub = graph.node_id("hub").unwrap();
        for other in ["a", "b", "c"] {
            let id = graph.node_id(other).unwrap();
            assert!(ranks[hub] > ranks[id]);
        }
    }

    #[test]
    fn sink_mass_is_redistributed() {
        // b is a sink; without redistribution the sum would decay.
        let (_, ranks) = ranks_for(&[("a", "b", false)]);
        let sum: f64 = ranks.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(ranks.iter().all(|r| *r > 0.0));
    }

    #[test]
    fn nofollow_link_carries_less_rank() {
        let (graph, ranks) = ranks_for(&[
            ("src", "followed", false),
            ("src", "nofollowed", true),
            // back-edges keep the graph strongly connected
            ("followed", "src", false),
            ("nofollowed", "src", false),
        ]);
        let followed = graph.node_id("followed").unwrap();
        let nofollowed = graph.node_id("nofollowed").unwrap();
        assert!(ranks[followed] > ranks[nofollowed]);
    }
}
