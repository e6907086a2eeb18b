use std::collections::{HashMap, HashSet};

/// Calibration target: the top-percentile domain in the corpus maps to
/// roughly this score, leaving headroom below 100.
const TOP_PERCENTILE_SCORE: f64 = 95.0;
const TOP_PERCENTILE: f64 = 0.99;

/// Per-target-domain backlink profile accumulated in one pass over the
/// link corpus.
#[derive(Debug, Default)]
pub struct DomainAggregate {
    pub backlink_count: u64,
    pub nofollow_count: u64,
    pub total_anchors: u64,
    pub unique_anchors: HashSet<String>,
    pub referring_domains: HashSet<String>,
    /// Graph node ids of the referring pages.
    pub referring_pages: HashSet<usize>,
}

impl DomainAggregate {
    pub fn nofollow_ratio(&self) -> f64 {
        if self.backlink_count == 0 {
            return 0.0;
        }
        self.nofollow_count as f64 / self.backlink_count as f64
    }

    pub fn anchor_diversity(&self) -> f64 {
        if self.total_anchors == 0 {
            return 1.0;
        }
        (self.unique_anchors.len() as f64 / self.total_anchors as f64).min(1.0)
    }
}

/// Unscaled authority: referring-domain diversity boosted by the mean
/// PageRank of referring pages, discounted for nofollow-heavy and
/// repetitive-anchor profiles. Monotonic in every input.
pub fn raw_authority(aggregate: &DomainAggregate, pagerank: &[f64], node_count: usize) -> f64 {
    let diversity = (1.0 + aggregate.referring_domains.len() as f64).ln();

    // Mean referring rank relative to the uniform baseline 1/N.
    let pr_ratio = if aggregate.referring_pages.is_empty() || node_count == 0 {
        0.0
    } else {
        let mean: f64 = aggregate
            .referring_pages
            .iter()
            .map(|&id| pagerank.get(id).copied().unwrap_or(0.0))
            .sum::<f64>()
            / aggregate.referring_pages.len() as f64;
        mean * node_count as f64
    };

    let follow_factor = 1.0 - 0.5 * aggregate.nofollow_ratio();
    let anchor_factor = 0.5 + 0.5 * aggregate.anchor_diversity();
    let pr_factor = 1.0 + (1.0 + pr_ratio).ln();

    diversity * pr_factor * follow_factor * anchor_factor
}

/// Map raw scores into [0,100] so the top-percentile raw value lands
/// at ~95. Monotonic by construction.
pub fn scale_authorities(raw: &HashMap<String, f64>) -> HashMap<String, f64> {
    if raw.is_empty() {
        return HashMap::new();
    }

    let mut sorted: Vec<f64> = raw.values().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let index = ((sorted.len() - 1) as f64 * TOP_PERCENTILE).floor() as usize;
    let pivot = sorted[index].max(f64::MIN_POSITIVE);

    raw.iter()
        .map(|(domain, &value)| {
            let scaled = (value / pivot * TOP_PERCENTILE_SCORE).clamp(0.0, 100.0);
            (domain.clone(), scaled)
        })
        .collect()
}
