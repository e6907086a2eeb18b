pub mod authority;
pub mod error;
pub mod graph;
pub mod pagerank;
pub mod spam;

pub use authority::*;
pub use error::*;
pub use graph::*;
pub use pagerank::*;
pub use spam::*;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use storage::{DomainScore, LinkRow, PageRankScore, RotatingStore};
use tracing::{info, warn};
use url::Url;

const UPSERT_CHUNK: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub pagerank: PageRankConfig,
    pub spam: SpamConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub nodes: usize,
    pub edges: usize,
    pub domains_scored: usize,
    pub urls_ranked: usize,
    pub spam_links: u64,
}

/// Offline pass over the accumulated link corpus: builds the graph,
/// runs PageRank, derives per-domain authority, flags spam links and
/// writes everything back through the rotation layer. Re-running the
/// pass is idempotent.
pub struct Analyzer {
    store: Arc<RotatingStore>,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(store: Arc<RotatingStore>, config: AnalyzerConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self) -> Result<AnalysisReport> {
        // The graph and the per-link rows are held in memory for the
        // duration of the pass; the store itself only ever streams.
        let mut graph = LinkGraph::new();
        let mut rows: Vec<LinkRow> = Vec::new();
        let mut links = self.store.store().iter_links();
        while let Some(row) = links.recv().await {
            let row = row?;
            graph.add_edge(&row.source_url, &row.target_url, row.is_nofollow);
            rows.push(row);
        }

        if graph.node_count() == 0 {
            info!("link corpus empty, nothing to analyze");
            return Ok(AnalysisReport::default());
        }

        let ranks = pagerank(&graph, &self.config.pagerank);
        let urls_ranked = self.persist_pagerank(&graph, &ranks).await?;

        let aggregates = self.aggregate_domains(&graph, &rows);
        let domains_scored = self.persist_authority(&aggregates, &ranks, graph.node_count()).await?;

        let spam_links = self.flag_spam(&rows)?;

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            domains_scored,
            spam_links,
            "analysis pass complete"
        );

        Ok(AnalysisReport {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            domains_scored,
            urls_ranked,
            spam_links,
        })
    }

    async fn persist_pagerank(&self, graph: &LinkGraph, ranks: &[f64]) -> Result<usize> {
        let now = Utc::now();
        let scores: Vec<PageRankScore> = ranks
            .iter()
            .enumerate()
            .map(|(id, &score)| PageRankScore {
                url: graph.url(id).to_string(),
                score,
                updated_at: now,
            })
            .collect();

        for chunk in scores.chunks(UPSERT_CHUNK) {
            self.store.upsert_pagerank_scores(chunk).await?;
        }
        Ok(scores.len())
    }

    fn aggregate_domains(
        &self,
        graph: &LinkGraph,
        rows: &[LinkRow],
    ) -> HashMap<String, DomainAggregate> {
        let mut aggregates: HashMap<String, DomainAggregate> = HashMap::new();

        for row in rows {
            let Some(target_domain) = domain_of(&row.target_url) else {
                continue;
            };
            let aggregate = aggregates.entry(target_domain).or_default();

            aggregate.backlink_count += 1;
            if row.is_nofollow {
                aggregate.nofollow_count += 1;
            }
            if let Some(anchor) = &row.anchor_text {
                aggregate.total_anchors += 1;
                aggregate.unique_anchors.insert(anchor.to_lowercase());
            }
            if let Some(source_domain) = domain_of(&row.source_url) {
                aggregate.referring_domains.insert(source_domain);
            }
            if let Some(id) = graph.node_id(&row.source_url) {
                aggregate.referring_pages.insert(id);
            }
        }

        aggregates
    }

    async fn persist_authority(
        &self,
        aggregates: &HashMap<String, DomainAggregate>,
        ranks: &[f64],
        node_count: usize,
    ) -> Result<usize> {
        let raw: HashMap<String, f64> = aggregates
            .iter()
            .map(|(domain, aggregate)| {
                (
                    domain.clone(),
                    raw_authority(aggregate, ranks, node_count),
                )
            })
            .collect();
        let scaled = scale_authorities(&raw);

        let now = Utc::now();
        let scores: Vec<DomainScore> = scaled
            .into_iter()
            .map(|(domain, authority_score)| {
                let aggregate = &aggregates[&domain];
                DomainScore {
                    domain,
                    authority_score,
                    backlink_count: aggregate.backlink_count,
                    referring_domains: aggregate.referring_domains.len() as u64,
                    updated_at: now,
                }
            })
            .collect();

        for chunk in scores.chunks(UPSERT_CHUNK) {
            self.store.upsert_domain_scores(chunk).await?;
        }
        Ok(scores.len())
    }

    fn flag_spam(&self, rows: &[LinkRow]) -> Result<u64> {
        let scorer = SpamScorer::new(&self.config.spam)?;
        let word_counts = self.store.store().page_word_counts()?;

        let mut source_link_counts: HashMap<&str, u64> = HashMap::new();
        for row in rows {
            *source_link_counts.entry(row.source_url.as_str()).or_default() += 1;
        }

        let mut flagged_by_db: HashMap<String, Vec<i64>> = HashMap::new();
        for row in rows {
            let source_links = source_link_counts
                .get(row.source_url.as_str())
                .copied()
                .unwrap_or(0);
            let source_words = word_counts.get(&row.source_url).copied().unwrap_or(0);
            let score = scorer.score(row, source_links, source_words);
            if scorer.is_spam(score) {
                flagged_by_db.entry(row.db.clone()).or_default().push(row.id);
            }
        }

        let mut flagged = 0;
        for (db, ids) in flagged_by_db {
            match self.store.store().mark_links_spam(&db, &ids) {
                Ok(count) => flagged += count,
                Err(e) => warn!(db = %db, error = %e, "failed to flag spam links"),
            }
        }
        Ok(flagged)
    }
}

fn domain_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}
