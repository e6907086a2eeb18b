use chrono::Utc;
use crawler::{ContentExtractor, FetchError, Fetcher};
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use storage::{LinkRecord, PageRecord, Progress, ProgressTracker, RotatingStore, SessionStatus, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::EngineConfig;

const IDLE_POLL: Duration = Duration::from_secs(30);
const BATCH_PAUSE: Duration = Duration::from_secs(3);
const BATCH_DEADLINE_FLOOR: Duration = Duration::from_secs(300);
const PER_URL_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// The crawl loop: page through the frontier, fan a batch out to the
/// fetch workers, write results through rotation and commit progress
/// at the batch boundary. Owns the Progress record; everyone else
/// reads snapshots.
pub struct BatchScheduler {
    config: EngineConfig,
    store: Arc<RotatingStore>,
    fetcher: Arc<Fetcher>,
    extractor: Arc<ContentExtractor>,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
    /// Frontier size at the last rescan, so an unchanged frontier does
    /// not trigger rescans back to back.
    last_rescan_total: u64,
}

enum UrlResult {
    Success,
    Failed,
    Cancelled,
    StoreFatal(StoreError),
}

enum BatchOutcome {
    Completed { succeeded: u64, failed: u64 },
    Drained { succeeded: u64, failed: u64 },
    StoreFailed { error: StoreError, succeeded: u64, failed: u64 },
}

impl BatchScheduler {
    pub fn new(
        config: EngineConfig,
        store: Arc<RotatingStore>,
        fetcher: Arc<Fetcher>,
        extractor: Arc<ContentExtractor>,
        tracker: Arc<ProgressTracker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            extractor,
            tracker,
            cancel,
            last_rescan_total: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), SchedulerError> {
        let mut progress = self.tracker.load();
        // Batch-size changes between runs apply from the next batch;
        // the page position itself is never rescaled.
        progress.batch_size = self.config.batch_size;
        progress.running = true;
        self.tracker.save(&mut progress)?;

        let result = self.run_loop(&mut progress).await;

        progress.running = false;
        progress.active_session_id = None;
        if let Err(e) = self.tracker.save(&mut progress) {
            warn!(error = %e, "could not persist final progress");
        }
        result
    }

    async fn run_loop(&mut self, progress: &mut Progress) -> Result<(), SchedulerError> {
        loop {
            if self.cancel.is_cancelled() {
                info!("drain requested, stopping scheduler");
                return Ok(());
            }

            let urls = self
                .store
                .frontier_batch(progress.current_page, progress.batch_size)?;

            if urls.is_empty() {
                let total = self.store.count_frontier()?;
                if total > progress.processed && total != self.last_rescan_total {
                    // The frontier grew past our position; offsets may
                    // have shifted, so rescan and let dedup skip work.
                    info!(total, processed = progress.processed, "frontier grew, rescanning");
                    self.last_rescan_total = total;
                    progress.current_page = 1;
                    self.tracker.save(progress)?;
                    continue;
                }
                debug!("frontier exhausted, idling");
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(IDLE_POLL) => continue,
                }
            }

            let batch = self.prepare_batch(&urls)?;
            if batch.is_empty() {
                // Everything filtered before fetch still consumes the
                // page; counters stay untouched.
                info!(page = progress.current_page, "batch fully filtered, advancing");
                progress.current_page += 1;
                self.tracker.save(progress)?;
                continue;
            }

            progress.total_urls = self.store.count_frontier()?;
            let target = self.store.choose_write_target()?;
            let session_id = self.store.create_session(&self.config.snapshot(), &target)?;
            progress.active_session_id = Some(session_id.clone());
            self.tracker.save(progress)?;

            info!(
                session = %session_id,
                page = progress.current_page,
                urls = batch.len(),
                "starting batch"
            );

            match self.run_batch(&batch, &session_id).await {
                BatchOutcome::Completed { succeeded, failed } => {
                    progress.processed += succeeded + failed;
                    progress.succeeded += succeeded;
                    progress.failed += failed;
                    progress.current_page += 1;
                    progress.active_session_id = None;
                    self.tracker.save(progress)?;
                    self.store.end_session(&session_id, SessionStatus::Completed)?;
                    info!(succeeded, failed, page = progress.current_page, "batch committed");
                }
                BatchOutcome::Drained { succeeded, failed } => {
                    // Partial batch: commit counters but keep the page
                    // so a restart replays it; dedup skips rewrites.
                    progress.processed += succeeded + failed;
                    progress.succeeded += succeeded;
                    progress.failed += failed;
                    progress.active_session_id = None;
                    self.tracker.save(progress)?;
                    self.store.end_session(&session_id, SessionStatus::Failed)?;
                    info!(succeeded, failed, "batch drained before completion");
                    return Ok(());
                }
                BatchOutcome::StoreFailed {
                    error,
                    succeeded,
                    failed,
                } => {
                    progress.processed += succeeded + failed;
                    progress.succeeded += succeeded;
                    progress.failed += failed;
                    progress.active_session_id = None;
                    self.tracker.save(progress)?;
                    let _ = self.store.end_session(&session_id, SessionStatus::Failed);
                    return Err(SchedulerError::Store(error));
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(BATCH_PAUSE) => {}
            }
        }
    }

    /// Normalize, deduplicate and drop recently crawled URLs. Dropped
    /// URLs are silent skips; robots denials are accounted per URL by
    /// the fetch path.
    fn prepare_batch(&self, urls: &[String]) -> Result<Vec<Url>, SchedulerError> {
        let mut seen = std::collections::HashSet::new();
        let mut batch = Vec::new();

        for raw in urls {
            let normalized = match crawler::normalize_url(raw) {
                Ok(url) => url,
                Err(e) => {
                    debug!(url = %raw, error = %e, "dropping unnormalizable url");
                    continue;
                }
            };
            if !seen.insert(normalized.clone()) {
                continue;
            }
            if self.store.already_crawled(&normalized)? {
                debug!(url = %normalized, "recently crawled, skipping");
                continue;
            }
            match Url::parse(&normalized) {
                Ok(url) => batch.push(url),
                Err(e) => debug!(url = %normalized, error = %e, "unparseable after normalization"),
            }
        }

        Ok(batch)
    }

    async fn run_batch(&self, urls: &[Url], session_id: &str) -> BatchOutcome {
        let deadline = batch_deadline(urls.len());
        let batch_cancel = self.cancel.child_token();

        let collect = stream::iter(urls.iter().cloned())
            .map(|url| {
                let batch_cancel = batch_cancel.clone();
                async move { self.process_url(url, session_id, &batch_cancel).await }
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect::<Vec<UrlResult>>();
        tokio::pin!(collect);

        let results = tokio::select! {
            results = &mut collect => results,
            _ = tokio::time::sleep(deadline) => {
                warn!(deadline_s = deadline.as_secs(), "batch deadline exceeded, cancelling stragglers");
                batch_cancel.cancel();
                collect.await
            }
        };

        let mut succeeded = 0;
        let mut failed = 0;
        let mut cancelled = false;
        let mut fatal = None;

        for result in results {
            match result {
                UrlResult::Success => succeeded += 1,
                UrlResult::Failed => failed += 1,
                UrlResult::Cancelled => cancelled = true,
                UrlResult::StoreFatal(e) => fatal = Some(e),
            }
        }

        if let Some(error) = fatal {
            BatchOutcome::StoreFailed {
                error,
                succeeded,
                failed,
            }
        } else if cancelled || self.cancel.is_cancelled() {
            BatchOutcome::Drained { succeeded, failed }
        } else {
            BatchOutcome::Completed { succeeded, failed }
        }
    }

    /// One URL end to end: fetch, extract inline, rotate, write. The
    /// page row and its links commit as a unit before the counters
    /// move.
    async fn process_url(
        &self,
        url: Url,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> UrlResult {
        if cancel.is_cancelled() {
            return UrlResult::Cancelled;
        }

        let outcome = match self.fetcher.fetch(&url, cancel).await {
            Ok(outcome) => outcome,
            Err(FetchError::Cancelled) => return UrlResult::Cancelled,
            Err(e) => {
                warn!(url = %url, kind = e.kind(), error = %e, "fetch failed");
                return UrlResult::Failed;
            }
        };

        // Page identity is the post-redirect URL.
        let final_url = crawler::normalize_url(outcome.final_url.as_str())
            .unwrap_or_else(|_| outcome.final_url.to_string());

        let (content, links) = self.extractor.extract(
            &outcome.final_url,
            &outcome.body,
            outcome.content_type(),
            outcome.truncated,
        );

        let now = Utc::now();
        let page = PageRecord {
            url: final_url.clone(),
            title: content.title,
            text: content.cleaned_text,
            html_size: content.html_size as u64,
            word_count: content.word_count as u64,
            http_status: outcome.http_status,
            response_time_ms: outcome.response_time_ms,
            content_hash: content.content_hash,
            crawled_at: now,
            session_id: session_id.to_string(),
        };
        let link_records: Vec<LinkRecord> = links
            .into_iter()
            .map(|link| LinkRecord {
                source_url: final_url.clone(),
                target_url: link.target_url,
                anchor_text: link.anchor_text,
                context: link.context,
                is_nofollow: link.is_nofollow,
                discovered_at: now,
                session_id: session_id.to_string(),
            })
            .collect();

        let write = self.store.write_page_and_links(&page, &link_records);
        match tokio::time::timeout(PER_URL_DEADLINE, write).await {
            Ok(Ok(db)) => {
                debug!(url = %page.url, db = %db, links = link_records.len(), "stored");
                UrlResult::Success
            }
            Ok(Err(e)) => {
                warn!(url = %page.url, error = %e, "store write failed, aborting batch");
                // Stop the rest of the batch at its next suspension point.
                cancel.cancel();
                UrlResult::StoreFatal(e)
            }
            Err(_) => {
                cancel.cancel();
                UrlResult::StoreFatal(StoreError::Permanent(
                    "store write exceeded its deadline".into(),
                ))
            }
        }
    }
}

fn batch_deadline(batch_len: usize) -> Duration {
    Duration::from_secs(batch_len as u64 * 10).max(BATCH_DEADLINE_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_has_a_floor() {
        assert_eq!(batch_deadline(5), Duration::from_secs(300));
        assert_eq!(batch_deadline(50), Duration::from_secs(500));
    }
}
