pub mod client;
pub mod config;
pub mod error;
pub mod extractor;
pub mod normalize;
pub mod rate_limiter;
pub mod robots;

pub use client::*;
pub use config::*;
pub use error::*;
pub use extractor::*;
pub use normalize::normalize_url;
pub use rate_limiter::*;
pub use robots::*;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Polite fetch pipeline: robots check, per-host gating, retrying HTTP
/// client. One instance is shared by all batch workers.
pub struct Fetcher {
    config: Arc<CrawlerConfig>,
    pool: Arc<ClientPool>,
    robots: RobotsCache,
    gate: HostGate,
}

impl Fetcher {
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        let config = Arc::new(config);
        let pool = Arc::new(ClientPool::new(config.clone())?);
        let robots = RobotsCache::new(pool.clone(), config.primary_user_agent());
        let gate = HostGate::new(config.clone());

        Ok(Self {
            config,
            pool,
            robots,
            gate,
        })
    }

    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }

    /// Fetch a single URL end to end. Robots denial is reported before
    /// any page request is sent; the whole attempt sequence is bounded
    /// by the per-URL budget.
    pub async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<FetchOutcome> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let mut crawl_delay = None;
        if self.config.respect_robots {
            if !self.robots.is_allowed(url).await {
                return Err(FetchError::RobotsDenied(url.to_string()));
            }
            crawl_delay = self.robots.crawl_delay(url).await;
        }

        let _permits = self.gate.acquire(url, crawl_delay).await?;

        let attempts = self.pool.fetch_with_retries(url, cancel);
        match tokio::time::timeout(self.config.url_budget, attempts).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }
}
