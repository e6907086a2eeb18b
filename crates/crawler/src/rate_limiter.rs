use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Jitter, Quota, RateLimiter as GovernorRateLimiter,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::debug;
use url::Url;

use crate::{CrawlerConfig, FetchError, Result};

pub type RateLimiterImpl = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Gate a worker must pass before touching the network: a global
/// concurrency permit, a per-host concurrency permit, and the per-host
/// minimum delay between requests. Robots crawl-delay widens the delay
/// for its origin when it is longer than the configured default.
pub struct HostGate {
    config: Arc<CrawlerConfig>,
    global: Arc<Semaphore>,
    host_semaphores: RwLock<HashMap<String, Arc<Semaphore>>>,
    host_limiters: RwLock<HashMap<String, Arc<RateLimiterImpl>>>,
}

/// Held for the duration of one request; dropping releases both slots.
pub struct GatePermits {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

impl HostGate {
    pub fn new(config: Arc<CrawlerConfig>) -> Self {
        let global = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            config,
            global,
            host_semaphores: RwLock::new(HashMap::new()),
            host_limiters: RwLock::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, url: &Url, crawl_delay: Option<Duration>) -> Result<GatePermits> {
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?
            .to_string();

        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Cancelled)?;

        let host_semaphore = {
            let mut semaphores = self.host_semaphores.write().await;
            semaphores
                .entry(host.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_host_concurrency.max(1))))
                .clone()
        };
        let host_permit = host_semaphore
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Cancelled)?;

        let limiter = {
            let mut limiters = self.host_limiters.write().await;
            limiters
                .entry(host.clone())
                .or_insert_with(|| {
                    let delay = effective_delay(self.config.per_host_delay, crawl_delay);
                    debug!(host = %host, delay_ms = delay.as_millis() as u64, "host limiter created");
                    Arc::new(GovernorRateLimiter::direct(delay_quota(delay)))
                })
                .clone()
        };

        limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        Ok(GatePermits {
            _global: global,
            _host: host_permit,
        })
    }
}

fn effective_delay(configured: Duration, crawl_delay: Option<Duration>) -> Duration {
    match crawl_delay {
        Some(robots) if robots > configured => robots,
        _ => configured,
    }
}

fn delay_quota(delay: Duration) -> Quota {
    let period = delay.max(Duration::from_millis(1));
    Quota::with_period(period)
        .expect("non-zero delay period")
        .allow_burst(nonzero_ext::nonzero!(1u32))
}
