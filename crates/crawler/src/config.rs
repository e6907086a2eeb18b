use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Rotated round-robin across requests. Every entry must be a
    /// truthful crawler identity.
    pub user_agents: Vec<String>,
    pub request_timeout: Duration,
    /// Total budget for one URL including retries and backoff.
    pub url_budget: Duration,
    pub max_redirects: u32,
    pub max_content_size: usize,
    pub max_concurrency: usize,
    pub per_host_concurrency: usize,
    pub per_host_delay: Duration,
    pub respect_robots: bool,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub allowed_content_types: Vec<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agents: vec![
                "Mozilla/5.0 (compatible; BacklinkEngine/1.0; +https://github.com/backlink-engine)"
                    .to_string(),
            ],
            request_timeout: Duration::from_secs(30),
            url_budget: Duration::from_secs(90),
            max_redirects: 5,
            max_content_size: 10 * 1024 * 1024,
            max_concurrency: 5,
            per_host_concurrency: 2,
            per_host_delay: Duration::from_millis(1500),
            respect_robots: true,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            headers: vec![
                (
                    "Accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                ),
                ("Accept-Language".to_string(), "en-US,en;q=0.5".to_string()),
            ],
        }
    }
}

impl CrawlerConfig {
    pub fn primary_user_agent(&self) -> String {
        self.user_agents
            .first()
            .cloned()
            .unwrap_or_else(|| "BacklinkEngine/1.0".to_string())
    }

    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        if !user_agents.is_empty() {
            self.user_agents = user_agents;
        }
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_per_host_delay(mut self, delay: Duration) -> Self {
        self.per_host_delay = delay;
        self
    }
}
