use crawler::CrawlerConfig;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use storage::DatabaseSpec;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

const DEFAULT_STORAGE_QUOTA: u64 = 5 * 1024 * 1024 * 1024;
const DEFAULT_MONTHLY_WRITES: u64 = 10_000_000;
const MAX_GLOBAL_CONCURRENCY: usize = 20;

/// Everything the engine reads from the environment, parsed up front.
/// Invalid values reject at startup; nothing is interpreted lazily.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_agents: Vec<String>,
    pub delay_ms: u64,
    pub max_concurrency: usize,
    pub per_host_concurrency: usize,
    pub batch_size: u64,
    pub recrawl_window_days: i64,
    pub respect_robots: bool,
    pub retry_attempts: u32,
    pub global_timeout_ms: u64,
    pub databases: Vec<DatabaseSpec>,
    pub frontier_db: String,
    pub progress_file: PathBuf,
    pub monitor_addr: SocketAddr,
    pub analyze_interval_hours: u64,
}

/// Entry shape of the `CRAWLER_DATABASES` JSON array. Unknown keys are
/// rejected rather than silently ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseEntry {
    name: String,
    path: PathBuf,
    #[serde(default = "default_quota")]
    storage_quota_bytes: u64,
    #[serde(default = "default_writes")]
    monthly_write_limit: u64,
}

fn default_quota() -> u64 {
    DEFAULT_STORAGE_QUOTA
}

fn default_writes() -> u64 {
    DEFAULT_MONTHLY_WRITES
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agents: CrawlerConfig::default().user_agents,
            delay_ms: 1500,
            max_concurrency: 5,
            per_host_concurrency: 2,
            batch_size: 50,
            recrawl_window_days: 7,
            respect_robots: true,
            retry_attempts: 3,
            global_timeout_ms: 90_000,
            databases: vec![DatabaseSpec {
                name: "primary".to_string(),
                path: PathBuf::from("./data/crawl.db"),
                storage_quota_bytes: DEFAULT_STORAGE_QUOTA,
                monthly_write_limit: DEFAULT_MONTHLY_WRITES,
            }],
            frontier_db: "primary".to_string(),
            progress_file: PathBuf::from("./data/progress.json"),
            monitor_addr: "127.0.0.1:8750".parse().unwrap(),
            analyze_interval_hours: 24,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = read_env("CRAWLER_USER_AGENTS") {
            let agents: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|ua| !ua.is_empty())
                .map(String::from)
                .collect();
            if agents.is_empty() {
                return Err(invalid("CRAWLER_USER_AGENTS", "no user agents given"));
            }
            config.user_agents = agents;
        }

        parse_env("CRAWLER_DELAY_MS", &mut config.delay_ms)?;
        parse_env("CRAWLER_MAX_CONCURRENCY", &mut config.max_concurrency)?;
        parse_env("CRAWLER_PER_HOST_CONCURRENCY", &mut config.per_host_concurrency)?;
        parse_env("CRAWLER_BATCH_SIZE", &mut config.batch_size)?;
        parse_env("CRAWLER_RECRAWL_WINDOW_DAYS", &mut config.recrawl_window_days)?;
        parse_env("CRAWLER_RESPECT_ROBOTS", &mut config.respect_robots)?;
        parse_env("CRAWLER_RETRY_ATTEMPTS", &mut config.retry_attempts)?;
        parse_env("CRAWLER_GLOBAL_TIMEOUT_MS", &mut config.global_timeout_ms)?;
        parse_env("CRAWLER_ANALYZE_INTERVAL_HOURS", &mut config.analyze_interval_hours)?;

        if let Some(raw) = read_env("CRAWLER_DATABASES") {
            let entries: Vec<DatabaseEntry> = serde_json::from_str(&raw)
                .map_err(|e| invalid("CRAWLER_DATABASES", &e.to_string()))?;
            if entries.is_empty() {
                return Err(invalid("CRAWLER_DATABASES", "empty database list"));
            }
            config.databases = entries
                .into_iter()
                .map(|entry| DatabaseSpec {
                    name: entry.name,
                    path: entry.path,
                    storage_quota_bytes: entry.storage_quota_bytes,
                    monthly_write_limit: entry.monthly_write_limit,
                })
                .collect();
            config.frontier_db = config.databases[0].name.clone();
        }

        if let Some(raw) = read_env("CRAWLER_FRONTIER_DB") {
            config.frontier_db = raw;
        }
        if let Some(raw) = read_env("CRAWLER_PROGRESS_FILE") {
            config.progress_file = PathBuf::from(raw);
        }
        if let Some(raw) = read_env("CRAWLER_MONITOR_ADDR") {
            config.monitor_addr = raw
                .parse()
                .map_err(|_| invalid("CRAWLER_MONITOR_ADDR", "not a socket address"))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 || self.max_concurrency > MAX_GLOBAL_CONCURRENCY {
            return Err(invalid(
                "CRAWLER_MAX_CONCURRENCY",
                &format!("must be between 1 and {MAX_GLOBAL_CONCURRENCY}"),
            ));
        }
        if self.per_host_concurrency == 0 || self.per_host_concurrency > self.max_concurrency {
            return Err(invalid(
                "CRAWLER_PER_HOST_CONCURRENCY",
                "must be between 1 and the global concurrency",
            ));
        }
        if self.batch_size == 0 {
            return Err(invalid("CRAWLER_BATCH_SIZE", "must be at least 1"));
        }
        if self.recrawl_window_days < 0 {
            return Err(invalid("CRAWLER_RECRAWL_WINDOW_DAYS", "must not be negative"));
        }
        if self.global_timeout_ms == 0 {
            return Err(invalid("CRAWLER_GLOBAL_TIMEOUT_MS", "must be at least 1"));
        }
        if self.analyze_interval_hours == 0 {
            return Err(invalid("CRAWLER_ANALYZE_INTERVAL_HOURS", "must be at least 1"));
        }
        if !self
            .databases
            .iter()
            .any(|db| db.name == self.frontier_db)
        {
            return Err(invalid(
                "CRAWLER_FRONTIER_DB",
                "does not name a configured database",
            ));
        }
        let mut names: Vec<&str> = self.databases.iter().map(|db| db.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.databases.len() {
            return Err(invalid("CRAWLER_DATABASES", "duplicate database names"));
        }
        Ok(())
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig {
            user_agents: self.user_agents.clone(),
            url_budget: Duration::from_millis(self.global_timeout_ms),
            max_concurrency: self.max_concurrency,
            per_host_concurrency: self.per_host_concurrency,
            per_host_delay: Duration::from_millis(self.delay_ms),
            respect_robots: self.respect_robots,
            retry_attempts: self.retry_attempts,
            ..CrawlerConfig::default()
        }
    }

    /// Snapshot stored on each session row.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "batch_size": self.batch_size,
            "max_concurrency": self.max_concurrency,
            "per_host_concurrency": self.per_host_concurrency,
            "delay_ms": self.delay_ms,
            "recrawl_window_days": self.recrawl_window_days,
            "respect_robots": self.respect_robots,
            "retry_attempts": self.retry_attempts,
            "global_timeout_ms": self.global_timeout_ms,
            "user_agent": self.user_agents.first(),
        })
    }
}

fn read_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(var: &str, slot: &mut T) -> Result<(), ConfigError> {
    if let Some(raw) = read_env(var) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| invalid(var, &format!("cannot parse {raw:?}")))?;
    }
    Ok(())
}

fn invalid(var: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}
