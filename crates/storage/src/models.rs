use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One configured target database and its quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    pub path: PathBuf,
    pub storage_quota_bytes: u64,
    pub monthly_write_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Provenance bucket for every page and link produced by one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub config_json: serde_json::Value,
    pub target_db: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub html_size: u64,
    pub word_count: u64,
    pub http_status: u16,
    pub response_time_ms: u64,
    pub content_hash: String,
    pub crawled_at: DateTime<Utc>,
    pub session_id: String,
}

/// A discovered edge, ready for insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source_url: String,
    pub target_url: String,
    pub anchor_text: Option<String>,
    pub context: Option<String>,
    pub is_nofollow: bool,
    pub discovered_at: DateTime<Utc>,
    pub session_id: String,
}

/// A stored edge as streamed back to the analyzer.
#[derive(Debug, Clone)]
pub struct LinkRow {
    pub id: i64,
    pub db: String,
    pub source_url: String,
    pub target_url: String,
    pub anchor_text: Option<String>,
    pub context: Option<String>,
    pub is_nofollow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainScore {
    pub domain: String,
    pub authority_score: f64,
    pub backlink_count: u64,
    pub referring_domains: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRankScore {
    pub url: String,
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

/// Durable scheduler position. `processed == succeeded + failed`
/// holds across commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub current_page: u64,
    pub batch_size: u64,
    pub total_urls: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub active_session_id: Option<String>,
    pub running: bool,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            current_page: 1,
            batch_size: 50,
            total_urls: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            updated_at: None,
            active_session_id: None,
            running: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbStatus {
    Healthy,
    Warning,
    Critical,
    Down,
}

impl DbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbStatus::Healthy => "healthy",
            DbStatus::Warning => "warning",
            DbStatus::Critical => "critical",
            DbStatus::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseUsage {
    pub name: String,
    pub url: String,
    pub bytes_used: u64,
    pub storage_quota_bytes: u64,
    pub writes_this_month: u64,
    pub monthly_write_limit: u64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub status: DbStatus,
}

impl DatabaseUsage {
    pub fn write_ratio(&self) -> f64 {
        if self.monthly_write_limit == 0 {
            return 0.0;
        }
        self.writes_this_month as f64 / self.monthly_write_limit as f64
    }

    pub fn byte_ratio(&self) -> f64 {
        if self.storage_quota_bytes == 0 {
            return 0.0;
        }
        self.bytes_used as f64 / self.storage_quota_bytes as f64
    }

    /// Load on the more constrained axis; rotation always steers to
    /// the lowest value among eligible targets.
    pub fn load_ratio(&self) -> f64 {
        self.write_ratio().max(self.byte_ratio())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_pages: u64,
    pub total_links: u64,
    pub pages_last_day: u64,
}
