use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use duckdb::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    DatabaseSpec, DatabaseUsage, DomainScore, LinkRecord, LinkRow, PageRankScore, PageRecord,
    Result, RotationManager, SessionStatus, StoreError, StoreStats,
};

const WRITE_RETRY_ATTEMPTS: u32 = 3;
const WRITE_RETRY_BASE: Duration = Duration::from_millis(250);
const LINK_SCAN_CHUNK: usize = 1000;
const LINK_STREAM_BUFFER: usize = 256;

const SCHEMA: &str = "
    CREATE SEQUENCE IF NOT EXISTS seq_backlinks_id START 1;
    CREATE TABLE IF NOT EXISTS backlinks (
        id BIGINT PRIMARY KEY DEFAULT nextval('seq_backlinks_id'),
        source_url VARCHAR NOT NULL,
        target_url VARCHAR NOT NULL,
        discovered_at VARCHAR
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id VARCHAR PRIMARY KEY,
        started_at VARCHAR NOT NULL,
        ended_at VARCHAR,
        status VARCHAR NOT NULL,
        config_json VARCHAR,
        target_db VARCHAR
    );

    CREATE SEQUENCE IF NOT EXISTS seq_pages_id START 1;
    CREATE TABLE IF NOT EXISTS pages (
        id BIGINT PRIMARY KEY DEFAULT nextval('seq_pages_id'),
        url VARCHAR NOT NULL,
        title VARCHAR,
        text VARCHAR,
        html_size BIGINT,
        word_count BIGINT,
        http_status INTEGER,
        response_time_ms BIGINT,
        content_hash VARCHAR,
        crawled_at VARCHAR NOT NULL,
        session_id VARCHAR NOT NULL,
        UNIQUE (url, session_id)
    );

    CREATE SEQUENCE IF NOT EXISTS seq_links_id START 1;
    CREATE TABLE IF NOT EXISTS links (
        id BIGINT PRIMARY KEY DEFAULT nextval('seq_links_id'),
        source_url VARCHAR NOT NULL,
        target_url VARCHAR NOT NULL,
        anchor_text VARCHAR,
        context VARCHAR,
        is_nofollow BOOLEAN NOT NULL DEFAULT FALSE,
        is_spam BOOLEAN NOT NULL DEFAULT FALSE,
        discovered_at VARCHAR NOT NULL,
        session_id VARCHAR NOT NULL,
        UNIQUE (source_url, target_url, session_id)
    );

    CREATE TABLE IF NOT EXISTS domain_scores (
        domain VARCHAR PRIMARY KEY,
        authority_score DOUBLE NOT NULL,
        backlink_count BIGINT NOT NULL,
        referring_domains BIGINT NOT NULL,
        updated_at VARCHAR NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pagerank_scores (
        url VARCHAR PRIMARY KEY,
        score DOUBLE NOT NULL,
        updated_at VARCHAR NOT NULL
    );

    CREATE TABLE IF NOT EXISTS database_usage (
        name VARCHAR PRIMARY KEY,
        url VARCHAR,
        bytes_used BIGINT,
        storage_quota_bytes BIGINT,
        writes_this_month BIGINT,
        monthly_write_limit BIGINT,
        last_health_check VARCHAR,
        status VARCHAR
    );

    CREATE INDEX IF NOT EXISTS idx_pages_url ON pages(url);
    CREATE INDEX IF NOT EXISTS idx_pages_crawled_at ON pages(crawled_at);
    CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_url);
    CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_url);
";

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct DbHandle {
    name: String,
    path: std::path::PathBuf,
    conn: Arc<Mutex<Connection>>,
}

/// Typed persistence over one or more DuckDB files. The frontier
/// (backlinks) lives in the designated frontier database; sessions are
/// replicated to every target so any database holding pages for a
/// session also holds its lifecycle row.
pub struct CrawlStore {
    dbs: Vec<DbHandle>,
    frontier: usize,
}

impl CrawlStore {
    pub fn open(specs: &[DatabaseSpec], frontier_db: &str) -> Result<Self> {
        if specs.is_empty() {
            return Err(StoreError::Permanent("no databases configured".into()));
        }

        let mut dbs = Vec::with_capacity(specs.len());
        for spec in specs {
            if let Some(parent) = spec.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(&spec.path)?;
            conn.execute_batch(SCHEMA)?;
            info!(db = %spec.name, path = %spec.path.display(), "opened database");
            dbs.push(DbHandle {
                name: spec.name.clone(),
                path: spec.path.clone(),
                conn: Arc::new(Mutex::new(conn)),
            });
        }

        let frontier = dbs
            .iter()
            .position(|db| db.name == frontier_db)
            .ok_or_else(|| StoreError::UnknownDatabase(frontier_db.to_string()))?;

        Ok(Self { dbs, frontier })
    }

    pub fn db_names(&self) -> Vec<String> {
        self.dbs.iter().map(|db| db.name.clone()).collect()
    }

    fn handle(&self, name: &str) -> Result<&DbHandle> {
        self.dbs
            .iter()
            .find(|db| db.name == name)
            .ok_or_else(|| StoreError::UnknownDatabase(name.to_string()))
    }

    fn frontier_handle(&self) -> &DbHandle {
        &self.dbs[self.frontier]
    }

    /// One page of the frontier: distinct URLs drawn from both sides
    /// of the backlinks table, ordered by first insertion id so the
    /// pagination is stable while the table grows at the tail.
    pub fn frontier_batch(&self, page: u64, size: u64) -> Result<Vec<String>> {
        let offset = (page.saturating_sub(1)) * size;
        let conn = self.frontier_handle().conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT url FROM (
                SELECT url, MIN(id) AS first_seen
                FROM (
                    SELECT source_url AS url, id FROM backlinks
                    UNION ALL
                    SELECT target_url AS url, id FROM backlinks
                ) AS both_sides
                GROUP BY url
            ) AS frontier
            ORDER BY first_seen, url
            LIMIT ? OFFSET ?",
        )?;
        let rows = stmt.query_map(params![size as i64, offset as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut urls = Vec::new();
        for row in rows {
            urls.push(row?);
        }
        Ok(urls)
    }

    pub fn count_frontier(&self) -> Result<u64> {
        let conn = self.frontier_handle().conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT source_url AS url FROM backlinks
                UNION
                SELECT target_url AS url FROM backlinks
            ) AS frontier",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Append frontier rows. Used by the upstream ingestion path and
    /// by tests; the scheduler itself never writes here.
    pub fn insert_backlinks(&self, edges: &[(String, String)]) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let mut conn = self.frontier_handle().conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO backlinks (source_url, target_url, discovered_at) VALUES (?, ?, ?)",
            )?;
            for (source, target) in edges {
                stmt.execute(params![source, target, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// A URL counts as crawled if any target database holds a page row
    /// for it inside the recrawl window.
    pub fn already_crawled(&self, url: &str, window: ChronoDuration) -> Result<bool> {
        let cutoff = fmt_ts(Utc::now() - window);
        for db in &self.dbs {
            let conn = db.conn.lock().unwrap();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pages WHERE url = ? AND crawled_at >= ?",
                params![url, cutoff],
                |row| row.get(0),
            )?;
            if count > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Create a session row in every database so that pages written to
    /// any rotation target reference a local session.
    pub fn create_session(
        &self,
        config: &serde_json::Value,
        target_db: &str,
    ) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let started_at = fmt_ts(Utc::now());
        let config_json = config.to_string();

        for db in &self.dbs {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO sessions (id, started_at, status, config_json, target_db)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    session_id,
                    started_at,
                    SessionStatus::Active.as_str(),
                    config_json,
                    target_db
                ],
            )?;
        }

        debug!(session = %session_id, target = target_db, "session created");
        Ok(session_id)
    }

    pub fn end_session(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let ended_at = fmt_ts(Utc::now());
        for db in &self.dbs {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE sessions SET ended_at = ?, status = ? WHERE id = ?",
                params![ended_at, status.as_str(), session_id],
            )?;
        }
        Ok(())
    }

    /// Atomic per-URL write: the page row and all of its links commit
    /// or roll back together. Returns (rows written, bytes written).
    pub fn write_page_and_links(
        &self,
        db_name: &str,
        page: &PageRecord,
        links: &[LinkRecord],
    ) -> Result<(u64, u64)> {
        let handle = self.handle(db_name)?;
        let mut conn = handle.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut rows: u64 = 0;
        let mut bytes: u64 = page.text.len() as u64 + page.url.len() as u64;

        let inserted = tx.execute(
            "INSERT INTO pages
                (url, title, text, html_size, word_count, http_status,
                 response_time_ms, content_hash, crawled_at, session_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (url, session_id) DO NOTHING",
            params![
                page.url,
                page.title,
                page.text,
                page.html_size as i64,
                page.word_count as i64,
                page.http_status as i32,
                page.response_time_ms as i64,
                page.content_hash,
                fmt_ts(page.crawled_at),
                page.session_id
            ],
        )?;
        rows += inserted as u64;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO links
                    (source_url, target_url, anchor_text, context, is_nofollow,
                     discovered_at, session_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (source_url, target_url, session_id) DO NOTHING",
            )?;
            for link in links {
                let inserted = stmt.execute(params![
                    link.source_url,
                    link.target_url,
                    link.anchor_text,
                    link.context,
                    link.is_nofollow,
                    fmt_ts(link.discovered_at),
                    link.session_id
                ])?;
                rows += inserted as u64;
                bytes += (link.source_url.len()
                    + link.target_url.len()
                    + link.anchor_text.as_deref().map_or(0, str::len)
                    + link.context.as_deref().map_or(0, str::len))
                    as u64;
            }
        }

        tx.commit()?;
        Ok((rows, bytes))
    }

    /// Stream every stored link without materializing the corpus: a
    /// blocking reader task walks each database in id-ordered chunks,
    /// releasing the connection lock between chunks, and feeds a
    /// bounded channel. Read errors arrive in-band on the channel.
    pub fn iter_links(&self) -> mpsc::Receiver<Result<LinkRow>> {
        let (tx, rx) = mpsc::channel(LINK_STREAM_BUFFER);
        let handles: Vec<(String, Arc<Mutex<Connection>>)> = self
            .dbs
            .iter()
            .map(|db| (db.name.clone(), db.conn.clone()))
            .collect();

        tokio::task::spawn_blocking(move || {
            for (name, conn) in handles {
                let mut cursor: i64 = 0;
                loop {
                    let chunk = match read_link_chunk(&name, &conn, cursor) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            let _ = tx.blocking_send(Err(e));
                            return;
                        }
                    };
                    let Some(last) = chunk.last() else { break };
                    cursor = last.id;
                    for row in chunk {
                        if tx.blocking_send(Ok(row)).is_err() {
                            // Receiver dropped; stop reading.
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    pub fn upsert_domain_scores(&self, db_name: &str, scores: &[DomainScore]) -> Result<(u64, u64)> {
        let handle = self.handle(db_name)?;
        let mut conn = handle.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut bytes: u64 = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO domain_scores
                    (domain, authority_score, backlink_count, referring_domains, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (domain) DO UPDATE SET
                    authority_score = excluded.authority_score,
                    backlink_count = excluded.backlink_count,
                    referring_domains = excluded.referring_domains,
                    updated_at = excluded.updated_at",
            )?;
            for score in scores {
                stmt.execute(params![
                    score.domain,
                    score.authority_score,
                    score.backlink_count as i64,
                    score.referring_domains as i64,
                    fmt_ts(score.updated_at)
                ])?;
                bytes += score.domain.len() as u64 + 40;
            }
        }
        tx.commit()?;
        Ok((scores.len() as u64, bytes))
    }

    pub fn upsert_pagerank_scores(
        &self,
        db_name: &str,
        scores: &[PageRankScore],
    ) -> Result<(u64, u64)> {
        let handle = self.handle(db_name)?;
        let mut conn = handle.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut bytes: u64 = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pagerank_scores (url, score, updated_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT (url) DO UPDATE SET
                    score = excluded.score,
                    updated_at = excluded.updated_at",
            )?;
            for score in scores {
                stmt.execute(params![score.url, score.score, fmt_ts(score.updated_at)])?;
                bytes += score.url.len() as u64 + 16;
            }
        }
        tx.commit()?;
        Ok((scores.len() as u64, bytes))
    }

    pub fn mark_links_spam(&self, db_name: &str, link_ids: &[i64]) -> Result<u64> {
        let handle = self.handle(db_name)?;
        let mut conn = handle.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut flagged: u64 = 0;
        {
            let mut stmt = tx.prepare("UPDATE links SET is_spam = TRUE WHERE id = ?")?;
            for id in link_ids {
                flagged += stmt.execute(params![id])? as u64;
            }
        }
        tx.commit()?;
        Ok(flagged)
    }

    /// url -> word_count for every stored page, used by the analyzer's
    /// link-density heuristic.
    pub fn page_word_counts(&self) -> Result<std::collections::HashMap<String, u64>> {
        let mut counts = std::collections::HashMap::new();
        for db in &self.dbs {
            let conn = db.conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT url, word_count FROM pages")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (url, words) = row?;
                counts.insert(url, words.max(0) as u64);
            }
        }
        Ok(counts)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let cutoff = fmt_ts(Utc::now() - ChronoDuration::days(1));
        let mut stats = StoreStats::default();
        for db in &self.dbs {
            let conn = db.conn.lock().unwrap();
            let pages: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
            let links: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |r| r.get(0))?;
            let recent: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pages WHERE crawled_at >= ?",
                params![cutoff],
                |r| r.get(0),
            )?;
            stats.total_pages += pages as u64;
            stats.total_links += links as u64;
            stats.pages_last_day += recent as u64;
        }
        Ok(stats)
    }

    /// Liveness probe: round-trip latency of a trivial query plus the
    /// current on-disk footprint.
    pub fn ping(&self, db_name: &str) -> Result<(u64, u64)> {
        let handle = self.handle(db_name)?;
        let start = Instant::now();
        {
            let conn = handle.conn.lock().unwrap();
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            if one != 1 {
                return Err(StoreError::Permanent("health probe returned garbage".into()));
            }
        }
        let rtt_ms = start.elapsed().as_millis() as u64;
        let bytes = file_size(&handle.path);
        Ok((rtt_ms, bytes))
    }

    /// Persist the rotation snapshot into the frontier database's
    /// usage meta-table.
    pub fn flush_usage(&self, usages: &[DatabaseUsage]) -> Result<()> {
        let mut conn = self.frontier_handle().conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO database_usage
                    (name, url, bytes_used, storage_quota_bytes, writes_this_month,
                     monthly_write_limit, last_health_check, status)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (name) DO UPDATE SET
                    url = excluded.url,
                    bytes_used = excluded.bytes_used,
                    storage_quota_bytes = excluded.storage_quota_bytes,
                    writes_this_month = excluded.writes_this_month,
                    monthly_write_limit = excluded.monthly_write_limit,
                    last_health_check = excluded.last_health_check,
                    status = excluded.status",
            )?;
            for usage in usages {
                stmt.execute(params![
                    usage.name,
                    usage.url,
                    usage.bytes_used as i64,
                    usage.storage_quota_bytes as i64,
                    usage.writes_this_month as i64,
                    usage.monthly_write_limit as i64,
                    usage.last_health_check.map(fmt_ts),
                    usage.status.as_str()
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn read_link_chunk(db_name: &str, conn: &Mutex<Connection>, cursor: i64) -> Result<Vec<LinkRow>> {
    let conn = conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT id, source_url, target_url, anchor_text, context, is_nofollow
         FROM links WHERE id > ? ORDER BY id LIMIT ?",
    )?;
    let rows = stmt.query_map(params![cursor, LINK_SCAN_CHUNK as i64], |row| {
        Ok(LinkRow {
            id: row.get(0)?,
            db: db_name.to_string(),
            source_url: row.get(1)?,
            target_url: row.get(2)?,
            anchor_text: row.get(3)?,
            context: row.get(4)?,
            is_nofollow: row.get(5)?,
        })
    })?;

    let mut chunk = Vec::new();
    for row in rows {
        chunk.push(row?);
    }
    Ok(chunk)
}

/// Store facade used by the scheduler and analyzer: every write is
/// steered by the rotation manager, retried on transient failure and
/// re-routed to an alternate database when a target keeps failing.
pub struct RotatingStore {
    store: CrawlStore,
    rotation: RotationManager,
    recrawl_window: ChronoDuration,
}

impl RotatingStore {
    pub fn open(
        specs: Vec<DatabaseSpec>,
        frontier_db: &str,
        recrawl_window: ChronoDuration,
    ) -> Result<Self> {
        let store = CrawlStore::open(&specs, frontier_db)?;
        let rotation = RotationManager::new(specs);
        Ok(Self {
            store,
            rotation,
            recrawl_window,
        })
    }

    pub fn store(&self) -> &CrawlStore {
        &self.store
    }

    pub fn rotation(&self) -> &RotationManager {
        &self.rotation
    }

    pub fn recrawl_window(&self) -> ChronoDuration {
        self.recrawl_window
    }

    pub fn frontier_batch(&self, page: u64, size: u64) -> Result<Vec<String>> {
        self.store.frontier_batch(page, size)
    }

    pub fn count_frontier(&self) -> Result<u64> {
        self.store.count_frontier()
    }

    pub fn already_crawled(&self, url: &str) -> Result<bool> {
        self.store.already_crawled(url, self.recrawl_window)
    }

    pub fn choose_write_target(&self) -> Result<String> {
        self.rotation.choose_write_target()
    }

    pub fn create_session(&self, config: &serde_json::Value, target_db: &str) -> Result<String> {
        self.store.create_session(config, target_db)
    }

    pub fn end_session(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.store.end_session(session_id, status)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    pub fn snapshot(&self) -> Vec<DatabaseUsage> {
        self.rotation.snapshot()
    }

    /// Write one URL's page and links, rotating away from targets that
    /// keep failing. Returns the database that took the write.
    pub async fn write_page_and_links(
        &self,
        page: &PageRecord,
        links: &[LinkRecord],
    ) -> Result<String> {
        let mut excluded: Vec<String> = Vec::new();

        loop {
            let target = self.rotation.choose_write_target_excluding(&excluded)?;

            match self.write_with_retry(&target, page, links).await {
                Ok((rows, bytes)) => {
                    self.rotation.record_write(&target, rows, bytes);
                    return Ok(target);
                }
                Err(e) if e.is_transient() => {
                    warn!(db = %target, error = %e, "write target failing, re-routing");
                    self.rotation.record_health_probe(&target, false, 0, None);
                    excluded.push(target);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_with_retry(
        &self,
        target: &str,
        page: &PageRecord,
        links: &[LinkRecord],
    ) -> Result<(u64, u64)> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.write_page_and_links(target, page, links) {
                Ok(written) => return Ok(written),
                Err(e) if e.is_transient() && attempt < WRITE_RETRY_ATTEMPTS => {
                    let delay = WRITE_RETRY_BASE * 2u32.pow(attempt);
                    attempt += 1;
                    debug!(db = target, error = %e, attempt, "transient store error, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn upsert_domain_scores(&self, scores: &[DomainScore]) -> Result<()> {
        let target = self.rotation.choose_write_target()?;
        let (rows, bytes) = self.store.upsert_domain_scores(&target, scores)?;
        self.rotation.record_write(&target, rows, bytes);
        Ok(())
    }

    pub async fn upsert_pagerank_scores(&self, scores: &[PageRankScore]) -> Result<()> {
        let target = self.rotation.choose_write_target()?;
        let (rows, bytes) = self.store.upsert_pagerank_scores(&target, scores)?;
        self.rotation.record_write(&target, rows, bytes);
        Ok(())
    }

    /// Probe every configured database and fold the results into the
    /// rotation state, then persist the snapshot.
    pub fn probe_all(&self) {
        for name in self.store.db_names() {
            match self.store.ping(&name) {
                Ok((rtt_ms, bytes)) => {
                    self.rotation.record_health_probe(&name, true, rtt_ms, Some(bytes));
                }
                Err(e) => {
                    warn!(db = %name, error = %e, "health probe failed");
                    self.rotation.record_health_probe(&name, false, 0, None);
                }
            }
        }
        if let Err(e) = self.store.flush_usage(&self.rotation.snapshot()) {
            warn!(error = %e, "failed to flush usage snapshot");
        }
    }

    /// (reachable, total) database counts for the health endpoint.
    pub fn health_overview(&self) -> (usize, usize) {
        let names = self.store.db_names();
        let total = names.len();
        let reachable = names
            .iter()
            .filter(|name| self.store.ping(name).is_ok())
            .count();
        (reachable, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn specs(dir: &TempDir, names: &[&str]) -> Vec<DatabaseSpec> {
        names
            .iter()
            .map(|name| DatabaseSpec {
                name: name.to_string(),
                path: dir.path().join(format!("{name}.db")),
                storage_quota_bytes: 1024 * 1024 * 1024,
                monthly_write_limit: 1_000_000,
            })
            .collect()
    }

    fn page(url: &str, session_id: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            title: Some("Title".to_string()),
            text: "body text".to_string(),
            html_size: 120,
            word_count: 2,
            http_status: 200,
            response_time_ms: 15,
            content_hash: "abc".to_string(),
            crawled_at: Utc::now(),
            session_id: session_id.to_string(),
        }
    }

    fn link(source: &str, target: &str, session_id: &str) -> LinkRecord {
        LinkRecord {
            source_url: source.to_string(),
            target_url: target.to_string(),
            anchor_text: Some("anchor".to_string()),
            context: None,
            is_nofollow: false,
            discovered_at: Utc::now(),
            session_id: session_id.to_string(),
        }
    }

    #[test]
    fn frontier_orders_by_first_insertion() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(&specs(&dir, &["main"]), "main").unwrap();

        store
            .insert_backlinks(&[
                ("https://a.com/".into(), "https://b.com/".into()),
                ("https://c.com/".into(), "https://a.com/".into()),
            ])
            .unwrap();

        assert_eq!(store.count_frontier().unwrap(), 3);
        let batch = store.frontier_batch(1, 10).unwrap();
        assert_eq!(
            batch,
            vec!["https://a.com/", "https://b.com/", "https://c.com/"]
        );

        let page2 = store.frontier_batch(2, 2).unwrap();
        assert_eq!(page2, vec!["https://c.com/"]);
    }

    #[test]
    fn page_and_links_commit_together() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(&specs(&dir, &["main"]), "main").unwrap();
        let session = store
            .create_session(&serde_json::json!({"batch_size": 50}), "main")
            .unwrap();

        let links = vec![
            link("https://s.com/", "https://t1.com/", &session),
            link("https://s.com/", "https://t2.com/", &session),
        ];
        let (rows, bytes) = store
            .write_page_and_links("main", &page("https://s.com/", &session), &links)
            .unwrap();
        assert_eq!(rows, 3);
        assert!(bytes > 0);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_pages, 1);
        assert_eq!(stats.total_links, 2);
        assert_eq!(stats.pages_last_day, 1);
    }

    #[test]
    fn duplicate_page_and_links_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(&specs(&dir, &["main"]), "main").unwrap();
        let session = store.create_session(&serde_json::json!({}), "main").unwrap();

        let links = vec![link("https://s.com/", "https://t.com/", &session)];
        store
            .write_page_and_links("main", &page("https://s.com/", &session), &links)
            .unwrap();
        let (rows, _) = store
            .write_page_and_links("main", &page("https://s.com/", &session), &links)
            .unwrap();

        assert_eq!(rows, 0);
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_pages, 1);
        assert_eq!(stats.total_links, 1);
    }

    #[test]
    fn already_crawled_respects_window() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(&specs(&dir, &["main"]), "main").unwrap();
        let session = store.create_session(&serde_json::json!({}), "main").unwrap();

        let mut old_page = page("https://old.com/", &session);
        old_page.crawled_at = Utc::now() - ChronoDuration::days(10);
        store.write_page_and_links("main", &old_page, &[]).unwrap();
        store
            .write_page_and_links("main", &page("https://fresh.com/", &session), &[])
            .unwrap();

        let window = ChronoDuration::days(7);
        assert!(!store.already_crawled("https://old.com/", window).unwrap());
        assert!(store.already_crawled("https://fresh.com/", window).unwrap());
        assert!(!store.already_crawled("https://never.com/", window).unwrap());
    }

    #[test]
    fn sessions_replicated_across_databases() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(&specs(&dir, &["alpha", "beta"]), "alpha").unwrap();
        let session = store.create_session(&serde_json::json!({}), "beta").unwrap();

        // Pages referencing the session can land in either database.
        store
            .write_page_and_links("beta", &page("https://x.com/", &session), &[])
            .unwrap();
        store.end_session(&session, SessionStatus::Completed).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_pages, 1);
    }

    #[tokio::test]
    async fn link_stream_visits_all_rows() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(&specs(&dir, &["main"]), "main").unwrap();
        let session = store.create_session(&serde_json::json!({}), "main").unwrap();

        let links: Vec<LinkRecord> = (0..25)
            .map(|i| link("https://s.com/", &format!("https://t{i}.com/"), &session))
            .collect();
        store
            .write_page_and_links("main", &page("https://s.com/", &session), &links)
            .unwrap();

        let mut seen = 0;
        let mut stream = store.iter_links();
        while let Some(row) = stream.recv().await {
            let row = row.unwrap();
            assert_eq!(row.db, "main");
            assert_eq!(row.source_url, "https://s.com/");
            seen += 1;
        }
        assert_eq!(seen, 25);
    }

    #[test]
    fn score_upserts_replace_existing_rows() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(&specs(&dir, &["main"]), "main").unwrap();

        let first = DomainScore {
            domain: "example.com".into(),
            authority_score: 40.0,
            backlink_count: 10,
            referring_domains: 3,
            updated_at: Utc::now(),
        };
        let second = DomainScore {
            authority_score: 62.5,
            ..first.clone()
        };
        store.upsert_domain_scores("main", &[first]).unwrap();
        store.upsert_domain_scores("main", &[second]).unwrap();

        let conn = store.handle("main").unwrap().conn.lock().unwrap();
        let (count, score): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(authority_score) FROM domain_scores",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!((score - 62.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn spam_flags_applied_by_id() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(&specs(&dir, &["main"]), "main").unwrap();
        let session = store.create_session(&serde_json::json!({}), "main").unwrap();
        store
            .write_page_and_links(
                "main",
                &page("https://s.com/", &session),
                &[link("https://s.com/", "https://t.com/", &session)],
            )
            .unwrap();

        let mut ids = Vec::new();
        let mut stream = store.iter_links();
        while let Some(row) = stream.recv().await {
            ids.push(row.unwrap().id);
        }
        let flagged = store.mark_links_spam("main", &ids).unwrap();
        assert_eq!(flagged, 1);
    }
}
