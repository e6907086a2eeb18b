use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use url::Url;

use crate::ClientPool;

const RULES_TTL: Duration = Duration::from_secs(24 * 3600);
const NEGATIVE_TTL: Duration = Duration::from_secs(3600);
const FAIL_OPEN_TTL: Duration = Duration::from_secs(300);

/// Per-origin robots.txt cache. A fetched ruleset lives for 24 hours,
/// a 4xx answer is negative-cached as allow-all for one hour, and a
/// network failure fails open for five minutes so the fetcher is never
/// starved by a flaky origin.
pub struct RobotsCache {
    client: Arc<ClientPool>,
    user_agent: String,
    cache: RwLock<HashMap<String, CachedRobots>>,
    // One in-flight robots fetch per origin; waiters park on the lock.
    fetch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[derive(Debug, Clone)]
struct CachedRobots {
    rules: RobotsRules,
    expires_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    disallow_paths: Vec<String>,
    allow_paths: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsCache {
    pub fn new(client: Arc<ClientPool>, user_agent: String) -> Self {
        Self {
            client,
            user_agent,
            cache: RwLock::new(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_allowed(&self, url: &Url) -> bool {
        let rules = self.rules_for(url).await;
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        rules.is_path_allowed(&path)
    }

    pub async fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        self.rules_for(url).await.crawl_delay
    }

    async fn rules_for(&self, url: &Url) -> RobotsRules {
        let origin = match origin_key(url) {
            Some(origin) => origin,
            None => return RobotsRules::default(),
        };

        if let Some(cached) = self.lookup(&origin).await {
            return cached;
        }

        let lock = {
            let mut locks = self.fetch_locks.lock().await;
            locks
                .entry(origin.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Another waiter may have populated the cache while we parked.
        if let Some(cached) = self.lookup(&origin).await {
            return cached;
        }

        let (rules, ttl) = self.fetch_rules(url, &origin).await;
        self.cache.write().await.insert(
            origin,
            CachedRobots {
                rules: rules.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        rules
    }

    async fn lookup(&self, origin: &str) -> Option<RobotsRules> {
        let cache = self.cache.read().await;
        cache
            .get(origin)
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.rules.clone())
    }

    async fn fetch_rules(&self, url: &Url, origin: &str) -> (RobotsRules, Duration) {
        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        match self.client.get_raw(&robots_url).await {
            Ok((status, body)) if (200..300).contains(&status) => {
                let content = String::from_utf8_lossy(&body);
                debug!(origin, "fetched robots.txt");
                (parse_robots_txt(&content, &self.user_agent), RULES_TTL)
            }
            Ok((status, _)) => {
                debug!(origin, status, "robots.txt unavailable, allowing all");
                (RobotsRules::default(), NEGATIVE_TTL)
            }
            Err(e) => {
                warn!(origin, error = %e, "robots.txt fetch failed, failing open");
                (RobotsRules::default(), FAIL_OPEN_TTL)
            }
        }
    }
}

impl RobotsRules {
    pub fn is_path_allowed(&self, path: &str) -> bool {
        // Allow rules take precedence over disallow rules.
        for allow in &self.allow_paths {
            if path_matches(path, allow) {
                return true;
            }
        }
        for disallow in &self.disallow_paths {
            if path_matches(path, disallow) {
                return false;
            }
        }
        true
    }
}

fn origin_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Parse the group matching our user agent, falling back to the `*`
/// group when no specific section exists.
fn parse_robots_txt(content: &str, user_agent: &str) -> RobotsRules {
    let ua_token = user_agent.to_lowercase();

    let mut specific = RobotsRules::default();
    let mut wildcard = RobotsRules::default();
    let mut saw_specific = false;

    let mut in_specific = false;
    let mut in_wildcard = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((directive, value)) = line.split_once(':') else {
            continue;
        };
        let directive = directive.trim().to_lowercase();
        let value = value.trim();

        match directive.as_str() {
            "user-agent" => {
                let agent = value.to_lowercase();
                in_wildcard = agent == "*";
                in_specific = !in_wildcard && ua_token.contains(&agent);
                if in_specific {
                    saw_specific = true;
                }
            }
            "disallow" => {
                if !value.is_empty() {
                    if in_specific {
                        specific.disallow_paths.push(value.to_string());
                    } else if in_wildcard {
                        wildcard.disallow_paths.push(value.to_string());
                    }
                }
            }
            "allow" => {
                if !value.is_empty() {
                    if in_specific {
                        specific.allow_paths.push(value.to_string());
                    } else if in_wildcard {
                        wildcard.allow_paths.push(value.to_string());
                    }
                }
            }
            "crawl-delay" => {
                if in_specific || in_wildcard {
                    if let Ok(seconds) = value.parse::<f64>() {
                        let delay = Duration::from_secs_f64(seconds.max(0.0));
                        if in_specific {
                            specific.crawl_delay = Some(delay);
                        } else if wildcard.crawl_delay.is_none() {
                            wildcard.crawl_delay = Some(delay);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if saw_specific {
        specific
    } else {
        wildcard
    }
}

/// robots.txt pattern match supporting `*` wildcards and `$` anchors.
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    if let Some(stripped) = pattern.strip_suffix('$') {
        return wildcard_match(path, stripped, true);
    }
    wildcard_match(path, pattern, false)
}

fn wildcard_match(path: &str, pattern: &str, anchored_end: bool) -> bool {
    if !pattern.contains('*') {
        return if anchored_end {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !path.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if anchored_end && i == parts.len() - 1 {
            return path[pos..].ends_with(part);
        } else {
            match path[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wildcard_group() {
        let rules = parse_robots_txt(
            "User-agent: *\nDisallow: /admin/\nAllow: /admin/public/\nCrawl-delay: 2\n",
            "BacklinkEngine/1.0",
        );

        assert!(!rules.is_path_allowed("/admin/users"));
        assert!(rules.is_path_allowed("/admin/public/info"));
        assert!(rules.is_path_allowed("/blog"));
        assert_eq!(rules.crawl_delay, Some(Duration::from_secs(2)));
    }

    #[test]
    fn specific_group_overrides_wildcard() {
        let robots = "User-agent: *\nDisallow: /\n\nUser-agent: backlinkengine\nDisallow: /private/\n";
        let rules = parse_robots_txt(robots, "BacklinkEngine/1.0");

        assert!(rules.is_path_allowed("/blog"));
        assert!(!rules.is_path_allowed("/private/x"));
    }

    #[test]
    fn disallow_all() {
        let rules = parse_robots_txt("User-agent: *\nDisallow: /\n", "Bot/1.0");
        assert!(!rules.is_path_allowed("/"));
        assert!(!rules.is_path_allowed("/anything"));
    }

    #[test]
    fn wildcard_and_anchor_patterns() {
        assert!(path_matches("/search?q=x", "/search"));
        assert!(path_matches("/a/b/file.pdf", "/*.pdf$"));
        assert!(!path_matches("/a/b/file.pdfx", "/*.pdf$"));
        assert!(path_matches("/x/private/y", "/*/private/"));
        assert!(!path_matches("/public/y", "/*/private/"));
    }

    #[test]
    fn empty_rules_allow_everything() {
        let rules = RobotsRules::default();
        assert!(rules.is_path_allowed("/anything"));
    }
}
