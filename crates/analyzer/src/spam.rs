use regex::Regex;
use serde::{Deserialize, Serialize};
use storage::LinkRow;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamConfig {
    /// A link is flagged when its score exceeds this.
    pub threshold: f64,
    /// Over-optimized commercial anchor patterns.
    pub keyword_patterns: Vec<String>,
    /// Known spam vocabulary matched against anchor, source URL and
    /// surrounding context.
    pub dictionary: Vec<String>,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            keyword_patterns: vec![
                "buy".to_string(),
                "cheap".to_string(),
                "discount".to_string(),
                "sale".to_string(),
            ],
            dictionary: vec![
                "casino".to_string(),
                "poker".to_string(),
                "viagra".to_string(),
                "pharmacy".to_string(),
                "loan".to_string(),
                "free-money".to_string(),
                "make-money-fast".to_string(),
                "weight-loss".to_string(),
                "dating".to_string(),
            ],
        }
    }
}

const LONG_ANCHOR_WORDS: usize = 5;
const DENSE_LINKS_PER_WORD: f64 = 0.25;

pub struct SpamScorer {
    keyword_re: Regex,
    dictionary: Vec<String>,
    threshold: f64,
}

impl SpamScorer {
    pub fn new(config: &SpamConfig) -> Result<Self> {
        let pattern = format!("(?i)\\b({})\\b", config.keyword_patterns.join("|"));
        Ok(Self {
            keyword_re: Regex::new(&pattern)?,
            dictionary: config
                .dictionary
                .iter()
                .map(|term| term.to_lowercase())
                .collect(),
            threshold: config.threshold,
        })
    }

    /// Heuristic score in [0, 1.1]: long keyword-stuffed anchors from
    /// link-dense pages in spam vocabulary neighborhoods.
    pub fn score(&self, link: &LinkRow, source_links: u64, source_words: u64) -> f64 {
        let mut score = 0.0;
        let anchor = link.anchor_text.as_deref().unwrap_or("");

        if anchor.split_whitespace().count() > LONG_ANCHOR_WORDS {
            score += 0.2;
        }
        if self.keyword_re.is_match(anchor) {
            score += 0.3;
        }

        let density = if source_words == 0 {
            // A page with links but no visible text is pure link spam.
            if source_links > 0 {
                1.0
            } else {
                0.0
            }
        } else {
            source_links as f64 / source_words as f64
        };
        if density > DENSE_LINKS_PER_WORD {
            score += 0.2;
        }

        let haystack = format!(
            "{} {} {}",
            link.source_url.to_lowercase(),
            anchor.to_lowercase(),
            link.context.as_deref().unwrap_or("").to_lowercase()
        );
        if self.dictionary.iter().any(|term| haystack.contains(term)) {
            score += 0.4;
        }

        score
    }

    pub fn is_spam(&self, score: f64) -> bool {
        score > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(source: &str, anchor: &str, context: &str) -> LinkRow {
        LinkRow {
            id: 1,
            db: "main".to_string(),
            source_url: source.to_string(),
            target_url: "https://target.com/".to_string(),
            anchor_text: (!anchor.is_empty()).then(|| anchor.to_string()),
            context: (!context.is_empty()).then(|| context.to_string()),
            is_nofollow: false,
        }
    }

    fn scorer() -> SpamScorer {
        SpamScorer::new(&SpamConfig::default()).unwrap()
    }

    #[test]
    fn editorial_link_is_clean() {
        let link = row(
            "https://news.example.com/article",
            "the study",
            "as described in the study published last week by the research group",
        );
        let score = scorer().score(&link, 5, 800);
        assert!(score < 0.2);
        assert!(!scorer().is_spam(score));
    }

    #[test]
    fn stuffed_anchor_from_spam_domain_is_flagged() {
        let link = row(
            "https://best-casino-links.example/",
            "buy cheap discount pills online today best deal",
            "casino casino casino",
        );
        let s = scorer();
        let score = s.score(&link, 300, 400);
        assert!(score > 0.8, "score was {score}");
        assert!(s.is_spam(score));
    }

    #[test]
    fn threshold_is_exclusive() {
        let s = scorer();
        assert!(!s.is_spam(0.8));
        assert!(s.is_spam(0.81));
    }

    #[test]
    fn link_density_component() {
        let s = scorer();
        let link = row("https://a.com/", "more", "context words around the anchor here");
        let sparse = s.score(&link, 5, 1000);
        let dense = s.score(&link, 400, 1000);
        assert!(dense > sparse);
    }

    #[test]
    fn textless_link_farm_counts_as_dense() {
        let s = scorer();
        let link = row("https://a.com/", "x", "");
        assert!(s.score(&link, 50, 0) >= 0.2);
    }

    #[test]
    fn dictionary_matches_in_context() {
        let s = scorer();
        let link = row(
            "https://harmless.example/",
            "click here",
            "win big at our partner casino tonight",
        );
        assert!(s.score(&link, 5, 500) >= 0.4);
    }
}
