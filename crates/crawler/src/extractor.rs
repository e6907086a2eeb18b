use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::normalize::normalize_url;

const MAX_TITLE_CHARS: usize = 512;
const MAX_TEXT_BYTES: usize = 1024 * 1024;
const CONTEXT_CHARS: usize = 64;

/// Tags whose subtrees carry no indexable content.
const SKIP_TAGS: [&str; 5] = ["script", "style", "noscript", "nav", "footer"];

#[derive(Debug, Clone)]
pub struct PageContent {
    pub title: Option<String>,
    pub cleaned_text: String,
    pub html_size: usize,
    pub word_count: usize,
    pub content_hash: String,
}

#[derive(Debug, Clone)]
pub struct LinkOut {
    pub target_url: String,
    pub anchor_text: Option<String>,
    pub context: Option<String>,
    pub is_nofollow: bool,
}

pub struct ContentExtractor {
    allowed_content_types: Vec<String>,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self {
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
        }
    }
}

impl ContentExtractor {
    pub fn new(allowed_content_types: Vec<String>) -> Self {
        Self {
            allowed_content_types,
        }
    }

    /// Turn a fetched body into a page record and its outbound links.
    ///
    /// Non-HTML responses and bodies cut short at the size cap produce
    /// a page with empty text and no links; the crawl still counts as
    /// a success.
    pub fn extract(
        &self,
        final_url: &Url,
        body: &[u8],
        content_type: Option<&str>,
        truncated: bool,
    ) -> (PageContent, Vec<LinkOut>) {
        if truncated || !self.is_parseable(content_type) {
            debug!(url = %final_url, content_type, truncated, "storing empty page");
            return (empty_page(body.len()), Vec::new());
        }

        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);

        let cleaned_text = clean_text(&document);
        let title = extract_title(&document);
        let links = extract_links(&document, final_url, &cleaned_text);

        let word_count = cleaned_text.split_whitespace().count();
        let content_hash = hash_text(&cleaned_text);

        (
            PageContent {
                title,
                cleaned_text,
                html_size: body.len(),
                word_count,
                content_hash,
            },
            links,
        )
    }

    fn is_parseable(&self, content_type: Option<&str>) -> bool {
        match content_type {
            // Servers that omit the header overwhelmingly serve HTML.
            None => true,
            Some(ct) => self
                .allowed_content_types
                .iter()
                .any(|allowed| ct.starts_with(allowed.as_str())),
        }
    }
}

fn empty_page(html_size: usize) -> PageContent {
    PageContent {
        title: None,
        cleaned_text: String::new(),
        html_size,
        word_count: 0,
        content_hash: hash_text(""),
    }
}

fn hash_text(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").unwrap();
    let h1_selector = Selector::parse("h1").unwrap();

    let raw = document
        .select(&title_selector)
        .map(|el| el.text().collect::<String>())
        .find(|t| !t.trim().is_empty())
        .or_else(|| {
            document
                .select(&h1_selector)
                .map(|el| el.text().collect::<String>())
                .find(|t| !t.trim().is_empty())
        })?;

    let trimmed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(trimmed.chars().take(MAX_TITLE_CHARS).collect())
}

/// Visible text with boilerplate subtrees removed and whitespace
/// collapsed, capped at 1 MiB.
fn clean_text(document: &Html) -> String {
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_at_char_boundary(collapsed, MAX_TEXT_BYTES)
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) => {
                if !SKIP_TAGS.contains(&el.name()) {
                    if let Some(el_ref) = ElementRef::wrap(child) {
                        collect_text(el_ref, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn truncate_at_char_boundary(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

fn extract_links(document: &Html, final_url: &Url, cleaned_text: &str) -> Vec<LinkOut> {
    let selector = Selector::parse("a[href]").unwrap();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = final_url.join(href) else {
            continue;
        };
        let Ok(target_url) = normalize_url(resolved.as_str()) else {
            continue;
        };

        let anchor = element.text().collect::<String>();
        let anchor = anchor.split_whitespace().collect::<Vec<_>>().join(" ");
        let anchor_text = (!anchor.is_empty()).then(|| anchor.clone());

        let context = anchor_text
            .as_deref()
            .and_then(|a| context_window(cleaned_text, a));

        let is_nofollow = element
            .value()
            .attr("rel")
            .map(|rel| {
                rel.to_lowercase()
                    .split_whitespace()
                    .any(|token| matches!(token, "nofollow" | "ugc" | "sponsored"))
            })
            .unwrap_or(false);

        links.push(LinkOut {
            target_url,
            anchor_text,
            context,
            is_nofollow,
        });
    }

    links
}

/// Up to 64 characters of cleaned text on each side of the anchor.
fn context_window(cleaned_text: &str, anchor: &str) -> Option<String> {
    let pos = cleaned_text.find(anchor)?;
    let end = pos + anchor.len();

    let start_byte = cleaned_text[..pos]
        .char_indices()
        .rev()
        .take(CONTEXT_CHARS)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(pos);
    let end_byte = cleaned_text[end..]
        .char_indices()
        .take(CONTEXT_CHARS)
        .last()
        .map(|(i, c)| end + i + c.len_utf8())
        .unwrap_or(end);

    Some(cleaned_text[start_byte..end_byte.min(cleaned_text.len())].to_string())
}
