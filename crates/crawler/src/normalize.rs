use url::Url;

use crate::{FetchError, Result};

/// Canonicalize a URL for frontier and link-graph identity.
///
/// Lowercases scheme and host, drops default ports and fragments,
/// strips a trailing slash everywhere except the root path, and keeps
/// query parameter order untouched. Idempotent: normalizing an already
/// normalized URL returns it unchanged.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(FetchError::InvalidUrl(format!("unsupported scheme: {other}"))),
    }
    if url.host_str().is_none() {
        return Err(FetchError::InvalidUrl(raw.to_string()));
    }

    url.set_fragment(None);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }

    // An empty query string ("?") carries no information.
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url.to_string())
}
