//! Allow-list scope checks for discovered links.
//!
//! Each allow-list entry is classified by shape:
//! - an entry containing a path separator (which includes any `scheme://`)
//!   is a literal URL prefix, compared case-insensitively;
//! - anything else is a domain, matching the URL's host exactly or as a
//!   dot-suffix (`example.com` admits `docs.example.com`). Ports are ignored.

use url::Url;

/// One classified allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowRule {
    Prefix(String),
    Domain(String),
}

impl AllowRule {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim().to_lowercase();
        if entry.is_empty() {
            return None;
        }
        if entry.contains('/') {
            Some(Self::Prefix(entry))
        } else {
            Some(Self::Domain(entry))
        }
    }

    fn matches(&self, raw: &str, url: &Url) -> bool {
        match self {
            Self::Prefix(prefix) => raw.to_lowercase().starts_with(prefix.as_str()),
            Self::Domain(domain) => {
                let host = url.host_str().unwrap_or("").to_lowercase();
                host == *domain || host.ends_with(&format!(".{domain}"))
            }
        }
    }
}

/// The set of URL prefixes and domains links must fall under.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    rules: Vec<AllowRule>,
}

impl AllowList {
    /// Build an allow-list from raw entries; blank entries are ignored.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        Self {
            rules: entries
                .iter()
                .filter_map(|e| AllowRule::parse(e.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `url` is a valid http(s) URL inside this scope.
    /// An empty allow-list admits every valid http(s) URL.
    pub fn admits(&self, url: &str) -> bool {
        let Some(parsed) = parse_http_url(url) else {
            return false;
        };
        self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(url, &parsed))
    }
}

/// Keep the links admitted by `allow`, preserving order.
pub fn link_filter(urls: &[String], allow: &AllowList) -> Vec<String> {
    urls.iter().filter(|u| allow.admits(u)).cloned().collect()
}

/// Parse `raw` as an absolute http/https URL with a host.
pub fn parse_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    match url.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    if url.host_str().is_none_or(str::is_empty) {
        return None;
    }
    Some(url)
}

/// Derive domain allow-list entries from a set of start URLs (deduplicated,
/// first-seen order). Invalid URLs contribute nothing.
pub fn domains_of<S: AsRef<str>>(start_urls: &[S]) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();
    for raw in start_urls {
        if let Some(host) = parse_http_url(raw.as_ref()).and_then(|u| u.host_str().map(str::to_lowercase)) {
            if !domains.contains(&host) {
                domains.push(host);
            }
        }
    }
    domains
}
