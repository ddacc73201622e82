//! URL registry and link graph.
//!
//! The registry assigns each distinct URL string a dense, 0-based index at
//! first registration and owns everything known about that URL: its crawled
//! content, whether it has been visited, and its outbound edges.
//!
//! Deduplication is exact string equality. `https://a.com/x` and
//! `https://a.com/x/` are two different entries.

use std::collections::{BTreeMap, HashMap};

/// Everything the registry knows about one URL.
#[derive(Debug, Clone)]
pub struct UrlRecord {
    /// Stable index, assigned at first registration and never reused.
    pub index: usize,
    /// The URL exactly as registered.
    pub url: String,
    /// Page text, `None` until the URL has been crawled.
    pub content: Option<String>,
    /// Whether a crawl (successful or not) has consumed this URL.
    pub visited: bool,
}

/// Dedup store of discovered URLs plus adjacency edges.
#[derive(Debug, Clone, Default)]
pub struct UrlRegistry {
    records: Vec<UrlRecord>,
    by_url: HashMap<String, usize>,
    /// Source index → destination indices, in link encounter order.
    /// Keys are always visited indices.
    graph: BTreeMap<usize, Vec<usize>>,
}

impl UrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index for `url`, registering it if it is new.
    pub fn register(&mut self, url: &str) -> usize {
        if let Some(&index) = self.by_url.get(url) {
            return index;
        }

        let index = self.records.len();
        self.records.push(UrlRecord {
            index,
            url: url.to_string(),
            content: None,
            visited: false,
        });
        self.by_url.insert(url.to_string(), index);
        index
    }

    pub fn get(&self, index: usize) -> Option<&UrlRecord> {
        self.records.get(index)
    }

    /// URL string for `index`, if registered.
    pub fn url(&self, index: usize) -> Option<&str> {
        self.records.get(index).map(|r| r.url.as_str())
    }

    /// Number of registered URLs.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a successful crawl: store content, mark visited, and set the
    /// outbound edge list. Destinations must already be registered.
    ///
    /// Returns `false` (and changes nothing) if `index` is not registered.
    pub fn record_success(&mut self, index: usize, content: String, links: Vec<usize>) -> bool {
        let len = self.records.len();
        debug_assert!(links.iter().all(|&dest| dest < len));
        let Some(record) = self.records.get_mut(index) else {
            return false;
        };

        record.content = Some(content);
        record.visited = true;
        self.graph.insert(index, links);
        true
    }

    /// Record a failed crawl: the page still consumes its visit, gets the
    /// placeholder as content, and an empty edge list.
    pub fn record_failure(&mut self, index: usize, placeholder: &str) -> bool {
        let Some(record) = self.records.get_mut(index) else {
            return false;
        };

        record.content = Some(placeholder.to_string());
        record.visited = true;
        self.graph.insert(index, Vec::new());
        true
    }

    pub fn is_visited(&self, index: usize) -> bool {
        self.records.get(index).is_some_and(|r| r.visited)
    }

    /// Visited indices in ascending order.
    pub fn visited_indices(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.visited)
            .map(|r| r.index)
            .collect()
    }

    /// Registered but not yet visited indices in ascending order.
    pub fn unvisited_indices(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| !r.visited)
            .map(|r| r.index)
            .collect()
    }

    pub fn visited_count(&self) -> usize {
        self.records.iter().filter(|r| r.visited).count()
    }

    /// The link graph, keyed by source index.
    pub fn graph(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.graph
    }

    /// Outbound edges of `index`, `None` if it was never crawled.
    pub fn links_from(&self, index: usize) -> Option<&[usize]> {
        self.graph.get(&index).map(Vec::as_slice)
    }
}
