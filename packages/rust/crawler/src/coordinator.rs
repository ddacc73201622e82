//! Crawl coordinator: fetches a batch of pending URLs concurrently and folds
//! the results into the registry.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use pagewise_shared::{CrawlConfig, PagewiseError, Result};

use crate::fetcher::{FetchedPage, PageFetcher};
use crate::registry::UrlRegistry;
use crate::scope::{AllowList, link_filter};

/// Content stored for a page whose fetch failed.
pub const CRAWL_FAILURE_PLACEHOLDER: &str = "Error crawling page";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-page limits applied while folding results into the registry.
#[derive(Debug, Clone)]
pub struct PageLimits {
    /// Maximum characters of page text kept.
    pub content_max_chars: usize,
    /// Maximum links registered per page, after filtering.
    pub max_links_per_page: usize,
    /// Scope discovered links must fall under.
    pub allow: AllowList,
}

/// Summary of one crawl round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// URLs fetched successfully, in pending order.
    pub crawled: Vec<String>,
    /// URLs whose fetch failed, in pending order.
    pub failed: Vec<String>,
    /// Number of URLs newly registered by this round.
    pub discovered: usize,
    /// Registry size after the round.
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Batch crawl
// ---------------------------------------------------------------------------

/// Crawl every index in `pending` and record the results in `registry`.
///
/// Unknown, duplicate and already visited indices are skipped. Fetches run
/// concurrently under a semaphore of `config.concurrency` permits, a failed
/// fetch is retried up to `config.max_retries` times, and the whole batch is
/// joined before results are applied. `pending` is always
/// left empty.
#[instrument(skip_all, fields(pending = pending.len()))]
pub async fn crawl_batch(
    fetcher: Arc<dyn PageFetcher>,
    registry: &mut UrlRegistry,
    pending: &mut Vec<usize>,
    limits: &PageLimits,
    config: &CrawlConfig,
) -> BatchReport {
    let batch = std::mem::take(pending);
    let size_before = registry.len();

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1) as usize));
    let rate_limit = config.rate_limit_ms;
    let max_retries = config.max_retries;
    let retry_wait = Duration::from_millis(config.retry_wait_ms);

    let mut seen = HashSet::new();
    let mut handles = Vec::new();

    for index in batch {
        let Some(url) = registry.url(index).map(str::to_string) else {
            debug!(index, "pending index not registered, skipping");
            continue;
        };
        if registry.is_visited(index) || !seen.insert(index) {
            debug!(index, "pending index already handled, skipping");
            continue;
        }

        let fetcher = fetcher.clone();
        let sem = semaphore.clone();

        let handle = tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return (index, Err(PagewiseError::Network("crawl semaphore closed".into())));
            };

            if rate_limit > 0 {
                tokio::time::sleep(Duration::from_millis(rate_limit)).await;
            }

            let result = fetch_with_retry(fetcher.as_ref(), &url, max_retries, retry_wait).await;
            (index, result)
        });
        handles.push((index, handle));
    }

    // Barrier: every fetch completes before the registry changes.
    let mut results: Vec<(usize, Result<FetchedPage>)> = Vec::with_capacity(handles.len());
    for (spawned_index, handle) in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => results.push((
                spawned_index,
                Err(PagewiseError::Network(format!("crawl task failed: {e}"))),
            )),
        }
    }

    let mut report = BatchReport::default();
    for (index, result) in results {
        let url = registry.url(index).unwrap_or_default().to_string();
        match result {
            Ok(page) => {
                apply_success(registry, index, page, limits);
                report.crawled.push(url);
            }
            Err(e) => {
                warn!(%url, error = %e, "crawl failed");
                registry.record_failure(index, CRAWL_FAILURE_PLACEHOLDER);
                report.failed.push(url);
            }
        }
    }

    report.total = registry.len();
    report.discovered = report.total - size_before;

    info!(
        crawled = report.crawled.len(),
        failed = report.failed.len(),
        discovered = report.discovered,
        total = report.total,
        "crawl batch completed"
    );

    report
}

/// Fetch `url`, retrying failures up to `max_retries` extra times.
async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    url: &str,
    max_retries: u32,
    retry_wait: Duration,
) -> Result<FetchedPage> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(url).await {
            Ok(page) => return Ok(page),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                warn!(%url, attempt, error = %e, "fetch failed, retrying");
                if !retry_wait.is_zero() {
                    tokio::time::sleep(retry_wait).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Store a fetched page: truncate its text, filter and cap its links, then
/// register them and write the graph entry.
fn apply_success(registry: &mut UrlRegistry, index: usize, page: FetchedPage, limits: &PageLimits) {
    let content = truncate_content(&page.content, limits.content_max_chars);

    let mut links = link_filter(&page.links, &limits.allow);
    links.truncate(limits.max_links_per_page);

    let dest: Vec<usize> = links.iter().map(|link| registry.register(link)).collect();
    registry.record_success(index, content, dest);
}

/// Keep the first `max_chars` characters of `content`, appending a marker with
/// the original length when anything was cut.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }

    let head: String = content.chars().take(max_chars).collect();
    format!("{head}\n... [Content truncated - original length: {total} chars]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory fetcher: known URLs return their page, anything else fails.
    #[derive(Default)]
    struct MapFetcher {
        pages: HashMap<String, FetchedPage>,
        calls: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, content: &str, links: &[&str]) -> Self {
            self.pages.insert(
                url.to_string(),
                FetchedPage {
                    content: content.to_string(),
                    links: links.iter().map(|s| s.to_string()).collect(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| PagewiseError::Network(format!("{url}: HTTP 404")))
        }
    }

    /// Fails the first `failures` fetches, then serves one page.
    struct FlakyFetcher {
        failures: usize,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl PageFetcher for FlakyFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.failures {
                return Err(PagewiseError::Network(format!("{url}: connection reset")));
            }
            Ok(FetchedPage {
                content: "recovered".into(),
                links: Vec::new(),
            })
        }
    }

    fn limits(allowed: &[&str]) -> PageLimits {
        PageLimits {
            content_max_chars: 10_000,
            max_links_per_page: 300,
            allow: AllowList::new(allowed),
        }
    }

    fn config() -> CrawlConfig {
        CrawlConfig {
            concurrency: 4,
            rate_limit_ms: 0,
            max_retries: 0,
            retry_wait_ms: 0,
        }
    }

    #[test]
    fn truncate_keeps_short_content() {
        assert_eq!(truncate_content("hello", 10), "hello");
        assert_eq!(truncate_content("hello", 5), "hello");
    }

    #[test]
    fn truncate_cuts_on_characters_and_reports_length() {
        let text = "é".repeat(12);
        let out = truncate_content(&text, 10);
        assert!(out.starts_with(&"é".repeat(10)));
        assert!(!out.starts_with(&"é".repeat(11)));
        assert!(out.ends_with("\n... [Content truncated - original length: 12 chars]"));
    }

    #[tokio::test]
    async fn successful_crawl_registers_filtered_links() {
        let fetcher = MapFetcher::default().with(
            "https://example.com/",
            "home",
            &[
                "https://example.com/a",
                "https://other.org/x",
                "https://example.com/b",
                "https://example.com/a",
            ],
        );

        let mut reg = UrlRegistry::new();
        let root = reg.register("https://example.com/");
        let mut pending = vec![root];

        let report = crawl_batch(
            Arc::new(fetcher),
            &mut reg,
            &mut pending,
            &limits(&["example.com"]),
            &config(),
        )
        .await;

        assert!(pending.is_empty());
        assert_eq!(report.crawled, vec!["https://example.com/".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(report.discovered, 2);
        assert_eq!(report.total, 3);
        // Duplicate links keep their position in the edge list.
        assert_eq!(reg.links_from(root), Some(&[1, 2, 1][..]));
        assert_eq!(reg.get(root).unwrap().content.as_deref(), Some("home"));
    }

    #[tokio::test]
    async fn failed_crawl_gets_placeholder_and_no_links() {
        let fetcher = MapFetcher::default();
        let mut reg = UrlRegistry::new();
        let idx = reg.register("https://example.com/broken");
        let mut pending = vec![idx];

        let report = crawl_batch(
            Arc::new(fetcher),
            &mut reg,
            &mut pending,
            &limits(&[]),
            &config(),
        )
        .await;

        assert_eq!(report.failed, vec!["https://example.com/broken".to_string()]);
        assert_eq!(report.discovered, 0);
        assert!(reg.is_visited(idx));
        assert_eq!(
            reg.get(idx).unwrap().content.as_deref(),
            Some(CRAWL_FAILURE_PLACEHOLDER)
        );
        assert_eq!(reg.links_from(idx), Some(&[][..]));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn links_are_capped_after_filtering() {
        let fetcher = MapFetcher::default().with(
            "https://example.com/",
            "home",
            &[
                "https://outside.org/1",
                "https://example.com/1",
                "https://outside.org/2",
                "https://example.com/2",
                "https://example.com/3",
            ],
        );
        let mut reg = UrlRegistry::new();
        reg.register("https://example.com/");
        let mut pending = vec![0];
        let mut lim = limits(&["example.com"]);
        lim.max_links_per_page = 2;

        crawl_batch(Arc::new(fetcher), &mut reg, &mut pending, &lim, &config()).await;

        assert_eq!(reg.len(), 3);
        assert_eq!(reg.url(1), Some("https://example.com/1"));
        assert_eq!(reg.url(2), Some("https://example.com/2"));
    }

    #[tokio::test]
    async fn unknown_and_duplicate_indices_are_skipped() {
        let fetcher = Arc::new(MapFetcher::default().with("https://example.com/", "home", &[]));
        let mut reg = UrlRegistry::new();
        reg.register("https://example.com/");
        let mut pending = vec![0, 7, 0];

        let report = crawl_batch(
            fetcher.clone(),
            &mut reg,
            &mut pending,
            &limits(&[]),
            &config(),
        )
        .await;

        assert_eq!(report.crawled.len(), 1);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
        assert_eq!(reg.links_from(0), Some(&[][..]));
    }

    #[tokio::test]
    async fn content_is_truncated_when_stored() {
        let long = "x".repeat(50);
        let fetcher = MapFetcher::default().with("https://example.com/", &long, &[]);
        let mut reg = UrlRegistry::new();
        reg.register("https://example.com/");
        let mut pending = vec![0];
        let mut lim = limits(&[]);
        lim.content_max_chars = 20;

        crawl_batch(Arc::new(fetcher), &mut reg, &mut pending, &lim, &config()).await;

        let stored = reg.get(0).unwrap().content.clone().unwrap();
        assert!(stored.starts_with(&"x".repeat(20)));
        assert!(stored.ends_with("[Content truncated - original length: 50 chars]"));
    }

    #[tokio::test]
    async fn mixed_batch_preserves_pending_order_in_report() {
        let fetcher = MapFetcher::default()
            .with("https://example.com/a", "a", &["https://example.com/c"])
            .with("https://example.com/b", "b", &["https://example.com/c"]);
        let mut reg = UrlRegistry::new();
        reg.register("https://example.com/a");
        reg.register("https://example.com/b");
        reg.register("https://example.com/missing");
        let mut pending = vec![1, 2, 0];

        let report = crawl_batch(
            Arc::new(fetcher),
            &mut reg,
            &mut pending,
            &limits(&[]),
            &config(),
        )
        .await;

        assert_eq!(
            report.crawled,
            vec!["https://example.com/b".to_string(), "https://example.com/a".to_string()]
        );
        assert_eq!(report.failed, vec!["https://example.com/missing".to_string()]);
        assert_eq!(report.discovered, 1);
        assert_eq!(reg.links_from(0), Some(&[3][..]));
        assert_eq!(reg.links_from(1), Some(&[3][..]));
        assert_eq!(reg.visited_indices(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let fetcher = Arc::new(FlakyFetcher {
            failures: 1,
            calls: Mutex::new(0),
        });
        let mut reg = UrlRegistry::new();
        reg.register("https://example.com/");
        let mut pending = vec![0];
        let mut cfg = config();
        cfg.max_retries = 2;

        let report = crawl_batch(fetcher.clone(), &mut reg, &mut pending, &limits(&[]), &cfg).await;

        assert_eq!(*fetcher.calls.lock().unwrap(), 2);
        assert_eq!(report.crawled, vec!["https://example.com/".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(reg.get(0).unwrap().content.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let fetcher = Arc::new(FlakyFetcher {
            failures: 10,
            calls: Mutex::new(0),
        });
        let mut reg = UrlRegistry::new();
        reg.register("https://example.com/");
        let mut pending = vec![0];
        let mut cfg = config();
        cfg.max_retries = 2;

        let report = crawl_batch(fetcher.clone(), &mut reg, &mut pending, &limits(&[]), &cfg).await;

        assert_eq!(*fetcher.calls.lock().unwrap(), 3);
        assert_eq!(report.failed, vec!["https://example.com/".to_string()]);
        assert_eq!(
            reg.get(0).unwrap().content.as_deref(),
            Some(CRAWL_FAILURE_PLACEHOLDER)
        );
    }
}
