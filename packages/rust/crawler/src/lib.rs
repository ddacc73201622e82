//! Page fetching, link scoping, and the URL registry for Pagewise.
//!
//! This crate provides:
//! - [`registry`]: Dedup URL store with per-page content and the link graph
//! - [`scope`]: Allow-list link filtering
//! - [`extract`]: Link and main-content extraction from HTML
//! - [`fetcher`]: The [`PageFetcher`] seam and the reqwest-backed [`HttpFetcher`]
//! - [`coordinator`]: Concurrent batch crawling into the registry

pub mod coordinator;
pub mod extract;
pub mod fetcher;
pub mod registry;
pub mod scope;

pub use coordinator::{BatchReport, CRAWL_FAILURE_PLACEHOLDER, PageLimits, crawl_batch, truncate_content};
pub use fetcher::{FetchedPage, HttpFetcher, PageFetcher};
pub use registry::{UrlRecord, UrlRegistry};
pub use scope::{AllowList, domains_of, link_filter, parse_http_url};
