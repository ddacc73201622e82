//! HTML → text extraction and link discovery.
//!
//! Content is taken from the page's main content area, stripped of
//! navigation chrome, and converted to Markdown with `htmd`.

use std::sync::LazyLock;

use pagewise_shared::{PagewiseError, Result};
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Selectors tried in order when looking for the main content area.
const CONTENT_SELECTORS: [&str; 4] = ["main", "article", r#"[role="main"]"#, ".content"];

/// Elements removed from the content area before conversion.
const CHROME_SELECTOR: &str = "nav, header, footer, aside, script, style, .sidebar, .nav";

/// Extract all links from a document, resolved against the page URL.
///
/// Anchors, `javascript:` and `mailto:` hrefs are skipped; fragments are
/// stripped. Order follows the document.
pub fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    static LINK_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

    let mut links = Vec::new();
    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }

        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            links.push(resolved.to_string());
        }
    }

    links
}

/// Select the main content area of a document as HTML, chrome stripped.
pub fn main_content_html(doc: &Html) -> String {
    for sel_str in CONTENT_SELECTORS {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&sel).next() {
            return strip_chrome(&el.inner_html());
        }
    }

    static BODY_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("body").expect("valid selector"));
    doc.select(&BODY_SEL)
        .next()
        .map(|body| strip_chrome(&body.inner_html()))
        .unwrap_or_default()
}

/// Convert an HTML page to Markdown text.
pub fn html_to_text(html: &str) -> Result<String> {
    let doc = Html::parse_document(html);
    let content = main_content_html(&doc);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();
    let markdown = converter
        .convert(&content)
        .map_err(|e| PagewiseError::parse(format!("htmd conversion failed: {e}")))?;

    Ok(collapse_blank_lines(&markdown))
}

/// Remove navigation and other chrome elements from an HTML fragment.
fn strip_chrome(html: &str) -> String {
    static CHROME_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(CHROME_SELECTOR).expect("valid selector"));

    let doc = Html::parse_fragment(html);
    let mut result = html.to_string();
    for el in doc.select(&CHROME_SEL) {
        result = result.replace(&el.html(), "");
    }
    result
}

/// Collapse runs of blank lines and trim the result.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*){2,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_links_resolves_and_skips() {
        let html = r##"<html><body>
            <a href="/page2">Page 2</a>
            <a href="https://external.com">External</a>
            <a href="#section">Anchor</a>
            <a href="javascript:void(0)">JS</a>
            <a href="mailto:hi@example.com">Mail</a>
            <a href="relative/path#frag">Relative</a>
        </body></html>"##;

        let doc = Html::parse_document(html);
        let base = Url::parse("https://docs.example.com/page1").unwrap();
        let links = extract_links(&doc, &base);

        assert_eq!(
            links,
            vec![
                "https://docs.example.com/page2".to_string(),
                "https://external.com/".to_string(),
                "https://docs.example.com/relative/path".to_string(),
            ]
        );
    }

    #[test]
    fn main_content_prefers_main_and_strips_chrome() {
        let html = r#"<html><body>
            <header>Site header</header>
            <main><nav>Menu</nav><h1>Title</h1><p>Body text.</p></main>
            <footer>Copyright</footer>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let content = main_content_html(&doc);

        assert!(content.contains("Body text."));
        assert!(!content.contains("Menu"));
        assert!(!content.contains("Copyright"));
    }

    #[test]
    fn falls_back_to_body() {
        let html = r#"<html><body><div><p>Plain page</p></div><script>analytics()</script></body></html>"#;
        let doc = Html::parse_document(html);
        let content = main_content_html(&doc);

        assert!(content.contains("Plain page"));
        assert!(!content.contains("analytics"));
    }

    #[test]
    fn html_to_text_produces_markdown() {
        let html = r#"<html><body><article>
            <h1>Guide</h1>
            <p>First paragraph.</p>



            <p>Second paragraph.</p>
        </article></body></html>"#;
        let text = html_to_text(html).unwrap();

        assert!(text.contains("# Guide"));
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second paragraph."));
        assert!(!text.contains("\n\n\n"));
    }
}
