// src/checker/html.rs
// =============================================================================
// This module extracts page metadata and candidate links from HTML.
//
// We use the `scraper` crate which:
// - Parses HTML into a DOM (Document Object Model)
// - Supports CSS selectors for finding elements
// - Is built on html5ever (Mozilla's HTML parser)
//
// We also use the `url` crate to:
// - Parse and validate URLs
// - Resolve relative URLs to absolute URLs
//
// Everything here is a pure function of (body, base URL), so running it twice
// on the same snapshot gives the same result.
// =============================================================================

use scraper::{Html, Selector};
use std::sync::OnceLock;
use url::Url;

use crate::model::TagHistogram;

// Tags counted in the histogram
const HISTOGRAM_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, p";

// Metadata extracted from one fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub title: String,
    pub html_version: String,
    pub login_form: bool,
    pub histogram: TagHistogram,
    pub links: Vec<CandidateLink>,
}

// A link found on the page, not yet verified
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateLink {
    pub url: Url,
    /// The href had no scheme or host of its own; such links are always
    /// internal
    pub relative: bool,
}

struct Selectors {
    title: Selector,
    form: Selector,
    password: Selector,
    histogram: Selector,
    anchor: Selector,
}

// The selectors are constants, parsing them can only fail on a typo here
fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        title: Selector::parse("title").unwrap(),
        form: Selector::parse("form").unwrap(),
        password: Selector::parse(r#"input[type="password"]"#).unwrap(),
        histogram: Selector::parse(HISTOGRAM_SELECTOR).unwrap(),
        anchor: Selector::parse("a[href]").unwrap(),
    })
}

// Runs every extractor over one page
//
// Parameters:
//   body: the raw response body
//   base_url: the effective request URL (after redirects), used to resolve
//             relative links
pub fn extract_page(body: &str, base_url: &Url) -> PageInfo {
    let document = Html::parse_document(body);

    PageInfo {
        title: extract_title(&document),
        html_version: detect_html_version(body).to_string(),
        login_form: has_login_form(&document),
        histogram: count_tags(&document),
        links: extract_candidate_links(&document, base_url),
    }
}

// Guesses the HTML version from the doctype in the raw body
//
// The HTML5 marker is checked first and wins if both could match.
pub fn detect_html_version(body: &str) -> &'static str {
    if body.contains("<!DOCTYPE html>") {
        "5"
    } else if body.to_lowercase().contains("<!doctype html public") {
        "4"
    } else {
        "Unknown"
    }
}

// Text of the first <title>, trimmed. Later <title> elements are ignored.
fn extract_title(document: &Html) -> String {
    document
        .select(&selectors().title)
        .next()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

// True if any <form> has an <input type="password"> somewhere inside it
fn has_login_form(document: &Html) -> bool {
    let sel = selectors();
    document
        .select(&sel.form)
        .any(|form| form.select(&sel.password).next().is_some())
}

fn count_tags(document: &Html) -> TagHistogram {
    let mut histogram = TagHistogram::default();
    for element in document.select(&selectors().histogram) {
        histogram.increment(element.value().name());
    }
    histogram
}

fn extract_candidate_links(document: &Html, base: &Url) -> Vec<CandidateLink> {
    document
        .select(&selectors().anchor)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(base, href))
        .collect()
}

// Resolves one href against the page URL
//
// Returns None for hrefs we never check:
//   ""                  -> None
//   "#section"          -> None (fragment-only)
//   "javascript:void(0)" -> None
//
// Examples (base = "http://example.com/page"):
//   "/about"             -> http://example.com/about, relative
//   "https://other.com"  -> https://other.com/, not relative
//   "//cdn.other.com/x"  -> http://cdn.other.com/x, not relative
pub fn resolve_link(base: &Url, href: &str) -> Option<CandidateLink> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || starts_with_ignore_case(href, "javascript:") {
        return None;
    }

    // Try to parse href as a URL
    // If it's already absolute (has a scheme), this works
    // If it's relative, this fails, so we join it with base
    match Url::parse(href) {
        Ok(url) => Some(CandidateLink {
            url,
            relative: false,
        }),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let url = base.join(href).ok()?;
            // A scheme-relative href names its own host
            let relative = !href.starts_with("//");
            Some(CandidateLink { url, relative })
        }
        Err(_) => None, // Invalid URL, skip it
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

// -----------------------------------------------------------------------------
// NOTES:
//
// 1. Why OnceLock for the selectors?
//    - Selector::parse does real work (it runs a CSS parser)
//    - Every crawl uses the same five selectors
//    - OnceLock builds them on first use and hands out &'static references
//
// 2. Why check the doctype on the raw body instead of the DOM?
//    - html5ever normalises the document while parsing
//    - The literal marker in the bytes we received is what we want to see
//
// 3. What does form.select(...) do?
//    - ElementRef::select only searches the descendants of that element
//    - So the password input has to live inside the form to count
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://example.com").unwrap()
    }

    #[test]
    fn test_html5_doctype() {
        assert_eq!(detect_html_version("<!DOCTYPE html><html></html>"), "5");
    }

    #[test]
    fn test_html4_doctype_any_case() {
        let body = r#"<!DOCTYPE HTML PUBLIC "-//W3C//DTD HTML 4.01//EN"><html></html>"#;
        assert_eq!(detect_html_version(body), "4");
        let body = r#"<!doctype html public "-//W3C//DTD HTML 4.01//EN">"#;
        assert_eq!(detect_html_version(body), "4");
    }

    #[test]
    fn test_html5_marker_wins() {
        let body = "<!DOCTYPE html><!-- <!doctype html public --><html></html>";
        assert_eq!(detect_html_version(body), "5");
    }

    #[test]
    fn test_unknown_doctype() {
        assert_eq!(detect_html_version("<html><body>hi</body></html>"), "Unknown");
        // the html5 marker is matched literally
        assert_eq!(detect_html_version("<!doctype html><html></html>"), "Unknown");
    }

    #[test]
    fn test_first_title_trimmed() {
        let html = "<html><head><title>\n  Hello World  \n</title><title>Second</title></head></html>";
        let page = extract_page(html, &base());
        assert_eq!(page.title, "Hello World");
    }

    #[test]
    fn test_missing_title() {
        let page = extract_page("<html><body><p>x</p></body></html>", &base());
        assert_eq!(page.title, "");
    }

    #[test]
    fn test_login_form_detected() {
        let html = r#"
            <form action="/search"><input type="text" name="q"></form>
            <form action="/login">
                <div><input type="text" name="user"><input type="password" name="pw"></div>
            </form>
        "#;
        assert!(extract_page(html, &base()).login_form);
    }

    #[test]
    fn test_form_without_password() {
        let html = r#"
            <form><input type="text" name="q"><input type="submit"></form>
            <input type="password" name="outside">
        "#;
        assert!(!extract_page(html, &base()).login_form);
    }

    #[test]
    fn test_tag_histogram() {
        let html = "<h1>a</h1><p>1</p><div><p>2</p></div><h1>b</h1><p>3</p><span>x</span>";
        let page = extract_page(html, &base());
        assert_eq!(page.histogram.get("p"), Some(3));
        assert_eq!(page.histogram.get("h1"), Some(2));
        assert_eq!(page.histogram.len(), 2);
    }

    #[test]
    fn test_relative_link_resolved() {
        let link = resolve_link(&base(), "/about").unwrap();
        assert_eq!(link.url.as_str(), "http://example.com/about");
        assert!(link.relative);
    }

    #[test]
    fn test_absolute_and_scheme_relative_links() {
        let link = resolve_link(&base(), "https://other.com").unwrap();
        assert_eq!(link.url.as_str(), "https://other.com/");
        assert!(!link.relative);

        let link = resolve_link(&base(), "//cdn.other.com/x.js").unwrap();
        assert_eq!(link.url.as_str(), "http://cdn.other.com/x.js");
        assert!(!link.relative);
    }

    #[test]
    fn test_skipped_hrefs() {
        assert_eq!(resolve_link(&base(), ""), None);
        assert_eq!(resolve_link(&base(), "#top"), None);
        assert_eq!(resolve_link(&base(), "javascript:void(0)"), None);
        assert_eq!(resolve_link(&base(), "JavaScript:alert(1)"), None);
    }

    #[test]
    fn test_links_resolved_against_effective_url() {
        let html = r##"
            <a href="docs">Docs</a>
            <a href="">empty</a>
            <a href="#x">frag</a>
            <a>no href</a>
            <a href="https://rust-lang.org">Rust</a>
        "##;
        let effective = Url::parse("https://www.example.com/guide/").unwrap();
        let page = extract_page(html, &effective);
        let urls: Vec<&str> = page.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://www.example.com/guide/docs", "https://rust-lang.org/"]
        );
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let html = r#"<!DOCTYPE html><title>T</title><h2>a</h2><p>b</p>
            <form><input type="password"></form><a href="/x">x</a>"#;
        assert_eq!(extract_page(html, &base()), extract_page(html, &base()));
    }
}
