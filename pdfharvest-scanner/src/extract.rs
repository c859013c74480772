//! Anchor extraction for discovered pages.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Which resolved links count as a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pattern", rename_all = "lowercase")]
pub enum LinkMatch {
    /// The URL path ends with the pattern, ignoring ASCII case.
    Suffix(String),
    /// The full URL string contains the pattern anywhere, query included.
    Contains(String),
}

impl LinkMatch {
    pub fn pdf_suffix() -> Self {
        LinkMatch::Suffix(".pdf".to_string())
    }

    pub fn matches(&self, url: &Url) -> bool {
        match self {
            LinkMatch::Suffix(suffix) => {
                let path = url.path();
                path.len() >= suffix.len()
                    && path.is_char_boundary(path.len() - suffix.len())
                    && path[path.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
            }
            LinkMatch::Contains(needle) => url.as_str().contains(needle.as_str()),
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            LinkMatch::Suffix(p) | LinkMatch::Contains(p) => p,
        }
    }
}

impl Default for LinkMatch {
    fn default() -> Self {
        Self::pdf_suffix()
    }
}

/// Extract every anchor in `html` whose href, resolved against `base`, satisfies `link_match`.
///
/// Results are absolute, fragment-free and deduplicated by their string form, in order of
/// first occurrence. Hrefs that fail to resolve are skipped.
pub fn extract_links(html: &str, link_match: &LinkMatch, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]").expect("static selector is valid");

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(absolute_url) = resolve_href(base, href) else {
            debug!("Skipping unresolvable href {:?}", href);
            continue;
        };
        if !link_match.matches(&absolute_url) {
            continue;
        }
        if seen.insert(absolute_url.as_str().to_string()) {
            debug!("Found link: {}", absolute_url);
            links.push(absolute_url);
        }
    }

    links
}

fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    // Skip empty, javascript:, mailto:, tel:, and in-page anchors
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);

    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://docs.example.gov/reports/").unwrap()
    }

    #[test]
    fn test_resolves_relative_and_absolute_links() {
        let html = r#"<html><body>
            <a href="https://docs.example.gov/files/a.pdf">A</a>
            <a href="https://cdn.example.gov/b.pdf">B</a>
            <a href="c.pdf">C</a>
            <a href="/root/d.pdf">D</a>
        </body></html>"#;

        let links = extract_links(html, &LinkMatch::pdf_suffix(), &base());
        let links: Vec<&str> = links.iter().map(Url::as_str).collect();

        assert_eq!(
            links,
            vec![
                "https://docs.example.gov/files/a.pdf",
                "https://cdn.example.gov/b.pdf",
                "https://docs.example.gov/reports/c.pdf",
                "https://docs.example.gov/root/d.pdf",
            ]
        );
    }

    #[test]
    fn test_duplicates_removed_in_first_occurrence_order() {
        let html = r#"
            <a href="b.pdf">B</a>
            <a href="a.pdf">A</a>
            <a href="https://docs.example.gov/reports/b.pdf">B again</a>
            <a href="a.pdf#page=2">A with fragment</a>
        "#;

        let links = extract_links(html, &LinkMatch::pdf_suffix(), &base());

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].as_str(), "https://docs.example.gov/reports/b.pdf");
        assert_eq!(links[1].as_str(), "https://docs.example.gov/reports/a.pdf");
    }

    #[test]
    fn test_skips_non_navigational_and_invalid_hrefs() {
        let html = r##"
            <a href="">empty</a>
            <a href="javascript:void(0)">js</a>
            <a href="mailto:someone@example.gov">mail</a>
            <a href="tel:123">tel</a>
            <a href="#top">anchor</a>
            <a href="http://[::1">broken</a>
            <a href="ftp://files.example.gov/x.pdf">ftp</a>
            <a href="ok.pdf">ok</a>
        "##;

        let links = extract_links(html, &LinkMatch::pdf_suffix(), &base());

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://docs.example.gov/reports/ok.pdf");
    }

    #[test]
    fn test_never_returns_relative_urls() {
        let html = r#"<a href="../x.pdf">x</a><a href="./y.PDF">y</a><a href="//other.gov/z.pdf">z</a>"#;

        for link in extract_links(html, &LinkMatch::pdf_suffix(), &base()) {
            assert!(link.has_host(), "{} should be absolute", link);
            assert!(link.as_str().starts_with("https://"));
        }
    }

    #[test]
    fn test_suffix_and_contains_disagree_on_edge_cases() {
        let html = r#"
            <a href="/download?file=a.pdf">query</a>
            <a href="/pdf/report">directory</a>
            <a href="/view.pdf?page=1">suffix with query</a>
            <a href="/upper.PDF">upper</a>
        "#;

        let suffix = extract_links(html, &LinkMatch::pdf_suffix(), &base());
        let suffix: Vec<&str> = suffix.iter().map(Url::path).collect();
        assert_eq!(suffix, vec!["/view.pdf", "/upper.PDF"]);

        let contains = extract_links(html, &LinkMatch::Contains(".pdf".to_string()), &base());
        let contains: Vec<&str> = contains.iter().map(Url::as_str).collect();
        assert_eq!(
            contains,
            vec![
                "https://docs.example.gov/download?file=a.pdf",
                "https://docs.example.gov/view.pdf?page=1",
            ]
        );
    }

    #[test]
    fn test_no_matches_yields_empty() {
        let html = r#"<a href="/index.html">home</a><p>no links here</p>"#;
        assert!(extract_links(html, &LinkMatch::pdf_suffix(), &base()).is_empty());
    }
}
