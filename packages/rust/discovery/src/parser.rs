//! Component index parser.
//!
//! Link sources are tried in order and pooled:
//! - the main content area (`.rst-content`, `main`, `[role="main"]`)
//! - Sphinx `.toctree-wrapper` listings
//! - navigation menus (`nav`, `ul` with a nav/menu/toc class)
//!
//! When none of them yields a component link, every link on the page is scanned.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A component page linked from the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentLink {
    /// Link text.
    pub name: String,
    /// Absolute page URL without fragment.
    pub url: String,
}

/// Matches menu-like class names.
static MENU_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)nav|menu|toc").expect("menu class regex"));

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Extract component page links from an index page, deduplicated by URL in
/// document order.
pub(crate) fn parse_component_index(html: &str, base: &Url) -> Vec<ComponentLink> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();

    let content_sel = Selector::parse(r#".rst-content, main, [role="main"]"#).unwrap();
    if let Some(content) = doc.select(&content_sel).next() {
        links.extend(links_in(content, base));
    }

    let toctree_sel = Selector::parse(".toctree-wrapper").unwrap();
    for toctree in doc.select(&toctree_sel) {
        links.extend(links_in(toctree, base));
    }

    let menu_sel = Selector::parse("nav, ul[class]").unwrap();
    for menu in doc.select(&menu_sel) {
        let is_menu = menu.value().name() == "nav"
            || menu
                .value()
                .attr("class")
                .is_some_and(|c| MENU_CLASS_RE.is_match(c));
        if is_menu {
            links.extend(links_in(menu, base));
        }
    }

    if links.is_empty() {
        links.extend(links_in(doc.root_element(), base));
    }

    dedup_by_url(links)
}

fn links_in(scope: ElementRef<'_>, base: &Url) -> Vec<ComponentLink> {
    let a_sel = Selector::parse("a[href]").unwrap();
    scope
        .select(&a_sel)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:")
            {
                return None;
            }
            let name = a.text().collect::<String>().replace('¶', "").trim().to_string();
            if name.is_empty() {
                return None;
            }

            let mut url = base.join(href).ok()?;
            url.set_fragment(None);
            if url.host_str() != base.host_str() || !is_component_page(&url) {
                return None;
            }
            Some(ComponentLink {
                name,
                url: url.to_string(),
            })
        })
        .collect()
}

/// A page below `/components/` other than the index itself.
fn is_component_page(url: &Url) -> bool {
    let Some(segments) = url.path_segments() else {
        return false;
    };
    let segments: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
    let Some(pos) = segments.iter().position(|s| *s == "components") else {
        return false;
    };
    let rest = &segments[pos + 1..];
    match rest {
        [] => false,
        [only] => *only != "index.html",
        _ => true,
    }
}

fn dedup_by_url(links: Vec<ComponentLink>) -> Vec<ComponentLink> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|l| seen.insert(l.url.clone()))
        .collect()
}
