//! Page-level metadata: name, category, description, platforms.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::fields::collapse_ws;

/// Hardware platforms recognized in page text, in reporting order.
const PLATFORM_KEYWORDS: &[&str] = &["esp32", "esp8266", "esp32s2", "esp32s3", "esp32c3", "rp2040"];

/// Minimum length for a paragraph to count as a description.
const MIN_DESCRIPTION_LEN: usize = 20;

static COMPONENT_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\bcomponent\s*$").expect("valid regex"));

/// Main content area, falling back to `<body>`.
pub(crate) fn content_root(doc: &Html) -> Option<ElementRef<'_>> {
    let selectors = [
        "main",
        "article",
        r#"[role="main"]"#,
        ".rst-content",
        ".document",
        "body",
    ];

    selectors.iter().find_map(|s| {
        let sel = Selector::parse(s).unwrap();
        doc.select(&sel).next()
    })
}

/// Display name: the first `<h1>` minus the Sphinx anchor and a trailing "Component".
pub(crate) fn extract_name(doc: &Html) -> Option<String> {
    let h1_sel = Selector::parse("h1").unwrap();
    let raw = doc
        .select(&h1_sel)
        .next()
        .map(|el| el.text().collect::<String>())
        .or_else(|| {
            let title_sel = Selector::parse("title").unwrap();
            doc.select(&title_sel).next().map(|el| {
                let text = el.text().collect::<String>();
                text.split(" — ")
                    .next()
                    .unwrap_or_default()
                    .split(" - ")
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
        })?;

    let cleaned = collapse_ws(&raw.replace('¶', ""));
    let cleaned = COMPONENT_SUFFIX_RE.replace(&cleaned, "").trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Path segments that identify the component, case preserved, with the
/// `.html` suffix and trailing `index` pages removed.
///
/// Segments before a `components` segment are dropped when one is present.
pub fn component_segments(url: &Url) -> Vec<String> {
    let mut segments: Vec<String> = url
        .path_segments()
        .map(|s| {
            s.filter(|seg| !seg.is_empty())
                .map(|seg| strip_page_suffix(seg).to_string())
                .filter(|seg| !seg.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if let Some(pos) = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("components"))
    {
        segments.drain(..=pos);
    }
    if segments.last().is_some_and(|s| s.eq_ignore_ascii_case("index")) {
        segments.pop();
    }
    segments
}

fn strip_page_suffix(segment: &str) -> &str {
    for suffix in [".html", ".htm"] {
        let cut = segment.len().saturating_sub(suffix.len());
        if segment.is_char_boundary(cut) && segment[cut..].eq_ignore_ascii_case(suffix) {
            return &segment[..cut];
        }
    }
    segment
}

/// Category: the first component path segment, lowercased (`sensor` for
/// `sensor/dht.html`, `wifi` for the top-level `wifi.html`).
pub(crate) fn extract_category(url: &Url) -> String {
    component_segments(url)
        .into_iter()
        .next()
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Description from `<meta name="description">`, else the first substantial paragraph.
pub(crate) fn extract_description(doc: &Html) -> Option<String> {
    let meta_sel = Selector::parse(r#"meta[name="description"]"#).unwrap();
    if let Some(content) = doc
        .select(&meta_sel)
        .next()
        .and_then(|el| el.value().attr("content"))
    {
        let content = collapse_ws(content);
        if !content.is_empty() {
            return Some(content);
        }
    }

    let root = content_root(doc)?;
    let p_sel = Selector::parse("p").unwrap();
    root.select(&p_sel)
        .map(|p| collapse_ws(&p.text().collect::<String>().replace('¶', "")))
        .find(|text| text.len() >= MIN_DESCRIPTION_LEN)
}

/// Platforms mentioned anywhere in the main content.
pub(crate) fn extract_platforms(doc: &Html) -> Vec<String> {
    let Some(root) = content_root(doc) else {
        return Vec::new();
    };
    let text = root.text().collect::<String>().to_ascii_lowercase();
    let words: HashSet<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    PLATFORM_KEYWORDS
        .iter()
        .filter(|k| words.contains(*k))
        .map(|k| k.to_ascii_uppercase())
        .collect()
}

/// Text of `el` excluding nested lists.
pub(crate) fn own_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let nested = node
            .ancestors()
            .take_while(|a| a.id() != el.id())
            .any(|a| matches!(a.value(), Node::Element(e) if matches!(e.name(), "ul" | "ol" | "dl")));
        if !nested {
            out.push_str(text);
        }
    }
    collapse_ws(&out.replace('¶', ""))
}

/// Inline `<code>` literals of `el`, excluding nested lists.
pub(crate) fn code_literals(el: ElementRef<'_>) -> Vec<String> {
    let code_sel = Selector::parse("code").unwrap();
    el.select(&code_sel)
        .filter(|c| {
            !c.ancestors()
                .take_while(|a| a.id() != el.id())
                .any(|a| matches!(a.value(), Node::Element(e) if matches!(e.name(), "ul" | "ol" | "dl")))
        })
        .map(|c| collapse_ws(&c.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect()
}
