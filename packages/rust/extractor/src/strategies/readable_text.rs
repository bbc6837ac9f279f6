//! Fallback: scan the page's readable text for variable lines.
//!
//! The main content is converted to Markdown with `htmd`, then lines inside
//! configuration sections are matched against `name (Required, type): text`
//! and `name: text`.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use espforge_shared::RawVariable;

use super::{ExtractionStrategy, StrategyResult, found_or_continue};
use crate::fields::{after_name, split_item, strip_backticks, variable_from_item};
use crate::page::content_root;

/// Words that open a configuration section.
const SECTION_WORDS: &[&str] = &["configuration", "config", "options", "parameters", "variables"];

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static UNDERSCORE_EM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[\s(,])_([^_\s][^_]*?)_([\s),:.]|$)").expect("valid regex"));

pub struct ReadableTextStrategy;

impl ExtractionStrategy for ReadableTextStrategy {
    fn extract(&self, doc: &Html) -> StrategyResult {
        let Some(text) = readable_text(doc) else {
            return StrategyResult::Continue;
        };
        found_or_continue(scan_lines(&text))
    }

    fn name(&self) -> &'static str {
        "readable-text"
    }
}

/// Markdown rendering of the page's main content.
pub(crate) fn readable_text(doc: &Html) -> Option<String> {
    let root = content_root(doc)?;
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    match converter.convert(&root.html()) {
        Ok(md) => Some(md),
        Err(e) => {
            tracing::debug!(error = %e, "htmd conversion failed");
            None
        }
    }
}

fn scan_lines(markdown: &str) -> Vec<RawVariable> {
    let mut vars = Vec::new();
    let mut in_section = false;
    let mut in_fence = false;

    for raw_line in markdown.lines() {
        let line = raw_line.trim();
        if line.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || line.is_empty() {
            continue;
        }

        let plain = plain_text(line);
        if line.starts_with('#') {
            in_section = mentions_section(&plain);
            continue;
        }
        let is_bullet = line.starts_with(['-', '*', '+']);
        if !is_bullet && plain.len() < 80 && plain.ends_with(':') && mentions_section(&plain) {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }

        let item = plain.trim_start_matches(['-', '*', '+', ' ']);
        let (item, literals) = strip_backticks(item);
        let Some((name, annotation, rest)) = split_item(&item) else {
            continue;
        };
        let has_colon = after_name(&item).trim_start().starts_with(':');
        if annotation.is_none() && !has_colon {
            continue;
        }
        if annotation.is_none() && rest.is_empty() {
            continue;
        }
        vars.push(variable_from_item(&name, annotation.as_deref(), &rest, &literals));
    }
    vars
}

fn mentions_section(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    SECTION_WORDS.iter().any(|w| lower.contains(w))
}

/// Drop Markdown emphasis, links and heading markers.
fn plain_text(line: &str) -> String {
    let text = LINK_RE.replace_all(line, "$1");
    let text = text.replace("**", "").replace('*', "");
    let text = UNDERSCORE_EM_RE.replace_all(&text, "$1$2$3");
    text.trim_start_matches('#').replace('¶', "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use espforge_shared::VarType;

    #[test]
    fn scans_configuration_section() {
        let md = "\
# Status LED

Lights up on errors.

## Configuration variables

**pin** (_Required_, [Pin](/pin.html)): The GPIO pin to operate the LED on.

- **id** (*Optional*, ID): Manually specify the ID.
- `inverted`: Whether to invert the output. Defaults to `false`.

```yaml
status_led:
  pin: GPIO2
```

## See Also

related: not a variable
";
        let vars = scan_lines(md);
        let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["pin", "id", "inverted"]);
        assert!(vars[0].required);
        assert_eq!(vars[0].var_type, VarType::Pin);
        assert_eq!(vars[1].var_type, VarType::String);
        assert_eq!(vars[2].default.as_deref(), Some("false"));
    }

    #[test]
    fn strategy_reads_paragraph_variables() {
        let doc = Html::parse_document(
            r#"<html><body><main>
                <h1>Status LED</h1>
                <h2>Configuration variables</h2>
                <p><strong>pin</strong> (<em>Required</em>, Pin): The GPIO pin to operate the LED on.</p>
            </main></body></html>"#,
        );
        let StrategyResult::Found(vars) = ReadableTextStrategy.extract(&doc) else {
            panic!("expected variables");
        };
        assert_eq!(vars[0].name, "pin");
        assert!(vars[0].required);
        assert_eq!(vars[0].var_type, VarType::Pin);
    }

    #[test]
    fn wide_whitespace_after_bullet() {
        let vars = scan_lines("## Configuration variables\n\n- \u{a0}a: The thing.\n- \u{3000}ab: Another.\n");
        let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "ab"]);

        for body in [
            "<h2>Configuration variables</h2><p>-&nbsp;a: The thing.</p>",
            "<h2>Configuration variables</h2><pre>- \u{3000}ab: thing</pre>",
            "<h2>Configuration variables</h2><ul><li><p>-&nbsp;a: x</p></li></ul>",
        ] {
            let doc = Html::parse_document(&format!("<html><body><main>{body}</main></body></html>"));
            // Must not panic; whether anything is found depends on the rendering.
            let _ = ReadableTextStrategy.extract(&doc);
        }
    }

    #[test]
    fn prose_only_page_continues() {
        let doc = Html::parse_document(
            "<html><body><main><h1>Overview</h1><p>ESPHome turns boards into devices.</p></main></body></html>",
        );
        assert_eq!(ReadableTextStrategy.extract(&doc), StrategyResult::Continue);
    }
}
