//! Per-variable text parsing shared by every extraction strategy.
//!
//! Documentation describes a variable in loose prose:
//! `pin (Required, Pin): The pin the sensor is wired to. Defaults to GPIO4.`
//! The helpers here pull the required marker, type, default, enumeration
//! candidates and numeric range out of that prose. Anything missing is left
//! empty; nothing here fails.

use std::sync::LazyLock;

use regex::Regex;

use espforge_shared::{RawVariable, VarType};

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// `name (annotation): description`, with or without the annotation.
static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:?\s*(.*)$")
        .expect("valid regex")
});

static DEFAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bdefaults?\s+to\s+").expect("valid regex"));

static ONE_OF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bone\s+of\b:?").expect("valid regex"));

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\brange\s+(?:of\s+|from\s+)?(-?\d+(?:\.\d+)?)\s*(?:to|-)\s*(-?\d+(?:\.\d+)?)")
        .expect("valid regex")
});

static BETWEEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbetween\s+(-?\d+(?:\.\d+)?)\s+and\s+(-?\d+(?:\.\d+)?)")
        .expect("valid regex")
});

static PATTERN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:must\s+match|matching)(?:\s+the)?(?:\s+(?:pattern|regex|regular\s+expression))?\s*:?\s*")
        .expect("valid regex")
});

static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));

/// Whether `name` looks like a configuration key.
pub(crate) fn is_identifier(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

/// Collapse runs of whitespace into single spaces.
pub(crate) fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `name (annotation): description` into its parts.
pub(crate) fn split_item(text: &str) -> Option<(String, Option<String>, String)> {
    let caps = ITEM_RE.captures(text)?;
    let name = caps.get(1)?.as_str().to_string();
    let annotation = caps.get(2).map(|m| m.as_str().trim().to_string());
    let rest = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
    Some((name, annotation, rest.to_string()))
}

/// Text following the leading name of `name (annotation): description`.
pub(crate) fn after_name(text: &str) -> &str {
    match ITEM_RE.captures(text).and_then(|c| c.get(1)) {
        Some(m) => &text[m.end()..],
        None => "",
    }
}

/// Parse a `Required, Pin` style annotation into (required, type text).
pub(crate) fn parse_annotation(annotation: &str) -> (bool, Option<String>) {
    let mut required = false;
    let mut type_parts = Vec::new();

    for token in annotation.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.to_ascii_lowercase().as_str() {
            "required" => required = true,
            "optional" => {}
            _ => type_parts.push(token.to_string()),
        }
    }

    let type_text = (!type_parts.is_empty()).then(|| type_parts.join(", "));
    (required, type_text)
}

/// Map documented type text onto the closed type set.
pub(crate) fn map_type_text(name: &str, type_text: &str) -> VarType {
    let lower = type_text.to_ascii_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |w: &str| words.contains(&w);

    if has("pin") || has("gpio") {
        VarType::Pin
    } else if has("time") || has("duration") {
        VarType::Duration
    } else if has("id") {
        if name == "id" {
            VarType::String
        } else {
            VarType::ComponentReference
        }
    } else if has("bool") || has("boolean") {
        VarType::Boolean
    } else if has("int") || has("integer") || has("uint") {
        VarType::Integer
    } else if has("float") || has("double") || has("number") || has("percentage") {
        VarType::Float
    } else if has("enum") || has("enumeration") {
        VarType::Enumeration
    } else if has("string") || has("str") || has("text") {
        VarType::String
    } else {
        VarType::Unknown
    }
}

/// Fill `default`, `candidates`, `min`, `max` and `pattern` from description prose.
///
/// `literals` are the inline code fragments of the description, in order;
/// they are preferred over bare words wherever both could apply.
pub(crate) fn apply_description(var: &mut RawVariable, text: &str, literals: &[String]) {
    var.description = collapse_ws(text);

    if let Some(m) = DEFAULT_RE.find(text) {
        var.default = parse_default(&text[m.end()..], literals);
    }

    if let Some(m) = ONE_OF_RE.find(text) {
        var.candidates = parse_candidates(&text[m.end()..], literals);
    }

    if let Some(caps) = RANGE_RE.captures(text).or_else(|| BETWEEN_RE.captures(text)) {
        var.min = caps[1].parse().ok();
        var.max = caps[2].parse().ok();
    }

    if let Some(m) = PATTERN_RE.find(text) {
        let rest = text[m.end()..].trim_start();
        var.pattern = literals
            .iter()
            .find(|l| !l.is_empty() && rest.starts_with(l.as_str()))
            .cloned();
    }
}

fn parse_default(rest: &str, literals: &[String]) -> Option<String> {
    let rest = rest.trim_start();
    if let Some(lit) = literals.iter().find(|l| !l.is_empty() && rest.starts_with(l.as_str())) {
        return Some(lit.clone());
    }

    let word = rest
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .next()?
        .trim_end_matches(['.', ')']);
    let looks_like_value = word.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        || matches!(
            word.to_ascii_lowercase().as_str(),
            "true" | "false" | "yes" | "no" | "on" | "off"
        )
        || word.starts_with("GPIO");
    (looks_like_value && !word.is_empty()).then(|| word.to_string())
}

fn parse_candidates(rest: &str, literals: &[String]) -> Vec<String> {
    let sentence = rest.split(". ").next().unwrap_or(rest);

    let from_literals: Vec<String> = literals
        .iter()
        .filter(|l| sentence.contains(l.as_str()))
        .cloned()
        .collect();
    if !from_literals.is_empty() {
        return dedup(from_literals);
    }

    let words = sentence
        .trim_end_matches('.')
        .split(',')
        .flat_map(|part| part.split(" or "))
        .flat_map(|part| part.split(" and "))
        .map(|w| w.trim().trim_matches(['"', '\'']).to_string())
        .filter(|w| {
            !w.is_empty()
                && w.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        })
        .collect();
    dedup(words)
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Pull inline code literals out of markdown-ish text, returning the text
/// with the backticks removed alongside the literals.
pub(crate) fn strip_backticks(text: &str) -> (String, Vec<String>) {
    let literals = BACKTICK_RE
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect();
    (BACKTICK_RE.replace_all(text, "$1").into_owned(), literals)
}

/// Build a variable from `name (annotation): description` prose.
pub(crate) fn variable_from_item(
    name: &str,
    annotation: Option<&str>,
    description: &str,
    literals: &[String],
) -> RawVariable {
    let (required, type_text) = annotation.map(parse_annotation).unwrap_or((false, None));
    let var_type = type_text
        .as_deref()
        .map(|t| map_type_text(name, t))
        .unwrap_or_default();

    let mut var = RawVariable {
        name: name.to_string(),
        var_type,
        type_text,
        required,
        ..RawVariable::default()
    };
    apply_description(&mut var, description, literals);
    var
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_item_with_annotation() {
        let (name, ann, rest) =
            split_item("update_interval (Optional, Time): How often to poll.").unwrap();
        assert_eq!(name, "update_interval");
        assert_eq!(ann.as_deref(), Some("Optional, Time"));
        assert_eq!(rest, "How often to poll.");
    }

    #[test]
    fn split_item_without_annotation() {
        let (name, ann, rest) = split_item("ssid: The network name.").unwrap();
        assert_eq!(name, "ssid");
        assert!(ann.is_none());
        assert_eq!(rest, "The network name.");
    }

    #[test]
    fn after_name_skips_wide_whitespace() {
        assert_eq!(after_name("\u{a0}a: The thing."), ": The thing.");
        assert_eq!(after_name("\u{3000}ab (Optional): x"), " (Optional): x");
        assert_eq!(after_name("(not a name)"), "");
    }

    #[test]
    fn annotation_required_and_type() {
        assert_eq!(
            parse_annotation("Required, Pin Schema"),
            (true, Some("Pin Schema".to_string()))
        );
        assert_eq!(parse_annotation("Optional"), (false, None));
        assert_eq!(parse_annotation("int, Optional"), (false, Some("int".into())));
    }

    #[test]
    fn type_text_mapping() {
        assert_eq!(map_type_text("pin", "Pin Schema"), VarType::Pin);
        assert_eq!(map_type_text("update_interval", "Time"), VarType::Duration);
        assert_eq!(map_type_text("accuracy_decimals", "int"), VarType::Integer);
        assert_eq!(map_type_text("multiplier", "float"), VarType::Float);
        assert_eq!(map_type_text("inverted", "boolean"), VarType::Boolean);
        assert_eq!(map_type_text("name", "string"), VarType::String);
        assert_eq!(map_type_text("model", "enum"), VarType::Enumeration);
        assert_eq!(map_type_text("sensor_id", "ID"), VarType::ComponentReference);
        assert_eq!(map_type_text("id", "ID"), VarType::String);
        assert_eq!(map_type_text("filters", "Filter"), VarType::Unknown);
    }

    #[test]
    fn default_prefers_code_literal() {
        let mut var = RawVariable::default();
        apply_description(
            &mut var,
            "The interval to check the sensor. Defaults to 60s.",
            &["60s".into()],
        );
        assert_eq!(var.default.as_deref(), Some("60s"));
    }

    #[test]
    fn default_bare_word_must_look_like_a_value() {
        let mut var = RawVariable::default();
        apply_description(&mut var, "Defaults to 2.", &[]);
        assert_eq!(var.default.as_deref(), Some("2"));

        let mut var = RawVariable::default();
        apply_description(&mut var, "Defaults to the node name.", &[]);
        assert!(var.default.is_none());
    }

    #[test]
    fn one_of_literals_become_candidates() {
        let mut var = RawVariable::default();
        apply_description(
            &mut var,
            "Manually specify the model, can be one of AUTO_DETECT, DHT11, DHT22. Defaults to AUTO_DETECT.",
            &["AUTO_DETECT".into(), "DHT11".into(), "DHT22".into(), "AUTO_DETECT".into()],
        );
        assert_eq!(var.candidates, vec!["AUTO_DETECT", "DHT11", "DHT22"]);
        assert_eq!(var.default.as_deref(), Some("AUTO_DETECT"));
    }

    #[test]
    fn one_of_bare_words() {
        let mut var = RawVariable::default();
        apply_description(&mut var, "One of LOW, MEDIUM or HIGH.", &[]);
        assert_eq!(var.candidates, vec!["LOW", "MEDIUM", "HIGH"]);
    }

    #[test]
    fn ranges() {
        let mut var = RawVariable::default();
        apply_description(&mut var, "Number of decimals, range 0 to 3.", &[]);
        assert_eq!((var.min, var.max), (Some(0.0), Some(3.0)));

        let mut var = RawVariable::default();
        apply_description(&mut var, "Must be between -40 and 85.5 degrees.", &[]);
        assert_eq!((var.min, var.max), (Some(-40.0), Some(85.5)));
    }

    #[test]
    fn pattern_from_code_literal() {
        let mut var = RawVariable::default();
        apply_description(
            &mut var,
            "The device name. Must match the pattern ^[a-z0-9-]+$ exactly.",
            &["^[a-z0-9-]+$".into()],
        );
        assert_eq!(var.pattern.as_deref(), Some("^[a-z0-9-]+$"));

        let mut var = RawVariable::default();
        apply_description(&mut var, "Must match the board layout.", &[]);
        assert!(var.pattern.is_none());
    }

    #[test]
    fn backticks_are_literals() {
        let (text, lits) = strip_backticks("Defaults to `60s`, one of `a` or `b`.");
        assert_eq!(text, "Defaults to 60s, one of a or b.");
        assert_eq!(lits, vec!["60s", "a", "b"]);
    }

    #[test]
    fn item_to_variable() {
        let var = variable_from_item(
            "pin",
            Some("Required, Pin"),
            "The pin where the DHT bus is connected.",
            &[],
        );
        assert!(var.required);
        assert_eq!(var.var_type, VarType::Pin);
        assert_eq!(var.type_text.as_deref(), Some("Pin"));
        assert!(var.default.is_none());
    }
}
