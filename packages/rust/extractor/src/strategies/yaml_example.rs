//! Keys found in YAML configuration examples.
//!
//! Example values are illustrations, not defaults, so only the type is
//! inferred from them.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use espforge_shared::{RawVariable, VarType};

use super::{ExtractionStrategy, StrategyResult, found_or_continue};
use crate::fields::is_identifier;
use crate::page::content_root;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?(ms|s|min|h)$").expect("valid regex"));

static GPIO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^GPIO\d+$").expect("valid regex"));

pub struct YamlExampleStrategy;

impl ExtractionStrategy for YamlExampleStrategy {
    fn extract(&self, doc: &Html) -> StrategyResult {
        let Some(root) = content_root(doc) else {
            return StrategyResult::Continue;
        };
        let pre_sel = Selector::parse("pre").unwrap();

        let mut seen = HashSet::new();
        let mut vars = Vec::new();
        for pre in root.select(&pre_sel) {
            let text = pre.text().collect::<String>();
            for var in parse_yaml_keys(&text) {
                if seen.insert(var.name.clone()) {
                    vars.push(var);
                }
            }
        }
        found_or_continue(vars)
    }

    fn name(&self) -> &'static str {
        "yaml-example"
    }
}

/// Nested keys of a YAML snippet; top-level section headers and
/// `platform` selectors are skipped.
fn parse_yaml_keys(text: &str) -> Vec<RawVariable> {
    let mut vars = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        let item = line.trim_start().trim_start_matches("- ");
        let Some((key, value)) = item.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if indent == 0 || key == "platform" || !is_identifier(key) {
            continue;
        }

        let value = value.split(" #").next().unwrap_or_default().trim();
        vars.push(RawVariable {
            name: key.to_string(),
            var_type: infer_type(key, value),
            ..RawVariable::default()
        });
    }
    vars
}

/// Type of an example value; pin-named keys win over numeric values.
fn infer_type(key: &str, value: &str) -> VarType {
    let value = value.trim_matches(['"', '\'']);
    if value.is_empty() {
        return VarType::Unknown;
    }
    if GPIO_RE.is_match(value) || key == "pin" || key.ends_with("_pin") {
        return VarType::Pin;
    }
    if value.starts_with("!secret") {
        return VarType::String;
    }
    match value.to_ascii_lowercase().as_str() {
        "true" | "false" | "yes" | "no" | "on" | "off" => return VarType::Boolean,
        _ => {}
    }
    if value.parse::<i64>().is_ok() {
        VarType::Integer
    } else if value.parse::<f64>().is_ok() {
        VarType::Float
    } else if DURATION_RE.is_match(value) {
        VarType::Duration
    } else {
        VarType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_example_keys() {
        let doc = Html::parse_document(
            r#"<html><body><main><div class="highlight-yaml"><pre># Example configuration entry
sensor:
  - platform: dht
    pin: D2
    model: AM2302
    update_interval: 60s
    temperature:
      name: "Living Room Temperature"
      accuracy_decimals: 1
    humidity:
      name: "Living Room Humidity"
</pre></div></main></body></html>"#,
        );
        let StrategyResult::Found(vars) = YamlExampleStrategy.extract(&doc) else {
            panic!("expected variables");
        };
        let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["pin", "model", "update_interval", "temperature", "name", "accuracy_decimals", "humidity"]
        );
        assert_eq!(vars[0].var_type, VarType::Pin);
        assert_eq!(vars[1].var_type, VarType::String);
        assert_eq!(vars[2].var_type, VarType::Duration);
        assert_eq!(vars[3].var_type, VarType::Unknown);
        assert_eq!(vars[5].var_type, VarType::Integer);
        assert!(vars.iter().all(|v| v.default.is_none() && !v.required));
    }

    #[test]
    fn value_types() {
        assert_eq!(infer_type("inverted", "true"), VarType::Boolean);
        assert_eq!(infer_type("multiplier", "0.5"), VarType::Float);
        assert_eq!(infer_type("trigger", "GPIO12"), VarType::Pin);
        assert_eq!(infer_type("password", "!secret wifi_password"), VarType::String);
    }
}
