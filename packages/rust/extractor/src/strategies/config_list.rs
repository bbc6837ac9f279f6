//! ESPHome "Configuration variables" bullet lists.
//!
//! `<li><strong>name</strong> (<em>Required</em>, type): description</li>`

use scraper::{ElementRef, Html, Node, Selector};

use espforge_shared::RawVariable;

use super::{ExtractionStrategy, StrategyResult, found_or_continue};
use crate::fields::{after_name, is_identifier, split_item, variable_from_item};
use crate::page::{code_literals, content_root, own_text};

/// Reads top-level list items that open with a bold or code variable name.
pub struct ConfigListStrategy;

impl ExtractionStrategy for ConfigListStrategy {
    fn extract(&self, doc: &Html) -> StrategyResult {
        let Some(root) = content_root(doc) else {
            return StrategyResult::Continue;
        };
        let li_sel = Selector::parse("li").unwrap();

        let vars = root
            .select(&li_sel)
            .filter(|li| !inside_list_item(*li))
            .filter_map(parse_item)
            .collect();
        found_or_continue(vars)
    }

    fn name(&self) -> &'static str {
        "config-list"
    }
}

fn parse_item(li: ElementRef<'_>) -> Option<RawVariable> {
    let name = leading_name(li)?;
    let text = own_text(li);
    let (parsed, annotation, rest) = split_item(&text)?;
    if parsed != name {
        return None;
    }
    // Plain bullets ("<strong>Note</strong> this and that") carry neither.
    if annotation.is_none() && !after_name(&text).trim_start().starts_with([':', '(']) {
        return None;
    }

    let mut literals = code_literals(li);
    if literals.first().is_some_and(|l| *l == name) {
        literals.remove(0);
    }
    Some(variable_from_item(&name, annotation.as_deref(), &rest, &literals))
}

/// Name from the first `<strong>`/`<code>` of the item, if it leads the text.
fn leading_name(li: ElementRef<'_>) -> Option<String> {
    let sel = Selector::parse("strong, code, b").unwrap();
    let first = li.select(&sel).next()?;
    let name = first.text().collect::<String>().trim().to_string();
    (is_identifier(&name) && own_text(li).starts_with(&name)).then_some(name)
}

fn inside_list_item(li: ElementRef<'_>) -> bool {
    li.ancestors()
        .any(|a| matches!(a.value(), Node::Element(e) if e.name() == "li"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use espforge_shared::VarType;

    const PAGE: &str = r#"<html><body><main>
        <h1>DHT Temperature+Humidity Sensor</h1>
        <p>Configuration variables:</p>
        <ul>
          <li><p><strong>pin</strong> (<strong>Required</strong>, <a href="/x">Pin</a>): The pin where the DHT bus is connected.</p></li>
          <li><p><strong>temperature</strong> (<strong>Required</strong>): The information for the temperature sensor.</p>
            <ul><li><strong>name</strong> (<strong>Required</strong>, string): The name for the temperature sensor.</li></ul>
          </li>
          <li><p><strong>model</strong> (<em>Optional</em>, int): Manually specify the DHT model, can be one of
            <code>AUTO_DETECT</code>, <code>DHT11</code>, <code>DHT22</code>. Defaults to <code>AUTO_DETECT</code>.</p></li>
          <li><p><strong>update_interval</strong> (<em>Optional</em>, <a href="/t">Time</a>): The interval to check the sensor. Defaults to <code>60s</code>.</p></li>
        </ul>
        <ul><li><strong>Note</strong> this list is prose.</li></ul>
    </main></body></html>"#;

    #[test]
    fn reads_top_level_items() {
        let doc = Html::parse_document(PAGE);
        let StrategyResult::Found(vars) = ConfigListStrategy.extract(&doc) else {
            panic!("expected variables");
        };
        let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["pin", "temperature", "model", "update_interval"]);

        assert!(vars[0].required);
        assert_eq!(vars[0].var_type, VarType::Pin);
        assert_eq!(vars[1].var_type, VarType::Unknown);

        let model = &vars[2];
        assert!(!model.required);
        assert_eq!(model.var_type, VarType::Integer);
        assert_eq!(model.candidates, vec!["AUTO_DETECT", "DHT11", "DHT22"]);
        assert_eq!(model.default.as_deref(), Some("AUTO_DETECT"));

        assert_eq!(vars[3].var_type, VarType::Duration);
        assert_eq!(vars[3].default.as_deref(), Some("60s"));
    }

    #[test]
    fn wide_whitespace_before_name() {
        let doc = Html::parse_document(
            "<html><body><main><ul>\
               <li>&nbsp;<strong>a</strong>: The thing.</li>\
               <li>\u{3000}<code>ab</code> (Optional): Another.</li>\
             </ul></main></body></html>",
        );
        // Must not panic on the multibyte prefix.
        let _ = ConfigListStrategy.extract(&doc);
    }

    #[test]
    fn continues_without_lists() {
        let doc = Html::parse_document("<html><body><main><p>Just prose.</p></main></body></html>");
        assert_eq!(ConfigListStrategy.extract(&doc), StrategyResult::Continue);
    }
}
