//! `<dl><dt>name</dt><dd>description</dd></dl>` definitions.

use scraper::{ElementRef, Html, Selector};

use espforge_shared::RawVariable;

use super::{ExtractionStrategy, StrategyResult, found_or_continue};
use crate::fields::{split_item, variable_from_item};
use crate::page::{code_literals, content_root, own_text};

pub struct DefinitionListStrategy;

impl ExtractionStrategy for DefinitionListStrategy {
    fn extract(&self, doc: &Html) -> StrategyResult {
        let Some(root) = content_root(doc) else {
            return StrategyResult::Continue;
        };
        let dl_sel = Selector::parse("dl").unwrap();

        let vars = root.select(&dl_sel).flat_map(parse_dl).collect();
        found_or_continue(vars)
    }

    fn name(&self) -> &'static str {
        "definition-list"
    }
}

fn parse_dl(dl: ElementRef<'_>) -> Vec<RawVariable> {
    let mut vars = Vec::new();
    let mut pending: Option<ElementRef<'_>> = None;

    for child in dl.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "dt" => pending = Some(child),
            "dd" => {
                if let Some(dt) = pending.take() {
                    if let Some(var) = parse_pair(dt, child) {
                        vars.push(var);
                    }
                }
            }
            _ => {}
        }
    }
    vars
}

fn parse_pair(dt: ElementRef<'_>, dd: ElementRef<'_>) -> Option<RawVariable> {
    let term = own_text(dt);
    let (name, annotation, trailing) = split_item(&term)?;
    // Terms like `esphome::sensor::Sensor` are API docs, not variables.
    if !trailing.is_empty() && annotation.is_none() {
        return None;
    }

    let body = own_text(dd);
    // The annotation may open the definition instead of the term.
    let (annotation, description) = match annotation {
        Some(a) => (Some(a), body),
        None => match body.strip_prefix('(').and_then(|b| b.split_once(')')) {
            Some((a, rest)) => (
                Some(a.to_string()),
                rest.trim_start_matches([':', ' ']).to_string(),
            ),
            None => (None, body),
        },
    };

    Some(variable_from_item(
        &name,
        annotation.as_deref(),
        &description,
        &code_literals(dd),
    ))
}
