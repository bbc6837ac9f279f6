//! Extraction strategy trait and the ordered strategy pipeline.
//!
//! Strategies are tried in priority order: the structured ones (configuration
//! lists, tables, definition lists, YAML examples) first, the readable-text
//! scan last. The first strategy that finds variables wins.

mod config_list;
mod definition_list;
mod readable_text;
mod table;
mod yaml_example;

use scraper::Html;

use espforge_shared::RawVariable;

pub use config_list::ConfigListStrategy;
pub use definition_list::DefinitionListStrategy;
pub use readable_text::ReadableTextStrategy;
pub use table::TableStrategy;
pub use yaml_example::YamlExampleStrategy;

/// Strategy name recorded when no strategy found variables.
pub const NO_STRATEGY: &str = "none";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Outcome of running one strategy over a page.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyResult {
    /// Variables found; the pipeline stops here.
    Found(Vec<RawVariable>),
    /// Nothing recognizable; try the next strategy.
    Continue,
}

/// One way of finding configuration variables in a documentation page.
pub trait ExtractionStrategy: Send + Sync {
    /// Scan the parsed page for variable definitions.
    fn extract(&self, doc: &Html) -> StrategyResult;

    /// Stable strategy name, recorded on the raw record.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Holds strategies in priority order.
pub struct StrategyPipeline {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl StrategyPipeline {
    /// Create a pipeline with all built-in strategies (structured first, readable text last).
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(ConfigListStrategy),
                Box::new(TableStrategy),
                Box::new(DefinitionListStrategy),
                Box::new(YamlExampleStrategy),
                Box::new(ReadableTextStrategy),
            ],
        }
    }

    /// Build a pipeline from an explicit strategy list.
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Run strategies in order; returns the winning strategy's variables and name,
    /// or an empty list and [`NO_STRATEGY`].
    pub fn run(&self, doc: &Html) -> (Vec<RawVariable>, &'static str) {
        for strategy in &self.strategies {
            if let StrategyResult::Found(vars) = strategy.extract(doc) {
                tracing::debug!(strategy = strategy.name(), count = vars.len(), "strategy matched");
                return (vars, strategy.name());
            }
        }
        (Vec::new(), NO_STRATEGY)
    }

    /// Strategy names in priority order.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Default for StrategyPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// `Found` when anything was collected.
pub(crate) fn found_or_continue(vars: Vec<RawVariable>) -> StrategyResult {
    if vars.is_empty() {
        StrategyResult::Continue
    } else {
        StrategyResult::Found(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, bool);

    impl ExtractionStrategy for Fixed {
        fn extract(&self, _doc: &Html) -> StrategyResult {
            if self.1 {
                StrategyResult::Found(vec![RawVariable {
                    name: self.0.into(),
                    ..RawVariable::default()
                }])
            } else {
                StrategyResult::Continue
            }
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    #[test]
    fn builtin_order() {
        assert_eq!(
            StrategyPipeline::new().names(),
            vec!["config-list", "table", "definition-list", "yaml-example", "readable-text"]
        );
    }

    #[test]
    fn first_found_wins() {
        let pipeline = StrategyPipeline::with_strategies(vec![
            Box::new(Fixed("a", false)),
            Box::new(Fixed("b", true)),
            Box::new(Fixed("c", true)),
        ]);
        let doc = Html::parse_document("<html></html>");
        let (vars, name) = pipeline.run(&doc);
        assert_eq!(name, "b");
        assert_eq!(vars[0].name, "b");
    }

    #[test]
    fn nothing_found() {
        let pipeline = StrategyPipeline::with_strategies(vec![Box::new(Fixed("a", false))]);
        let doc = Html::parse_document("<html></html>");
        let (vars, name) = pipeline.run(&doc);
        assert!(vars.is_empty());
        assert_eq!(name, NO_STRATEGY);
    }
}
