//! Tables whose header names a variable column.

use scraper::{ElementRef, Html, Selector};

use espforge_shared::RawVariable;

use super::{ExtractionStrategy, StrategyResult, found_or_continue};
use crate::fields::{collapse_ws, is_identifier, variable_from_item};
use crate::page::{code_literals, content_root};

pub struct TableStrategy;

impl ExtractionStrategy for TableStrategy {
    fn extract(&self, doc: &Html) -> StrategyResult {
        let Some(root) = content_root(doc) else {
            return StrategyResult::Continue;
        };
        let table_sel = Selector::parse("table").unwrap();

        let vars = root.select(&table_sel).flat_map(parse_table).collect();
        found_or_continue(vars)
    }

    fn name(&self) -> &'static str {
        "table"
    }
}

/// Column positions recognized from the header row.
#[derive(Debug, Default)]
struct Columns {
    name: Option<usize>,
    var_type: Option<usize>,
    description: Option<usize>,
    default: Option<usize>,
    required: Option<usize>,
}

impl Columns {
    fn from_header(cells: &[String]) -> Self {
        let mut cols = Self::default();
        for (i, cell) in cells.iter().enumerate() {
            let cell = cell.to_ascii_lowercase();
            if cols.name.is_none()
                && ["name", "variable", "option", "key", "parameter"]
                    .iter()
                    .any(|k| cell.contains(k))
            {
                cols.name = Some(i);
            } else if cell.contains("type") {
                cols.var_type = Some(i);
            } else if cell.contains("desc") {
                cols.description = Some(i);
            } else if cell.contains("default") {
                cols.default = Some(i);
            } else if cell.contains("required") {
                cols.required = Some(i);
            }
        }
        cols
    }
}

fn parse_table(table: ElementRef<'_>) -> Vec<RawVariable> {
    let tr_sel = Selector::parse("tr").unwrap();
    let cell_sel = Selector::parse("th, td").unwrap();

    let mut rows = table.select(&tr_sel);
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let header_cells: Vec<String> = header
        .select(&cell_sel)
        .map(|c| collapse_ws(&c.text().collect::<String>()))
        .collect();
    let cols = Columns::from_header(&header_cells);
    let Some(name_col) = cols.name else {
        return Vec::new();
    };
    // A lone name column is a list of names, not a schema.
    if cols.var_type.is_none() && cols.description.is_none() {
        return Vec::new();
    }

    let mut vars = Vec::new();
    for row in rows {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
        let text = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .map(|c| collapse_ws(&c.text().collect::<String>()))
                .unwrap_or_default()
        };

        let name = text(Some(name_col)).trim_matches('`').to_string();
        if !is_identifier(&name) {
            continue;
        }

        let type_text = text(cols.var_type);
        let description = text(cols.description);
        let literals = cols
            .description
            .and_then(|i| cells.get(i))
            .map(|c| code_literals(*c))
            .unwrap_or_default();

        let annotation = (!type_text.is_empty()).then_some(type_text.as_str());
        let mut var = variable_from_item(&name, annotation, &description, &literals);

        let required_cell = text(cols.required).to_ascii_lowercase();
        if matches!(required_cell.as_str(), "yes" | "true" | "required" | "y")
            || description.contains("(Required")
        {
            var.required = true;
        }

        let default_cell = text(cols.default);
        if !default_cell.is_empty() && !matches!(default_cell.as_str(), "-" | "—" | "n/a") {
            var.default = Some(default_cell.trim_matches('`').to_string());
        }
        vars.push(var);
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use espforge_shared::VarType;

    #[test]
    fn reads_schema_table() {
        let doc = Html::parse_document(
            r#"<html><body><main><table>
                <tr><th>Name</th><th>Type</th><th>Default</th><th>Description</th></tr>
                <tr><td><code>address</code></td><td>int</td><td>0x76</td><td>I²C address, range 0 to 127.</td></tr>
                <tr><td>oversampling</td><td>enum</td><td>-</td><td>One of <code>NONE</code>, <code>1X</code>, <code>2X</code>.</td></tr>
                <tr><td>Some heading</td><td></td><td></td><td></td></tr>
            </table></main></body></html>"#,
        );
        let StrategyResult::Found(vars) = TableStrategy.extract(&doc) else {
            panic!("expected variables");
        };
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].name, "address");
        assert_eq!(vars[0].var_type, VarType::Integer);
        assert_eq!(vars[0].default.as_deref(), Some("0x76"));
        assert_eq!((vars[0].min, vars[0].max), (Some(0.0), Some(127.0)));
        assert_eq!(vars[1].var_type, VarType::Enumeration);
        assert_eq!(vars[1].candidates, vec!["NONE", "1X", "2X"]);
        assert!(vars[1].default.is_none());
    }

    #[test]
    fn ignores_tables_without_schema_columns() {
        let doc = Html::parse_document(
            r#"<html><body><main><table>
                <tr><th>Board</th><th>Flash</th></tr>
                <tr><td>nodemcu</td><td>4MB</td></tr>
            </table></main></body></html>"#,
        );
        assert_eq!(TableStrategy.extract(&doc), StrategyResult::Continue);
    }
}
