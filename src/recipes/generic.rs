//! Generic table recipe: the table-reconstruction path, used for unit
//! schedule pages and as the fallback over unclaimed candidate pages.

use crate::models::{ExtractionMethod, PageType, TableType};
use crate::pdf::{parse_lines_with_regex, parse_table_rows, reconstruct_tables, PageText};

use super::{Recipe, RecipeError, RecipeOutput};

pub struct GenericTableRecipe;

impl Recipe for GenericTableRecipe {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn page_type(&self) -> PageType {
        PageType::UnitSchedule
    }

    fn extract(&self, pages: &[&PageText]) -> Result<RecipeOutput, RecipeError> {
        let mut output = RecipeOutput::default();

        for page in pages {
            let tables = reconstruct_tables(page);
            let mut found_units = false;

            for table in &tables {
                if table.classified.table_type != TableType::UnitSchedule {
                    continue;
                }
                let mut outcome = parse_table_rows(table);
                if !outcome.records.is_empty() {
                    found_units = true;
                }
                if outcome.declared_total.is_some() {
                    output.declared_total = outcome.declared_total;
                }
                output.records.append(&mut outcome.records);
                output.warnings.append(&mut outcome.warnings);
            }

            // No usable table structure: drop to line-level regex parsing.
            if !found_units {
                let mut outcome = parse_lines_with_regex(
                    page.page_number,
                    &page.text,
                    ExtractionMethod::TextRegex,
                );
                if outcome.declared_total.is_some() && output.declared_total.is_none() {
                    output.declared_total = outcome.declared_total;
                }
                output.records.append(&mut outcome.records);
                output.warnings.append(&mut outcome.warnings);
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::TextItem;

    fn item(text: &str, x: f32, y: f32) -> TextItem {
        TextItem {
            text: text.to_string(),
            x,
            y,
        }
    }

    #[test]
    fn test_table_path_preferred() {
        let items = vec![
            item("UNIT", 50.0, 700.0),
            item("BR", 150.0, 700.0),
            item("AREA", 250.0, 700.0),
            item("2A", 50.0, 685.0),
            item("1BR", 150.0, 685.0),
            item("650", 250.0, 685.0),
        ];
        let page = PageText {
            page_number: 5,
            text: String::new(),
            items,
            page_height: 792.0,
        };
        let output = GenericTableRecipe.extract(&[&page]).unwrap();
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].source.method, ExtractionMethod::TextTable);
    }

    #[test]
    fn test_regex_fallback_without_structure() {
        let page = PageText {
            page_number: 5,
            text: "UNIT 5A  2BR  870 SF".to_string(),
            items: Vec::new(),
            page_height: 792.0,
        };
        let output = GenericTableRecipe.extract(&[&page]).unwrap();
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].source.method, ExtractionMethod::TextRegex);
    }
}
