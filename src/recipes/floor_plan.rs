//! Floor plan recipe: unit labels scattered across plan sheets.
//!
//! Floor plans label units in place ("UNIT 2A / 1BR / 645 SF") rather
//! than tabulating them, so this runs the line-level regex parser and
//! tags the floor when the sheet title names one.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ExtractionMethod, PageType};
use crate::pdf::{parse_lines_with_regex, PageText};

use super::{Recipe, RecipeError, RecipeOutput};

static FLOOR_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(CELLAR|GROUND|(\d{1,2})(?:ST|ND|RD|TH))\s+FLOOR\s+PLAN\b").unwrap()
});

pub struct FloorPlanRecipe;

impl Recipe for FloorPlanRecipe {
    fn name(&self) -> &'static str {
        "floor_plan_label"
    }

    fn page_type(&self) -> PageType {
        PageType::FloorPlan
    }

    fn extract(&self, pages: &[&PageText]) -> Result<RecipeOutput, RecipeError> {
        let mut output = RecipeOutput::default();

        for page in pages {
            let floor = FLOOR_TITLE
                .captures(&page.text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_uppercase());

            let mut outcome =
                parse_lines_with_regex(page.page_number, &page.text, ExtractionMethod::TextRegex);
            for record in &mut outcome.records {
                if record.floor.is_none() {
                    record.floor = floor.clone();
                }
            }
            output.records.append(&mut outcome.records);
            output.warnings.append(&mut outcome.warnings);
        }

        Ok(output)
    }
}
