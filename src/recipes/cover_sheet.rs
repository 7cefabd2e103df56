//! Cover sheet recipe: project data block figures.
//!
//! Cover sheets usually carry a "PROJECT DATA" or "SITE DATA" block with
//! headline numbers: lot area, proposed dwelling unit count, gross
//! building area. Useful corroboration even when a zoning schedule exists.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::PageType;
use crate::pdf::PageText;

use super::{Recipe, RecipeError, RecipeOutput, ZoningFieldKind, ZoningFigure};

static LOT_AREA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)LOT\s+AREA\s*[:=]?\s*([\d,]+(?:\.\d+)?)").unwrap()
});
static UNIT_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:NO\.?\s*OF|NUMBER\s+OF|PROPOSED|TOTAL)\s+(?:DWELLING\s+)?UNITS?\s*[:=]?\s*(\d{1,4})")
        .unwrap()
});
static BUILDING_AREA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:GROSS\s+)?BUILDING\s+AREA\s*[:=]?\s*([\d,]+(?:\.\d+)?)").unwrap()
});

fn number(caps: Option<regex::Captures<'_>>) -> Option<f64> {
    caps.and_then(|c| c.get(1).map(|m| m.as_str().replace(',', "")))
        .and_then(|s| s.parse().ok())
}

pub struct CoverSheetRecipe;

impl Recipe for CoverSheetRecipe {
    fn name(&self) -> &'static str {
        "cover_sheet"
    }

    fn page_type(&self) -> PageType {
        PageType::CoverSheet
    }

    fn extract(&self, pages: &[&PageText]) -> Result<RecipeOutput, RecipeError> {
        let mut output = RecipeOutput::default();

        for page in pages {
            if let Some(value) = number(LOT_AREA.captures(&page.text)) {
                output.figures.push(ZoningFigure {
                    kind: ZoningFieldKind::LotArea,
                    value,
                    page_number: page.page_number,
                });
            }
            if let Some(value) = number(UNIT_COUNT.captures(&page.text)) {
                output.figures.push(ZoningFigure {
                    kind: ZoningFieldKind::ProposedUnits,
                    value,
                    page_number: page.page_number,
                });
            }
            if let Some(value) = number(BUILDING_AREA.captures(&page.text)) {
                output.figures.push(ZoningFigure {
                    kind: ZoningFieldKind::BuildingArea,
                    value,
                    page_number: page.page_number,
                });
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_data_block() {
        let page = PageText {
            page_number: 1,
            text: "PROJECT DATA\nLOT AREA: 10,000 SF\nNO. OF DWELLING UNITS: 24\nGROSS BUILDING AREA: 36,500 SF"
                .to_string(),
            items: Vec::new(),
            page_height: 792.0,
        };
        let output = CoverSheetRecipe.extract(&[&page]).unwrap();
        assert_eq!(output.figures.len(), 3);
        assert!(output
            .figures
            .iter()
            .any(|f| f.kind == ZoningFieldKind::ProposedUnits && f.value == 24.0));
    }

    #[test]
    fn test_empty_cover_is_not_an_error() {
        let page = PageText {
            page_number: 1,
            text: "123 MAIN STREET".to_string(),
            items: Vec::new(),
            page_height: 792.0,
        };
        let output = CoverSheetRecipe.extract(&[&page]).unwrap();
        assert!(output.figures.is_empty());
    }
}
