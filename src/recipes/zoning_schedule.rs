//! Zoning schedule recipe: lot area, FAR, and zoning floor area from
//! zoning analysis sheets.

use crate::models::PageType;
use crate::pdf::{zoning_figures_from_text, PageText};

use super::{Recipe, RecipeError, RecipeOutput, ZoningFieldKind, ZoningFigure};

pub struct ZoningScheduleRecipe;

impl Recipe for ZoningScheduleRecipe {
    fn name(&self) -> &'static str {
        "zoning_schedule"
    }

    fn page_type(&self) -> PageType {
        PageType::ZoningSchedule
    }

    fn extract(&self, pages: &[&PageText]) -> Result<RecipeOutput, RecipeError> {
        let mut output = RecipeOutput::default();

        for page in pages {
            let (lot_area, far, zfa) = zoning_figures_from_text(&page.text);
            if let Some(value) = lot_area {
                output.figures.push(ZoningFigure {
                    kind: ZoningFieldKind::LotArea,
                    value,
                    page_number: page.page_number,
                });
            }
            if let Some(value) = far {
                output.figures.push(ZoningFigure {
                    kind: ZoningFieldKind::ResidFar,
                    value,
                    page_number: page.page_number,
                });
            }
            if let Some(value) = zfa {
                output.figures.push(ZoningFigure {
                    kind: ZoningFieldKind::ZoningFloorArea,
                    value,
                    page_number: page.page_number,
                });
            }
        }

        if output.figures.is_empty() {
            return Err(RecipeError::Failed {
                recipe: self.name(),
                message: "no zoning figures found on zoning schedule pages".to_string(),
            });
        }

        Ok(output)
    }
}
