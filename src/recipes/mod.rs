//! Page-type-specific extraction recipes.
//!
//! A recipe is a pluggable strategy keyed by page type. Selection is a
//! pure function of the sheet index plus an optional per-page caller
//! override; recipes never see pages below the recognition threshold.
//! A recipe failure is recorded as a warning and never aborts other
//! recipes or the rest of the pipeline.
//!
//! Recipes report raw figures and unit records; confidence is attached
//! later by the scoring component.

mod cover_sheet;
mod floor_plan;
mod generic;
mod zoning_schedule;

use std::collections::HashMap;

use thiserror::Error;

use crate::models::{PageType, SheetIndexEntry, UnitRecord};
use crate::pdf::PageText;

pub use cover_sheet::CoverSheetRecipe;
pub use floor_plan::FloorPlanRecipe;
pub use generic::GenericTableRecipe;
pub use zoning_schedule::ZoningScheduleRecipe;

/// Errors from a single recipe run.
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("recipe {recipe} failed: {message}")]
    Failed { recipe: &'static str, message: String },
}

/// Which zoning field a figure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoningFieldKind {
    LotArea,
    ResidFar,
    ZoningFloorArea,
    BuildingArea,
    ProposedUnits,
}

impl ZoningFieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LotArea => "lot_area",
            Self::ResidFar => "resid_far",
            Self::ZoningFloorArea => "zoning_floor_area",
            Self::BuildingArea => "building_area",
            Self::ProposedUnits => "proposed_units",
        }
    }
}

/// A raw zoning figure read off a page, pre-confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoningFigure {
    pub kind: ZoningFieldKind,
    pub value: f64,
    /// 1-based page number.
    pub page_number: u32,
}

/// What one recipe produced.
#[derive(Debug, Default)]
pub struct RecipeOutput {
    pub figures: Vec<ZoningFigure>,
    pub records: Vec<UnitRecord>,
    pub warnings: Vec<String>,
    /// Declared totals-row count, when the recipe saw one.
    pub declared_total: Option<usize>,
}

/// A page-type-specific extraction strategy.
pub trait Recipe: Send + Sync {
    fn name(&self) -> &'static str;
    /// The page type this recipe handles.
    fn page_type(&self) -> PageType;
    fn extract(&self, pages: &[&PageText]) -> Result<RecipeOutput, RecipeError>;
}

/// Registry of named recipes, resolved once at pipeline-build time.
pub struct RecipeRegistry {
    recipes: Vec<Box<dyn Recipe>>,
}

impl Default for RecipeRegistry {
    fn default() -> Self {
        Self {
            recipes: vec![
                Box::new(ZoningScheduleRecipe),
                Box::new(CoverSheetRecipe),
                Box::new(FloorPlanRecipe),
                Box::new(GenericTableRecipe),
            ],
        }
    }
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_page_type(&self, page_type: PageType) -> Option<&dyn Recipe> {
        self.recipes
            .iter()
            .find(|r| r.page_type() == page_type)
            .map(|r| r.as_ref())
    }
}

/// Effective page type for recipe selection: a caller override wins,
/// otherwise the heuristic assignment when it clears the recognition
/// threshold, otherwise none.
pub fn select_page_type(
    entry: &SheetIndexEntry,
    overrides: &HashMap<u32, PageType>,
) -> Option<PageType> {
    if let Some(forced) = overrides.get(&entry.page_number) {
        return Some(*forced);
    }
    if entry.is_recognizable() {
        Some(entry.page_type)
    } else {
        None
    }
}
