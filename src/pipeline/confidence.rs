//! Confidence scoring, zoning field assembly, and declarative warnings.
//!
//! This is the only component that assigns confidence values. Recipes
//! and parsers report raw figures and signals; everything is scored here
//! so the weights live in one place.

use std::collections::HashMap;

use crate::models::{ExtractedField, ZoningFields};
use crate::recipes::{ZoningFieldKind, ZoningFigure};

/// OCR-derived pages never score above this, however clean the parse.
pub const OCR_CONFIDENCE_CAP: f64 = 0.6;

/// Confidence given to a text-derived zoning figure from a page with no
/// tabular signals of its own.
const BARE_FIGURE_CONFIDENCE: f64 = 0.5;

/// Per-page scoring inputs collected during extraction.
#[derive(Debug, Clone, Default)]
pub struct PageSignals {
    /// 1-based page number.
    pub page_number: u32,
    /// Header-to-field column mapping coverage, 0 when no table was found.
    pub mapping_coverage: f64,
    /// Accepted unit records this page contributed after parsing.
    pub rows_contributed: usize,
    /// Unit count declared by a totals row, if one was present.
    pub declared_total: Option<usize>,
    /// Declared total disagreed with the parsed count beyond tolerance.
    pub totals_conflict: bool,
    pub has_table_structure: bool,
    pub ocr_used: bool,
}

/// Score one page from its signals.
///
/// Weights: column mapping coverage dominates, rows and a consistent
/// totals row add, a conflicting totals row subtracts. OCR pages are
/// capped below text pages regardless.
pub fn page_confidence(signals: &PageSignals) -> f64 {
    let mut score = signals.mapping_coverage * 0.5;
    if signals.rows_contributed > 0 {
        score += 0.2;
    }
    match signals.declared_total {
        Some(_) if signals.totals_conflict => score -= 0.15,
        Some(_) => score += 0.3,
        None => {}
    }
    if signals.has_table_structure && signals.declared_total.is_none() {
        score += 0.1;
    }

    let cap = if signals.ocr_used { OCR_CONFIDENCE_CAP } else { 1.0 };
    score.clamp(0.0, cap)
}

/// Aggregate page scores into one document confidence, weighted by each
/// page's contributed row count. Pages with no rows share equal minimal
/// weight so a rowless document still scores from its best pages.
pub fn overall_confidence(pages: &[PageSignals]) -> f64 {
    if pages.is_empty() {
        return 0.0;
    }
    let total_rows: usize = pages.iter().map(|p| p.rows_contributed).sum();
    let weighted: f64 = pages
        .iter()
        .map(|p| {
            let weight = if total_rows > 0 {
                p.rows_contributed as f64
            } else {
                1.0
            };
            page_confidence(p) * weight
        })
        .sum();
    let denom = if total_rows > 0 {
        total_rows as f64
    } else {
        pages.len() as f64
    };
    (weighted / denom).clamp(0.0, 1.0)
}

/// Assemble zoning fields from raw recipe figures, attaching the source
/// page's confidence. When two figures claim the same field, the one from
/// the stronger page wins.
pub fn assemble_zoning_fields(
    figures: &[(ZoningFigure, &'static str)],
    pages: &[PageSignals],
) -> ZoningFields {
    let page_scores: HashMap<u32, f64> = pages
        .iter()
        .map(|p| (p.page_number, page_confidence(p)))
        .collect();

    let mut fields = ZoningFields::default();
    for (figure, source) in figures {
        let confidence = page_scores
            .get(&figure.page_number)
            .copied()
            .unwrap_or(BARE_FIGURE_CONFIDENCE)
            .max(BARE_FIGURE_CONFIDENCE);
        let candidate = ExtractedField::new(
            figure.value,
            confidence,
            Some(figure.page_number),
            source,
        );
        let slot = match figure.kind {
            ZoningFieldKind::LotArea => &mut fields.lot_area,
            ZoningFieldKind::ResidFar => &mut fields.resid_far,
            ZoningFieldKind::ZoningFloorArea => &mut fields.zoning_floor_area,
            ZoningFieldKind::BuildingArea => &mut fields.building_area,
            ZoningFieldKind::ProposedUnits => &mut fields.proposed_units,
        };
        let replace = slot
            .as_ref()
            .map(|existing| candidate.confidence > existing.confidence)
            .unwrap_or(true);
        if replace {
            *slot = Some(candidate);
        }
    }
    fields
}

/// Inputs to the declarative warning rule set.
#[derive(Debug, Default)]
pub struct WarningInputs {
    pub record_count: usize,
    pub page_count: u32,
    pub ocr_used: bool,
    pub ai_verified: bool,
    pub any_totals_conflict: bool,
    pub any_table_structure: bool,
}

/// Fixed, reproducible warning rules. Nothing here is free-form: each
/// warning is a named risk condition so tests can pin the exact set.
pub fn generate_warnings(inputs: &WarningInputs) -> Vec<String> {
    let mut warnings = Vec::new();
    if inputs.record_count == 0 && inputs.page_count > 0 {
        warnings.push("no unit records extracted from any page".to_string());
    }
    if inputs.ocr_used && !inputs.ai_verified {
        warnings.push("OCR output contributed records that have not been verified".to_string());
    }
    if inputs.any_totals_conflict {
        warnings.push("a totals row disagrees with the parsed unit count".to_string());
    }
    if !inputs.any_table_structure && inputs.page_count > 0 {
        warnings.push("no table structure detected on any page".to_string());
    }
    warnings
}
