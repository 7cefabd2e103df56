//! Per-page sheet metadata and detected table regions.

use serde::{Deserialize, Serialize};

/// Apparent drawing type of a page, inferred from title-block text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    ZoningSchedule,
    FloorPlan,
    UnitSchedule,
    CoverSheet,
    Unknown,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZoningSchedule => "zoning_schedule",
            Self::FloorPlan => "floor_plan",
            Self::UnitSchedule => "unit_schedule",
            Self::CoverSheet => "cover_sheet",
            Self::Unknown => "unknown",
        }
    }
}

/// How the sheet index entry was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetIndexMethod {
    PdfText,
    Ocr,
}

/// Classification of a single page.
///
/// Entries below the recognition threshold (0.3) are excluded from recipe
/// selection but remain eligible for the generic table path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetIndexEntry {
    /// 1-based page number.
    pub page_number: u32,
    /// Drawing number from the title block ("Z-001", "A-101"), if found.
    pub drawing_no: Option<String>,
    pub drawing_title: Option<String>,
    pub page_type: PageType,
    pub confidence: f64,
    pub method: SheetIndexMethod,
}

impl SheetIndexEntry {
    /// Whether this page is confident enough to drive recipe selection.
    pub fn is_recognizable(&self) -> bool {
        self.confidence >= 0.3 && self.page_type != PageType::Unknown
    }
}

/// Kind of tabular region detected on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    UnitSchedule,
    ZoningTable,
    OccupancyLoad,
    LightVentilationSchedule,
    Unknown,
}

/// A detected tabular region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedTable {
    /// 0-based page index.
    pub page_index: u32,
    pub table_type: TableType,
    pub headers: Vec<String>,
    pub confidence: f64,
}
