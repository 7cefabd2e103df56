//! Extraction snapshot models.
//!
//! A `PdfExtraction` is the reconciled result of running the full pipeline
//! over one plan-set PDF. Snapshots are immutable values: overrides, manual
//! confirmation, and totals recomputation all produce a new snapshot rather
//! than patching in place, so the evidence trail stays coherent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::gates::ValidationGate;
use super::sheet::{ClassifiedTable, SheetIndexEntry};

/// A single extracted value with its provenance.
///
/// Confidence is assigned by the scoring component and never synthesized
/// elsewhere; it is always clamped to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField<T> {
    pub value: T,
    pub confidence: f64,
    /// 1-based page the value was read from, if page-attributable.
    pub page_number: Option<u32>,
    /// Which extractor produced the value (recipe name, "table", "ocr", "ai", "override").
    pub source: String,
}

impl<T> ExtractedField<T> {
    pub fn new(value: T, confidence: f64, page_number: Option<u32>, source: &str) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            page_number,
            source: source.to_string(),
        }
    }

    /// A manually pinned value. Overrides carry full confidence.
    pub fn overridden(value: T) -> Self {
        Self {
            value,
            confidence: 1.0,
            page_number: None,
            source: "override".to_string(),
        }
    }
}

/// Bedroom count category for a dwelling unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BedroomType {
    Studio,
    OneBr,
    TwoBr,
    ThreeBr,
    FourBrPlus,
    Unknown,
}

impl BedroomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Studio => "studio",
            Self::OneBr => "1br",
            Self::TwoBr => "2br",
            Self::ThreeBr => "3br",
            Self::FourBrPlus => "4br_plus",
            Self::Unknown => "unknown",
        }
    }
}

/// Market/affordable allocation of a dwelling unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allocation {
    Market,
    Affordable,
    MihRestricted,
    Unknown,
}

impl Allocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Affordable => "affordable",
            Self::MihRestricted => "mih_restricted",
            Self::Unknown => "unknown",
        }
    }
}

/// How a unit record was produced. Ordered by trust: a structured table row
/// beats a regex line match, which beats OCR output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    TextTable,
    TextRegex,
    Ocr,
}

impl ExtractionMethod {
    /// Higher rank wins during deduplication.
    pub fn trust_rank(&self) -> u8 {
        match self {
            Self::TextTable => 3,
            Self::TextRegex => 2,
            Self::Ocr => 1,
        }
    }
}

/// Provenance for a single unit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSource {
    /// 1-based page number.
    pub page: u32,
    pub method: ExtractionMethod,
    /// The raw text the record was parsed from, for audit.
    pub evidence: String,
}

/// One inferred dwelling unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Unit identifier from the drawing ("2A", "PH-1"), if present.
    pub unit_id: Option<String>,
    pub floor: Option<String>,
    pub bedroom_type: BedroomType,
    pub allocation: Allocation,
    pub area_sf: Option<f64>,
    /// AMI band percentage (40, 60, 80, ...), if stated.
    pub ami_band: Option<u32>,
    pub source: UnitSource,
}

impl UnitRecord {
    /// Stable identity for deduplication: the drawn unit id when present,
    /// otherwise a key synthesized from page and row position so records
    /// from repeated passes over the same page collide.
    pub fn identity(&self, row_index: usize) -> String {
        match &self.unit_id {
            Some(id) => id.trim().to_uppercase(),
            None => format!("page{}-row{}", self.source.page, row_index),
        }
    }
}

/// Aggregated unit counts, recomputed from the deduplicated record set.
/// `total_units` always equals the record count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitTotals {
    pub total_units: usize,
    pub by_bedroom_type: BTreeMap<String, usize>,
    pub by_allocation: BTreeMap<String, usize>,
    pub by_allocation_and_bedroom: BTreeMap<String, usize>,
    pub by_ami_band: BTreeMap<String, usize>,
}

impl UnitTotals {
    /// Compute totals from a (deduplicated) record set.
    pub fn from_records(records: &[UnitRecord]) -> Self {
        let mut totals = Self {
            total_units: records.len(),
            ..Default::default()
        };
        for record in records {
            *totals
                .by_bedroom_type
                .entry(record.bedroom_type.as_str().to_string())
                .or_default() += 1;
            *totals
                .by_allocation
                .entry(record.allocation.as_str().to_string())
                .or_default() += 1;
            *totals
                .by_allocation_and_bedroom
                .entry(format!(
                    "{}:{}",
                    record.allocation.as_str(),
                    record.bedroom_type.as_str()
                ))
                .or_default() += 1;
            if let Some(band) = record.ami_band {
                *totals.by_ami_band.entry(format!("{}%", band)).or_default() += 1;
            }
        }
        totals
    }
}

/// Zoning figures read from the plan set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoningFields {
    pub lot_area: Option<ExtractedField<f64>>,
    pub resid_far: Option<ExtractedField<f64>>,
    pub zoning_floor_area: Option<ExtractedField<f64>>,
    pub building_area: Option<ExtractedField<f64>>,
    pub proposed_units: Option<ExtractedField<f64>>,
}

impl ZoningFields {
    /// Look up a field by its snapshot key.
    pub fn field(&self, name: &str) -> Option<&ExtractedField<f64>> {
        match name {
            "lot_area" => self.lot_area.as_ref(),
            "resid_far" => self.resid_far.as_ref(),
            "zoning_floor_area" => self.zoning_floor_area.as_ref(),
            "building_area" => self.building_area.as_ref(),
            "proposed_units" => self.proposed_units.as_ref(),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Option<ExtractedField<f64>>> {
        match name {
            "lot_area" => Some(&mut self.lot_area),
            "resid_far" => Some(&mut self.resid_far),
            "zoning_floor_area" => Some(&mut self.zoning_floor_area),
            "building_area" => Some(&mut self.building_area),
            "proposed_units" => Some(&mut self.proposed_units),
            _ => None,
        }
    }
}

/// Structured guess returned by the external AI extraction capability.
/// Kept on the snapshot so gates can be recomputed against it after an
/// override without re-calling the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiGuess {
    pub lot_area: Option<f64>,
    pub resid_far: Option<f64>,
    pub zoning_floor_area: Option<f64>,
    pub building_area: Option<f64>,
    pub total_units: Option<u32>,
    /// Unit counts keyed by bedroom type ("studio", "1br", ...).
    pub unit_mix: BTreeMap<String, u32>,
}

impl AiGuess {
    pub fn field(&self, name: &str) -> Option<f64> {
        match name {
            "lot_area" => self.lot_area,
            "resid_far" => self.resid_far,
            "zoning_floor_area" => self.zoning_floor_area,
            "building_area" => self.building_area,
            "proposed_units" => self.total_units.map(f64::from),
            _ => None,
        }
    }
}

/// Overall disposition of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Every stage that ran succeeded.
    Complete,
    /// At least one stage recorded an error but usable signal exists.
    Partial,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
        }
    }
}

/// The top-level reconciled snapshot for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfExtraction {
    /// SHA-256 of the input bytes; also the cache key.
    pub content_hash: String,
    pub file_name: String,
    pub page_count: u32,
    pub status: ExtractionStatus,
    pub zoning: ZoningFields,
    pub unit_records: Vec<UnitRecord>,
    pub totals: UnitTotals,
    pub sheet_index: Vec<SheetIndexEntry>,
    pub tables: Vec<ClassifiedTable>,
    pub gates: Vec<ValidationGate>,
    pub ocr_used: bool,
    pub ai_used: bool,
    /// The AI capability's structured guess, when the stage ran.
    pub ai_guess: Option<AiGuess>,
    /// Overall document confidence, row-count weighted across pages.
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub extracted_at: DateTime<Utc>,
}

impl PdfExtraction {
    /// Compute the SHA-256 content hash used as the cache key.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// A minimal snapshot for a document that could not be parsed at all.
    /// The batch continues; this file contributes nothing but the error.
    pub fn empty(file_name: &str, content: &[u8], error: String) -> Self {
        Self {
            content_hash: Self::compute_hash(content),
            file_name: file_name.to_string(),
            page_count: 0,
            status: ExtractionStatus::Partial,
            zoning: ZoningFields::default(),
            unit_records: Vec::new(),
            totals: UnitTotals::default(),
            sheet_index: Vec::new(),
            tables: Vec::new(),
            gates: Vec::new(),
            ocr_used: false,
            ai_used: false,
            ai_guess: None,
            confidence: 0.0,
            warnings: Vec::new(),
            errors: vec![error],
            extracted_at: Utc::now(),
        }
    }

    /// Replace the record set and recompute totals. Returns a new snapshot.
    pub fn with_records(mut self, records: Vec<UnitRecord>) -> Self {
        self.totals = UnitTotals::from_records(&records);
        self.unit_records = records;
        self
    }
}
