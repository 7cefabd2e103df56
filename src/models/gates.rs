//! Validation gate data types.
//!
//! A gate is a per-field status node in the conflict-resolution workflow.
//! Gate sets are immutable per evaluation cycle: any upstream change
//! (override, confirmation, new AI signal) produces a freshly computed set
//! rather than flipping flags in place. The evaluation logic lives in
//! `crate::validate`.

use serde::{Deserialize, Serialize};

/// Status of a single validation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Within tolerance of the expectation.
    Pass,
    /// Moderate deviation; usable but worth a look.
    Warn,
    /// Hard deviation or a required value missing entirely.
    NeedsOverride,
    /// Rule-based and AI-derived values materially disagree. Takes
    /// precedence for display and blocks confirm-all until resolved.
    Conflicting,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::NeedsOverride => "needs_override",
            Self::Conflicting => "conflicting",
        }
    }

    /// Whether this gate requires user action before confirm-all.
    pub fn blocks_confirmation(&self) -> bool {
        matches!(self, Self::Conflicting)
    }
}

/// A piece of supporting evidence attached to a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Where the value came from: "rule", "ai", "parcel", "override".
    pub origin: String,
    pub value: f64,
    pub page_number: Option<u32>,
    pub detail: String,
}

/// Expected range for a field derived from authoritative data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedRange {
    pub min: f64,
    pub max: f64,
}

/// A per-field validation verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationGate {
    /// Field key ("lot_area", "resid_far", "zoning_floor_area", ...).
    pub field: String,
    pub status: GateStatus,
    pub extracted_value: Option<f64>,
    pub expected_range: Option<ExpectedRange>,
    pub message: String,
    pub evidence: Vec<Evidence>,
}
