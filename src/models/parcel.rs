//! Authoritative parcel context and cross-check reporting.
//!
//! Parcel values come from the city land-use dataset (PLUTO) via the
//! caller; the pipeline treats them as ground truth for validation only
//! and never mutates them.

use serde::{Deserialize, Serialize};

/// Authoritative parcel fields supplied by the caller for cross-validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParcelContext {
    /// Borough-Block-Lot identifier, for display only.
    pub bbl: Option<String>,
    /// Lot area in square feet.
    pub lot_area: Option<f64>,
    /// Residential floor area ratio.
    pub resid_far: Option<f64>,
    /// Recorded building area in square feet.
    pub building_area: Option<f64>,
}

impl ParcelContext {
    /// Maximum zoning floor area implied by the parcel record.
    pub fn max_zoning_floor_area(&self) -> Option<f64> {
        match (self.lot_area, self.resid_far) {
            (Some(lot), Some(far)) if lot > 0.0 && far > 0.0 => Some(lot * far),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lot_area.is_none() && self.resid_far.is_none() && self.building_area.is_none()
    }
}

/// Comparison of extracted totals against the parcel record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossCheckReport {
    pub warnings: Vec<String>,
    /// Units the parcel envelope could hold at the assumed average unit size.
    pub implied_max_units: Option<usize>,
    /// Units actually extracted from the plan set.
    pub extracted_units: usize,
}

/// Average dwelling unit size assumed when deriving implied max units,
/// including a share of corridors and common space.
const ASSUMED_AVG_UNIT_SF: f64 = 850.0;

impl CrossCheckReport {
    /// Build a report comparing extracted totals with the parcel envelope.
    pub fn build(parcel: &ParcelContext, extracted_units: usize) -> Self {
        let mut report = Self {
            extracted_units,
            ..Default::default()
        };

        if let Some(max_zfa) = parcel.max_zoning_floor_area() {
            let implied = (max_zfa / ASSUMED_AVG_UNIT_SF).floor() as usize;
            report.implied_max_units = Some(implied);
            if extracted_units > implied.saturating_mul(2) {
                report.warnings.push(format!(
                    "extracted {} units but parcel envelope implies at most ~{}",
                    extracted_units, implied
                ));
            }
        }

        report
    }
}
