//! Validation gate engine and the override workflow.
//!
//! Gate evaluation is a pure function of the snapshot's rule-derived
//! values, the stored AI guess, and the authoritative parcel record.
//! Overrides and confirmation never flip flags in place: each produces a
//! new snapshot with a freshly computed gate set.

use tracing::debug;

use crate::config::ValidationConfig;
use crate::models::{
    Evidence, ExpectedRange, ExtractedField, ExtractionStatus, GateStatus, ParcelContext,
    PdfExtraction, UnitTotals, ValidationGate,
};

/// Fields evaluated by the gate engine, in display order.
pub const GATED_FIELDS: [&str; 5] = [
    "lot_area",
    "resid_far",
    "zoning_floor_area",
    "building_area",
    "proposed_units",
];

/// Fields a feasibility run cannot proceed without. A missing value here
/// with no AI signal either is a needs-override gate, not a pass.
const REQUIRED_FIELDS: [&str; 3] = ["lot_area", "resid_far", "zoning_floor_area"];

fn is_required(field: &str) -> bool {
    REQUIRED_FIELDS.contains(&field)
}

/// Parcel-derived expectation for a field, when the record carries one.
fn parcel_expectation(field: &str, parcel: &ParcelContext) -> Option<f64> {
    match field {
        "lot_area" => parcel.lot_area,
        "resid_far" => parcel.resid_far,
        "building_area" => parcel.building_area,
        "zoning_floor_area" => parcel.max_zoning_floor_area(),
        _ => None,
    }
}

fn relative_deviation(value: f64, expected: f64) -> f64 {
    (value - expected).abs() / expected.abs().max(1e-9)
}

/// Evaluate the full gate set for a snapshot.
///
/// Precedence per field: a rule-vs-AI conflict beyond the conflict
/// tolerance wins; otherwise the parcel comparison classifies into
/// pass/warn/needs-override; a field with no signal at all is
/// needs-override when required and pass-through (no gate) otherwise.
/// Overridden fields always gate as pass with the pinned value.
pub fn evaluate_gates(
    snapshot: &PdfExtraction,
    parcel: Option<&ParcelContext>,
    config: &ValidationConfig,
) -> Vec<ValidationGate> {
    GATED_FIELDS
        .iter()
        .filter_map(|&field| evaluate_field(field, snapshot, parcel, config))
        .collect()
}

fn evaluate_field(
    field: &str,
    snapshot: &PdfExtraction,
    parcel: Option<&ParcelContext>,
    config: &ValidationConfig,
) -> Option<ValidationGate> {
    let rule = snapshot.zoning.field(field);
    let ai_value = snapshot.ai_guess.as_ref().and_then(|g| g.field(field));
    let expected = parcel.and_then(|p| parcel_expectation(field, p));

    let mut evidence = Vec::new();
    if let Some(f) = rule {
        evidence.push(Evidence {
            origin: f.source.clone(),
            value: f.value,
            page_number: f.page_number,
            detail: format!("extracted at confidence {:.2}", f.confidence),
        });
    }
    if let Some(v) = ai_value {
        evidence.push(Evidence {
            origin: "ai".to_string(),
            value: v,
            page_number: None,
            detail: "AI extraction pass".to_string(),
        });
    }
    if let Some(e) = expected {
        evidence.push(Evidence {
            origin: "parcel".to_string(),
            value: e,
            page_number: None,
            detail: "authoritative parcel record".to_string(),
        });
    }

    let expected_range = expected.map(|e| ExpectedRange {
        min: e * (1.0 - config.warn_tolerance),
        max: e * (1.0 + config.warn_tolerance),
    });

    // A pinned override short-circuits evaluation of its own field.
    if let Some(f) = rule {
        if f.source == "override" {
            return Some(ValidationGate {
                field: field.to_string(),
                status: GateStatus::Pass,
                extracted_value: Some(f.value),
                expected_range,
                message: "manually overridden".to_string(),
                evidence,
            });
        }
    }

    let gate = match (rule, ai_value) {
        (Some(f), Some(ai)) if relative_deviation(f.value, ai) > config.conflict_tolerance => {
            ValidationGate {
                field: field.to_string(),
                status: GateStatus::Conflicting,
                extracted_value: Some(f.value),
                expected_range,
                message: format!(
                    "rule-based value {:.1} and AI value {:.1} disagree",
                    f.value, ai
                ),
                evidence,
            }
        }
        (Some(f), _) => {
            let (status, message) = match expected {
                Some(e) => {
                    let deviation = relative_deviation(f.value, e);
                    if deviation <= config.pass_tolerance {
                        (GateStatus::Pass, "within tolerance of parcel record".to_string())
                    } else if deviation <= config.warn_tolerance {
                        (
                            GateStatus::Warn,
                            format!("{:.0}% from parcel record", deviation * 100.0),
                        )
                    } else {
                        (
                            GateStatus::NeedsOverride,
                            format!("{:.0}% from parcel record", deviation * 100.0),
                        )
                    }
                }
                None if f.confidence < 0.3 => (
                    GateStatus::Warn,
                    "low extraction confidence and no parcel record to check against".to_string(),
                ),
                None => (GateStatus::Pass, "no parcel record to check against".to_string()),
            };
            ValidationGate {
                field: field.to_string(),
                status,
                extracted_value: Some(f.value),
                expected_range,
                message,
                evidence,
            }
        }
        (None, Some(ai)) => ValidationGate {
            field: field.to_string(),
            status: GateStatus::Warn,
            extracted_value: Some(ai),
            expected_range,
            message: "only the AI pass found a value".to_string(),
            evidence,
        },
        (None, None) => {
            if !is_required(field) {
                return None;
            }
            ValidationGate {
                field: field.to_string(),
                status: GateStatus::NeedsOverride,
                extracted_value: None,
                expected_range,
                message: "required field not found by any extractor".to_string(),
                evidence,
            }
        }
    };

    Some(gate)
}

/// Apply a manual override to one zoning field, producing a new snapshot.
///
/// The pinned value short-circuits future evaluation of that field, and
/// derived fields cascade: overriding lot area or FAR re-derives zoning
/// floor area as `lot_area * resid_far` (unless zoning floor area is
/// itself pinned). The whole gate set is recomputed afterwards.
pub fn apply_override(
    snapshot: &PdfExtraction,
    field: &str,
    value: f64,
    parcel: Option<&ParcelContext>,
    config: &ValidationConfig,
) -> PdfExtraction {
    let mut next = snapshot.clone();

    if let Some(slot) = next.zoning.field_mut(field) {
        *slot = Some(ExtractedField::overridden(value));
    } else {
        debug!("ignoring override for unknown field {:?}", field);
        return next;
    }

    if matches!(field, "lot_area" | "resid_far") {
        let zfa_pinned = next
            .zoning
            .zoning_floor_area
            .as_ref()
            .is_some_and(|f| f.source == "override");
        if !zfa_pinned {
            if let (Some(lot), Some(far)) = (
                next.zoning.lot_area.as_ref().map(|f| f.value),
                next.zoning.resid_far.as_ref().map(|f| f.value),
            ) {
                next.zoning.zoning_floor_area =
                    Some(ExtractedField::new(lot * far, 1.0, None, "derived"));
            }
        }
    }

    next.gates = evaluate_gates(&next, parcel, config);
    next
}

/// Accept all currently extracted values as correct, closing open gates
/// without altering any value. Blocked while any gate is conflicting.
pub fn confirm_all(
    snapshot: &PdfExtraction,
    parcel: Option<&ParcelContext>,
    config: &ValidationConfig,
) -> Result<PdfExtraction, ConfirmBlocked> {
    let blocking: Vec<String> = snapshot
        .gates
        .iter()
        .filter(|g| g.status.blocks_confirmation())
        .map(|g| g.field.clone())
        .collect();
    if !blocking.is_empty() {
        return Err(ConfirmBlocked { fields: blocking });
    }

    let mut next = snapshot.clone();
    for field in GATED_FIELDS {
        let pinned = next.zoning.field(field).map(|f| f.value);
        if let (Some(value), Some(slot)) = (pinned, next.zoning.field_mut(field)) {
            *slot = Some(ExtractedField::overridden(value));
        }
    }
    next.status = ExtractionStatus::Complete;
    next.gates = evaluate_gates(&next, parcel, config);
    Ok(next)
}

/// Confirm-all refused because conflicting gates remain open.
#[derive(Debug, thiserror::Error)]
#[error("conflicting gates must be resolved first: {}", fields.join(", "))]
pub struct ConfirmBlocked {
    pub fields: Vec<String>,
}

/// Scale the unit record set to a caller-supplied total, producing a new
/// snapshot. Records are replicated round-robin on the way up and sampled
/// at an even stride on the way down, so the bedroom mix is preserved
/// either way; totals are recomputed from the resulting set so the record
/// count invariant holds.
pub fn scale_to_total_units(
    snapshot: &PdfExtraction,
    target_total: usize,
    parcel: Option<&ParcelContext>,
    config: &ValidationConfig,
) -> PdfExtraction {
    let mut next = snapshot.clone();
    let current = next.unit_records.len();

    if current == 0 || target_total == current {
        if current == 0 && target_total > 0 {
            next.warnings
                .push("cannot scale unit mix: no extracted unit records".to_string());
        }
        return next;
    }

    let mut scaled = Vec::with_capacity(target_total);
    if target_total > current {
        // Replicate round-robin so the mix proportions survive.
        for i in 0..target_total {
            let mut record = next.unit_records[i % current].clone();
            if i >= current {
                record.unit_id = None;
            }
            scaled.push(record);
        }
    } else {
        // Sample at an even stride; a plain prefix cut would skew the mix
        // toward whichever bedroom types sort first.
        for i in 0..target_total {
            scaled.push(next.unit_records[i * current / target_total].clone());
        }
    }

    next.unit_records = scaled;
    next.totals = UnitTotals::from_records(&next.unit_records);
    next.zoning.proposed_units = Some(ExtractedField::overridden(target_total as f64));
    next.warnings.push(format!(
        "unit mix scaled from {} to {} records by caller request",
        current, target_total
    ));
    next.gates = evaluate_gates(&next, parcel, config);
    next
}
