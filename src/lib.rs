//! planprobe - zoning plan-set PDF extraction and reconciliation.
//!
//! Turns an arbitrary, possibly scanned, architectural plan-set PDF into
//! structured, confidence-scored, cross-validated project data (lot area,
//! FAR, unit counts, unit mix, AMI allocations), with a validation-gate
//! workflow for resolving conflicts between extraction strategies and
//! authoritative parcel records.

pub mod ai;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod recipes;
pub mod validate;
