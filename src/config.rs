//! Pipeline configuration.
//!
//! Thresholds and tolerance bands are deliberately configurable: the exact
//! cutoffs separating warn from needs-override vary by deployment and are
//! pinned by acceptance tests, not hardcoded.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ai::AiConfig;

/// Tolerance bands for validation gates, as relative deviations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Deviation at or below this passes.
    #[serde(default = "default_pass_tolerance")]
    pub pass_tolerance: f64,
    /// Deviation at or below this warns; above it needs an override.
    #[serde(default = "default_warn_tolerance")]
    pub warn_tolerance: f64,
    /// Rule-vs-AI disagreement beyond this is a conflict.
    #[serde(default = "default_conflict_tolerance")]
    pub conflict_tolerance: f64,
}

fn default_pass_tolerance() -> f64 {
    0.05
}
fn default_warn_tolerance() -> f64 {
    0.15
}
fn default_conflict_tolerance() -> f64 {
    0.20
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            pass_tolerance: default_pass_tolerance(),
            warn_tolerance: default_warn_tolerance(),
            conflict_tolerance: default_conflict_tolerance(),
        }
    }
}

/// OCR fallback policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPolicyConfig {
    /// Hard cap on OCR'd pages per document.
    #[serde(default = "default_max_ocr_pages")]
    pub max_ocr_pages: usize,
    /// A page with fewer non-whitespace chars than this is "near-empty".
    #[serde(default = "default_min_chars_per_page")]
    pub min_chars_per_page: usize,
    /// Page confidence below this floor makes the page OCR-eligible.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    /// Raster DPI for page images handed to the OCR engine.
    #[serde(default = "default_raster_dpi")]
    pub raster_dpi: u32,
    /// Endpoint of the remote OCR service, if one is deployed.
    #[serde(default)]
    pub remote_endpoint: Option<String>,
}

fn default_max_ocr_pages() -> usize {
    8
}
fn default_min_chars_per_page() -> usize {
    40
}
fn default_confidence_floor() -> f64 {
    0.3
}
fn default_raster_dpi() -> u32 {
    300
}

impl Default for OcrPolicyConfig {
    fn default() -> Self {
        Self {
            max_ocr_pages: default_max_ocr_pages(),
            min_chars_per_page: default_min_chars_per_page(),
            confidence_floor: default_confidence_floor(),
            raster_dpi: default_raster_dpi(),
            remote_endpoint: None,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub ocr: OcrPolicyConfig,
    #[serde(default)]
    pub ai: AiConfig,
    /// Skip the AI extraction stage even when the service is reachable.
    #[serde(default)]
    pub disable_ai: bool,
}

impl PipelineConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing sections.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn with_max_ocr_pages(mut self, max: usize) -> Self {
        self.ocr.max_ocr_pages = max;
        self
    }

    pub fn with_disable_ai(mut self, disable: bool) -> Self {
        self.disable_ai = disable;
        self
    }
}
