//! OCR fallback engines.
//!
//! OCR is reserved for pages genuinely failing native extraction: the
//! policy (`should_ocr_page`) requires near-empty text, no detected table
//! structure, and a page confidence below the floor, and a hard cap
//! bounds OCR'd pages per document.
//!
//! Engines sit behind a uniform interface. The concrete provider is
//! resolved once per run by availability probing: a remote HTTP service
//! when configured and reachable, else the local raster path
//! (pdftoppm + tesseract), else none.

mod local;
mod remote;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::OcrPolicyConfig;

pub use local::LocalOcrEngine;
pub use remote::RemoteOcrEngine;

/// Errors from an OCR engine. Always recoverable at the pipeline level.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("external tool not found: {0}")]
    ToolNotFound(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("OCR service error: {0}")]
    Service(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// OCR output for one page.
#[derive(Debug, Clone)]
pub struct OcrPage {
    /// 1-based page number.
    pub page: u32,
    pub text: String,
    pub lines: Vec<String>,
}

/// A swappable OCR provider.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probe whether this engine can run right now.
    async fn is_available(&self) -> bool;

    /// OCR the given 1-based pages of a PDF on disk.
    async fn ocr_pages(&self, pdf: &Path, pages: &[u32]) -> Result<Vec<OcrPage>, OcrError>;
}

/// Per-page OCR trigger decision.
pub fn should_ocr_page(
    char_yield: usize,
    has_table_structure: bool,
    page_confidence: f64,
    policy: &OcrPolicyConfig,
) -> bool {
    char_yield < policy.min_chars_per_page
        && !has_table_structure
        && page_confidence < policy.confidence_floor
}

/// Resolve the engine for this run. Preference order: remote service when
/// configured, local raster OCR, none.
pub async fn resolve_engine(policy: &OcrPolicyConfig) -> Option<Box<dyn OcrEngine>> {
    if let Some(endpoint) = &policy.remote_endpoint {
        let remote = RemoteOcrEngine::new(endpoint.clone(), policy.raster_dpi);
        if remote.is_available().await {
            tracing::debug!("using remote OCR engine at {}", endpoint);
            return Some(Box::new(remote));
        }
        tracing::warn!("remote OCR endpoint {} unavailable, trying local", endpoint);
    }

    let local = LocalOcrEngine::new(policy.raster_dpi);
    if local.is_available().await {
        tracing::debug!("using local OCR engine");
        return Some(Box::new(local));
    }

    tracing::warn!("no OCR engine available");
    None
}
