//! Remote OCR over HTTP.
//!
//! Posts page rasters are left to the service side: the API accepts the
//! raw PDF plus page numbers and returns per-page text, so thin clients
//! need no poppler install.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{OcrEngine, OcrError, OcrPage};

#[derive(Debug, Serialize)]
struct OcrRequest {
    pages: Vec<u32>,
    dpi: u32,
    /// Base64-encoded document bytes.
    document: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    pages: Vec<OcrResponsePage>,
}

#[derive(Debug, Deserialize)]
struct OcrResponsePage {
    page: u32,
    text: String,
}

/// OCR client for a cloud OCR deployment.
pub struct RemoteOcrEngine {
    endpoint: String,
    raster_dpi: u32,
    client: reqwest::Client,
}

impl RemoteOcrEngine {
    pub fn new(endpoint: String, raster_dpi: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            endpoint,
            raster_dpi,
            client,
        }
    }
}

#[async_trait]
impl OcrEngine for RemoteOcrEngine {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn ocr_pages(&self, pdf: &Path, pages: &[u32]) -> Result<Vec<OcrPage>, OcrError> {
        let document = STANDARD.encode(std::fs::read(pdf)?);
        let request = OcrRequest {
            pages: pages.to_vec(),
            dpi: self.raster_dpi,
            document,
        };

        let url = format!("{}/ocr", self.endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OcrError::Service(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OcrError::Service(format!("HTTP {}", resp.status())));
        }

        let body: OcrResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Service(format!("bad response: {}", e)))?;

        Ok(body
            .pages
            .into_iter()
            .map(|p| OcrPage {
                page: p.page,
                lines: p.text.lines().map(String::from).collect(),
                text: p.text,
            })
            .collect())
    }
}
