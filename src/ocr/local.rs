//! Local raster OCR: pdftoppm page images piped through tesseract.

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use tempfile::TempDir;

use super::{OcrEngine, OcrError, OcrPage};

/// Handle command output, extracting stdout on success.
fn handle_cmd_output(
    result: std::io::Result<std::process::Output>,
    tool_name: &str,
    error_prefix: &str,
) -> Result<String, OcrError> {
    match result {
        Ok(output) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(OcrError::Failed(format!("{}: {}", error_prefix, stderr)))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(OcrError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(OcrError::Io(e)),
    }
}

fn check_cmd_status(
    result: std::io::Result<std::process::ExitStatus>,
    tool_name: &str,
    error_msg: &str,
) -> Result<(), OcrError> {
    match result {
        Ok(s) if s.success() => Ok(()),
        Ok(_) => Err(OcrError::Failed(error_msg.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(OcrError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(OcrError::Io(e)),
    }
}

/// OCR via poppler's pdftoppm and the tesseract binary.
pub struct LocalOcrEngine {
    raster_dpi: u32,
    language: String,
}

impl LocalOcrEngine {
    pub fn new(raster_dpi: u32) -> Self {
        Self {
            raster_dpi,
            language: "eng".to_string(),
        }
    }

    pub fn with_language(mut self, lang: &str) -> Self {
        self.language = lang.to_string();
        self
    }

    /// Tools this engine shells out to, with availability.
    pub fn check_tools() -> Vec<(String, bool)> {
        ["pdftoppm", "tesseract"]
            .iter()
            .map(|tool| (tool.to_string(), which::which(tool).is_ok()))
            .collect()
    }

    /// pdftoppm names page images `page-01.png`, widening digits for
    /// longer documents.
    fn find_page_image(temp_path: &Path, page_num: u32) -> Option<PathBuf> {
        for digits in [1, 2, 3, 4] {
            let filename = format!("page-{:0width$}.png", page_num, width = digits);
            let path = temp_path.join(&filename);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    fn rasterize_page(&self, pdf: &Path, page: u32, temp_path: &Path) -> Result<PathBuf, OcrError> {
        let page_str = page.to_string();
        let dpi = self.raster_dpi.to_string();
        let status = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi, "-f", &page_str, "-l", &page_str])
            .arg(pdf)
            .arg(temp_path.join("page"))
            .status();

        check_cmd_status(
            status,
            "pdftoppm (install poppler-utils)",
            &format!("pdftoppm failed to convert page {}", page),
        )?;

        Self::find_page_image(temp_path, page).ok_or_else(|| {
            OcrError::Failed(format!("no image generated for page {}", page))
        })
    }

    fn run_tesseract(&self, image_path: &Path) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .output();

        handle_cmd_output(output, "tesseract (install tesseract-ocr)", "tesseract failed")
    }
}

#[async_trait]
impl OcrEngine for LocalOcrEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn is_available(&self) -> bool {
        Self::check_tools().iter().all(|(_, available)| *available)
    }

    async fn ocr_pages(&self, pdf: &Path, pages: &[u32]) -> Result<Vec<OcrPage>, OcrError> {
        let temp_dir = TempDir::new()?;
        let mut results = Vec::with_capacity(pages.len());

        for &page in pages {
            let image = match self.rasterize_page(pdf, page, temp_dir.path()) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!("rasterization failed for page {}: {}", page, e);
                    continue;
                }
            };
            match self.run_tesseract(&image) {
                Ok(text) => {
                    let lines = text.lines().map(String::from).collect();
                    results.push(OcrPage { page, text, lines });
                }
                Err(e) => {
                    tracing::warn!("OCR failed for page {}: {}", page, e);
                }
            }
        }

        if results.is_empty() && !pages.is_empty() {
            return Err(OcrError::Failed("no pages produced OCR output".to_string()));
        }
        Ok(results)
    }
}
