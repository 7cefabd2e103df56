//! AI extraction and verification over an Ollama-compatible API.
//!
//! Two distinct calls against the same service: an automatic extraction
//! pass that produces an independent guess at the headline figures, and
//! an on-demand verification pass that reconciles the rule-based values
//! against the AI's reading of the same pages. The AI never writes into
//! the rule-derived fields; its output is stored alongside them and fed
//! to the validation gates.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{AiGuess, ParcelContext, PdfExtraction};
use crate::pdf::PageText;

/// Default prompt for the extraction pass.
pub const DEFAULT_EXTRACT_PROMPT: &str = r#"You are reading text extracted from an architectural plan set filed for a residential building. Find the zoning and unit figures below. Use ONLY numbers that appear in the text; never estimate or compute missing ones.

Fields to find:
- lot_area: lot area in square feet
- resid_far: residential floor area ratio (a small decimal, typically 0.5 to 15)
- zoning_floor_area: proposed residential zoning floor area in square feet
- building_area: gross building area in square feet
- total_units: total dwelling unit count
- unit_mix: object mapping bedroom types ("studio", "1br", "2br", "3br", "4br+") to unit counts

Document pages:
{content}

Respond with ONLY a JSON object containing those keys. Omit any field you cannot find. No prose, no markdown fences."#;

/// Default prompt for the verification pass.
pub const DEFAULT_VERIFY_PROMPT: &str = r#"You are double-checking figures extracted from an architectural plan set. For each field below, re-read the document text and report the value YOU find, independently of the candidate value shown.

Candidate values:
{candidates}

Document pages:
{content}

Respond with ONLY a JSON object mapping field names to the numbers you find in the text. Omit fields you cannot verify. No prose, no markdown fences."#;

/// Configuration for the AI service client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Whether the AI stage is enabled at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ollama-compatible API endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model to use for extraction and verification.
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for generation. Low on purpose: we want reading, not writing.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Custom extraction prompt ({content} placeholder).
    #[serde(default)]
    pub extract_prompt: Option<String>,
    /// Custom verification prompt ({candidates} and {content} placeholders).
    #[serde(default)]
    pub verify_prompt: Option<String>,
    /// Maximum characters of page text to send per call.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

fn default_enabled() -> bool {
    true
}
fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2:latest".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_content_chars() -> usize {
    16000
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extract_prompt: None,
            verify_prompt: None,
            max_content_chars: default_max_content_chars(),
        }
    }
}

impl AiConfig {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn get_extract_prompt(&self) -> &str {
        self.extract_prompt.as_deref().unwrap_or(DEFAULT_EXTRACT_PROMPT)
    }

    pub fn get_verify_prompt(&self) -> &str {
        self.verify_prompt.as_deref().unwrap_or(DEFAULT_VERIFY_PROMPT)
    }
}

/// Errors from the AI service.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("AI stage is disabled")]
    Disabled,
}

/// Outcome of reconciling one field in the verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldReconciliation {
    pub field: String,
    /// Value the rule-based extractors produced, if any.
    pub rule_value: Option<f64>,
    /// Value the AI read for the same field, if any.
    pub ai_value: Option<f64>,
    /// Both present and within 1% of each other.
    pub agrees: bool,
    /// Confidence after reconciliation; boosted on agreement, cut on
    /// disagreement, unchanged when the AI saw nothing.
    pub combined_confidence: f64,
    pub note: String,
}

/// Interface for the AI extraction capability. Implemented by the HTTP
/// client in production and by fakes in tests.
#[async_trait]
pub trait AiExtractor: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Independent extraction pass over the document's page text.
    async fn extract_from_pages(&self, pages: &[PageText]) -> Result<AiGuess, AiError>;

    /// On-demand verification pass: reconcile a snapshot's rule-derived
    /// zoning fields against the AI's reading of the same pages.
    async fn reconcile(
        &self,
        snapshot: &PdfExtraction,
        pages: &[PageText],
        parcel: Option<&ParcelContext>,
    ) -> Result<Vec<FieldReconciliation>, AiError>;
}

/// AI client talking to an Ollama-compatible endpoint.
pub struct OllamaAiClient {
    config: AiConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaAiClient {
    pub fn new(config: AiConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    /// Concatenate page text with page markers, truncated UTF-8-safe.
    fn render_pages(&self, pages: &[PageText]) -> String {
        let mut out = String::new();
        for page in pages {
            out.push_str(&format!("--- page {} ---\n", page.page_number));
            out.push_str(&page.text);
            out.push('\n');
            if out.len() >= self.config.max_content_chars {
                break;
            }
        }
        truncate_utf8(&out, self.config.max_content_chars).to_string()
    }

    async fn call_generate(&self, prompt: &str) -> Result<String, AiError> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.config.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::Api(format!("HTTP {}: {}", status, body)));
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;

        Ok(body.response)
    }
}

/// Truncate to a valid UTF-8 boundary at or before `max`.
fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Strip markdown code fences some models wrap JSON in despite instructions.
fn strip_json_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Parse the extraction response into a guess. Numbers may arrive as
/// JSON numbers or as strings with commas ("12,345 SF").
fn parse_guess(response: &str) -> Result<AiGuess, AiError> {
    let cleaned = strip_json_fences(response);
    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|e| AiError::Parse(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AiError::Parse("response is not a JSON object".to_string()))?;

    let number = |key: &str| -> Option<f64> { obj.get(key).and_then(coerce_number) };

    let mut unit_mix = BTreeMap::new();
    if let Some(mix) = obj.get("unit_mix").and_then(|v| v.as_object()) {
        for (k, v) in mix {
            if let Some(n) = coerce_number(v) {
                if n >= 0.0 {
                    unit_mix.insert(k.to_lowercase(), n as u32);
                }
            }
        }
    }

    Ok(AiGuess {
        lot_area: number("lot_area"),
        resid_far: number("resid_far"),
        zoning_floor_area: number("zoning_floor_area"),
        building_area: number("building_area"),
        total_units: number("total_units").map(|n| n as u32),
        unit_mix,
    })
}

fn coerce_number(value: &serde_json::Value) -> Option<f64> {
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    let s = value.as_str()?;
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().ok()
}

/// Fields the verification pass reconciles, in report order.
const RECONCILED_FIELDS: [&str; 5] = [
    "lot_area",
    "resid_far",
    "zoning_floor_area",
    "building_area",
    "proposed_units",
];

/// Relative deviation below which rule and AI values count as agreeing.
const AGREEMENT_TOLERANCE: f64 = 0.01;

/// Build per-field reconciliations from the rule-derived snapshot and a
/// fresh AI guess.
pub fn reconcile_fields(
    snapshot: &PdfExtraction,
    guess: &AiGuess,
    parcel: Option<&ParcelContext>,
) -> Vec<FieldReconciliation> {
    RECONCILED_FIELDS
        .iter()
        .map(|&field| {
            let rule = snapshot
                .zoning
                .field(field)
                .map(|f| (f.value, f.confidence))
                .or_else(|| match field {
                    "proposed_units" if !snapshot.unit_records.is_empty() => {
                        Some((snapshot.totals.total_units as f64, snapshot.confidence))
                    }
                    _ => None,
                });
            let ai_value = guess.field(field);

            // Parcel records are a third voice on lot area only.
            let parcel_note = match field {
                "lot_area" => parcel.and_then(|p| p.lot_area).map(|v| {
                    format!("; parcel record says {:.0}", v)
                }),
                _ => None,
            }
            .unwrap_or_default();

            match (rule, ai_value) {
                (Some((rule_value, conf)), Some(ai)) => {
                    let denom = rule_value.abs().max(1e-9);
                    let deviation = (rule_value - ai).abs() / denom;
                    if deviation <= AGREEMENT_TOLERANCE {
                        FieldReconciliation {
                            field: field.to_string(),
                            rule_value: Some(rule_value),
                            ai_value: Some(ai),
                            agrees: true,
                            combined_confidence: (conf + 0.15).min(1.0),
                            note: format!("AI reading matches{}", parcel_note),
                        }
                    } else {
                        FieldReconciliation {
                            field: field.to_string(),
                            rule_value: Some(rule_value),
                            ai_value: Some(ai),
                            agrees: false,
                            combined_confidence: (conf * 0.6).max(0.0),
                            note: format!(
                                "AI read {:.1} ({:.0}% apart){}",
                                ai,
                                deviation * 100.0,
                                parcel_note
                            ),
                        }
                    }
                }
                (Some((rule_value, conf)), None) => FieldReconciliation {
                    field: field.to_string(),
                    rule_value: Some(rule_value),
                    ai_value: None,
                    agrees: false,
                    combined_confidence: conf,
                    note: "AI found no value".to_string(),
                },
                (None, Some(ai)) => FieldReconciliation {
                    field: field.to_string(),
                    rule_value: None,
                    ai_value: Some(ai),
                    agrees: false,
                    combined_confidence: 0.0,
                    note: "only the AI found a value".to_string(),
                },
                (None, None) => FieldReconciliation {
                    field: field.to_string(),
                    rule_value: None,
                    ai_value: None,
                    agrees: false,
                    combined_confidence: 0.0,
                    note: "not found by either method".to_string(),
                },
            }
        })
        .collect()
}

#[async_trait]
impl AiExtractor for OllamaAiClient {
    async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let url = format!("{}/api/tags", self.config.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn extract_from_pages(&self, pages: &[PageText]) -> Result<AiGuess, AiError> {
        if !self.config.enabled {
            return Err(AiError::Disabled);
        }
        let content = self.render_pages(pages);
        let prompt = self.config.get_extract_prompt().replace("{content}", &content);

        debug!("AI extraction over {} pages", pages.len());
        let response = self.call_generate(&prompt).await?;
        parse_guess(&response)
    }

    async fn reconcile(
        &self,
        snapshot: &PdfExtraction,
        pages: &[PageText],
        parcel: Option<&ParcelContext>,
    ) -> Result<Vec<FieldReconciliation>, AiError> {
        if !self.config.enabled {
            return Err(AiError::Disabled);
        }
        let content = self.render_pages(pages);
        let candidates = RECONCILED_FIELDS
            .iter()
            .filter_map(|&field| {
                snapshot
                    .zoning
                    .field(field)
                    .map(|f| format!("- {}: {}", field, f.value))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = self
            .config
            .get_verify_prompt()
            .replace("{candidates}", &candidates)
            .replace("{content}", &content);

        debug!("AI verification for {}", snapshot.file_name);
        let response = self.call_generate(&prompt).await?;
        let guess = parse_guess(&response)?;
        Ok(reconcile_fields(snapshot, &guess, parcel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedField;

    #[test]
    fn test_parse_guess_plain_json() {
        let guess = parse_guess(
            r#"{"lot_area": 10000, "resid_far": 3.44, "total_units": 24,
                "unit_mix": {"studio": 4, "1br": 12, "2br": 8}}"#,
        )
        .unwrap();
        assert_eq!(guess.lot_area, Some(10000.0));
        assert_eq!(guess.resid_far, Some(3.44));
        assert_eq!(guess.total_units, Some(24));
        assert_eq!(guess.unit_mix.get("1br"), Some(&12));
        assert!(guess.building_area.is_none());
    }

    #[test]
    fn test_parse_guess_strips_fences_and_commas() {
        let guess = parse_guess("```json\n{\"lot_area\": \"12,500 SF\"}\n```").unwrap();
        assert_eq!(guess.lot_area, Some(12500.0));
    }

    #[test]
    fn test_parse_guess_rejects_non_object() {
        assert!(parse_guess("[1, 2, 3]").is_err());
        assert!(parse_guess("not json at all").is_err());
    }

    #[test]
    fn test_truncate_utf8_respects_boundaries() {
        let text = "héllo wörld";
        let truncated = truncate_utf8(text, 2);
        assert_eq!(truncated, "h");
    }

    #[test]
    fn test_reconcile_agreement_boosts_confidence() {
        let mut snapshot = PdfExtraction::empty("plans.pdf", b"x", "seed".to_string());
        snapshot.zoning.lot_area = Some(ExtractedField::new(10000.0, 0.7, Some(2), "zoning"));
        let guess = AiGuess {
            lot_area: Some(10050.0),
            ..AiGuess::default()
        };
        let recs = reconcile_fields(&snapshot, &guess, None);
        let lot = recs.iter().find(|r| r.field == "lot_area").unwrap();
        assert!(lot.agrees);
        assert!(lot.combined_confidence > 0.7);
    }

    #[test]
    fn test_reconcile_disagreement_cuts_confidence() {
        let mut snapshot = PdfExtraction::empty("plans.pdf", b"x", "seed".to_string());
        snapshot.zoning.resid_far = Some(ExtractedField::new(3.44, 0.8, Some(2), "zoning"));
        let guess = AiGuess {
            resid_far: Some(6.02),
            ..AiGuess::default()
        };
        let recs = reconcile_fields(&snapshot, &guess, None);
        let far = recs.iter().find(|r| r.field == "resid_far").unwrap();
        assert!(!far.agrees);
        assert!(far.combined_confidence < 0.8);
    }

    #[test]
    fn test_default_config() {
        let config = AiConfig::default();
        assert!(config.enabled);
        assert!(config.get_extract_prompt().contains("{content}"));
        assert!(config.get_verify_prompt().contains("{candidates}"));
    }
}
