//! The extraction pipeline.
//!
//! Stage-sequential per file: cache check, text layer, sheet indexing,
//! recipe extraction, AI-assisted extraction, generic table/row fallback,
//! OCR fallback, deduplication, scoring, gate evaluation, cache write.
//! Batches run files one at a time so the OCR and AI capabilities are
//! never hit concurrently and progress stays deterministic.
//!
//! Every stage consumes the immutable output of the previous one. The
//! cancellation token is polled at stage boundaries and inside per-page
//! loops; a cancelled run performs no cache write.

mod confidence;
mod dedup;

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ai::{AiExtractor, FieldReconciliation};
use crate::cache::SnapshotStore;
use crate::cancel::{CancelToken, Cancelled};
use crate::config::PipelineConfig;
use crate::models::{
    CrossCheckReport, ExtractionMethod, ExtractionStatus, PageType, ParcelContext, PdfExtraction,
    TableType, UnitRecord, UnitTotals,
};
use crate::ocr::{resolve_engine, should_ocr_page, OcrEngine};
use crate::pdf::{
    classify_pages, extract_text_layer, parse_lines_with_regex, parse_table_rows,
    reconstruct_tables, zoning_figures_from_text, PageText, ReconstructedTable,
};
use crate::recipes::{select_page_type, RecipeRegistry, ZoningFieldKind, ZoningFigure};
use crate::validate::evaluate_gates;

pub use confidence::{
    assemble_zoning_fields, generate_warnings, overall_confidence, page_confidence, PageSignals,
    WarningInputs, OCR_CONFIDENCE_CAP,
};
pub use dedup::{dedup_records, DedupOutcome};

/// Pipeline stages, in execution order, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    CacheCheck,
    TextLayer,
    SheetIndex,
    Recipes,
    AiExtraction,
    TableFallback,
    OcrFallback,
    Reconcile,
    Gates,
    CacheWrite,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheCheck => "cache check",
            Self::TextLayer => "text layer",
            Self::SheetIndex => "sheet index",
            Self::Recipes => "recipes",
            Self::AiExtraction => "ai extraction",
            Self::TableFallback => "table fallback",
            Self::OcrFallback => "ocr fallback",
            Self::Reconcile => "reconcile",
            Self::Gates => "gates",
            Self::CacheWrite => "cache write",
        }
    }
}

/// Progress events emitted over the optional channel.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted {
        file_name: String,
        stage: PipelineStage,
    },
    CacheHit {
        file_name: String,
    },
    DocumentFinished {
        file_name: String,
        status: ExtractionStatus,
        confidence: f64,
    },
}

/// One document to process, with its optional context.
#[derive(Debug, Clone, Default)]
pub struct ExtractRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Authoritative parcel record for cross-validation.
    pub parcel: Option<ParcelContext>,
    /// Per-page recipe overrides; take precedence over the heuristic.
    pub recipe_overrides: HashMap<u32, PageType>,
    /// Bypass the cache read and overwrite the entry.
    pub force_refresh: bool,
}

impl ExtractRequest {
    pub fn new(file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            bytes,
            ..Default::default()
        }
    }

    pub fn with_parcel(mut self, parcel: ParcelContext) -> Self {
        self.parcel = Some(parcel);
        self
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_page_override(mut self, page: u32, page_type: PageType) -> Self {
        self.recipe_overrides.insert(page, page_type);
        self
    }
}

/// What one pipeline run returns to the caller.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub snapshot: PdfExtraction,
    /// Present when parcel context was supplied.
    pub cross_check: Option<CrossCheckReport>,
    pub from_cache: bool,
}

/// The pipeline with its injected collaborators. Everything stateful
/// (cache store, OCR engine, AI capability) is passed in so tests can
/// substitute fakes.
pub struct ExtractionPipeline {
    store: Arc<dyn SnapshotStore>,
    config: PipelineConfig,
    registry: RecipeRegistry,
    ai: Option<Arc<dyn AiExtractor>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl ExtractionPipeline {
    pub fn new(store: Arc<dyn SnapshotStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            registry: RecipeRegistry::new(),
            ai: None,
            ocr: None,
            events: None,
        }
    }

    pub fn with_ai(mut self, ai: Arc<dyn AiExtractor>) -> Self {
        self.ai = Some(ai);
        self
    }

    /// Pin the OCR engine instead of resolving one by availability probing.
    pub fn with_ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn with_events(mut self, sender: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    fn stage(&self, file_name: &str, stage: PipelineStage) {
        debug!(file = file_name, stage = stage.as_str(), "stage started");
        self.emit(PipelineEvent::StageStarted {
            file_name: file_name.to_string(),
            stage,
        });
    }

    /// Process a batch sequentially. Fatal-per-file parse errors yield an
    /// empty snapshot for that file and the batch continues; cancellation
    /// stops the batch where it stands.
    pub async fn run_batch(
        &self,
        requests: Vec<ExtractRequest>,
        cancel: &CancelToken,
    ) -> Result<Vec<PipelineResult>, Cancelled> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            cancel.check()?;
            results.push(self.run(&request, cancel).await?);
        }
        Ok(results)
    }

    /// Run the full pipeline for one document.
    pub async fn run(
        &self,
        request: &ExtractRequest,
        cancel: &CancelToken,
    ) -> Result<PipelineResult, Cancelled> {
        let file_name = request.file_name.as_str();
        let hash = PdfExtraction::compute_hash(&request.bytes);

        // Cache check. Failures are logged and treated as a miss.
        self.stage(file_name, PipelineStage::CacheCheck);
        cancel.check()?;
        if !request.force_refresh {
            match self.store.get(&hash).await {
                Ok(Some(snapshot)) => {
                    info!(file = file_name, "cache hit, skipping pipeline");
                    self.emit(PipelineEvent::CacheHit {
                        file_name: file_name.to_string(),
                    });
                    let cross_check = request
                        .parcel
                        .as_ref()
                        .map(|p| CrossCheckReport::build(p, snapshot.totals.total_units));
                    return Ok(PipelineResult {
                        snapshot,
                        cross_check,
                        from_cache: true,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(file = file_name, "cache lookup failed: {}", e),
            }
        }

        // Text layer. The only fatal-per-file stage.
        self.stage(file_name, PipelineStage::TextLayer);
        cancel.check()?;
        let layer = match extract_text_layer(&request.bytes) {
            Ok(layer) => layer,
            Err(e) => {
                warn!(file = file_name, "document unparseable: {}", e);
                let snapshot =
                    PdfExtraction::empty(file_name, &request.bytes, format!("unparseable: {}", e));
                self.emit(PipelineEvent::DocumentFinished {
                    file_name: file_name.to_string(),
                    status: snapshot.status,
                    confidence: snapshot.confidence,
                });
                return Ok(PipelineResult {
                    snapshot,
                    cross_check: None,
                    from_cache: false,
                });
            }
        };
        let pages = &layer.pages;

        // Sheet index.
        self.stage(file_name, PipelineStage::SheetIndex);
        cancel.check()?;
        let sheet_index = classify_pages(pages);

        // Table reconstruction runs once per page; recipes and the
        // fallback both read from it, and it seeds the per-page signals.
        let mut page_tables: HashMap<u32, Vec<ReconstructedTable>> = HashMap::new();
        let mut signals: Vec<PageSignals> = Vec::with_capacity(pages.len());
        for page in pages {
            cancel.check()?;
            let tables = reconstruct_tables(page);
            signals.push(PageSignals {
                page_number: page.page_number,
                mapping_coverage: tables
                    .iter()
                    .map(|t| t.column_map.coverage())
                    .fold(0.0, f64::max),
                has_table_structure: !tables.is_empty(),
                ..Default::default()
            });
            page_tables.insert(page.page_number, tables);
        }

        let mut warnings: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut figures: Vec<(ZoningFigure, &'static str)> = Vec::new();
        let mut passes: Vec<Vec<UnitRecord>> = Vec::new();
        let mut handled_pages: HashSet<u32> = HashSet::new();
        // Pages whose figures a recipe already read; the line fallback
        // must not re-read them as unit rows.
        let mut figure_pages: HashSet<u32> = HashSet::new();

        // Recipe extraction over recognized pages.
        self.stage(file_name, PipelineStage::Recipes);
        cancel.check()?;
        let mut by_type: HashMap<PageType, Vec<&PageText>> = HashMap::new();
        for entry in &sheet_index {
            if let Some(page_type) = select_page_type(entry, &request.recipe_overrides) {
                if let Some(page) = pages.iter().find(|p| p.page_number == entry.page_number) {
                    by_type.entry(page_type).or_default().push(page);
                }
            }
        }
        for (page_type, group) in &by_type {
            let Some(recipe) = self.registry.for_page_type(*page_type) else {
                continue;
            };
            cancel.check()?;
            match recipe.extract(group) {
                Ok(output) => {
                    if !output.figures.is_empty() {
                        for page in group {
                            figure_pages.insert(page.page_number);
                        }
                    }
                    for figure in output.figures {
                        figures.push((figure, recipe.name()));
                    }
                    if !output.records.is_empty() {
                        for page in group {
                            handled_pages.insert(page.page_number);
                        }
                        passes.push(output.records);
                    }
                    warnings.extend(output.warnings);
                    if let Some(declared) = output.declared_total {
                        note_declared_total(&mut signals, group, declared);
                    }
                }
                Err(e) => {
                    warn!(file = file_name, "recipe failed: {}", e);
                    warnings.push(e.to_string());
                }
            }
        }

        // AI-assisted primary extraction, policy-gated and optional.
        self.stage(file_name, PipelineStage::AiExtraction);
        cancel.check()?;
        let mut ai_used = false;
        let mut ai_guess = None;
        if let Some(ai) = self.ai.as_ref().filter(|_| !self.config.disable_ai) {
            if ai.is_available().await {
                cancel.check()?;
                let candidates: Vec<PageText> = relevant_pages(pages, &sheet_index);
                match ai.extract_from_pages(&candidates).await {
                    Ok(guess) => {
                        ai_used = true;
                        ai_guess = Some(guess);
                    }
                    Err(e) => {
                        warn!(file = file_name, "AI extraction failed: {}", e);
                        warnings.push(format!("AI extraction failed: {}", e));
                    }
                }
            } else {
                debug!(file = file_name, "AI capability unavailable, skipping");
            }
        }

        // Generic table/row fallback over pages no recipe handled.
        self.stage(file_name, PipelineStage::TableFallback);
        let mut fallback_records = Vec::new();
        for page in pages {
            cancel.check()?;
            if handled_pages.contains(&page.page_number) {
                continue;
            }
            // Unrecognized pages can still state zoning figures; read them
            // here at fallback trust unless a recipe already did.
            if !figure_pages.contains(&page.page_number) {
                let (lot_area, far, zfa) = zoning_figures_from_text(&page.text);
                for (kind, value) in [
                    (ZoningFieldKind::LotArea, lot_area),
                    (ZoningFieldKind::ResidFar, far),
                    (ZoningFieldKind::ZoningFloorArea, zfa),
                ] {
                    if let Some(value) = value {
                        figures.push((
                            ZoningFigure {
                                kind,
                                value,
                                page_number: page.page_number,
                            },
                            "text_fallback",
                        ));
                    }
                }
            }
            let tables = page_tables.get(&page.page_number).map(Vec::as_slice).unwrap_or(&[]);
            let unit_tables: Vec<&ReconstructedTable> = tables
                .iter()
                .filter(|t| t.classified.table_type == TableType::UnitSchedule)
                .collect();
            if !unit_tables.is_empty() {
                for table in unit_tables {
                    let outcome = parse_table_rows(table);
                    apply_outcome_to_signals(&mut signals, page.page_number, &outcome.declared_total, outcome.totals_conflict());
                    warnings.extend(outcome.warnings);
                    fallback_records.extend(outcome.records);
                }
            } else if !figure_pages.contains(&page.page_number)
                && page.char_yield() >= self.config.ocr.min_chars_per_page
            {
                let outcome =
                    parse_lines_with_regex(page.page_number, &page.text, ExtractionMethod::TextRegex);
                apply_outcome_to_signals(&mut signals, page.page_number, &outcome.declared_total, outcome.totals_conflict());
                warnings.extend(outcome.warnings);
                fallback_records.extend(outcome.records);
            }
        }
        if !fallback_records.is_empty() {
            passes.push(fallback_records);
        }

        // OCR fallback for pages still yielding nothing.
        self.stage(file_name, PipelineStage::OcrFallback);
        cancel.check()?;
        let mut ocr_used = false;
        let ocr_candidates: Vec<u32> = signals
            .iter()
            .zip(pages)
            .filter(|(signal, page)| {
                should_ocr_page(
                    page.char_yield(),
                    signal.has_table_structure,
                    page_confidence(signal),
                    &self.config.ocr,
                )
            })
            .map(|(signal, _)| signal.page_number)
            .take(self.config.ocr.max_ocr_pages)
            .collect();
        if !ocr_candidates.is_empty() {
            match self.ocr_pass(&request.bytes, &ocr_candidates, cancel).await? {
                Ok(ocr_pages) => {
                    let mut ocr_records = Vec::new();
                    for ocr_page in &ocr_pages {
                        cancel.check()?;
                        let outcome = parse_lines_with_regex(
                            ocr_page.page,
                            &ocr_page.text,
                            ExtractionMethod::Ocr,
                        );
                        mark_ocr(&mut signals, ocr_page.page);
                        apply_outcome_to_signals(&mut signals, ocr_page.page, &outcome.declared_total, outcome.totals_conflict());
                        warnings.extend(outcome.warnings);
                        ocr_records.extend(outcome.records);
                    }
                    if !ocr_pages.is_empty() {
                        ocr_used = true;
                    }
                    if !ocr_records.is_empty() {
                        passes.push(ocr_records);
                    }
                }
                Err(message) => errors.push(message),
            }
        }

        // Deduplication, totals, scoring.
        self.stage(file_name, PipelineStage::Reconcile);
        cancel.check()?;
        let deduped = dedup_records(passes);
        if deduped.duplicates_dropped > 0 {
            debug!(
                file = file_name,
                dropped = deduped.duplicates_dropped,
                "collapsed duplicate unit records"
            );
        }
        for signal in &mut signals {
            signal.rows_contributed = deduped
                .records
                .iter()
                .filter(|r| r.source.page == signal.page_number)
                .count();
        }

        let zoning = assemble_zoning_fields(&figures, &signals);
        let confidence = overall_confidence(&signals);
        warnings.extend(generate_warnings(&WarningInputs {
            record_count: deduped.records.len(),
            page_count: layer.page_count,
            ocr_used,
            ai_verified: false,
            any_totals_conflict: signals.iter().any(|s| s.totals_conflict),
            any_table_structure: signals.iter().any(|s| s.has_table_structure),
        }));

        let mut snapshot = PdfExtraction {
            content_hash: hash.clone(),
            file_name: file_name.to_string(),
            page_count: layer.page_count,
            status: if errors.is_empty() {
                ExtractionStatus::Complete
            } else {
                ExtractionStatus::Partial
            },
            zoning,
            totals: UnitTotals::from_records(&deduped.records),
            unit_records: deduped.records,
            sheet_index,
            tables: page_tables
                .into_values()
                .flatten()
                .map(|t| t.classified)
                .collect(),
            gates: Vec::new(),
            ocr_used,
            ai_used,
            ai_guess,
            confidence,
            warnings,
            errors,
            extracted_at: Utc::now(),
        };
        snapshot.tables.sort_by_key(|t| t.page_index);

        // Gate evaluation.
        self.stage(file_name, PipelineStage::Gates);
        cancel.check()?;
        snapshot.gates =
            evaluate_gates(&snapshot, request.parcel.as_ref(), &self.config.validation);

        let cross_check = request
            .parcel
            .as_ref()
            .map(|p| CrossCheckReport::build(p, snapshot.totals.total_units));
        if let Some(report) = &cross_check {
            snapshot.warnings.extend(report.warnings.iter().cloned());
        }

        // Cache write, atomic and last. Never reached when cancelled.
        self.stage(file_name, PipelineStage::CacheWrite);
        cancel.check()?;
        if let Err(e) = self.store.put(&hash, &snapshot).await {
            warn!(file = file_name, "cache write failed: {}", e);
        }

        info!(
            file = file_name,
            status = snapshot.status.as_str(),
            units = snapshot.totals.total_units,
            confidence = format!("{:.2}", snapshot.confidence),
            "extraction finished"
        );
        self.emit(PipelineEvent::DocumentFinished {
            file_name: file_name.to_string(),
            status: snapshot.status,
            confidence: snapshot.confidence,
        });

        Ok(PipelineResult {
            snapshot,
            cross_check,
            from_cache: false,
        })
    }

    /// Run OCR over the selected pages. The engine wants a file on disk,
    /// so the bytes go through a temp file. The outer Result is
    /// cancellation; the inner is the recoverable engine failure.
    async fn ocr_pass(
        &self,
        bytes: &[u8],
        pages: &[u32],
        cancel: &CancelToken,
    ) -> Result<Result<Vec<crate::ocr::OcrPage>, String>, Cancelled> {
        let engine = match &self.ocr {
            Some(engine) => Some(engine.clone()),
            None => resolve_engine(&self.config.ocr).await.map(Arc::from),
        };
        let Some(engine) = engine else {
            return Ok(Err(format!(
                "{} pages need OCR but no OCR engine is available",
                pages.len()
            )));
        };
        cancel.check()?;

        let written = (|| -> std::io::Result<tempfile::NamedTempFile> {
            let mut file = tempfile::NamedTempFile::new()?;
            file.write_all(bytes)?;
            file.flush()?;
            Ok(file)
        })();
        let file = match written {
            Ok(file) => file,
            Err(e) => return Ok(Err(format!("failed to stage PDF for OCR: {}", e))),
        };

        match engine.ocr_pages(file.path(), pages).await {
            Ok(ocr_pages) => Ok(Ok(ocr_pages)),
            Err(e) => Ok(Err(format!("OCR failed ({}): {}", engine.name(), e))),
        }
    }

    /// The on-demand AI verification pass over a completed snapshot.
    /// Independent of the main pipeline and independently cancellable;
    /// it never re-runs earlier stages or touches the cache.
    pub async fn verify(
        &self,
        snapshot: &PdfExtraction,
        bytes: &[u8],
        parcel: Option<&ParcelContext>,
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<FieldReconciliation>> {
        let ai = self
            .ai
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no AI capability configured"))?;
        cancel.check()?;
        let layer = extract_text_layer(bytes)?;
        let relevant = relevant_pages(&layer.pages, &snapshot.sheet_index);
        cancel.check()?;
        let reconciliations = ai.reconcile(snapshot, &relevant, parcel).await?;
        Ok(reconciliations)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

/// Pages worth sending to the AI capability: recognized sheets first,
/// the whole document if nothing was recognized.
fn relevant_pages(
    pages: &[PageText],
    sheet_index: &[crate::models::SheetIndexEntry],
) -> Vec<PageText> {
    let recognized: HashSet<u32> = sheet_index
        .iter()
        .filter(|e| e.is_recognizable())
        .map(|e| e.page_number)
        .collect();
    let selected: Vec<PageText> = pages
        .iter()
        .filter(|p| recognized.contains(&p.page_number))
        .cloned()
        .collect();
    if selected.is_empty() {
        pages.to_vec()
    } else {
        selected
    }
}

fn note_declared_total(signals: &mut [PageSignals], group: &[&PageText], declared: usize) {
    // A recipe reports one declared total for its page group; pin it on
    // the group's first page for scoring purposes.
    if let Some(first) = group.first() {
        if let Some(signal) = signals.iter_mut().find(|s| s.page_number == first.page_number) {
            signal.declared_total = Some(declared);
        }
    }
}

fn apply_outcome_to_signals(
    signals: &mut [PageSignals],
    page_number: u32,
    declared_total: &Option<usize>,
    conflict: bool,
) {
    if let Some(signal) = signals.iter_mut().find(|s| s.page_number == page_number) {
        if declared_total.is_some() {
            signal.declared_total = *declared_total;
        }
        if conflict {
            signal.totals_conflict = true;
        }
    }
}

fn mark_ocr(signals: &mut [PageSignals], page_number: u32) {
    if let Some(signal) = signals.iter_mut().find(|s| s.page_number == page_number) {
        signal.ocr_used = true;
    }
}
