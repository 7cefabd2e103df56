//! End-to-end pipeline tests over synthesized plan-set PDFs, with fake
//! collaborators substituted for the cache, OCR, and AI capabilities.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use planprobe::ai::{reconcile_fields, AiError, AiExtractor, FieldReconciliation};
use planprobe::cache::{CacheError, MemorySnapshotStore, SnapshotStore};
use planprobe::cancel::CancelToken;
use planprobe::config::PipelineConfig;
use planprobe::models::{
    AiGuess, ExtractionMethod, ExtractionStatus, GateStatus, PageType, ParcelContext,
    PdfExtraction,
};
use planprobe::ocr::{OcrEngine, OcrError, OcrPage};
use planprobe::pipeline::{ExtractRequest, ExtractionPipeline};

/// Build a PDF whose pages carry positioned text runs (x, y, text).
fn build_pdf(pages: &[Vec<(f32, f32, &str)>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let mut operations = Vec::new();
        for &(x, y, text) in page {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
            operations.push(Operation::new(
                "Tm",
                vec![
                    1.into(),
                    0.into(),
                    0.into(),
                    1.into(),
                    Object::Real(x),
                    Object::Real(y),
                ],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(text)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize pdf");
    bytes
}

/// A single-page 20-row unit schedule with a matching totals row.
fn clean_schedule_pdf() -> Vec<u8> {
    let mut runs: Vec<(f32, f32, &str)> = vec![
        (72.0, 700.0, "UNIT NO"),
        (220.0, 700.0, "BR"),
        (340.0, 700.0, "AREA"),
    ];
    let ids = [
        "2A", "2B", "2C", "2D", "3A", "3B", "3C", "3D", "4A", "4B", "4C", "4D", "5A", "5B", "5C",
        "5D", "6A", "6B", "6C", "6D",
    ];
    let bedrooms = ["STUDIO", "1 BR", "2 BR", "3 BR"];
    let areas = ["480", "650", "850", "1100"];
    for (i, id) in ids.iter().enumerate() {
        let y = 688.0 - (i as f32) * 12.0;
        runs.push((72.0, y, id));
        runs.push((220.0, y, bedrooms[i % 4]));
        runs.push((340.0, y, areas[i % 4]));
    }
    runs.push((72.0, 440.0, "TOTAL"));
    runs.push((220.0, 440.0, "20"));
    build_pdf(&[runs])
}

fn zoning_page_pdf() -> Vec<u8> {
    build_pdf(&[vec![
        (72.0, 720.0, "ZONING ANALYSIS"),
        (72.0, 700.0, "LOT AREA: 10,000 SF"),
        (72.0, 685.0, "RESIDENTIAL FAR: 3.44"),
        (72.0, 670.0, "ZONING FLOOR AREA: 34,400 SF"),
    ]])
}

/// Snapshot store that counts writes, for cancellation assertions.
struct CountingStore {
    inner: MemorySnapshotStore,
    puts: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemorySnapshotStore::new(),
            puts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SnapshotStore for CountingStore {
    async fn get(&self, hash: &str) -> Result<Option<PdfExtraction>, CacheError> {
        self.inner.get(hash).await
    }
    async fn put(&self, hash: &str, snapshot: &PdfExtraction) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(hash, snapshot).await
    }
    async fn invalidate(&self, hash: &str) -> Result<(), CacheError> {
        self.inner.invalidate(hash).await
    }
}

/// OCR fake returning canned text per page.
struct FakeOcr {
    responses: HashMap<u32, String>,
    calls: AtomicUsize,
}

impl FakeOcr {
    fn new(responses: HashMap<u32, String>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    fn name(&self) -> &'static str {
        "fake"
    }
    async fn is_available(&self) -> bool {
        true
    }
    async fn ocr_pages(&self, _pdf: &Path, pages: &[u32]) -> Result<Vec<OcrPage>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(pages
            .iter()
            .filter_map(|page| {
                self.responses.get(page).map(|text| OcrPage {
                    page: *page,
                    lines: text.lines().map(String::from).collect(),
                    text: text.clone(),
                })
            })
            .collect())
    }
}

/// AI fake returning a preset guess, or failing on demand.
struct FakeAi {
    guess: Option<AiGuess>,
    calls: AtomicUsize,
}

impl FakeAi {
    fn with_guess(guess: AiGuess) -> Self {
        Self {
            guess: Some(guess),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            guess: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AiExtractor for FakeAi {
    async fn is_available(&self) -> bool {
        true
    }

    async fn extract_from_pages(
        &self,
        _pages: &[planprobe::pdf::PageText],
    ) -> Result<AiGuess, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.guess
            .clone()
            .ok_or_else(|| AiError::Connection("refused".to_string()))
    }

    async fn reconcile(
        &self,
        snapshot: &PdfExtraction,
        _pages: &[planprobe::pdf::PageText],
        parcel: Option<&ParcelContext>,
    ) -> Result<Vec<FieldReconciliation>, AiError> {
        let guess = self
            .guess
            .clone()
            .ok_or_else(|| AiError::Connection("refused".to_string()))?;
        Ok(reconcile_fields(snapshot, &guess, parcel))
    }
}

fn pipeline_with_store(store: Arc<dyn SnapshotStore>) -> ExtractionPipeline {
    ExtractionPipeline::new(store, PipelineConfig::default().with_disable_ai(true))
}

#[tokio::test]
async fn test_clean_unit_schedule_extracts_all_rows() {
    let pipeline = pipeline_with_store(Arc::new(MemorySnapshotStore::new()));
    let request = ExtractRequest::new("schedule.pdf", clean_schedule_pdf());
    let result = pipeline.run(&request, &CancelToken::new()).await.unwrap();

    let snap = &result.snapshot;
    assert_eq!(snap.status, ExtractionStatus::Complete);
    assert_eq!(snap.page_count, 1);
    assert_eq!(snap.totals.total_units, 20);
    assert_eq!(snap.unit_records.len(), 20);
    assert!(snap.warnings.is_empty(), "warnings: {:?}", snap.warnings);
    assert!(snap.errors.is_empty());
    assert!(snap.confidence >= 0.8, "confidence {}", snap.confidence);
    assert!(!snap.ocr_used);
    assert_eq!(snap.totals.by_bedroom_type["studio"], 5);
    assert_eq!(snap.totals.by_bedroom_type["2br"], 5);
    assert!(snap
        .unit_records
        .iter()
        .all(|r| r.source.method == ExtractionMethod::TextTable));
}

#[tokio::test]
async fn test_cache_round_trip_and_force_refresh() {
    let store = Arc::new(MemorySnapshotStore::new());
    let pipeline = pipeline_with_store(store.clone());
    let bytes = clean_schedule_pdf();
    let cancel = CancelToken::new();

    let first = pipeline
        .run(&ExtractRequest::new("a.pdf", bytes.clone()), &cancel)
        .await
        .unwrap();
    assert!(!first.from_cache);

    let second = pipeline
        .run(&ExtractRequest::new("a.pdf", bytes.clone()), &cancel)
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.snapshot, first.snapshot);

    let refreshed = pipeline
        .run(
            &ExtractRequest::new("a.pdf", bytes).with_force_refresh(true),
            &cancel,
        )
        .await
        .unwrap();
    assert!(!refreshed.from_cache);
    assert_eq!(refreshed.snapshot.totals.total_units, 20);
}

#[tokio::test]
async fn test_unparseable_file_yields_empty_snapshot_and_batch_continues() {
    let pipeline = pipeline_with_store(Arc::new(MemorySnapshotStore::new()));
    let requests = vec![
        ExtractRequest::new("broken.pdf", b"definitely not a pdf".to_vec()),
        ExtractRequest::new("good.pdf", clean_schedule_pdf()),
    ];
    let results = pipeline
        .run_batch(requests, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    let broken = &results[0].snapshot;
    assert_eq!(broken.status, ExtractionStatus::Partial);
    assert_eq!(broken.page_count, 0);
    assert!(!broken.errors.is_empty());

    assert_eq!(results[1].snapshot.totals.total_units, 20);
}

#[tokio::test]
async fn test_cancellation_skips_cache_write_and_network_stages() {
    let store = Arc::new(CountingStore::new());
    let ai = Arc::new(FakeAi::failing());
    let ocr = Arc::new(FakeOcr::new(HashMap::new()));
    let pipeline = ExtractionPipeline::new(store.clone(), PipelineConfig::default())
        .with_ai(ai.clone())
        .with_ocr_engine(ocr.clone());
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = pipeline
        .run(&ExtractRequest::new("a.pdf", clean_schedule_pdf()), &cancel)
        .await;
    assert!(outcome.is_err());
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    assert_eq!(ai.calls.load(Ordering::SeqCst), 0);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_scanned_document_goes_through_ocr() {
    // Three pages with no native text at all.
    let bytes = build_pdf(&[vec![], vec![], vec![]]);
    let mut responses = HashMap::new();
    responses.insert(
        1,
        "UNIT 1A  1 BR  500 SF\nUNIT 1B  2 BR  750 SF".to_string(),
    );
    responses.insert(
        2,
        "UNIT 2A  1 BR  500 SF\nUNIT 2B  2 BR  750 SF".to_string(),
    );
    responses.insert(
        3,
        "UNIT 3A  STUDIO  400 SF\nUNIT 3B  3 BR  950 SF".to_string(),
    );
    let ocr = Arc::new(FakeOcr::new(responses));

    let pipeline = pipeline_with_store(Arc::new(MemorySnapshotStore::new()))
        .with_ocr_engine(ocr.clone());
    let result = pipeline
        .run(
            &ExtractRequest::new("scan.pdf", bytes),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let snap = &result.snapshot;
    assert!(snap.ocr_used);
    assert_eq!(snap.status, ExtractionStatus::Complete);
    assert_eq!(snap.totals.total_units, 6);
    assert!(snap
        .unit_records
        .iter()
        .all(|r| r.source.method == ExtractionMethod::Ocr));
    assert!(snap.warnings.iter().any(|w| w.contains("OCR")));
    assert!(snap.confidence <= 0.6, "OCR pages must stay capped");
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ocr_page_cap_respected() {
    let pages: Vec<Vec<(f32, f32, &str)>> = (0..12).map(|_| vec![]).collect();
    let bytes = build_pdf(&pages);
    let responses: HashMap<u32, String> = (1..=12)
        .map(|p| (p, format!("UNIT {}A  1 BR  500 SF", p)))
        .collect();
    let ocr = Arc::new(FakeOcr::new(responses));

    let store = Arc::new(MemorySnapshotStore::new());
    let config = PipelineConfig::default()
        .with_disable_ai(true)
        .with_max_ocr_pages(4);
    let pipeline = ExtractionPipeline::new(store, config).with_ocr_engine(ocr.clone());

    let result = pipeline
        .run(&ExtractRequest::new("big.pdf", bytes), &CancelToken::new())
        .await
        .unwrap();

    // Only the first four pages were OCR'd.
    assert_eq!(result.snapshot.totals.total_units, 4);
}

#[tokio::test]
async fn test_zoning_recipe_with_parcel_passes_gates() {
    let pipeline = pipeline_with_store(Arc::new(MemorySnapshotStore::new()));
    let parcel = ParcelContext {
        bbl: Some("3012340056".to_string()),
        lot_area: Some(10_000.0),
        resid_far: Some(3.44),
        building_area: None,
    };
    let result = pipeline
        .run(
            &ExtractRequest::new("zoning.pdf", zoning_page_pdf()).with_parcel(parcel),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let snap = &result.snapshot;
    let lot = snap.zoning.lot_area.as_ref().expect("lot area extracted");
    assert_eq!(lot.value, 10_000.0);
    assert_eq!(lot.page_number, Some(1));
    assert_eq!(snap.zoning.resid_far.as_ref().unwrap().value, 3.44);
    assert_eq!(
        snap.zoning.zoning_floor_area.as_ref().unwrap().value,
        34_400.0
    );

    for field in ["lot_area", "resid_far", "zoning_floor_area"] {
        let gate = snap.gates.iter().find(|g| g.field == field).unwrap();
        assert_eq!(gate.status, GateStatus::Pass, "field {}", field);
    }
    assert!(result.cross_check.is_some());
}

#[tokio::test]
async fn test_zoning_figures_never_become_unit_records() {
    // A pure zoning-analysis sheet has SF figures on every line but no
    // dwelling units; the fallback parsers must leave the count at zero.
    let pipeline = pipeline_with_store(Arc::new(MemorySnapshotStore::new()));
    let result = pipeline
        .run(
            &ExtractRequest::new("zoning.pdf", zoning_page_pdf()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let snap = &result.snapshot;
    assert_eq!(snap.totals.total_units, 0, "records: {:?}", snap.unit_records);
    assert!(snap.unit_records.is_empty());
    assert_eq!(snap.zoning.lot_area.as_ref().unwrap().value, 10_000.0);
}

#[tokio::test]
async fn test_unrecognized_page_still_contributes_zoning_figures() {
    // No sheet title anywhere, so classification stays below the recipe
    // threshold; the figures must come through the generic fallback.
    let bytes = build_pdf(&[vec![
        (72.0, 700.0, "LOT AREA: 10,000 SF"),
        (72.0, 685.0, "RESIDENTIAL FAR: 3.44"),
        (72.0, 670.0, "ZONING FLOOR AREA: 34,400 SF"),
    ]]);
    let pipeline = pipeline_with_store(Arc::new(MemorySnapshotStore::new()));
    let result = pipeline
        .run(&ExtractRequest::new("plain.pdf", bytes), &CancelToken::new())
        .await
        .unwrap();

    let snap = &result.snapshot;
    let lot = snap.zoning.lot_area.as_ref().expect("lot area extracted");
    assert_eq!(lot.value, 10_000.0);
    assert_eq!(lot.source, "text_fallback");
    assert_eq!(snap.zoning.resid_far.as_ref().unwrap().value, 3.44);
    assert_eq!(
        snap.zoning.zoning_floor_area.as_ref().unwrap().value,
        34_400.0
    );
    assert_eq!(snap.totals.total_units, 0);
}

#[tokio::test]
async fn test_ai_disagreement_raises_conflicting_gate() {
    let ai = Arc::new(FakeAi::with_guess(AiGuess {
        lot_area: Some(15_000.0),
        ..AiGuess::default()
    }));
    let store = Arc::new(MemorySnapshotStore::new());
    let pipeline = ExtractionPipeline::new(store, PipelineConfig::default()).with_ai(ai.clone());

    let result = pipeline
        .run(
            &ExtractRequest::new("zoning.pdf", zoning_page_pdf()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let snap = &result.snapshot;
    assert!(snap.ai_used);
    assert_eq!(snap.ai_guess.as_ref().unwrap().lot_area, Some(15_000.0));
    let gate = snap.gates.iter().find(|g| g.field == "lot_area").unwrap();
    assert_eq!(gate.status, GateStatus::Conflicting);
    assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ai_failure_degrades_to_rule_based_result() {
    let store = Arc::new(MemorySnapshotStore::new());
    let pipeline = ExtractionPipeline::new(store, PipelineConfig::default())
        .with_ai(Arc::new(FakeAi::failing()));

    let result = pipeline
        .run(
            &ExtractRequest::new("zoning.pdf", zoning_page_pdf()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let snap = &result.snapshot;
    assert!(!snap.ai_used);
    assert!(snap.ai_guess.is_none());
    assert!(snap.warnings.iter().any(|w| w.contains("AI")));
    // The rule-based figures survive.
    assert_eq!(snap.zoning.lot_area.as_ref().unwrap().value, 10_000.0);
}

#[tokio::test]
async fn test_page_type_override_forces_recipe() {
    // No zoning keywords anywhere, so the heuristic finds nothing and the
    // figure arrives via the generic fallback; the caller's override
    // routes the page through the zoning recipe instead. The near-empty
    // page also qualifies for OCR, so pin a quiet fake engine.
    let bytes = build_pdf(&[vec![(72.0, 700.0, "LOT AREA: 12,000 SF")]]);
    let pipeline = pipeline_with_store(Arc::new(MemorySnapshotStore::new()))
        .with_ocr_engine(Arc::new(FakeOcr::new(HashMap::new())));

    let plain = pipeline
        .run(
            &ExtractRequest::new("plain.pdf", bytes.clone()),
            &CancelToken::new(),
        )
        .await
        .unwrap();
    let lot = plain.snapshot.zoning.lot_area.as_ref().unwrap();
    assert_eq!(lot.value, 12_000.0);
    assert_eq!(lot.source, "text_fallback");

    let forced = pipeline
        .run(
            &ExtractRequest::new("forced.pdf", bytes)
                .with_force_refresh(true)
                .with_page_override(1, PageType::ZoningSchedule),
            &CancelToken::new(),
        )
        .await
        .unwrap();
    let lot = forced.snapshot.zoning.lot_area.as_ref().unwrap();
    assert_eq!(lot.value, 12_000.0);
    assert_eq!(lot.source, "zoning_schedule");
}

#[tokio::test]
async fn test_verify_pass_reconciles_without_rerunning_pipeline() {
    let ai = Arc::new(FakeAi::with_guess(AiGuess {
        lot_area: Some(10_050.0),
        resid_far: Some(3.44),
        ..AiGuess::default()
    }));
    let store = Arc::new(MemorySnapshotStore::new());
    let pipeline =
        ExtractionPipeline::new(store, PipelineConfig::default()).with_ai(ai.clone());
    let bytes = zoning_page_pdf();
    let cancel = CancelToken::new();

    let result = pipeline
        .run(&ExtractRequest::new("zoning.pdf", bytes.clone()), &cancel)
        .await
        .unwrap();

    let reconciliations = pipeline
        .verify(&result.snapshot, &bytes, None, &cancel)
        .await
        .unwrap();

    let lot = reconciliations
        .iter()
        .find(|r| r.field == "lot_area")
        .unwrap();
    assert!(lot.agrees);
    let far = reconciliations
        .iter()
        .find(|r| r.field == "resid_far")
        .unwrap();
    assert!(far.agrees);
}
