//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::ai::{AiExtractor, OllamaAiClient};
use crate::cache::{open_store, FileSnapshotStore};
use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::models::{GateStatus, PageType, ParcelContext};
use crate::ocr::LocalOcrEngine;
use crate::pipeline::{ExtractRequest, ExtractionPipeline, PipelineEvent, PipelineResult};

#[derive(Parser)]
#[command(name = "planprobe")]
#[command(about = "Zoning plan-set PDF extraction and reconciliation")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory for extraction snapshots
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Extract structured data from one or more plan-set PDFs
    Extract {
        /// PDF files to process
        files: Vec<PathBuf>,
        /// Authoritative lot area (sf) for cross-validation
        #[arg(long)]
        lot_area: Option<f64>,
        /// Authoritative residential FAR for cross-validation
        #[arg(long)]
        far: Option<f64>,
        /// Authoritative building area (sf) for cross-validation
        #[arg(long)]
        building_area: Option<f64>,
        /// Borough-Block-Lot identifier, for display
        #[arg(long)]
        bbl: Option<String>,
        /// Re-run the pipeline even when a cached snapshot exists
        #[arg(short, long)]
        force: bool,
        /// Skip the AI extraction stage
        #[arg(long)]
        no_ai: bool,
        /// Force a page's recipe, e.g. "3=zoning_schedule" (repeatable)
        #[arg(long = "page-type", value_name = "PAGE=TYPE")]
        page_types: Vec<String>,
        /// Write the full snapshot JSON to this path (single file only)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the AI verification pass against an extracted document
    Verify {
        /// PDF file whose snapshot should be verified
        file: PathBuf,
        /// Authoritative lot area (sf)
        #[arg(long)]
        lot_area: Option<f64>,
        /// Authoritative residential FAR
        #[arg(long)]
        far: Option<f64>,
    },

    /// Manage the snapshot cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Check availability of external tools and services
    Doctor,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache location and entry count
    Stats,
    /// Delete all cached snapshots
    Clear,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let store = open_store(cli.cache_dir.as_deref());

    match cli.command {
        Commands::Extract {
            files,
            lot_area,
            far,
            building_area,
            bbl,
            force,
            no_ai,
            page_types,
            output,
        } => {
            cmd_extract(
                config,
                store,
                &files,
                parcel_from_args(bbl, lot_area, far, building_area),
                force,
                no_ai,
                &page_types,
                output,
            )
            .await
        }
        Commands::Verify {
            file,
            lot_area,
            far,
        } => cmd_verify(config, store, &file, parcel_from_args(None, lot_area, far, None)).await,
        Commands::Cache { command } => cmd_cache(store, command),
        Commands::Doctor => cmd_doctor(config).await,
    }
}

fn parcel_from_args(
    bbl: Option<String>,
    lot_area: Option<f64>,
    far: Option<f64>,
    building_area: Option<f64>,
) -> Option<ParcelContext> {
    let parcel = ParcelContext {
        bbl,
        lot_area,
        resid_far: far,
        building_area,
    };
    if parcel.is_empty() {
        None
    } else {
        Some(parcel)
    }
}

fn parse_page_overrides(specs: &[String]) -> anyhow::Result<Vec<(u32, PageType)>> {
    let mut overrides = Vec::new();
    for spec in specs {
        let (page, type_name) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected PAGE=TYPE, got {:?}", spec))?;
        let page: u32 = page.trim().parse()?;
        let page_type = match type_name.trim() {
            "zoning_schedule" => PageType::ZoningSchedule,
            "floor_plan" => PageType::FloorPlan,
            "unit_schedule" => PageType::UnitSchedule,
            "cover_sheet" => PageType::CoverSheet,
            other => anyhow::bail!("unknown page type {:?}", other),
        };
        overrides.push((page, page_type));
    }
    Ok(overrides)
}

/// A cancel token wired to Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} cancelling...", style("!").yellow());
            handle.cancel();
        }
    });
    token
}

#[allow(clippy::too_many_arguments)]
async fn cmd_extract(
    config: PipelineConfig,
    store: FileSnapshotStore,
    files: &[PathBuf],
    parcel: Option<ParcelContext>,
    force: bool,
    no_ai: bool,
    page_types: &[String],
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    if files.is_empty() {
        anyhow::bail!("no input files given");
    }
    if output.is_some() && files.len() > 1 {
        anyhow::bail!("--output only supports a single input file");
    }
    let overrides = parse_page_overrides(page_types)?;

    let config = config.with_disable_ai(no_ai);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut pipeline = ExtractionPipeline::new(Arc::new(store), config.clone())
        .with_events(events_tx);
    if !config.disable_ai {
        pipeline = pipeline.with_ai(Arc::new(OllamaAiClient::new(config.ai.clone())));
    }

    let mut requests = Vec::new();
    for file in files {
        let bytes = std::fs::read(file)?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        let mut request = ExtractRequest::new(&name, bytes).with_force_refresh(force);
        if let Some(parcel) = parcel.clone() {
            request = request.with_parcel(parcel);
        }
        for &(page, page_type) in &overrides {
            request = request.with_page_override(page, page_type);
        }
        requests.push(request);
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    let progress = bar.clone();
    let renderer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                PipelineEvent::StageStarted { file_name, stage } => {
                    progress.set_message(format!("{}: {}", file_name, stage.as_str()));
                    progress.tick();
                }
                PipelineEvent::CacheHit { file_name } => {
                    progress.set_message(format!("{}: cached", file_name));
                }
                PipelineEvent::DocumentFinished { file_name, .. } => {
                    progress.set_message(format!("{}: done", file_name));
                }
            }
        }
    });

    let cancel = cancel_on_ctrl_c();
    let results = pipeline.run_batch(requests, &cancel).await;
    bar.finish_and_clear();
    renderer.abort();

    let results = match results {
        Ok(results) => results,
        Err(_) => {
            println!("{} cancelled; nothing was cached", style("!").yellow());
            return Ok(());
        }
    };

    for result in &results {
        print_result(result);
    }

    if let (Some(path), Some(result)) = (output, results.first()) {
        std::fs::write(&path, serde_json::to_vec_pretty(&result.snapshot)?)?;
        println!("\nsnapshot written to {}", path.display());
    }
    Ok(())
}

fn print_result(result: &PipelineResult) {
    let snap = &result.snapshot;
    println!("\n{}", style(&snap.file_name).bold());
    println!("{}", "-".repeat(50));
    println!(
        "{:<20} {}{}",
        "Status:",
        snap.status.as_str(),
        if result.from_cache { " (cached)" } else { "" }
    );
    println!("{:<20} {}", "Pages:", snap.page_count);
    println!("{:<20} {:.2}", "Confidence:", snap.confidence);
    println!("{:<20} {}", "Units:", snap.totals.total_units);

    for (label, field) in [
        ("Lot area:", &snap.zoning.lot_area),
        ("Resid. FAR:", &snap.zoning.resid_far),
        ("Zoning floor area:", &snap.zoning.zoning_floor_area),
        ("Building area:", &snap.zoning.building_area),
        ("Proposed units:", &snap.zoning.proposed_units),
    ] {
        if let Some(f) = field {
            println!(
                "{:<20} {:.1}  ({}, p{}, conf {:.2})",
                label,
                f.value,
                f.source,
                f.page_number.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
                f.confidence
            );
        }
    }

    if !snap.totals.by_bedroom_type.is_empty() {
        let mix: Vec<String> = snap
            .totals
            .by_bedroom_type
            .iter()
            .map(|(k, v)| format!("{} x{}", k, v))
            .collect();
        println!("{:<20} {}", "Unit mix:", mix.join(", "));
    }

    if !snap.gates.is_empty() {
        println!("\n{}", style("Validation gates").bold());
        for gate in &snap.gates {
            let status = match gate.status {
                GateStatus::Pass => style(gate.status.as_str()).green(),
                GateStatus::Warn => style(gate.status.as_str()).yellow(),
                GateStatus::NeedsOverride => style(gate.status.as_str()).red(),
                GateStatus::Conflicting => style(gate.status.as_str()).red().bold(),
            };
            println!("  {:<20} {:<16} {}", gate.field, status, gate.message);
        }
    }

    if let Some(report) = &result.cross_check {
        if let Some(implied) = report.implied_max_units {
            println!(
                "\n{:<20} {} extracted vs ~{} implied by parcel envelope",
                "Cross-check:", report.extracted_units, implied
            );
        }
    }

    for warning in &snap.warnings {
        println!("  {} {}", style("warn:").yellow(), warning);
    }
    for error in &snap.errors {
        println!("  {} {}", style("error:").red(), error);
    }
}

async fn cmd_verify(
    config: PipelineConfig,
    store: FileSnapshotStore,
    file: &PathBuf,
    parcel: Option<ParcelContext>,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let ai = Arc::new(OllamaAiClient::new(config.ai.clone()));
    if !ai.is_available().await {
        anyhow::bail!(
            "AI service at {} is not reachable; verification needs it",
            config.ai.endpoint
        );
    }

    let pipeline = ExtractionPipeline::new(Arc::new(store), config).with_ai(ai);
    let cancel = cancel_on_ctrl_c();

    // Reuse the cached snapshot when one exists; extract otherwise.
    let mut request = ExtractRequest::new(&name, bytes.clone());
    if let Some(parcel) = parcel.clone() {
        request = request.with_parcel(parcel);
    }
    let result = match pipeline.run(&request, &cancel).await {
        Ok(result) => result,
        Err(_) => {
            println!("{} cancelled", style("!").yellow());
            return Ok(());
        }
    };

    let reconciliations = pipeline
        .verify(&result.snapshot, &bytes, parcel.as_ref(), &cancel)
        .await?;

    println!("\n{}", style("AI verification").bold());
    println!("{}", "-".repeat(60));
    for rec in &reconciliations {
        let marker = if rec.agrees {
            style("✓").green()
        } else {
            style("✗").red()
        };
        let show = |v: Option<f64>| v.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "-".into());
        println!(
            "{} {:<20} rule {:<12} ai {:<12} conf {:.2}  {}",
            marker,
            rec.field,
            show(rec.rule_value),
            show(rec.ai_value),
            rec.combined_confidence,
            rec.note
        );
    }
    Ok(())
}

fn cmd_cache(store: FileSnapshotStore, command: CacheCommands) -> anyhow::Result<()> {
    match command {
        CacheCommands::Stats => {
            println!("{:<20} {}", "Entries:", store.count()?);
            Ok(())
        }
        CacheCommands::Clear => {
            store.clear()?;
            println!("{} cache cleared", style("✓").green());
            Ok(())
        }
    }
}

async fn cmd_doctor(config: PipelineConfig) -> anyhow::Result<()> {
    println!("\n{}", style("External tool status").bold());
    println!("{}", "-".repeat(50));

    println!("\n{}", style("Local OCR:").cyan());
    for (tool, available) in LocalOcrEngine::check_tools() {
        let status = if available {
            style("✓ found").green()
        } else {
            style("✗ not found").red()
        };
        println!("  {:<15} {}", tool, status);
    }

    if let Some(endpoint) = &config.ocr.remote_endpoint {
        use crate::ocr::{OcrEngine, RemoteOcrEngine};
        let remote = RemoteOcrEngine::new(endpoint.clone(), config.ocr.raster_dpi);
        let status = if remote.is_available().await {
            style("✓ reachable").green()
        } else {
            style("✗ unreachable").red()
        };
        println!("\n{}", style("Remote OCR:").cyan());
        println!("  {:<15} {}", endpoint, status);
    }

    println!("\n{}", style("AI service:").cyan());
    let ai = OllamaAiClient::new(config.ai.clone());
    let status = if ai.is_available().await {
        style("✓ reachable").green()
    } else {
        style("✗ unreachable").red()
    };
    println!("  {:<15} {} ({})", config.ai.endpoint, status, config.ai.model);

    Ok(())
}
