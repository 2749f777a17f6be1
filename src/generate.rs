//! Request orchestration: one upload in, one merged PDF out.
//!
//! A request moves through
//! `Validating → Normalizing → Rendering(i) → Merging(i) → Finalizing → Done`
//! or ends in `Failed`. Chunks are processed strictly one after another:
//! chunk *i* is rendered and merged before chunk *i+1* starts, so memory
//! stays bounded by one chunk no matter how large the sheet is.
//!
//! ## Cleanup guarantees
//!
//! Whatever the outcome, the uploaded file is deleted and the engine
//! session (if one was opened) is closed. On failure the partial artifact
//! is deleted too. Cleanup problems are logged at `warn` and never replace
//! the error the caller sees.

use crate::config::PipelineConfig;
use crate::delivery;
use crate::engine::{EngineSession, RenderEngine};
use crate::error::{CleanupError, Sheet2PdfError};
use crate::output::{PipelineOutput, PipelineStats};
use crate::pipeline::chunk::{chunk_rows, RowChunk};
use crate::pipeline::input::{self, UploadRequest};
use crate::pipeline::merge::IncrementalMerger;
use crate::pipeline::normalize;
use crate::pipeline::remove_file;
use crate::pipeline::render::render_chunk;
use crate::pipeline::template::ReceiptTemplate;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Instant;
use tokio::time::{timeout_at, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Generate the merged receipt PDF for one upload.
///
/// This is the primary entry point for the library. The request is consumed:
/// its upload file is deleted before this function returns.
///
/// # Arguments
/// * `request` — the uploaded spreadsheet and its two labels
/// * `engine`  — launches the rendering session (at most once)
/// * `config`  — pipeline configuration
///
/// # Returns
/// The artifact in `config.work_dir`, named `receipts-<uuid>.pdf`. The caller
/// owns it and should pass it to [`crate::delivery`].
///
/// # Errors
/// Any stage failure aborts the whole request; see
/// [`Sheet2PdfError::kind`] for the classification.
pub async fn generate(
    request: UploadRequest,
    engine: &dyn RenderEngine,
    config: &PipelineConfig,
) -> Result<PipelineOutput, Sheet2PdfError> {
    let total_start = Instant::now();
    info!(
        "Generating receipts for '{}' ({})",
        request.original_name, request.project_label
    );

    let mut run = RequestRun::new(engine, config);
    let result = run.execute(&request).await;

    run.scope.close().await;
    if let Err(e) = remove_file(&request.source_path).await {
        e.log();
    }

    match result {
        Ok(mut output) => {
            run.transition(Stage::Done);
            output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
            info!(
                "Generated {} ({} rows, {} chunks, {} pages) in {}ms",
                output.artifact.file_name,
                output.stats.total_rows,
                output.stats.total_chunks,
                output.stats.total_pages,
                output.stats.total_duration_ms
            );
            Ok(output)
        }
        Err(e) => {
            run.transition(Stage::Failed);
            warn!("Request failed: {}", e);
            if let Some(merger) = run.merger.take() {
                if let Err(ce) = merger.discard().await {
                    ce.log();
                }
            }
            Err(e)
        }
    }
}

/// Generate from spreadsheet bytes held in memory.
///
/// The bytes are written to a temp upload in `config.work_dir` (keeping the
/// extension of `original_name`), which the pipeline deletes as usual.
///
/// # Example
/// ```rust,no_run
/// use sheet2pdf::{generate_from_bytes, ChromeEngine, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("rows.xlsx")?;
/// let config = PipelineConfig::default();
/// let output = generate_from_bytes(
///     &bytes, "rows.xlsx", "Apollo", "2024-05-01", &ChromeEngine::new(), &config,
/// ).await?;
/// println!("{} pages at {}", output.stats.total_pages, output.artifact.path.display());
/// # Ok(())
/// # }
/// ```
pub async fn generate_from_bytes(
    bytes: &[u8],
    original_name: &str,
    project_label: &str,
    date_label: &str,
    engine: &dyn RenderEngine,
    config: &PipelineConfig,
) -> Result<PipelineOutput, Sheet2PdfError> {
    let request = UploadRequest::from_bytes(
        bytes,
        original_name,
        project_label,
        date_label,
        &config.work_dir,
    )?;
    generate(request, engine, config).await
}

/// Generate and move the artifact to `output_path`.
///
/// The copy is atomic (temp file + rename) and the artifact in the work
/// directory is deleted straight away.
pub async fn generate_to_file(
    request: UploadRequest,
    output_path: impl AsRef<Path>,
    engine: &dyn RenderEngine,
    config: &PipelineConfig,
) -> Result<PipelineStats, Sheet2PdfError> {
    let output = generate(request, engine, config).await?;
    delivery::deliver_to_path(&output.artifact, output_path.as_ref()).await?;
    Ok(output.stats)
}

// ── Internal state ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Validating,
    Normalizing,
    /// 1-based chunk number.
    Rendering(usize),
    Merging(usize),
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validating => f.write_str("validating"),
            Stage::Normalizing => f.write_str("normalizing"),
            Stage::Rendering(i) => write!(f, "rendering({i})"),
            Stage::Merging(i) => write!(f, "merging({i})"),
            Stage::Finalizing => f.write_str("finalizing"),
            Stage::Done => f.write_str("done"),
            Stage::Failed => f.write_str("failed"),
        }
    }
}

/// Owns the engine session of one request; launched lazily, closed once.
struct EngineScope<'e> {
    engine: &'e dyn RenderEngine,
    session: Option<Box<dyn EngineSession>>,
}

impl<'e> EngineScope<'e> {
    fn new(engine: &'e dyn RenderEngine) -> Self {
        Self {
            engine,
            session: None,
        }
    }

    async fn session(&mut self) -> Result<&mut Box<dyn EngineSession>, Sheet2PdfError> {
        if self.session.is_none() {
            debug!("Launching {} engine", self.engine.name());
            let session = self
                .engine
                .launch()
                .await
                .map_err(|e| Sheet2PdfError::EngineLaunch(e.to_string()))?;
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| Sheet2PdfError::Internal("engine session missing".into()))
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Closing {} engine", self.engine.name());
            if let Err(e) = session.close().await {
                CleanupError::EngineClose(e.to_string()).log();
            }
        }
    }
}

struct RequestRun<'a> {
    config: &'a PipelineConfig,
    scope: EngineScope<'a>,
    merger: Option<IncrementalMerger>,
    stage: Stage,
    deadline: tokio::time::Instant,
}

/// Await `fut` unless the request deadline passes first.
async fn within<T>(
    deadline: tokio::time::Instant,
    secs: u64,
    fut: impl Future<Output = Result<T, Sheet2PdfError>>,
) -> Result<T, Sheet2PdfError> {
    match timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Sheet2PdfError::DeadlineExceeded { secs }),
    }
}

impl<'a> RequestRun<'a> {
    fn new(engine: &'a dyn RenderEngine, config: &'a PipelineConfig) -> Self {
        Self {
            config,
            scope: EngineScope::new(engine),
            merger: None,
            stage: Stage::Validating,
            deadline: tokio::time::Instant::now()
                + Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn transition(&mut self, next: Stage) {
        debug!("{} → {}", self.stage, next);
        self.stage = next;
    }

    fn check_deadline(&self) -> Result<(), Sheet2PdfError> {
        if tokio::time::Instant::now() >= self.deadline {
            Err(Sheet2PdfError::DeadlineExceeded {
                secs: self.config.request_timeout_secs,
            })
        } else {
            Ok(())
        }
    }

    async fn execute(&mut self, request: &UploadRequest) -> Result<PipelineOutput, Sheet2PdfError> {
        let config = self.config;
        let secs = config.request_timeout_secs;

        // ── Validating ───────────────────────────────────────────────────
        let upload = input::validate(request, config).await?;

        // ── Normalizing ──────────────────────────────────────────────────
        self.transition(Stage::Normalizing);
        let sheet = within(self.deadline, secs, normalize::normalize(&upload)).await?;
        if sheet.rows.is_empty() {
            return Err(Sheet2PdfError::EmptySpreadsheet);
        }

        let template = ReceiptTemplate::load(config).await?;
        let chunks = chunk_rows(&sheet.rows, config.chunk_size, &upload.labels)?;
        let total = chunks.len();
        info!(
            "Sheet '{}': {} rows × {} columns → {} chunks of ≤{}",
            sheet.sheet_name,
            sheet.rows.len(),
            sheet.columns.len(),
            total,
            config.chunk_size
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_pipeline_start(sheet.rows.len(), total);
        }

        let artifact_path = config
            .work_dir
            .join(format!("receipts-{}.pdf", Uuid::new_v4()));
        self.merger = Some(IncrementalMerger::new(artifact_path, config.merge_strategy));

        // ── Rendering / Merging ──────────────────────────────────────────
        let mut timings = Timings::default();
        for chunk in &chunks {
            let n = chunk.index + 1;
            if let Some(ref cb) = config.progress_callback {
                cb.on_chunk_start(n, total);
            }
            match self
                .process_chunk(chunk, &sheet.columns, total, &template, &mut timings)
                .await
            {
                Ok(pages) => {
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_chunk_complete(n, total, pages);
                    }
                }
                Err(e) => {
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_chunk_error(n, total, &e.to_string());
                    }
                    return Err(e);
                }
            }
        }

        // ── Finalizing ───────────────────────────────────────────────────
        self.transition(Stage::Finalizing);
        let merger = self
            .merger
            .as_mut()
            .ok_or_else(|| Sheet2PdfError::Internal("merger missing".into()))?;
        let artifact = merger.finalize().await?;
        if let Some(ref cb) = config.progress_callback {
            cb.on_pipeline_complete(total, artifact.page_count);
        }

        // Success: the artifact now belongs to the caller.
        self.merger = None;

        let stats = PipelineStats {
            total_rows: sheet.rows.len(),
            total_chunks: total,
            total_pages: artifact.page_count,
            columns: sheet.columns,
            sheet_name: sheet.sheet_name,
            ignored_sheets: sheet.ignored_sheets,
            render_duration_ms: timings.render_ms,
            merge_duration_ms: timings.merge_ms,
            total_duration_ms: 0,
        };
        Ok(PipelineOutput { artifact, stats })
    }

    /// Render chunk `i`, then merge it. Returns the pages it added.
    async fn process_chunk(
        &mut self,
        chunk: &RowChunk<'_>,
        columns: &[String],
        total: usize,
        template: &ReceiptTemplate,
        timings: &mut Timings,
    ) -> Result<usize, Sheet2PdfError> {
        let n = chunk.index + 1;
        let config = self.config;
        let secs = config.request_timeout_secs;

        self.transition(Stage::Rendering(n));
        let render_start = Instant::now();
        let session = within(self.deadline, secs, self.scope.session()).await?;
        let document = within(
            self.deadline,
            secs,
            render_chunk(session.as_mut(), template, chunk, columns, total, config),
        )
        .await?;
        timings.render_ms += render_start.elapsed().as_millis() as u64;

        // Merging is never interrupted half-way; the deadline is checked
        // before it starts.
        self.check_deadline()?;
        self.transition(Stage::Merging(n));
        let merge_start = Instant::now();
        let merger = self
            .merger
            .as_mut()
            .ok_or_else(|| Sheet2PdfError::Internal("merger missing".into()))?;
        let pages = merger.append(document).await?;
        timings.merge_ms += merge_start.elapsed().as_millis() as u64;

        Ok(pages)
    }
}

#[derive(Default)]
struct Timings {
    render_ms: u64,
    merge_ms: u64,
}
