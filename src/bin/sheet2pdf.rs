//! CLI binary for sheet2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sheet2pdf::{
    generate_to_file, ChromeEngine, MergeStrategy, OutputSummary, PipelineConfig,
    PipelineProgressCallback, ProgressCallback, Sheet2PdfError, UploadRequest,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the chunks, one log line per
/// rendered chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-chunk wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    pages: AtomicUsize,
}

impl CliProgressCallback {
    /// Start as a spinner; `on_pipeline_start` switches to a bar once the
    /// chunk count is known.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading spreadsheet…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            pages: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, chunk: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&chunk))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_pipeline_start(&self, total_rows: usize, total_chunks: usize) {
        self.activate_bar(total_chunks);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_rows} rows in {total_chunks} chunks…"))
        ));
    }

    fn on_chunk_start(&self, chunk_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(chunk_num, Instant::now());
        }
        self.bar.set_message(format!("chunk {chunk_num}"));
    }

    fn on_chunk_complete(&self, chunk_num: usize, total: usize, pages: usize) {
        let secs = self.elapsed_secs(chunk_num);
        self.pages.fetch_add(pages, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            chunk_num,
            total,
            dim(&format!("{pages:>4} pages")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(chunk_num);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            chunk_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.abandon();
    }

    fn on_pipeline_complete(&self, total_chunks: usize, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} chunks merged into {} pages",
            green("✔"),
            bold(&total_chunks.to_string()),
            bold(&total_pages.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One PDF of receipts from an Excel sheet
  sheet2pdf rows.xlsx --project "Apollo" --date 2024-05-01

  # Choose the output file and a smaller chunk size
  sheet2pdf rows.csv --project Apollo --date 2024-05-01 -o apollo.pdf --chunk-size 200

  # Custom Handlebars receipt template
  sheet2pdf rows.xlsx --project Apollo --date 2024-05-01 --template receipt.hbs

  # JSON summary for scripts
  sheet2pdf --json rows.xlsx --project Apollo --date 2024-05-01 > summary.json

INPUT:
  .xlsx, .xls and .csv are accepted, up to 20 MiB. Only the first sheet is
  read; the first row holds the column names. The input file is never
  modified or deleted.

TEMPLATES:
  A template receives: project, date, columns, rows[].number,
  rows[].values, rows[].cells[].column, rows[].cells[].value, chunk,
  total_chunks and first_row_number.

ENVIRONMENT VARIABLES:
  SHEET2PDF_CHROME        Path to the Chrome/Chromium executable
  SHEET2PDF_WORK_DIR      Directory for intermediate files
  RUST_LOG                Override the log filter (e.g. sheet2pdf=debug)
"#;

/// Render spreadsheet rows as receipts and merge them into a single PDF.
#[derive(Parser, Debug)]
#[command(
    name = "sheet2pdf",
    version,
    about = "Render spreadsheet rows as receipts and merge them into a single PDF",
    long_about = "Render every row of a spreadsheet (.xlsx, .xls, .csv) as a receipt using \
headless Chrome, in chunks of a few hundred rows, and merge the chunk PDFs into one file \
in row order.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Spreadsheet to render (.xlsx, .xls or .csv).
    input: PathBuf,

    /// Project label printed on every receipt.
    #[arg(long, env = "SHEET2PDF_PROJECT")]
    project: String,

    /// Date label printed on every receipt.
    #[arg(long, env = "SHEET2PDF_DATE")]
    date: String,

    /// Write the PDF here (default: ./receipts-<uuid>.pdf).
    #[arg(short, long, env = "SHEET2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Rows per rendered chunk.
    #[arg(long, env = "SHEET2PDF_CHUNK_SIZE", default_value_t = 400,
          value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// Per-chunk render timeout in seconds.
    #[arg(long, env = "SHEET2PDF_RENDER_TIMEOUT", default_value_t = 120)]
    render_timeout: u64,

    /// Whole-request timeout in seconds.
    #[arg(long, env = "SHEET2PDF_REQUEST_TIMEOUT", default_value_t = 600)]
    request_timeout: u64,

    /// Extra render attempts per chunk after a failure.
    #[arg(long, env = "SHEET2PDF_RENDER_RETRIES", default_value_t = 0)]
    render_retries: u32,

    /// Where the growing PDF is kept between chunks.
    #[arg(long, env = "SHEET2PDF_MERGE", value_enum, default_value = "disk")]
    merge: MergeArg,

    /// Handlebars receipt template (default: built-in).
    #[arg(long, env = "SHEET2PDF_TEMPLATE")]
    template: Option<PathBuf>,

    /// Chrome/Chromium executable (default: auto-detect).
    #[arg(long, env = "SHEET2PDF_CHROME")]
    chrome: Option<PathBuf>,

    /// Directory for intermediate files (default: system temp dir).
    #[arg(long, env = "SHEET2PDF_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Print a JSON summary to stdout.
    #[arg(long, env = "SHEET2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SHEET2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SHEET2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SHEET2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum MergeArg {
    Disk,
    Memory,
}

impl From<MergeArg> for MergeStrategy {
    fn from(v: MergeArg) -> Self {
        match v {
            MergeArg::Disk => MergeStrategy::Disk,
            MergeArg::Memory => MergeStrategy::InMemory,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless --verbose is set.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let mut engine = ChromeEngine::new();
    if let Some(ref chrome) = cli.chrome {
        engine = engine.executable(chrome);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    // The pipeline deletes its upload, so it gets a copy of the input.
    let request = stage_input(&cli, &config).await?;
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("receipts-{}.pdf", uuid_stem())));

    let stats = generate_to_file(request, &output_path, &engine, &config)
        .await
        .context("Generation failed")?;

    if cli.json {
        let summary = OutputSummary {
            output: output_path.clone(),
            stats,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {} rows  {} pages  {}ms  →  {}",
            green("✔"),
            stats.total_rows,
            stats.total_pages,
            stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        if stats.ignored_sheets > 0 {
            eprintln!(
                "   {}",
                dim(&format!(
                    "{} additional sheet(s) ignored; only '{}' was rendered",
                    stats.ignored_sheets, stats.sheet_name
                ))
            );
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let chunk_size = usize::try_from(cli.chunk_size).context("Chunk size is too large")?;
    let mut builder = PipelineConfig::builder()
        .chunk_size(chunk_size)
        .render_timeout_secs(cli.render_timeout)
        .request_timeout_secs(cli.request_timeout)
        .render_retries(cli.render_retries)
        .merge_strategy(cli.merge.clone().into());

    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(ref template) = cli.template {
        builder = builder.template_path(template);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Copy the input into the work directory as a pipeline-owned upload.
///
/// Inputs over `max_upload_bytes` are refused before they are read.
async fn stage_input(cli: &Cli, config: &PipelineConfig) -> Result<UploadRequest> {
    let work_dir = config.work_dir.as_path();
    let size = tokio::fs::metadata(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?
        .len();
    if size > config.max_upload_bytes {
        return Err(Sheet2PdfError::UploadTooLarge {
            size,
            limit: config.max_upload_bytes,
        })
        .context("Failed to stage input");
    }
    let bytes = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let original_name = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tokio::fs::create_dir_all(work_dir)
        .await
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;
    let work_dir = work_dir.to_path_buf();
    let project = cli.project.clone();
    let date = cli.date.clone();

    tokio::task::spawn_blocking(move || {
        UploadRequest::from_bytes(&bytes, original_name, project, date, &work_dir)
    })
    .await
    .context("Staging task panicked")?
    .context("Failed to stage input")
}

fn uuid_stem() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
