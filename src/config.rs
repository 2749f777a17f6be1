//! Configuration types for spreadsheet-to-PDF generation.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct holds every knob so a config can
//! be shared across concurrent requests, logged, and diffed between runs.

use crate::error::Sheet2PdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Rows per rendered chunk when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 400;

/// Upload size cap: 20 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Extensions accepted by the upload filter.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 3] = [".xlsx", ".xls", ".csv"];

/// Configuration for one spreadsheet-to-PDF request.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use sheet2pdf::{MergeStrategy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .chunk_size(250)
///     .render_timeout_secs(60)
///     .merge_strategy(MergeStrategy::InMemory)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 250);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rows rendered per engine call. Must be > 0. Default: 400.
    ///
    /// Bounds the size of each generated markup page, and therefore the
    /// engine's memory use, independently of the spreadsheet size.
    pub chunk_size: usize,

    /// Maximum accepted upload size in bytes. Default: 20 MiB.
    pub max_upload_bytes: u64,

    /// Accepted file extensions, lower-case with leading dot.
    /// Default: `.xlsx`, `.xls`, `.csv`.
    pub allowed_extensions: Vec<String>,

    /// Per-chunk render bound in seconds. Default: 120.
    ///
    /// Headless browsers can hang on a page that never settles. Expiry fails
    /// the whole request rather than skipping the chunk.
    pub render_timeout_secs: u64,

    /// Overall request deadline in seconds, covering parsing, rendering and
    /// merging. Default: 600.
    pub request_timeout_secs: u64,

    /// Extra render attempts per chunk after a failure. Default: 0.
    pub render_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Delay between delivery and deletion of the artifact. Default: 30.
    pub grace_period_secs: u64,

    /// Directory for temp uploads and merged artifacts.
    /// Default: the system temp directory.
    pub work_dir: PathBuf,

    /// How per-chunk documents are accumulated. Default: [`MergeStrategy::Disk`].
    pub merge_strategy: MergeStrategy,

    /// Paper size, margins and background printing.
    pub page_setup: PageSetup,

    /// Handlebars template replacing the built-in receipt template.
    ///
    /// Chrome prints once the page's `load` event fires, not at network
    /// idle, so resources fetched later (web fonts loaded by CSS, script
    /// inserted images) may be missing. Inline them.
    pub template_path: Option<PathBuf>,

    /// Optional per-chunk progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            render_timeout_secs: 120,
            request_timeout_secs: 600,
            render_retries: 0,
            retry_backoff_ms: 500,
            grace_period_secs: 30,
            work_dir: std::env::temp_dir(),
            merge_strategy: MergeStrategy::default(),
            page_setup: PageSetup::default(),
            template_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("chunk_size", &self.chunk_size)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("render_retries", &self.render_retries)
            .field("grace_period_secs", &self.grace_period_secs)
            .field("work_dir", &self.work_dir)
            .field("merge_strategy", &self.merge_strategy)
            .field("page_setup", &self.page_setup)
            .field("template_path", &self.template_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when `extension` (with or without leading dot, any case) is accepted.
    pub fn allows_extension(&self, extension: &str) -> bool {
        let ext = normalise_extension(extension);
        self.allowed_extensions.iter().any(|a| *a == ext)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = extensions
            .into_iter()
            .map(|e| normalise_extension(e.as_ref()))
            .collect();
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs.max(1);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn render_retries(mut self, n: u32) -> Self {
        self.config.render_retries = n.min(5);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn grace_period_secs(mut self, secs: u64) -> Self {
        self.config.grace_period_secs = secs;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.config.merge_strategy = strategy;
        self
    }

    pub fn page_setup(mut self, setup: PageSetup) -> Self {
        self.config.page_setup = setup;
        self
    }

    /// Use a custom receipt template; see [`PipelineConfig::template_path`]
    /// for what the renderer waits for.
    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.template_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Sheet2PdfError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(Sheet2PdfError::InvalidConfig(
                "Chunk size must be ≥ 1".into(),
            ));
        }
        if c.allowed_extensions.is_empty() {
            return Err(Sheet2PdfError::InvalidConfig(
                "At least one file extension must be allowed".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(Sheet2PdfError::InvalidConfig(
                "Upload size limit must be > 0".into(),
            ));
        }
        let p = &c.page_setup;
        if p.width_mm <= p.margin_left_mm + p.margin_right_mm
            || p.height_mm <= p.margin_top_mm + p.margin_bottom_mm
        {
            return Err(Sheet2PdfError::InvalidConfig(format!(
                "Margins leave no printable area on a {}×{} mm page",
                p.width_mm, p.height_mm
            )));
        }
        Ok(self.config)
    }
}

/// Lower-case an extension and make sure it has a leading dot.
fn normalise_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

// ── Enums & value types ─────────────────────────────────────────────────

/// How successive chunk documents are combined into the artifact.
///
/// | Strategy | Peak memory | Disk I/O |
/// |----------|-------------|----------|
/// | `Disk` | one artifact + one chunk | read + rewrite per chunk |
/// | `InMemory` | whole output | one write at the end |
///
/// The page order of the result is identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Read-modify-write the artifact on disk once per chunk. (default)
    #[default]
    Disk,
    /// Keep the accumulating document in memory, flush once.
    InMemory,
}

/// Paper geometry handed to the rendering engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSetup {
    pub width_mm: f64,
    pub height_mm: f64,
    pub margin_top_mm: f64,
    pub margin_bottom_mm: f64,
    pub margin_left_mm: f64,
    pub margin_right_mm: f64,
    /// Include CSS backgrounds (table stripes, header fills).
    pub print_background: bool,
}

impl PageSetup {
    /// A4 portrait with 10 mm margins and backgrounds on.
    pub fn a4() -> Self {
        Self {
            width_mm: 210.0,
            height_mm: 297.0,
            margin_top_mm: 10.0,
            margin_bottom_mm: 10.0,
            margin_left_mm: 10.0,
            margin_right_mm: 10.0,
            print_background: true,
        }
    }

    /// Convert millimetres to inches (the DevTools print unit).
    pub fn inches(mm: f64) -> f64 {
        mm / 25.4
    }
}

impl Default for PageSetup {
    fn default() -> Self {
        Self::a4()
    }
}
