//! # sheet2pdf
//!
//! Turn an uploaded spreadsheet into one merged PDF of receipts.
//!
//! ## Why chunks?
//!
//! Printing thousands of rows as a single HTML page makes a headless browser
//! slow and memory-hungry, and one bad page takes the whole job down with
//! it. Instead the rows are split into fixed-size chunks (400 by default),
//! each chunk is printed to its own small PDF, and the PDFs are appended to
//! a single artifact in order. Peak memory is bounded by one chunk.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (.xlsx / .xls / .csv) + project + date
//!  │
//!  ├─ 1. Validate   labels present, extension allowed, size ≤ 20 MiB
//!  ├─ 2. Normalize  first sheet → trimmed string rows (spawn_blocking)
//!  ├─ 3. Chunk      ceil(rows / 400) ordered slices
//!  ├─ 4. Render     Handlebars receipt markup → headless Chrome → PDF
//!  ├─ 5. Merge      append each chunk's pages to receipts-<uuid>.pdf
//!  └─ 6. Deliver    stream to the client, delete after a grace period
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sheet2pdf::{generate_to_file, ChromeEngine, PipelineConfig, UploadRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let request = UploadRequest::new("rows.xlsx", "Apollo", "2024-05-01");
//!     let stats = generate_to_file(request, "receipts.pdf", &ChromeEngine::new(), &config).await?;
//!     eprintln!("{} rows → {} pages", stats.total_rows, stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! Note that the pipeline owns the upload: `rows.xlsx` is deleted once the
//! request finishes, successfully or not.
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `sheet2pdf` binary (clap + indicatif + tracing-subscriber) |
//! | `chrome` | on      | [`ChromeEngine`], driving Chrome/Chromium via chromiumoxide |
//! | `server` | off     | Enables the `sheet2pdf-server` binary and [`server`] (axum) |
//!
//! Disable the defaults to embed the library with your own [`RenderEngine`]:
//! ```toml
//! sheet2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{Authenticator, Principal, StaticAuthenticator};
pub use config::{MergeStrategy, PageSetup, PipelineConfig, PipelineConfigBuilder};
pub use delivery::{deliver, deliver_to_path, download_name};
#[cfg(feature = "chrome")]
pub use engine::chrome::ChromeEngine;
pub use engine::{EngineError, EngineSession, RenderEngine};
pub use error::{CleanupError, ErrorKind, Sheet2PdfError};
pub use generate::{generate, generate_from_bytes, generate_to_file};
pub use output::{OutputSummary, PipelineOutput, PipelineStats};
pub use pipeline::input::UploadRequest;
pub use pipeline::merge::MergedArtifact;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
