//! Error types for the sheet2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Sheet2PdfError`] — **Fatal**: the request cannot produce an artifact
//!   (missing field, unreadable spreadsheet, engine crash, disk full).
//!   Returned as `Err(Sheet2PdfError)` from the `generate*` entry points.
//!   Any failure aborts the whole request: a skipped chunk would silently
//!   drop rows from the merged PDF.
//!
//! * [`CleanupError`] — **Non-fatal**: deleting a temp upload or a partial
//!   artifact, or closing the engine, failed after the fact. These are logged
//!   and never returned, so they can never mask the error the caller needs
//!   to see.
//!
//! Callers that surface errors to end users should use
//! [`Sheet2PdfError::user_message`]: validation problems are shown verbatim,
//! everything else collapses to a generic message.

use std::path::PathBuf;
use thiserror::Error;

/// Message shown to end users for every non-validation failure.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to process file.";

/// Coarse classification of a [`Sheet2PdfError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User-correctable input problem. Message surfaced verbatim.
    Validation,
    /// The spreadsheet could not be read.
    Parse,
    /// The rendering engine failed or timed out on a chunk.
    Render,
    /// Combining per-chunk documents into the artifact failed.
    Merge,
    /// Configuration, deadline or unexpected internal failure.
    Internal,
}

/// All fatal errors returned by the sheet2pdf library.
#[derive(Debug, Error)]
pub enum Sheet2PdfError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// A required text field was empty or whitespace.
    #[error("All fields are required: '{field}' is missing.")]
    MissingField { field: &'static str },

    /// No uploaded file, or the upload is empty.
    #[error("All fields are required: no spreadsheet was uploaded.")]
    MissingUpload,

    /// The upload's extension is not a spreadsheet format.
    #[error("Invalid file type '{extension}'. Allowed: {allowed}.")]
    UnsupportedExtension { extension: String, allowed: String },

    /// The upload exceeds the configured size cap.
    #[error("File too large: {size} bytes (limit {limit} bytes).")]
    UploadTooLarge { size: u64, limit: u64 },

    /// The first sheet has a header but no data rows.
    #[error("The spreadsheet contains no data rows.")]
    EmptySpreadsheet,

    // ── Parse errors ──────────────────────────────────────────────────────
    /// The spreadsheet could not be opened or decoded.
    #[error("Cannot read spreadsheet '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },

    /// The workbook contains no sheets at all.
    #[error("Spreadsheet '{path}' contains no sheets")]
    NoSheets { path: PathBuf },

    // ── Render errors ─────────────────────────────────────────────────────
    /// The rendering engine could not be started.
    #[error("Failed to launch rendering engine: {0}")]
    EngineLaunch(String),

    /// The engine failed to load the markup or print a chunk.
    #[error("Rendering failed for chunk {chunk}: {detail}")]
    RenderFailed { chunk: usize, detail: String },

    /// A chunk did not finish rendering within the per-chunk bound.
    #[error("Rendering chunk {chunk} timed out after {secs}s")]
    RenderTimeout { chunk: usize, secs: u64 },

    /// The receipt template could not be applied to a chunk.
    #[error("Template error for chunk {chunk}: {detail}")]
    Template { chunk: usize, detail: String },

    // ── Merge errors ──────────────────────────────────────────────────────
    /// Combining a chunk document into the artifact failed.
    #[error("Failed to merge chunk {chunk} into '{path}': {detail}")]
    MergeFailed {
        chunk: usize,
        path: PathBuf,
        detail: String,
    },

    /// Reading or writing the artifact file failed.
    #[error("Artifact I/O failed for '{path}': {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config / control errors ──────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The whole request exceeded its deadline.
    #[error("Request exceeded its {secs}s deadline")]
    DeadlineExceeded { secs: u64 },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Sheet2PdfError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField { .. }
            | Self::MissingUpload
            | Self::UnsupportedExtension { .. }
            | Self::UploadTooLarge { .. }
            | Self::EmptySpreadsheet => ErrorKind::Validation,
            Self::Unreadable { .. } | Self::NoSheets { .. } => ErrorKind::Parse,
            Self::EngineLaunch(_)
            | Self::RenderFailed { .. }
            | Self::RenderTimeout { .. }
            | Self::Template { .. } => ErrorKind::Render,
            Self::MergeFailed { .. } | Self::ArtifactIo { .. } => ErrorKind::Merge,
            Self::InvalidConfig(_) | Self::DeadlineExceeded { .. } | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True for user-correctable input problems.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// The text to show an end user: verbatim for validation errors,
    /// [`GENERIC_FAILURE_MESSAGE`] for everything else.
    pub fn user_message(&self) -> String {
        if self.is_validation() {
            self.to_string()
        } else {
            GENERIC_FAILURE_MESSAGE.to_string()
        }
    }
}

/// A best-effort cleanup step that failed.
///
/// Never returned from the public API; logged at `warn` by [`CleanupError::log`].
#[derive(Debug, Error)]
pub enum CleanupError {
    /// Deleting a file (upload or artifact) failed.
    #[error("Failed to delete '{path}': {source}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Closing the rendering engine session failed.
    #[error("Failed to close rendering engine: {0}")]
    EngineClose(String),
}

impl CleanupError {
    /// Emit this error as a warning.
    pub fn log(&self) {
        tracing::warn!("cleanup: {}", self);
    }
}
