//! Upload validation: the `Validating` state of the pipeline.
//!
//! Everything here runs before the spreadsheet is opened, so a bad request
//! (missing label, `.docx` upload, oversized file) never reaches the parser
//! or the rendering engine and never creates an artifact.

use crate::config::PipelineConfig;
use crate::error::Sheet2PdfError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One inbound submission: an uploaded spreadsheet plus two header labels.
///
/// The pipeline takes ownership of the request and deletes `source_path`
/// once it has been consumed or the request fails.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Where the uploaded bytes live on disk.
    pub source_path: PathBuf,
    /// Client-supplied file name, used for the extension filter.
    pub original_name: String,
    /// Project label printed on every receipt page.
    pub project_label: String,
    /// Date label printed on every receipt page.
    pub date_label: String,
}

impl UploadRequest {
    /// Build a request for a file already on disk. The original name defaults
    /// to the file name of `source_path`.
    pub fn new(
        source_path: impl Into<PathBuf>,
        project_label: impl Into<String>,
        date_label: impl Into<String>,
    ) -> Self {
        let source_path = source_path.into();
        let original_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            source_path,
            original_name,
            project_label: project_label.into(),
            date_label: date_label.into(),
        }
    }

    /// Override the client-supplied file name.
    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = name.into();
        self
    }

    /// Persist uploaded bytes into `work_dir` under a random name that keeps
    /// the original extension, and build a request for them.
    pub fn from_bytes(
        bytes: &[u8],
        original_name: impl Into<String>,
        project_label: impl Into<String>,
        date_label: impl Into<String>,
        work_dir: &Path,
    ) -> Result<Self, Sheet2PdfError> {
        let original_name = original_name.into();
        let suffix = extension_of(&original_name).unwrap_or_default();

        let mut tmp = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(work_dir)
            .map_err(|e| Sheet2PdfError::Internal(format!("tempfile: {e}")))?;
        tmp.write_all(bytes)
            .map_err(|e| Sheet2PdfError::Internal(format!("tempfile write: {e}")))?;
        // The pipeline owns deletion from here on.
        let (_file, path) = tmp
            .keep()
            .map_err(|e| Sheet2PdfError::Internal(format!("tempfile keep: {e}")))?;

        Ok(Self {
            source_path: path,
            original_name,
            project_label: project_label.into(),
            date_label: date_label.into(),
        })
    }
}

/// The two header strings shared by every chunk of a request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReceiptLabels {
    pub project: String,
    pub date: String,
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub path: PathBuf,
    /// Lower-case extension with leading dot, e.g. `.xlsx`.
    pub extension: String,
    pub size: u64,
    pub labels: ReceiptLabels,
}

/// Lower-case extension (with leading dot) of a file name, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
}

/// Validate labels, upload presence, extension and size.
///
/// Checks run cheapest-first; the file is only stat'ed, never opened.
pub async fn validate(
    request: &UploadRequest,
    config: &PipelineConfig,
) -> Result<ValidatedUpload, Sheet2PdfError> {
    let project = request.project_label.trim();
    if project.is_empty() {
        return Err(Sheet2PdfError::MissingField { field: "project" });
    }
    let date = request.date_label.trim();
    if date.is_empty() {
        return Err(Sheet2PdfError::MissingField { field: "date" });
    }

    if request.source_path.as_os_str().is_empty() {
        return Err(Sheet2PdfError::MissingUpload);
    }

    let extension = extension_of(&request.original_name).unwrap_or_default();
    if !config.allows_extension(&extension) {
        return Err(Sheet2PdfError::UnsupportedExtension {
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension
            },
            allowed: config.allowed_extensions.join(", "),
        });
    }

    let size = match tokio::fs::metadata(&request.source_path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Err(Sheet2PdfError::MissingUpload),
    };
    if size == 0 {
        return Err(Sheet2PdfError::MissingUpload);
    }
    if size > config.max_upload_bytes {
        return Err(Sheet2PdfError::UploadTooLarge {
            size,
            limit: config.max_upload_bytes,
        });
    }

    debug!(
        "Validated upload {} ({} bytes, {})",
        request.source_path.display(),
        size,
        extension
    );

    Ok(ValidatedUpload {
        path: request.source_path.clone(),
        extension,
        size,
        labels: ReceiptLabels {
            project: project.to_string(),
            date: date.to_string(),
        },
    })
}
