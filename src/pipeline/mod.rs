//! Pipeline stages for spreadsheet-to-PDF generation.
//!
//! Each submodule implements exactly one step; [`crate::generate`] drives
//! them in order for a single request.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ chunk ──▶ template ──▶ render ──▶ merge
//! (checks)   (first sheet)  (400 rows) (HTML)    (engine)   (one PDF)
//! ```
//!
//! 1. [`input`]     — validate labels, extension and size; nothing is opened yet
//! 2. [`normalize`] — read the first sheet into trimmed string rows
//!    (`spawn_blocking`: calamine and csv are synchronous)
//! 3. [`chunk`]     — split rows into ordered, fixed-size slices
//! 4. [`template`]  — turn a chunk into receipt markup with Handlebars
//! 5. [`render`]    — print markup to PDF through the engine session, with
//!    per-chunk timeout and optional retries
//! 6. [`merge`]     — append each chunk PDF to the artifact in order

pub mod chunk;
pub mod input;
pub mod merge;
pub mod normalize;
pub mod render;
pub mod template;

use crate::error::CleanupError;
use std::path::Path;

/// Delete a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed.
pub(crate) async fn remove_file(path: &Path) -> Result<bool, CleanupError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CleanupError::RemoveFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remove_missing_file_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("x.pdf");
        assert!(!remove_file(&path).await.unwrap());
        std::fs::write(&path, b"x").unwrap();
        assert!(remove_file(&path).await.unwrap());
        assert!(!path.exists());
    }
}
