//! Handing the finished artifact to the client, then deleting it.
//!
//! The artifact is never kept: after it has been streamed out it is removed
//! once the grace period (default 30 s) has passed, on a detached task.
//! Deletion failures are logged, never returned.

use crate::error::Sheet2PdfError;
use crate::pipeline::merge::MergedArtifact;
use crate::pipeline::remove_file;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Outcome of [`deliver`].
#[derive(Debug)]
pub struct Delivered {
    pub bytes: u64,
    /// Completes once the artifact has been deleted.
    pub deletion: JoinHandle<()>,
}

/// File name to offer the client, e.g. `receipts-<uuid>.pdf`.
pub fn download_name(artifact: &MergedArtifact) -> &str {
    &artifact.file_name
}

/// Stream the artifact into `writer`, then schedule its deletion.
///
/// Deletion is scheduled whether or not the write succeeded.
pub async fn deliver<W>(
    artifact: &MergedArtifact,
    writer: &mut W,
    grace: Duration,
) -> Result<Delivered, Sheet2PdfError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let result = copy_out(&artifact.path, writer).await;
    let deletion = schedule_deletion(artifact.path.clone(), grace);
    let bytes = result?;
    debug!("Delivered {} ({} bytes)", artifact.file_name, bytes);
    Ok(Delivered { bytes, deletion })
}

async fn copy_out<W>(path: &Path, writer: &mut W) -> Result<u64, Sheet2PdfError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let io_err = |source: std::io::Error| Sheet2PdfError::ArtifactIo {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let bytes = tokio::io::copy(&mut file, writer).await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)?;
    Ok(bytes)
}

/// Delete `path` after `grace` on a detached task.
pub fn schedule_deletion(path: PathBuf, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep(grace).await;
        match remove_file(&path).await {
            Ok(true) => debug!("Deleted delivered artifact {}", path.display()),
            Ok(false) => {}
            Err(e) => e.log(),
        }
    })
}

/// Copy the artifact to `dest` atomically and delete the original now.
///
/// Returns the number of bytes written.
pub async fn deliver_to_path(artifact: &MergedArtifact, dest: &Path) -> Result<u64, Sheet2PdfError> {
    let io_err = |source: std::io::Error| Sheet2PdfError::ArtifactIo {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let tmp = dest.with_extension("pdf.tmp");
    let bytes = match tokio::fs::copy(&artifact.path, &tmp).await {
        Ok(n) => n,
        Err(e) => {
            if let Err(ce) = remove_file(&tmp).await {
                ce.log();
            }
            return Err(io_err(e));
        }
    };
    tokio::fs::rename(&tmp, dest).await.map_err(io_err)?;

    if let Err(e) = remove_file(&artifact.path).await {
        e.log();
    }
    debug!("Wrote {} ({} bytes)", dest.display(), bytes);
    Ok(bytes)
}
