//! Chunk rendering: markup → engine → PDF bytes.
//!
//! ## Timeouts and retries
//!
//! Every engine call is bounded by `render_timeout_secs`. A failed or timed
//! out attempt is retried `render_retries` times with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`). Retries are off by default: when
//! they are exhausted the last error fails the whole request.

use crate::config::PipelineConfig;
use crate::engine::EngineSession;
use crate::error::Sheet2PdfError;
use crate::pipeline::chunk::RowChunk;
use crate::pipeline::template::ReceiptTemplate;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// The PDF produced for one chunk.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    /// 0-based position of the chunk this document was produced from.
    pub chunk_index: usize,
    pub bytes: Vec<u8>,
}

/// True when `bytes` starts with a PDF header.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Delay before retry `attempt` (1-based): `base`, `2 * base`, `4 * base`...
/// saturating at `u64::MAX` milliseconds.
fn retry_backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Render one chunk through an open engine session.
pub async fn render_chunk(
    session: &mut dyn EngineSession,
    template: &ReceiptTemplate,
    chunk: &RowChunk<'_>,
    columns: &[String],
    total_chunks: usize,
    config: &PipelineConfig,
) -> Result<RenderedDocument, Sheet2PdfError> {
    let start = Instant::now();
    let markup = template.render(chunk, columns, total_chunks)?;
    let limit = Duration::from_secs(config.render_timeout_secs);

    let mut last_err: Option<Sheet2PdfError> = None;

    for attempt in 0..=config.render_retries {
        if attempt > 0 {
            let backoff = retry_backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Chunk {}: retry {}/{} after {}ms",
                chunk.index + 1,
                attempt,
                config.render_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let err = match timeout(limit, session.print_pdf(&markup, &config.page_setup)).await {
            Ok(Ok(bytes)) if looks_like_pdf(&bytes) => {
                debug!(
                    "Chunk {}: {} rows → {} bytes in {:?}",
                    chunk.index + 1,
                    chunk.len(),
                    bytes.len(),
                    start.elapsed()
                );
                return Ok(RenderedDocument {
                    chunk_index: chunk.index,
                    bytes,
                });
            }
            Ok(Ok(bytes)) => Sheet2PdfError::RenderFailed {
                chunk: chunk.index,
                detail: format!("engine returned {} bytes that are not a PDF", bytes.len()),
            },
            Ok(Err(e)) => Sheet2PdfError::RenderFailed {
                chunk: chunk.index,
                detail: e.to_string(),
            },
            Err(_) => Sheet2PdfError::RenderTimeout {
                chunk: chunk.index,
                secs: config.render_timeout_secs,
            },
        };
        warn!("Chunk {}: attempt {} failed: {}", chunk.index + 1, attempt + 1, err);
        last_err = Some(err);
    }

    Err(last_err.unwrap_or_else(|| Sheet2PdfError::RenderFailed {
        chunk: chunk.index,
        detail: "no render attempt was made".into(),
    }))
}
