//! Progress-callback trait for per-chunk pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline renders and merges each chunk. The CLI drives its
//! progress bar from these; a server could forward them to a websocket.
//!
//! # Example
//!
//! ```rust
//! use sheet2pdf::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     pages: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for PageCounter {
//!     fn on_chunk_complete(&self, _chunk: usize, _total: usize, pages: usize) {
//!         self.pages.fetch_add(pages, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter { pages: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each chunk.
///
/// Chunks are processed strictly in order, one at a time, but the callback
/// may be shared between concurrent requests, so implementations must be
/// `Send + Sync`. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after normalization, before the engine is launched.
    ///
    /// # Arguments
    /// * `total_rows`   — data rows read from the first sheet
    /// * `total_chunks` — chunks that will be rendered
    fn on_pipeline_start(&self, total_rows: usize, total_chunks: usize) {
        let _ = (total_rows, total_chunks);
    }

    /// Called before a chunk is rendered.
    ///
    /// # Arguments
    /// * `chunk_num`    — 1-indexed chunk number
    /// * `total_chunks` — total chunks in the request
    fn on_chunk_start(&self, chunk_num: usize, total_chunks: usize) {
        let _ = (chunk_num, total_chunks);
    }

    /// Called after a chunk has been rendered and merged.
    ///
    /// # Arguments
    /// * `chunk_num`    — 1-indexed chunk number
    /// * `total_chunks` — total chunks
    /// * `pages`        — pages the chunk contributed to the artifact
    fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize, pages: usize) {
        let _ = (chunk_num, total_chunks, pages);
    }

    /// Called when a chunk fails. The request is aborted afterwards.
    fn on_chunk_error(&self, chunk_num: usize, total_chunks: usize, error: &str) {
        let _ = (chunk_num, total_chunks, error);
    }

    /// Called once after the artifact has been finalized.
    fn on_pipeline_complete(&self, total_chunks: usize, total_pages: usize) {
        let _ = (total_chunks, total_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
