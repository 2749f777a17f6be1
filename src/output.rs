//! Result types returned by the `generate*` entry points.

use crate::pipeline::merge::MergedArtifact;
use serde::Serialize;
use std::path::PathBuf;

/// A successfully generated artifact plus run statistics.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The merged PDF. The caller owns it from here on and is expected to
    /// hand it to [`crate::delivery`] (or delete it).
    pub artifact: MergedArtifact,
    pub stats: PipelineStats,
}

/// Counters and timings for one request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Data rows read from the first sheet.
    pub total_rows: usize,
    pub total_chunks: usize,
    /// Pages in the merged artifact.
    pub total_pages: usize,
    /// Columns of the first sheet, in order.
    pub columns: Vec<String>,
    /// Name of the sheet that was read.
    pub sheet_name: String,
    /// Sheets present in the workbook but not rendered.
    pub ignored_sheets: usize,
    /// Time spent in the rendering engine, summed over chunks.
    pub render_duration_ms: u64,
    /// Time spent merging chunk documents.
    pub merge_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Summary printed by the CLI in `--json` mode.
#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub output: PathBuf,
    #[serde(flatten)]
    pub stats: PipelineStats,
}
