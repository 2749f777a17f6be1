//! Receipt markup: one HTML page per chunk.
//!
//! The built-in template prints one receipt card per row, each carrying the
//! project and date labels, and lets CSS `break-inside: avoid` keep cards
//! whole across page boundaries. Pagination itself is left to the engine.
//!
//! A custom Handlebars template can replace it via
//! [`crate::config::PipelineConfig::template_path`]. Pages are printed at the
//! `load` event, so templates should inline their styles and images.
//! Templates receive:
//!
//! | Key | Type | Meaning |
//! |-----|------|---------|
//! | `project`, `date` | string | the two header labels |
//! | `columns` | [string] | column keys in sheet order |
//! | `rows` | [{ `number`, `values`, `cells`: [{ `column`, `value` }] }] | rows of this chunk |
//! | `chunk`, `total_chunks` | number | 1-based chunk position |
//! | `first_row_number` | number | 1-based sheet row number of `rows[0]` |

use crate::config::PipelineConfig;
use crate::error::Sheet2PdfError;
use crate::pipeline::chunk::RowChunk;
use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Registry name of the receipt template.
pub const RECEIPT_TEMPLATE_NAME: &str = "receipt";

/// Built-in receipt template.
pub const DEFAULT_RECEIPT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{project}} · {{date}}</title>
<style>
  * { box-sizing: border-box; }
  body { font-family: "Helvetica Neue", Arial, sans-serif; font-size: 10pt; color: #1d1d1f; margin: 0; }
  .receipt { border: 1px solid #c7c7cc; border-radius: 4px; margin: 0 0 6mm 0; break-inside: avoid; page-break-inside: avoid; }
  .receipt header { display: flex; justify-content: space-between; background: #f2f2f7; padding: 2mm 3mm; border-bottom: 1px solid #c7c7cc; }
  .receipt header .project { font-weight: 600; }
  .receipt header .number { color: #6e6e73; }
  .receipt table { width: 100%; border-collapse: collapse; }
  .receipt th { text-align: left; width: 35%; font-weight: 500; color: #3a3a3c; padding: 1mm 3mm; vertical-align: top; }
  .receipt td { padding: 1mm 3mm; word-break: break-word; }
  .receipt tr:nth-child(even) { background: #fafafa; }
</style>
</head>
<body>
{{#each rows}}
<section class="receipt">
  <header>
    <span class="project">{{../project}}</span>
    <span class="date">{{../date}}</span>
    <span class="number">#{{number}}</span>
  </header>
  <table>
    {{#each cells}}
    <tr><th>{{column}}</th><td>{{value}}</td></tr>
    {{/each}}
  </table>
</section>
{{/each}}
</body>
</html>
"#;

#[derive(Serialize)]
struct CellView<'a> {
    column: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct RowView<'a> {
    number: usize,
    values: Vec<&'a str>,
    cells: Vec<CellView<'a>>,
}

#[derive(Serialize)]
struct TemplateData<'a> {
    project: &'a str,
    date: &'a str,
    columns: &'a [String],
    rows: Vec<RowView<'a>>,
    chunk: usize,
    total_chunks: usize,
    first_row_number: usize,
}

/// A compiled receipt template.
pub struct ReceiptTemplate {
    registry: Handlebars<'static>,
}

impl ReceiptTemplate {
    /// Compile template source.
    pub fn from_source(source: &str) -> Result<Self, Sheet2PdfError> {
        let mut registry = Handlebars::new();
        registry
            .register_template_string(RECEIPT_TEMPLATE_NAME, source)
            .map_err(|e| Sheet2PdfError::InvalidConfig(format!("Receipt template: {e}")))?;
        Ok(Self { registry })
    }

    /// The built-in template.
    pub fn builtin() -> Result<Self, Sheet2PdfError> {
        Self::from_source(DEFAULT_RECEIPT_TEMPLATE)
    }

    /// Read and compile a template file.
    pub async fn from_file(path: &Path) -> Result<Self, Sheet2PdfError> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            Sheet2PdfError::InvalidConfig(format!(
                "Cannot read template '{}': {e}",
                path.display()
            ))
        })?;
        debug!("Loaded receipt template from {}", path.display());
        Self::from_source(&source)
    }

    /// The configured template, or the built-in one.
    pub async fn load(config: &PipelineConfig) -> Result<Self, Sheet2PdfError> {
        match config.template_path {
            Some(ref path) => Self::from_file(path).await,
            None => Self::builtin(),
        }
    }

    /// Render the markup for one chunk.
    pub fn render(
        &self,
        chunk: &RowChunk<'_>,
        columns: &[String],
        total_chunks: usize,
    ) -> Result<String, Sheet2PdfError> {
        let rows = chunk
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| RowView {
                number: chunk.first_row + i + 1,
                values: row.values().collect(),
                cells: row
                    .cells()
                    .iter()
                    .map(|(column, value)| CellView { column, value })
                    .collect(),
            })
            .collect();

        let data = TemplateData {
            project: &chunk.labels.project,
            date: &chunk.labels.date,
            columns,
            rows,
            chunk: chunk.index + 1,
            total_chunks,
            first_row_number: chunk.first_row + 1,
        };

        self.registry
            .render(RECEIPT_TEMPLATE_NAME, &data)
            .map_err(|e| Sheet2PdfError::Template {
                chunk: chunk.index,
                detail: e.to_string(),
            })
    }
}
