//! Shared helpers for the integration tests: scripted rendering engines and
//! a tiny PDF builder, so the pipeline can run without a browser.

#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use sheet2pdf::{EngineError, EngineSession, PageSetup, PipelineConfig, RenderEngine};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Template whose output the fake engines can parse: `chunk|n1,n2,...`.
pub const PROBE_TEMPLATE: &str = "{{chunk}}|{{#each rows}}{{number}},{{/each}}";

/// Rows per page the fake engines pretend to fit.
pub const ROWS_PER_PAGE: usize = 100;

/// A one-column CSV with `rows` data rows (`item-1` … `item-N`).
pub fn csv_rows(rows: usize) -> Vec<u8> {
    let mut out = String::from("item,price\n");
    for i in 1..=rows {
        out.push_str(&format!("item-{i},{i}.00\n"));
    }
    out.into_bytes()
}

/// Route library logs to the test harness; `RUST_LOG=sheet2pdf=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A work directory plus a config pointing at it and at [`PROBE_TEMPLATE`].
pub fn probe_setup() -> (TempDir, PipelineConfig) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let template = dir.path().join("probe.hbs");
    std::fs::write(&template, PROBE_TEMPLATE).unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let config = PipelineConfig::builder()
        .work_dir(&work)
        .template_path(&template)
        .build()
        .unwrap();
    (dir, config)
}

/// Entries left in `dir`.
pub fn files_in(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

/// A PDF whose pages draw the given labels, one per page.
pub fn pdf_with_pages(labels: &[String]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let media_box: Vec<Object> = vec![0.into(), 0.into(), 595.into(), 842.into()];

    let mut kids: Vec<Object> = Vec::new();
    for label in labels {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::String(
                        label.clone().into_bytes(),
                        StringFormat::Literal,
                    )],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => media_box.clone(),
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Text drawn on every page of the PDF at `path`, in page order.
pub fn page_labels(path: &Path) -> Vec<String> {
    let doc = Document::load(path).unwrap();
    doc.get_pages()
        .into_values()
        .map(|id| {
            let content = doc.get_page_content(id).unwrap();
            let ops = Content::decode(&content).unwrap().operations;
            ops.iter()
                .find(|op| op.operator == "Tj")
                .and_then(|op| op.operands.first())
                .and_then(|o| o.as_str().ok())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default()
        })
        .collect()
}

/// Parse [`PROBE_TEMPLATE`] output into `(chunk, row numbers)`.
pub fn parse_probe(markup: &str) -> (usize, Vec<usize>) {
    let (chunk, rows) = markup.split_once('|').unwrap();
    let rows = rows
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().unwrap())
        .collect();
    (chunk.parse().unwrap(), rows)
}

/// What the fake engine does when asked to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// One page per [`ROWS_PER_PAGE`] rows, labelled `c<chunk>p<page> r<first>-<last>`.
    Paginate,
    /// Fail every print of this 1-based chunk.
    FailChunk(usize),
    /// Never finish printing.
    Hang,
    /// Never finish printing this 1-based chunk; others paginate.
    HangChunk(usize),
    /// Fail to launch at all.
    NoLaunch,
}

/// Counts launches, prints and closes across all sessions it hands out.
#[derive(Debug, Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub prints: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Counters {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
    pub fn prints(&self) -> usize {
        self.prints.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    pub behaviour: Behaviour,
    pub counters: Arc<Counters>,
}

impl FakeEngine {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            counters: Arc::new(Counters::default()),
        }
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        if self.behaviour == Behaviour::NoLaunch {
            return Err(EngineError::Launch("no browser here".into()));
        }
        Ok(Box::new(FakeSession {
            behaviour: self.behaviour,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

struct FakeSession {
    behaviour: Behaviour,
    counters: Arc<Counters>,
}

#[async_trait]
impl EngineSession for FakeSession {
    async fn print_pdf(&mut self, markup: &str, _page: &PageSetup) -> Result<Vec<u8>, EngineError> {
        self.counters.prints.fetch_add(1, Ordering::SeqCst);
        let (chunk, rows) = parse_probe(markup);
        match self.behaviour {
            Behaviour::Hang => std::future::pending().await,
            Behaviour::HangChunk(n) if n == chunk => std::future::pending().await,
            Behaviour::FailChunk(n) if n == chunk => {
                Err(EngineError::Print(format!("chunk {chunk} crashed")))
            }
            _ => {
                let labels: Vec<String> = rows
                    .chunks(ROWS_PER_PAGE)
                    .enumerate()
                    .map(|(p, page)| {
                        format!(
                            "c{chunk}p{} r{}-{}",
                            p + 1,
                            page[0],
                            page[page.len() - 1]
                        )
                    })
                    .collect();
                Ok(pdf_with_pages(&labels))
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
