//! Whole-request tests against scripted engines.

mod common;

use common::{csv_rows, files_in, page_labels, probe_setup, Behaviour, FakeEngine};
use sheet2pdf::error::GENERIC_FAILURE_MESSAGE;
use sheet2pdf::{
    deliver, generate, generate_to_file, ErrorKind, MergeStrategy, PipelineConfig,
    PipelineProgressCallback, Sheet2PdfError, UploadRequest,
};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

fn upload(config: &PipelineConfig, bytes: &[u8], name: &str) -> UploadRequest {
    UploadRequest::from_bytes(bytes, name, "Apollo", "2024-05-01", &config.work_dir).unwrap()
}

fn expected_labels_for_1000_rows() -> Vec<String> {
    // 400 / 400 / 200 rows → 4 + 4 + 2 pages of 100 rows each
    let mut labels = Vec::new();
    let mut row = 1;
    for (chunk, pages) in [(1, 4), (2, 4), (3, 2)] {
        for p in 1..=pages {
            labels.push(format!("c{chunk}p{p} r{row}-{}", row + 99));
            row += 100;
        }
    }
    labels
}

#[tokio::test]
async fn thousand_rows_become_three_chunks_in_order() {
    let (_dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::Paginate);
    let request = upload(&config, &csv_rows(1000), "rows.csv");
    let upload_path = request.source_path.clone();

    let output = generate(request, &engine, &config).await.unwrap();

    assert_eq!(output.stats.total_rows, 1000);
    assert_eq!(output.stats.total_chunks, 3);
    assert_eq!(output.stats.total_pages, 10);
    assert_eq!(output.artifact.page_count, 10);
    assert_eq!(output.stats.columns, vec!["item", "price"]);
    assert_eq!(page_labels(&output.artifact.path), expected_labels_for_1000_rows());

    // one session for the whole request
    assert_eq!(engine.counters.launches(), 1);
    assert_eq!(engine.counters.prints(), 3);
    assert_eq!(engine.counters.closes(), 1);

    assert!(!upload_path.exists());
    assert_eq!(files_in(&config.work_dir), vec![output.artifact.file_name.clone()]);
    assert!(output.artifact.file_name.starts_with("receipts-"));
    assert!(output.artifact.file_name.ends_with(".pdf"));
}

#[tokio::test]
async fn in_memory_merge_gives_the_same_pages() {
    let (_dir, config) = probe_setup();
    let config = PipelineConfig {
        merge_strategy: MergeStrategy::InMemory,
        ..config
    };
    let engine = FakeEngine::new(Behaviour::Paginate);

    let output = generate(upload(&config, &csv_rows(1000), "rows.csv"), &engine, &config)
        .await
        .unwrap();

    assert_eq!(page_labels(&output.artifact.path), expected_labels_for_1000_rows());
}

#[tokio::test]
async fn single_chunk_sheet() {
    let (_dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::Paginate);

    let output = generate(upload(&config, &csv_rows(3), "rows.csv"), &engine, &config)
        .await
        .unwrap();

    assert_eq!(output.stats.total_chunks, 1);
    assert_eq!(page_labels(&output.artifact.path), vec!["c1p1 r1-3"]);
}

#[tokio::test]
async fn unsupported_extension_never_reaches_the_engine() {
    let (_dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::Paginate);

    let err = generate(upload(&config, b"PK\x03\x04", "notes.docx"), &engine, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Sheet2PdfError::UnsupportedExtension { .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(engine.counters.launches(), 0);
    assert!(files_in(&config.work_dir).is_empty());
}

#[tokio::test]
async fn missing_label_is_reported_verbatim() {
    let (_dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::Paginate);
    let mut request = upload(&config, &csv_rows(2), "rows.csv");
    request.date_label = "   ".into();

    let err = generate(request, &engine, &config).await.unwrap_err();

    assert!(matches!(err, Sheet2PdfError::MissingField { field: "date" }));
    assert_eq!(err.user_message(), err.to_string());
    assert!(files_in(&config.work_dir).is_empty());
}

#[tokio::test]
async fn header_only_sheet_is_empty() {
    let (_dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::Paginate);

    let err = generate(upload(&config, &csv_rows(0), "rows.csv"), &engine, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Sheet2PdfError::EmptySpreadsheet));
    assert_eq!(engine.counters.launches(), 0);
    assert!(files_in(&config.work_dir).is_empty());
}

#[tokio::test]
async fn hanging_render_times_out_and_cleans_up() {
    let (_dir, config) = probe_setup();
    let config = PipelineConfig {
        render_timeout_secs: 1,
        ..config
    };
    let engine = FakeEngine::new(Behaviour::Hang);

    let err = generate(upload(&config, &csv_rows(10), "rows.csv"), &engine, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Sheet2PdfError::RenderTimeout { chunk: 0, secs: 1 }));
    assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    assert_eq!(engine.counters.closes(), 1);
    assert!(files_in(&config.work_dir).is_empty());
}

#[tokio::test(start_paused = true)]
async fn request_deadline_stops_after_a_merged_chunk() {
    let (_dir, config) = probe_setup();
    let recorder = Arc::new(Recorder::default());
    let config = PipelineConfig {
        chunk_size: 5,
        render_timeout_secs: 600,
        request_timeout_secs: 30,
        progress_callback: Some(recorder.clone() as Arc<dyn PipelineProgressCallback>),
        ..config
    };
    let engine = FakeEngine::new(Behaviour::HangChunk(2));

    let err = generate(upload(&config, &csv_rows(12), "rows.csv"), &engine, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Sheet2PdfError::DeadlineExceeded { secs: 30 }));
    assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    // chunk 1 was merged before chunk 2 stalled
    let events = recorder.events.lock().unwrap().clone();
    assert!(events.contains(&"done 1 +1".to_string()));
    assert_eq!(engine.counters.prints(), 2);
    assert_eq!(engine.counters.closes(), 1);
    // the partially merged artifact is gone
    assert!(files_in(&config.work_dir).is_empty());
}

#[tokio::test]
async fn failing_middle_chunk_discards_partial_artifact() {
    let (_dir, config) = probe_setup();
    let config = PipelineConfig {
        chunk_size: 5,
        ..config
    };
    let engine = FakeEngine::new(Behaviour::FailChunk(2));

    let err = generate(upload(&config, &csv_rows(12), "rows.csv"), &engine, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Sheet2PdfError::RenderFailed { chunk: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::Render);
    // chunk 3 is never attempted
    assert_eq!(engine.counters.prints(), 2);
    assert_eq!(engine.counters.closes(), 1);
    assert!(files_in(&config.work_dir).is_empty());
}

#[tokio::test]
async fn retries_do_not_rescue_a_deterministic_failure() {
    let (_dir, config) = probe_setup();
    let config = PipelineConfig {
        render_retries: 2,
        retry_backoff_ms: 1,
        ..config
    };
    let engine = FakeEngine::new(Behaviour::FailChunk(1));

    let err = generate(upload(&config, &csv_rows(3), "rows.csv"), &engine, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Sheet2PdfError::RenderFailed { chunk: 0, .. }));
    assert_eq!(engine.counters.prints(), 3);
}

#[tokio::test]
async fn engine_launch_failure() {
    let (_dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::NoLaunch);

    let err = generate(upload(&config, &csv_rows(3), "rows.csv"), &engine, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Sheet2PdfError::EngineLaunch(_)));
    assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    assert_eq!(engine.counters.closes(), 0);
    assert!(files_in(&config.work_dir).is_empty());
}

#[tokio::test]
async fn unreadable_spreadsheet_is_a_parse_error() {
    let (_dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::Paginate);

    let err = generate(upload(&config, b"not a zip file", "rows.xlsx"), &engine, &config)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(engine.counters.launches(), 0);
    assert!(files_in(&config.work_dir).is_empty());
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl PipelineProgressCallback for Recorder {
    fn on_pipeline_start(&self, total_rows: usize, total_chunks: usize) {
        self.push(format!("start {total_rows}/{total_chunks}"));
    }
    fn on_chunk_start(&self, chunk: usize, total: usize) {
        self.push(format!("chunk {chunk}/{total}"));
    }
    fn on_chunk_complete(&self, chunk: usize, _total: usize, pages: usize) {
        self.push(format!("done {chunk} +{pages}"));
    }
    fn on_chunk_error(&self, chunk: usize, _total: usize, _error: &str) {
        self.push(format!("error {chunk}"));
    }
    fn on_pipeline_complete(&self, total_chunks: usize, total_pages: usize) {
        self.push(format!("complete {total_chunks} {total_pages}"));
    }
}

#[tokio::test]
async fn progress_events_follow_chunk_order() {
    let (_dir, config) = probe_setup();
    let recorder = Arc::new(Recorder::default());
    let config = PipelineConfig {
        chunk_size: 150,
        progress_callback: Some(recorder.clone() as Arc<dyn PipelineProgressCallback>),
        ..config
    };
    let engine = FakeEngine::new(Behaviour::Paginate);

    generate(upload(&config, &csv_rows(250), "rows.csv"), &engine, &config)
        .await
        .unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start 250/2",
            "chunk 1/2",
            "done 1 +2",
            "chunk 2/2",
            "done 2 +1",
            "complete 2 3",
        ]
    );
}

#[tokio::test]
async fn progress_reports_the_failing_chunk() {
    let (_dir, config) = probe_setup();
    let recorder = Arc::new(Recorder::default());
    let config = PipelineConfig {
        chunk_size: 2,
        progress_callback: Some(recorder.clone() as Arc<dyn PipelineProgressCallback>),
        ..config
    };
    let engine = FakeEngine::new(Behaviour::FailChunk(2));

    generate(upload(&config, &csv_rows(5), "rows.csv"), &engine, &config)
        .await
        .unwrap_err();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.last().map(String::as_str), Some("error 2"));
    assert!(!events.iter().any(|e| e.starts_with("complete")));
}

#[tokio::test]
async fn generate_to_file_moves_the_artifact() {
    let (dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::Paginate);
    let dest = dir.path().join("out").join("apollo.pdf");

    let stats = generate_to_file(upload(&config, &csv_rows(120), "rows.csv"), &dest, &engine, &config)
        .await
        .unwrap();

    assert_eq!(stats.total_pages, 2);
    assert_eq!(page_labels(&dest), vec!["c1p1 r1-100", "c1p2 r101-120"]);
    assert!(files_in(&config.work_dir).is_empty());
}

#[tokio::test]
async fn delivered_artifact_is_deleted_after_grace() {
    let (_dir, config) = probe_setup();
    let engine = FakeEngine::new(Behaviour::Paginate);
    let output = generate(upload(&config, &csv_rows(3), "rows.csv"), &engine, &config)
        .await
        .unwrap();

    let mut sink = Vec::new();
    let delivered = deliver(&output.artifact, &mut sink, Duration::from_millis(20))
        .await
        .unwrap();
    assert!(sink.starts_with(b"%PDF-"));
    assert_eq!(delivered.bytes as usize, sink.len());

    delivered.deletion.await.unwrap();
    assert!(files_in(&config.work_dir).is_empty());
}
