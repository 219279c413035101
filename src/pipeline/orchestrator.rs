//! Export orchestration: opens the cursor, runs the fetch driver and the batch
//! writer as two concurrent tasks over one relay, and joins them.
//!
//! ```text
//! Idle -> Opening -> Running -> Completed
//!            |          |
//!            +----------+-----> Failed
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::elastic::CursorToken;
use crate::error::AppError;
use crate::pipeline::fetch::{FetchDriver, FetchStats, StopReason};
use crate::pipeline::CursorSource;
use crate::streaming::{relay, BatchWriter, ChunkSize, WriteSummary};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Opening,
    Running,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Opening => "opening",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        }
    }
}

/// Everything the pipeline needs besides the cursor source.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    /// Used as the file name prefix.
    pub index_name: String,
    pub chunk_size: ChunkSize,
    /// Relay capacity in records.
    pub relay_capacity: usize,
    /// Global record limit; `None` exports everything.
    pub limit: Option<u64>,
    /// Search body for the initial query; `None` matches all documents.
    pub query: Option<Value>,
    /// Release the server-side cursor when done.
    pub release_cursor: bool,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub batches: u64,
    pub records_fetched: u64,
    pub records_written: u64,
    /// Files written, in sequence order.
    pub files: Vec<PathBuf>,
    pub stop_reason: StopReason,
    /// Total matching documents reported by the first page, if any.
    pub total_hits: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ExportPipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one export from a cursor source into chunked files.
pub struct ExportPipeline<S: CursorSource + 'static> {
    source: Arc<S>,
    settings: PipelineSettings,
    phase: RunPhase,
}

impl<S: CursorSource + 'static> ExportPipeline<S> {
    pub fn new(source: Arc<S>, settings: PipelineSettings) -> Self {
        Self {
            source,
            settings,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        debug!("[EXPORT] {} -> {}", self.phase.as_str(), next.as_str());
        self.phase = next;
    }

    /// Runs the export to completion.
    ///
    /// The first page is fetched before any task starts; failing to get it
    /// fails the run without touching the output directory. After that, the
    /// first fatal error from either task becomes the run's error.
    ///
    /// # Errors
    ///
    /// Any `AppError` from the cursor source or the writer. None is retried.
    pub async fn run(&mut self) -> Result<ExportReport, AppError> {
        let start = Instant::now();

        // Step 1: Open the cursor
        self.transition(RunPhase::Opening);
        let first = match self.source.open_cursor(self.settings.query.as_ref()).await {
            Ok(page) => page,
            Err(e) => {
                error!("[EXPORT] could not open cursor: {}", e.log_line());
                self.transition(RunPhase::Failed);
                return Err(e);
            }
        };
        let total_hits = first.total_hits;

        // Step 2: Spawn writer and fetcher over one relay
        self.transition(RunPhase::Running);
        let (tx, rx) = relay::channel(self.settings.relay_capacity);
        let abort = CancellationToken::new();

        let writer = BatchWriter::new(
            self.settings.output_dir.clone(),
            self.settings.index_name.clone(),
            self.settings.chunk_size,
        );
        let writer_abort = abort.clone();
        let mut writer_handle = tokio::spawn(async move {
            let result = writer.run(rx, writer_abort.clone()).await;
            if result.is_err() {
                writer_abort.cancel();
            }
            result
        });

        // Released instead of the driver's latest cursor if the fetch task dies.
        let opened_cursor = first.cursor.clone();
        let driver = FetchDriver::new(
            self.source.clone(),
            tx,
            self.settings.limit,
            abort.clone(),
            first.cursor,
        );
        let mut fetch_handle = tokio::spawn(driver.run(first.records));

        // Step 3: Join both, remembering which error came first
        let mut errors: Vec<AppError> = Vec::new();
        let mut cursor: Option<CursorToken> = None;
        let mut fetch_stats: Option<FetchStats> = None;
        let mut write_summary: Option<WriteSummary> = None;
        let mut fetch_done = false;
        let mut writer_done = false;

        while !(fetch_done && writer_done) {
            tokio::select! {
                joined = &mut fetch_handle, if !fetch_done => {
                    fetch_done = true;
                    match joined {
                        Ok(report) => {
                            cursor = Some(report.cursor);
                            match report.outcome {
                                Ok(stats) => fetch_stats = Some(stats),
                                Err(e) => errors.push(e),
                            }
                        }
                        Err(e) => {
                            abort.cancel();
                            errors.push(AppError::Internal(format!("Fetch task join error: {}", e)));
                        }
                    }
                }
                joined = &mut writer_handle, if !writer_done => {
                    writer_done = true;
                    match joined {
                        Ok(Ok(summary)) => write_summary = Some(summary),
                        Ok(Err(e)) => errors.push(e),
                        Err(e) => {
                            abort.cancel();
                            errors.push(AppError::Internal(format!("Writer task join error: {}", e)));
                        }
                    }
                }
            }
        }

        // Step 4: Release the cursor (best-effort, never changes the outcome)
        let cursor = cursor.unwrap_or(opened_cursor);
        if self.settings.release_cursor {
            if let Err(e) = self.source.release_cursor(&cursor).await {
                warn!(
                    "[EXPORT] could not release cursor {}: {} (continuing)",
                    cursor,
                    e.log_line()
                );
            }
        } else {
            debug!("[EXPORT] leaving cursor {} to expire", cursor);
        }

        // Step 5: Final state
        if let Some(first_error) = errors.into_iter().next() {
            error!(
                "[EXPORT] failed after {}ms: {}",
                start.elapsed().as_millis(),
                first_error.log_line()
            );
            self.transition(RunPhase::Failed);
            return Err(first_error);
        }

        let (stats, summary) = match (fetch_stats, write_summary) {
            (Some(stats), Some(summary)) => (stats, summary),
            _ => {
                self.transition(RunPhase::Failed);
                return Err(AppError::Internal(
                    "export tasks finished without a result".to_string(),
                ));
            }
        };

        info!(
            "[EXPORT] finished in {}ms: {} batches, {} records loaded, {} records in {} files ({})",
            start.elapsed().as_millis(),
            stats.batches,
            stats.records_fetched,
            summary.records_written,
            summary.files.len(),
            stats.stop_reason.as_str()
        );
        self.transition(RunPhase::Completed);

        Ok(ExportReport {
            batches: stats.batches,
            records_fetched: stats.records_fetched,
            records_written: summary.records_written,
            files: summary.files,
            stop_reason: stats.stop_reason,
            total_hits,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::pipeline::testing::{record, FakeSource};

    fn settings(dir: &Path, split: usize, limit: Option<u64>) -> PipelineSettings {
        PipelineSettings {
            output_dir: dir.to_path_buf(),
            index_name: "logs".to_string(),
            chunk_size: ChunkSize::from_split(split),
            relay_capacity: if split > 0 { split } else { 100 },
            limit,
            query: None,
            release_cursor: true,
        }
    }

    fn hits_in(path: &Path) -> Vec<Value> {
        let doc: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        doc["all_hits"].as_array().unwrap().clone()
    }

    fn file_names(report: &ExportReport) -> Vec<String> {
        report
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    async fn run(source: FakeSource, settings: PipelineSettings) -> (Result<ExportReport, AppError>, Arc<FakeSource>, RunPhase) {
        let source = Arc::new(source);
        let mut pipeline = ExportPipeline::new(source.clone(), settings);
        let result = tokio::time::timeout(Duration::from_secs(10), pipeline.run())
            .await
            .expect("pipeline must not deadlock");
        (result, source, pipeline.phase())
    }

    #[tokio::test]
    async fn test_limit_1115_split_1000_writes_two_files() {
        let temp_dir = TempDir::new().unwrap();

        let (result, source, phase) = run(
            FakeSource::paged(5000, 100),
            settings(temp_dir.path(), 1000, Some(1115)),
        )
        .await;

        let report = result.unwrap();
        assert_eq!(phase, RunPhase::Completed);
        assert_eq!(report.stop_reason, StopReason::LimitReached);
        assert_eq!(report.records_fetched, 1115);
        assert_eq!(report.records_written, 1115);
        assert_eq!(
            file_names(&report),
            vec!["logs_000001_export.json", "logs_000002_export.json"]
        );
        assert_eq!(hits_in(&report.files[0]).len(), 1000);
        assert_eq!(hits_in(&report.files[1]).len(), 115);
        assert_eq!(source.released(), vec!["cursor-11".to_string()]);
    }

    #[tokio::test]
    async fn test_concatenated_files_reproduce_source_order() {
        let temp_dir = TempDir::new().unwrap();

        let (result, _, _) = run(
            FakeSource::paged(523, 37),
            settings(temp_dir.path(), 50, Some(400)),
        )
        .await;

        let report = result.unwrap();
        let all: Vec<Value> = report.files.iter().flat_map(|p| hits_in(p)).collect();
        let expected: Vec<Value> = (0..400).map(|n| record(n).into_value()).collect();
        assert_eq!(all, expected);
        assert_eq!(report.files.len(), 8);
    }

    #[tokio::test]
    async fn test_split_zero_writes_single_file() {
        let temp_dir = TempDir::new().unwrap();

        let (result, _, _) = run(
            FakeSource::paged(2500, 100),
            settings(temp_dir.path(), 0, Some(2222)),
        )
        .await;

        let report = result.unwrap();
        assert_eq!(file_names(&report), vec!["logs_000001_export.json"]);
        assert_eq!(hits_in(&report.files[0]).len(), 2222);
    }

    #[tokio::test]
    async fn test_fewer_records_than_limit_completes_by_exhaustion() {
        let temp_dir = TempDir::new().unwrap();

        let (result, _, _) = run(
            FakeSource::paged(345, 100),
            settings(temp_dir.path(), 100, Some(1000)),
        )
        .await;

        let report = result.unwrap();
        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(report.records_written, 345);
        let sizes: Vec<usize> = report.files.iter().map(|p| hits_in(p).len()).collect();
        assert_eq!(sizes, vec![100, 100, 100, 45]);
    }

    #[tokio::test]
    async fn test_no_limit_exports_everything() {
        let temp_dir = TempDir::new().unwrap();

        let (result, _, _) = run(
            FakeSource::paged(120, 50),
            settings(temp_dir.path(), 1000, None),
        )
        .await;

        let report = result.unwrap();
        assert_eq!(report.records_written, 120);
        assert_eq!(report.files.len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_spawns_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let output_dir = temp_dir.path().join("out");

        let (result, source, phase) = run(
            FakeSource::new(Err(AppError::Protocol("no _scroll_id".into())), vec![]),
            settings(&output_dir, 10, None),
        )
        .await;

        assert!(matches!(result, Err(AppError::Protocol(_))));
        assert_eq!(phase, RunPhase::Failed);
        assert!(!output_dir.exists());
        assert!(source.released().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_run_and_releases_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let source = FakeSource::new(
            Ok((0..30).map(record).collect()),
            vec![
                Ok((30..60).map(record).collect()),
                Err(AppError::Decode("expected value".into())),
            ],
        );

        let (result, source, phase) = run(source, settings(temp_dir.path(), 25, None)).await;

        assert!(matches!(result, Err(AppError::Decode(_))));
        assert_eq!(phase, RunPhase::Failed);
        assert_eq!(source.released(), vec!["cursor-1".to_string()]);
        // Only complete chunks reached disk; the partial tail was dropped.
        for entry in fs::read_dir(temp_dir.path()).unwrap() {
            let path = entry.unwrap().path();
            assert_eq!(hits_in(&path).len(), 25);
        }
    }

    #[tokio::test]
    async fn test_writer_failure_fails_run_without_deadlock() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("occupied");
        fs::write(&blocker, "not a directory").unwrap();

        let (result, source, phase) = run(
            FakeSource::paged(10_000, 100),
            settings(&blocker, 10, None),
        )
        .await;

        assert!(matches!(result, Err(AppError::Io(_))));
        assert_eq!(phase, RunPhase::Failed);
        assert_eq!(source.released().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_task_panic_still_releases_opened_cursor() {
        let temp_dir = TempDir::new().unwrap();

        let (result, source, phase) = run(
            FakeSource::panicking((0..5).map(record).collect()),
            settings(temp_dir.path(), 10, None),
        )
        .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(phase, RunPhase::Failed);
        assert_eq!(source.released(), vec!["cursor-0".to_string()]);
    }

    #[tokio::test]
    async fn test_keep_cursor_skips_release() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = settings(temp_dir.path(), 10, None);
        settings.release_cursor = false;

        let (result, source, _) = run(FakeSource::paged(15, 10), settings).await;

        assert!(result.is_ok());
        assert!(source.released().is_empty());
    }
}
