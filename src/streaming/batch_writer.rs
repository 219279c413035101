//! Consumer side of the export: groups relayed records into chunks and writes
//! each chunk to its own sequence-numbered JSON file.
//!
//! File names follow `<index>_<sequence>_export.json`, where the sequence is a
//! 1-based, zero-padded (6 digits) counter owned by the writer and advanced
//! once per file actually written.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::record::Record;
use crate::streaming::atomic_writer::AtomicJsonWriter;
use crate::streaming::relay::RelayReceiver;

/// Upper bound on the chunk buffer reserved up front.
const MAX_PREALLOCATED_RECORDS: usize = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// ChunkSize
// ─────────────────────────────────────────────────────────────────────────────

/// How many records go into one output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSize {
    /// Exactly N records per file; the last file holds 1..=N.
    Bounded(NonZeroUsize),
    /// Everything in a single file.
    Unbounded,
}

impl ChunkSize {
    /// Maps a configured split size to a chunk size; 0 means single-file mode.
    pub fn from_split(split: usize) -> Self {
        match NonZeroUsize::new(split) {
            Some(n) => ChunkSize::Bounded(n),
            None => ChunkSize::Unbounded,
        }
    }

    /// Returns the per-file record limit, if any.
    pub fn limit(self) -> Option<usize> {
        match self {
            ChunkSize::Bounded(n) => Some(n.get()),
            ChunkSize::Unbounded => None,
        }
    }

    fn is_full(self, len: usize) -> bool {
        self.limit().is_some_and(|n| len >= n)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output files
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level shape of every export file.
#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    all_hits: &'a [Record],
}

/// Returns the file name for the given sequence number.
pub fn export_file_name(index_name: &str, sequence: u64) -> String {
    format!("{}_{:06}_export.json", index_name, sequence)
}

/// Writes one chunk atomically to `path`.
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn write_chunk(path: &Path, records: &[Record]) -> Result<PathBuf, AppError> {
    let mut writer = AtomicJsonWriter::new(path)?;
    writer.write_document(&ExportDocument { all_hits: records })?;
    writer.finish()
}

/// Outcome of a writer run.
#[derive(Debug, Clone, Default)]
pub struct WriteSummary {
    /// Files written, in sequence order.
    pub files: Vec<PathBuf>,
    /// Records across all written files.
    pub records_written: u64,
    /// True if the run stopped on an abort signal and dropped its partial chunk.
    pub aborted: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchWriter
// ─────────────────────────────────────────────────────────────────────────────

/// Drains the relay into chunked export files.
#[derive(Debug)]
pub struct BatchWriter {
    output_dir: PathBuf,
    index_name: String,
    chunk_size: ChunkSize,
    /// Sequence number of the next file to write.
    next_sequence: u64,
    chunk: Vec<Record>,
    summary: WriteSummary,
}

impl BatchWriter {
    pub fn new(output_dir: impl Into<PathBuf>, index_name: impl Into<String>, chunk_size: ChunkSize) -> Self {
        let reserve = chunk_size
            .limit()
            .unwrap_or(MAX_PREALLOCATED_RECORDS)
            .min(MAX_PREALLOCATED_RECORDS);
        Self {
            output_dir: output_dir.into(),
            index_name: index_name.into(),
            chunk_size,
            next_sequence: 1,
            chunk: Vec::with_capacity(reserve),
            summary: WriteSummary::default(),
        }
    }

    /// Path of the file with the given sequence number.
    pub fn file_path(&self, sequence: u64) -> PathBuf {
        self.output_dir
            .join(export_file_name(&self.index_name, sequence))
    }

    /// Consumes records until the relay closes, flushing every full chunk and
    /// then the final partial one.
    ///
    /// When `abort` fires the writer stops pulling, discards its partial
    /// chunk and returns with `aborted` set; files already written stay.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the output directory or a file cannot be
    /// written. The relay receiver is dropped on return, which unblocks a
    /// producer waiting on a full relay.
    pub async fn run(
        mut self,
        mut relay: RelayReceiver,
        abort: CancellationToken,
    ) -> Result<WriteSummary, AppError> {
        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            AppError::Io(format!(
                "Failed to create output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        loop {
            tokio::select! {
                biased;

                _ = abort.cancelled() => {
                    if !self.chunk.is_empty() {
                        warn!(
                            "[WRITER] aborted; discarding {} unflushed records",
                            self.chunk.len()
                        );
                    }
                    self.chunk.clear();
                    self.summary.aborted = true;
                    return Ok(self.summary);
                }

                next = relay.recv() => match next {
                    Some(record) => {
                        self.chunk.push(record);
                        if self.chunk_size.is_full(self.chunk.len()) {
                            self.flush().await?;
                        }
                    }
                    None => break,
                },
            }
        }

        if !self.chunk.is_empty() {
            self.flush().await?;
        }

        debug!(
            "[WRITER] relay closed; {} files, {} records",
            self.summary.files.len(),
            self.summary.records_written
        );
        Ok(self.summary)
    }

    /// Writes the in-progress chunk to the next sequence-numbered file.
    async fn flush(&mut self) -> Result<(), AppError> {
        let records = std::mem::take(&mut self.chunk);
        let count = records.len() as u64;
        let path = self.file_path(self.next_sequence);

        let written = tokio::task::spawn_blocking(move || write_chunk(&path, &records))
            .await
            .map_err(|e| AppError::Internal(format!("Writer task join error: {}", e)))??;

        self.next_sequence += 1;
        self.summary.records_written += count;
        info!(
            "[WRITER] saved {} ({} records, {} files so far)",
            written.display(),
            count,
            self.summary.files.len() + 1
        );
        self.summary.files.push(written);
        Ok(())
    }
}
