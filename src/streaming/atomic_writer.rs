//! Atomic JSON file writer with automatic cleanup on failure.
//!
//! Writes to a temporary file in the same directory as the destination,
//! then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is automatically cleaned up.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::AppError;

/// An atomic writer for one pretty-printed JSON document.
///
/// A reader of the destination path sees either the previous file or the
/// complete new document, never a partial write.
pub struct AtomicJsonWriter {
    writer: BufWriter<NamedTempFile>,
    final_path: PathBuf,
}

impl AtomicJsonWriter {
    /// Creates a new atomic writer targeting the specified path.
    ///
    /// The temporary file is created in the same directory as `final_path`
    /// so the final rename stays on one filesystem.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the parent directory cannot be determined
    /// or the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
            Some(parent) => parent,
            None => {
                return Err(AppError::Io(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                )))
            }
        };

        let temp_file = NamedTempFile::new_in(parent_dir).map_err(|e| {
            AppError::Io(format!(
                "Failed to create temporary file in {}: {}",
                parent_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            writer: BufWriter::new(temp_file),
            final_path,
        })
    }

    /// Serializes `document` as JSON with 2-space indentation.
    pub fn write_document<T: Serialize + ?Sized>(&mut self, document: &T) -> Result<(), AppError> {
        serde_json::to_writer_pretty(&mut self.writer, document).map_err(|e| {
            AppError::Io(format!(
                "Failed to serialize {}: {}",
                self.final_path.display(),
                e
            ))
        })
    }

    /// Flushes all buffers and atomically persists the file to the final path.
    ///
    /// Returns the final path on success. On error the temporary file is
    /// cleaned up automatically.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let mut buf_writer = self.writer;
        buf_writer
            .flush()
            .map_err(|e| AppError::Io(format!("Failed to flush buffer: {}", e)))?;

        let named_temp = buf_writer
            .into_inner()
            .map_err(|e| AppError::Io(format!("Failed to flush buffer: {}", e.error())))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::Io(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}
