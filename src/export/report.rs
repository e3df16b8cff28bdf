//! Atomic writer for the output report.
//!
//! The temporary file is created in the destination directory on the first
//! header write and persisted to the final path by `finish()`, which requires
//! the footer. If dropped before finishing, the temporary file is removed, so
//! a failed run never leaves a partial report behind.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::AppError;

/// Single-pass writer for `header, column header, rows…, footer`.
pub struct ReportWriter {
    final_path: PathBuf,
    file: Option<BufWriter<NamedTempFile>>,
    footer_written: bool,
}

impl ReportWriter {
    /// Targets `final_path`; nothing touches the filesystem yet.
    pub fn new(final_path: impl AsRef<Path>) -> Self {
        Self {
            final_path: final_path.as_ref().to_path_buf(),
            file: None,
            footer_written: false,
        }
    }

    /// True once the header has been written.
    pub fn has_header(&self) -> bool {
        self.file.is_some()
    }

    /// Writes the metadata line and the column header line.
    ///
    /// # Errors
    ///
    /// `AppError::Internal` if a header was already written.
    pub fn write_header(&mut self, metadata_line: &str, column_header: &str) -> Result<(), AppError> {
        if self.file.is_some() {
            return Err(AppError::Internal("Report header written twice".to_string()));
        }

        let parent_dir = match self.final_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            Some(_) => PathBuf::from("."),
            None => {
                return Err(AppError::Io(format!(
                    "Cannot determine parent directory for: {}",
                    self.final_path.display()
                )))
            }
        };

        std::fs::create_dir_all(&parent_dir).map_err(|e| {
            AppError::Io(format!(
                "Failed to create output directory {}: {}",
                parent_dir.display(),
                e
            ))
        })?;

        let temp_file = NamedTempFile::new_in(&parent_dir)
            .map_err(|e| AppError::Io(format!("Failed to create temporary file: {}", e)))?;
        let file = self.file.insert(BufWriter::new(temp_file));

        writeln!(file, "{}", metadata_line).map_err(write_error)?;
        writeln!(file, "{}", column_header).map_err(write_error)?;
        Ok(())
    }

    /// Appends data rows, one per line.
    pub fn write_rows(&mut self, rows: &[String]) -> Result<(), AppError> {
        let file = self.open_body()?;
        for row in rows {
            writeln!(file, "{}", row).map_err(write_error)?;
        }
        Ok(())
    }

    /// Writes the footer line (no trailing newline).
    pub fn write_footer(&mut self, footer_line: &str) -> Result<(), AppError> {
        let file = self.open_body()?;
        file.write_all(footer_line.as_bytes()).map_err(write_error)?;
        self.footer_written = true;
        Ok(())
    }

    /// Flushes and atomically persists the report, returning its path.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        if !self.footer_written {
            return Err(AppError::Internal(
                "Report finished without a footer".to_string(),
            ));
        }
        let Some(buf_writer) = self.file else {
            return Err(AppError::Internal("Report finished without a header".to_string()));
        };

        let named_temp = buf_writer
            .into_inner()
            .map_err(|e| AppError::Io(format!("Failed to flush report: {}", e.error())))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::Io(format!(
                "Failed to persist report to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }

    fn open_body(&mut self) -> Result<&mut BufWriter<NamedTempFile>, AppError> {
        if self.footer_written {
            return Err(AppError::Internal("Report already has a footer".to_string()));
        }
        self.file
            .as_mut()
            .ok_or_else(|| AppError::Internal("Report header not written yet".to_string()))
    }
}

fn write_error(e: std::io::Error) -> AppError {
    AppError::Io(format!("Failed to write report: {}", e))
}
