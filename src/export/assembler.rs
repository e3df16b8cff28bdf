//! Result assembly: result discovery, row streaming, column rewriting and
//! report output.
//!
//! Output layout:
//!
//! ```text
//! "HEADER","<tag>","<records>","<subject>"
//! <mapped column header>,"<additional column>"...
//! <data rows, batch order then result order>
//! "FOOTER","<dd-mm-yyyy HH:MM:SS>"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::config::SubjectProfile;
use crate::error::AppError;
use crate::export::progress::ProgressReporter;
use crate::export::report::ReportWriter;
use crate::salesforce::bulk_query::BulkApi;
use crate::salesforce::redact_id;
use crate::salesforce::types::{BatchRecord, JobDescriptor};

const FILE_SUFFIX_PLACEHOLDER: &str = "<FILE_SUFFIX>";
const JOB_ID_PLACEHOLDER: &str = "<JOB_ID>";
const FILE_SUFFIX_FORMAT: &str = "%Y%m%d%H%M%S";
const FOOTER_TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

// ─────────────────────────────────────────────────────────────────────────────
// Row transformations
// ─────────────────────────────────────────────────────────────────────────────

/// Rewrites the column header row.
///
/// Each comma-separated token found in `mapping` is replaced by its display
/// name; unknown tokens pass through. One quoted header per additional
/// column is appended.
pub fn apply_column_mapping(
    header: &str,
    mapping: &[(String, String)],
    additional: &[(String, String)],
) -> String {
    let mut mapped = header
        .split(',')
        .map(|token| {
            mapping
                .iter()
                .find(|(raw, _)| raw == token)
                .map_or(token, |(_, display)| display.as_str())
        })
        .collect::<Vec<_>>()
        .join(",");

    for (name, _) in additional {
        mapped.push_str(",\"");
        mapped.push_str(name);
        mapped.push('"');
    }
    mapped
}

/// Appends one quoted value per additional column to every data row.
pub fn apply_additional_columns(rows: &mut [String], additional: &[(String, String)]) {
    if additional.is_empty() {
        return;
    }
    let suffix: String = additional
        .iter()
        .map(|(_, value)| format!(",\"{}\"", value))
        .collect();
    for row in rows.iter_mut() {
        row.push_str(&suffix);
    }
}

/// Splits a result body into lines. A trailing line break does not produce
/// an empty row; `\r\n` endings are accepted.
pub fn split_rows(body: &str) -> Vec<String> {
    body.lines().map(str::to_string).collect()
}

/// `"HEADER","<tag>","<records>","<subject>"`
pub fn header_line(report_tag: &str, total_records: u64, subject_type: &str) -> String {
    format!(
        "\"HEADER\",\"{}\",\"{}\",\"{}\"",
        report_tag, total_records, subject_type
    )
}

/// `"FOOTER","<dd-mm-yyyy HH:MM:SS>"`
pub fn footer_line(timestamp: NaiveDateTime) -> String {
    format!("\"FOOTER\",\"{}\"", timestamp.format(FOOTER_TIME_FORMAT))
}

/// Substitutes the completion timestamp and job id into a filename template.
///
/// Each placeholder is replaced once, so rendering an already rendered name
/// returns it unchanged.
pub fn render_file_name(template: &str, completed_at: NaiveDateTime, job_id: &str) -> String {
    let suffix = completed_at.format(FILE_SUFFIX_FORMAT).to_string();
    template
        .replacen(FILE_SUFFIX_PLACEHOLDER, &suffix, 1)
        .replacen(JOB_ID_PLACEHOLDER, job_id, 1)
}

// ─────────────────────────────────────────────────────────────────────────────
// ResultAssembler
// ─────────────────────────────────────────────────────────────────────────────

/// What [`ResultAssembler::assemble`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    pub output_path: PathBuf,
    /// Sum of the batches' `records_processed`.
    pub records_written: u64,
    /// Data lines actually written.
    pub rows_written: u64,
}

/// Streams a job's result sets into one report.
pub struct ResultAssembler<'a, A: BulkApi> {
    api: &'a A,
    progress: &'a dyn ProgressReporter,
    profile: &'a SubjectProfile,
    report_tag: &'a str,
    fetch_delay: Duration,
}

impl<'a, A: BulkApi> ResultAssembler<'a, A> {
    pub fn new(
        api: &'a A,
        progress: &'a dyn ProgressReporter,
        profile: &'a SubjectProfile,
        report_tag: &'a str,
        fetch_delay: Duration,
    ) -> Self {
        Self {
            api,
            progress,
            profile,
            report_tag,
            fetch_delay,
        }
    }

    /// Fills in each batch's result handles, keeping server order.
    pub async fn discover_result_handles(
        &self,
        job_id: &str,
        batches: &mut [BatchRecord],
    ) -> Result<(), AppError> {
        let total = batches.len();
        for (idx, batch) in batches.iter_mut().enumerate() {
            batch.result_handles = self.api.list_results(job_id, &batch.batch_id).await?;
            debug!(
                "[EXPORT] Batch {} has {} result set(s)",
                redact_id(&batch.batch_id),
                batch.result_handles.len()
            );
            self.progress.results_discovered(idx + 1, total);
            self.pause().await;
        }
        Ok(())
    }

    /// Fetches one result set. The first element is its column header.
    pub async fn stream_results(
        &self,
        job_id: &str,
        batch_id: &str,
        handle: &str,
    ) -> Result<Vec<String>, AppError> {
        let body = self.api.fetch_result(job_id, batch_id, handle).await?;
        self.pause().await;
        Ok(split_rows(&body))
    }

    /// Writes every result set of `batches` into the report and persists it.
    ///
    /// The file only appears at its final path once the footer is written
    /// and the record counts reconcile. `completed_at` stamps both the file
    /// name and the footer.
    ///
    /// # Errors
    ///
    /// - `AppError::MalformedResponse` - a result set without a column header,
    ///   or no result sets at all
    /// - `AppError::ReconciliationFailed` - batch record counts do not add up
    ///   to `total_records`
    pub async fn assemble(
        &self,
        descriptor: &JobDescriptor,
        batches: &[BatchRecord],
        total_records: u64,
        completed_at: NaiveDateTime,
        output_dir: &Path,
    ) -> Result<AssemblyReport, AppError> {
        let job_id = descriptor.job_id.as_str();
        let file_name = render_file_name(&self.profile.file_name_template, completed_at, job_id);
        let mut report = ReportWriter::new(output_dir.join(file_name));

        let mut records_written: u64 = 0;
        let mut rows_written: u64 = 0;

        for batch in batches {
            for handle in &batch.result_handles {
                let rows = self.stream_results(job_id, &batch.batch_id, handle).await?;
                let Some((column_header, data)) = rows.split_first() else {
                    return Err(AppError::MalformedResponse(format!(
                        "Result {} of batch {} has no column header",
                        handle, batch.batch_id
                    )));
                };

                if !report.has_header() {
                    report.write_header(
                        &header_line(self.report_tag, total_records, &descriptor.subject_type),
                        &apply_column_mapping(
                            column_header,
                            &self.profile.column_mapping,
                            &self.profile.additional_columns,
                        ),
                    )?;
                }

                let mut data = data.to_vec();
                apply_additional_columns(&mut data, &self.profile.additional_columns);
                report.write_rows(&data)?;
                rows_written += data.len() as u64;
            }

            records_written += batch.records_processed;
            self.progress.records_written(records_written, total_records);
        }

        if !report.has_header() {
            return Err(AppError::MalformedResponse(format!(
                "Job {} returned no result sets",
                job_id
            )));
        }

        if records_written != total_records {
            return Err(AppError::ReconciliationFailed {
                processed: total_records,
                written: records_written,
            });
        }

        if rows_written != records_written {
            warn!(
                "[EXPORT] Job {} wrote {} data rows but batches report {} records",
                redact_id(job_id),
                rows_written,
                records_written
            );
        }

        report.write_footer(&footer_line(completed_at))?;
        let output_path = report.finish()?;
        info!(
            "[EXPORT] Records processed {}, records written {}: {}",
            total_records,
            records_written,
            output_path.display()
        );

        Ok(AssemblyReport {
            output_path,
            records_written,
            rows_written,
        })
    }

    async fn pause(&self) {
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
