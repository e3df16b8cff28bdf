//! End-to-end export run.
//!
//! Once `open` succeeds the job is closed on every path: success, zero
//! batches, timeout, and any error raised while the job was open.

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::config::{ExportConfig, SubjectProfile};
use crate::error::AppError;
use crate::export::assembler::ResultAssembler;
use crate::export::batches::BatchCollector;
use crate::export::controller::{CompletionOutcome, JobController, OpenJob};
use crate::export::progress::ProgressReporter;
use crate::salesforce::bulk_query::BulkApi;
use crate::salesforce::redact_id;
use crate::salesforce::types::JobDescriptor;

/// Totals of a successful export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub job_id: String,
    pub output_path: PathBuf,
    pub records_processed: u64,
    pub records_written: u64,
    pub rows_written: u64,
    pub batches: usize,
}

/// How a run ended. Zero batches and timeouts are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Exported(ExportSummary),
    ZeroBatches { job_id: String },
    TimedOut { job_id: String, attempts: u32 },
}

/// Runs one export for a subject type.
pub struct Exporter<'a, A: BulkApi> {
    api: &'a A,
    config: &'a ExportConfig,
    progress: &'a dyn ProgressReporter,
}

impl<'a, A: BulkApi> Exporter<'a, A> {
    pub fn new(api: &'a A, config: &'a ExportConfig, progress: &'a dyn ProgressReporter) -> Self {
        Self {
            api,
            config,
            progress,
        }
    }

    /// Exports `subject`, substituting `execute_time` into its query.
    ///
    /// If the run fails and the close request fails too, the run error is
    /// returned and the close error is logged.
    pub async fn run(&self, subject: &str, execute_time: &str) -> Result<ExportOutcome, AppError> {
        let profile = self.config.profile(subject)?;
        let query = profile.render_query(execute_time);
        let controller = JobController::new(self.api, self.progress, self.config.poll_policy());

        let descriptor =
            JobDescriptor::new(subject, self.config.data_format, self.config.pk_chunking);
        let job = controller.open(descriptor).await?;

        let result = self.run_open_job(&controller, &job, profile, &query).await;
        let job_id = job.job_id().to_string();
        let closed = controller.close(job).await;

        match (result, closed) {
            (Ok(outcome), Ok(_)) => Ok(outcome),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(close_err)) => {
                error!(
                    "[EXPORT] Failed to close job {} after error: {}",
                    redact_id(&job_id),
                    close_err
                );
                Err(e)
            }
        }
    }

    async fn run_open_job(
        &self,
        controller: &JobController<'_, A>,
        job: &OpenJob,
        profile: &SubjectProfile,
        query: &str,
    ) -> Result<ExportOutcome, AppError> {
        let job_id = job.job_id();
        controller.submit_query(job, query).await?;

        let (snapshot, completed_at) = match controller.await_completion(job).await? {
            CompletionOutcome::Completed {
                snapshot,
                completed_at,
            } => (snapshot, completed_at),
            CompletionOutcome::ZeroBatches { .. } => {
                return Ok(ExportOutcome::ZeroBatches {
                    job_id: job_id.to_string(),
                })
            }
            CompletionOutcome::TimedOut { attempts, .. } => {
                return Ok(ExportOutcome::TimedOut {
                    job_id: job_id.to_string(),
                    attempts,
                })
            }
        };

        let collector = BatchCollector::new(self.api);
        let mut batches = collector.list_completed_batches(job_id).await?;
        let total = collector.total_processed_records(job_id, &batches)?;
        if total != snapshot.records_processed {
            warn!(
                "[EXPORT] Job {} reported {} records but completed batches hold {}",
                redact_id(job_id),
                snapshot.records_processed,
                total
            );
        }

        let assembler = ResultAssembler::new(
            self.api,
            self.progress,
            profile,
            &self.config.report_tag,
            self.config.result_fetch_delay(),
        );
        assembler.discover_result_handles(job_id, &mut batches).await?;
        let report = assembler
            .assemble(
                job.descriptor(),
                &batches,
                total,
                completed_at.naive_local(),
                &self.config.output_dir,
            )
            .await?;

        info!(
            "[EXPORT] Exported {} records from {} batch(es) of job {}",
            report.records_written,
            batches.len(),
            redact_id(job_id)
        );

        Ok(ExportOutcome::Exported(ExportSummary {
            job_id: job_id.to_string(),
            output_path: report.output_path,
            records_processed: total,
            records_written: report.records_written,
            rows_written: report.rows_written,
            batches: batches.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::DEFAULT_EXECUTE_TIME;
    use crate::export::fake::{batch, snapshot, FakeBulkApi};
    use crate::export::progress::testing::RecordingProgress;
    use crate::salesforce::types::BatchState;

    fn config(output_dir: &TempDir, max_attempts: u32) -> ExportConfig {
        ExportConfig {
            poll_interval_secs: 0,
            max_attempts: Some(max_attempts),
            result_fetch_delay_secs: 0,
            output_dir: output_dir.path().to_path_buf(),
            ..ExportConfig::default()
        }
    }

    fn files_in(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    const ASSET_BODY: &str = "\"Id\",\"Quantity\"\n\"02i000000000001\",\"1\"\n\"02i000000000002\",\"3\"\n";

    #[tokio::test]
    async fn asset_export_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let mut api = FakeBulkApi::new("750A").with_batch("751B", BatchState::Completed, 2, &[ASSET_BODY]);
        api.batches.insert(0, batch("751A", "750A", BatchState::NotProcessed, 0));
        api.poll_steps = vec![snapshot(0, 1, 0), snapshot(1, 1, 2)];
        let progress = RecordingProgress::default();

        let outcome = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await
            .unwrap();

        let summary = match outcome {
            ExportOutcome::Exported(summary) => summary,
            other => panic!("Expected Exported, got: {:?}", other),
        };
        assert_eq!(summary.job_id, "750A");
        assert_eq!(summary.records_processed, 2);
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.rows_written, 2);
        assert_eq!(summary.batches, 1);

        let content = std::fs::read_to_string(&summary.output_path).unwrap();
        let lines: Vec<&str> = content.split('\n').collect();
        assert_eq!(lines[0], "\"HEADER\",\"ESMEE\",\"2\",\"Asset\"");
        assert_eq!(lines[1], "\"ASSET ID\",\"QUANTITY\",\"PARTNER ID\"");
        assert!(lines[2].ends_with(",\"67490\""));
        assert!(lines[3].ends_with(",\"67490\""));
        assert!(lines[4].starts_with("\"FOOTER\""));

        assert_eq!(
            api.calls(),
            vec![
                "create_job",
                "submit_query",
                "job_progress",
                "job_progress",
                "list_batches",
                "list_results",
                "fetch_result",
                "close_job",
            ]
        );
    }

    #[tokio::test]
    async fn zero_batches_closes_without_output() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let mut api = FakeBulkApi::new("750A");
        api.poll_steps = vec![snapshot(0, 0, 0)];
        let progress = RecordingProgress::default();

        let outcome = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExportOutcome::ZeroBatches {
                job_id: "750A".to_string()
            }
        );
        assert_eq!(api.count("close_job"), 1);
        assert_eq!(api.count("list_batches"), 0);
        assert_eq!(files_in(&temp_dir), 0);
    }

    #[tokio::test]
    async fn timeout_closes_without_output() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 2);
        let mut api = FakeBulkApi::new("750A");
        api.poll_steps = vec![snapshot(0, 3, 0)];
        let progress = RecordingProgress::default();

        let outcome = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExportOutcome::TimedOut {
                job_id: "750A".to_string(),
                attempts: 2
            }
        );
        assert_eq!(api.count("close_job"), 1);
        assert_eq!(files_in(&temp_dir), 0);
    }

    #[tokio::test]
    async fn failed_and_completed_batches() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let mut api = FakeBulkApi::new("750A").with_batch("751B", BatchState::Completed, 2, &[ASSET_BODY]);
        api.batches.insert(0, batch("751A", "750A", BatchState::Failed, 40));
        api.poll_steps = vec![snapshot(2, 2, 2)];
        let progress = RecordingProgress::default();

        let outcome = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await
            .unwrap();

        let summary = match outcome {
            ExportOutcome::Exported(summary) => summary,
            other => panic!("Expected Exported, got: {:?}", other),
        };
        assert_eq!(summary.records_processed, 2);
        assert_eq!(summary.batches, 1);
        assert_eq!(api.count("list_results"), 1);
    }

    #[tokio::test]
    async fn stream_failure_still_closes_job() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let mut api = FakeBulkApi::new("750A").with_batch("751A", BatchState::Completed, 2, &[ASSET_BODY]);
        api.fail_call = Some("fetch_result");
        let progress = RecordingProgress::default();

        let result = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await;

        assert!(matches!(result, Err(AppError::ConnectionFailed(_))));
        assert_eq!(api.count("close_job"), 1);
        assert_eq!(files_in(&temp_dir), 0);
    }

    #[tokio::test]
    async fn submit_failure_still_closes_job() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let mut api = FakeBulkApi::new("750A");
        api.echoed_job_id = Some("750Z".to_string());
        let progress = RecordingProgress::default();

        let result = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await;

        assert!(matches!(result, Err(AppError::QuerySubmissionFailed { .. })));
        assert_eq!(api.count("job_progress"), 0);
        assert_eq!(api.count("close_job"), 1);
    }

    #[tokio::test]
    async fn create_failure_sends_no_close() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let mut api = FakeBulkApi::new("750A");
        api.fail_call = Some("create_job");
        let progress = RecordingProgress::default();

        let result = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await;

        assert!(result.is_err());
        assert_eq!(api.calls(), vec!["create_job"]);
    }

    #[tokio::test]
    async fn close_failure_after_success_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let mut api = FakeBulkApi::new("750A").with_batch("751A", BatchState::Completed, 2, &[ASSET_BODY]);
        api.close_state = "Open".to_string();
        let progress = RecordingProgress::default();

        let result = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await;

        assert!(matches!(result, Err(AppError::JobCloseFailed { .. })));
    }

    #[tokio::test]
    async fn body_error_wins_over_close_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let mut api = FakeBulkApi::new("750A");
        api.echoed_job_id = Some("750Z".to_string());
        api.close_state = "Open".to_string();
        let progress = RecordingProgress::default();

        let result = Exporter::new(&api, &config, &progress)
            .run("Asset", DEFAULT_EXECUTE_TIME)
            .await;

        assert!(matches!(result, Err(AppError::QuerySubmissionFailed { .. })));
    }

    #[tokio::test]
    async fn unknown_subject_creates_no_job() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 3);
        let api = FakeBulkApi::new("750A");
        let progress = RecordingProgress::default();

        let result = Exporter::new(&api, &config, &progress)
            .run("Opportunity", DEFAULT_EXECUTE_TIME)
            .await;

        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(api.calls().is_empty());
    }
}
