//! Job lifecycle: creation, query submission, completion polling, closure.
//!
//! `Created → Open → (query submitted) → polling → {Completed | ZeroBatches | TimedOut} → Closed`
//!
//! [`JobController::open`] hands out an [`OpenJob`] that can only be released
//! through [`JobController::close`], which consumes it. The orchestrator calls
//! `close` on every exit path once `open` has succeeded.

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::config::PollPolicy;
use crate::error::AppError;
use crate::export::progress::ProgressReporter;
use crate::salesforce::bulk_query::{BulkApi, JOB_STATE_CLOSED};
use crate::salesforce::redact_id;
use crate::salesforce::types::{JobDescriptor, JobState, ProgressSnapshot};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// How the completion poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Every batch completed. `completed_at` stamps the report.
    Completed {
        snapshot: ProgressSnapshot,
        completed_at: DateTime<Local>,
    },
    /// Salesforce created no batches for the query.
    ZeroBatches { snapshot: ProgressSnapshot },
    /// The attempt ceiling was reached first.
    TimedOut {
        attempts: u32,
        last_snapshot: Option<ProgressSnapshot>,
    },
}

/// A job that Salesforce has acknowledged and that still has to be closed.
#[must_use = "an open job must be released with JobController::close"]
#[derive(Debug)]
pub struct OpenJob {
    descriptor: JobDescriptor,
    released: bool,
}

impl OpenJob {
    pub fn job_id(&self) -> &str {
        &self.descriptor.job_id
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }
}

impl Drop for OpenJob {
    fn drop(&mut self) {
        if !self.released {
            error!(
                "[EXPORT] Job {} dropped without a close request; it is still open in Salesforce",
                redact_id(&self.descriptor.job_id)
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobController
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one job through its lifecycle against a [`BulkApi`].
pub struct JobController<'a, A: BulkApi> {
    api: &'a A,
    progress: &'a dyn ProgressReporter,
    policy: PollPolicy,
}

impl<'a, A: BulkApi> JobController<'a, A> {
    pub fn new(api: &'a A, progress: &'a dyn ProgressReporter, policy: PollPolicy) -> Self {
        Self {
            api,
            progress,
            policy,
        }
    }

    /// Creates the job.
    ///
    /// # Errors
    ///
    /// - `AppError::JobCreationFailed` - the response has no id, or an empty one
    /// - transport errors, unchanged
    pub async fn open(&self, mut descriptor: JobDescriptor) -> Result<OpenJob, AppError> {
        let job_id = match self.api.create_job(&descriptor).await {
            Ok(id) => id,
            Err(AppError::MalformedResponse(msg)) => return Err(AppError::JobCreationFailed(msg)),
            Err(e) => return Err(e),
        };

        if job_id.is_empty() {
            return Err(AppError::JobCreationFailed(
                "Salesforce returned an empty job id".to_string(),
            ));
        }

        descriptor.job_id = job_id;
        descriptor.state = JobState::Open;
        info!(
            "[EXPORT] Created Salesforce job {} for {}",
            redact_id(&descriptor.job_id),
            descriptor.subject_type
        );

        Ok(OpenJob {
            descriptor,
            released: false,
        })
    }

    /// Submits the query as the job's batch.
    ///
    /// # Errors
    ///
    /// `AppError::QuerySubmissionFailed` if the acknowledgement names another job.
    pub async fn submit_query(&self, job: &OpenJob, query: &str) -> Result<(), AppError> {
        let echoed = self.api.submit_query(job.job_id(), query).await?;

        if echoed != job.job_id() {
            return Err(AppError::QuerySubmissionFailed {
                expected: job.job_id().to_string(),
                actual: echoed,
            });
        }

        info!(
            "[EXPORT] Submitted {} query to job {}",
            job.descriptor.subject_type,
            redact_id(job.job_id())
        );
        Ok(())
    }

    /// Polls the job at a fixed interval until every batch is done.
    ///
    /// Transport errors count as a failed attempt and are retried; decoding
    /// errors abort the poll.
    pub async fn await_completion(&self, job: &OpenJob) -> Result<CompletionOutcome, AppError> {
        let job_id = job.job_id();
        let mut attempts: u32 = 0;
        let mut last_snapshot = None;

        loop {
            match self.api.job_progress(job_id).await {
                Ok(snapshot) => {
                    self.progress
                        .polled(job_id, &snapshot, attempts + 1, self.policy.max_attempts);

                    if snapshot.batches_total == 0 {
                        warn!(
                            "[EXPORT] Zero batches are created for job {}",
                            redact_id(job_id)
                        );
                        return Ok(CompletionOutcome::ZeroBatches { snapshot });
                    }

                    if snapshot.batches_completed == snapshot.batches_total {
                        info!(
                            "[EXPORT] Job {} complete, total records queried {}",
                            redact_id(job_id),
                            snapshot.records_processed
                        );
                        return Ok(CompletionOutcome::Completed {
                            snapshot,
                            completed_at: Local::now(),
                        });
                    }

                    last_snapshot = Some(snapshot);
                }
                Err(e) if e.is_transport() => {
                    warn!(
                        "[EXPORT] Status poll for job {} failed: {}",
                        redact_id(job_id),
                        e
                    );
                }
                Err(e) => return Err(e),
            }

            attempts += 1;
            if attempts >= self.policy.max_attempts {
                error!(
                    "[EXPORT] Maximum wait reached while checking progress of job {}",
                    redact_id(job_id)
                );
                return Ok(CompletionOutcome::TimedOut {
                    attempts,
                    last_snapshot,
                });
            }

            tokio::time::sleep(self.policy.interval).await;
        }
    }

    /// Closes the job. Consumes the handle, so a job is closed at most once.
    ///
    /// # Errors
    ///
    /// `AppError::JobCloseFailed` if Salesforce reports any state but `Closed`.
    pub async fn close(&self, mut job: OpenJob) -> Result<JobDescriptor, AppError> {
        job.released = true;
        let job_id = job.job_id().to_string();

        let state = self.api.close_job(&job_id).await?;
        if state != JOB_STATE_CLOSED {
            return Err(AppError::JobCloseFailed { job_id, state });
        }

        let mut descriptor = job.descriptor.clone();
        descriptor.state = JobState::Closed;
        info!("[EXPORT] Salesforce job {} is {}", redact_id(&job_id), state);
        Ok(descriptor)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::DataFormat;
    use crate::export::fake::{snapshot, FakeBulkApi, PollStep};
    use crate::export::progress::testing::RecordingProgress;

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    fn descriptor() -> JobDescriptor {
        JobDescriptor::new("Asset", DataFormat::Csv, true)
    }

    async fn open_job(api: &FakeBulkApi, progress: &RecordingProgress) -> OpenJob {
        JobController::new(api, progress, policy(3))
            .open(descriptor())
            .await
            .unwrap()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // open / submit / close
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn open_assigns_id_and_state() {
        let api = FakeBulkApi::new("750A");
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(3));

        let job = controller.open(descriptor()).await.unwrap();

        assert_eq!(job.job_id(), "750A");
        assert_eq!(job.descriptor().state, JobState::Open);
        controller.close(job).await.unwrap();
    }

    #[tokio::test]
    async fn open_with_empty_id_fails() {
        let api = FakeBulkApi::new("");
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(3));

        let result = controller.open(descriptor()).await;

        assert!(matches!(result, Err(AppError::JobCreationFailed(_))));
    }

    #[tokio::test]
    async fn submit_with_mismatched_echo_fails() {
        let mut api = FakeBulkApi::new("750A");
        api.echoed_job_id = Some("750B".to_string());
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(3));
        let job = open_job(&api, &progress).await;

        match controller.submit_query(&job, "SELECT Id FROM Asset").await {
            Err(AppError::QuerySubmissionFailed { expected, actual }) => {
                assert_eq!(expected, "750A");
                assert_eq!(actual, "750B");
            }
            other => panic!("Expected QuerySubmissionFailed, got: {:?}", other),
        }
        controller.close(job).await.unwrap();
    }

    #[tokio::test]
    async fn close_marks_descriptor_closed() {
        let api = FakeBulkApi::new("750A");
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(3));
        let job = open_job(&api, &progress).await;

        let closed = controller.close(job).await.unwrap();

        assert_eq!(closed.state, JobState::Closed);
        assert_eq!(api.count("close_job"), 1);
    }

    #[tokio::test]
    async fn close_with_unexpected_state_fails() {
        let mut api = FakeBulkApi::new("750A");
        api.close_state = "Open".to_string();
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(3));
        let job = open_job(&api, &progress).await;

        match controller.close(job).await {
            Err(AppError::JobCloseFailed { job_id, state }) => {
                assert_eq!(job_id, "750A");
                assert_eq!(state, "Open");
            }
            other => panic!("Expected JobCloseFailed, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropping_an_open_job_sends_nothing() {
        let api = FakeBulkApi::new("750A");
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(3));
        let job = controller.open(descriptor()).await.unwrap();

        drop(job);

        assert_eq!(api.calls(), vec!["create_job"]);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // await_completion
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn completes_on_the_poll_that_reaches_total() {
        let mut api = FakeBulkApi::new("750A");
        api.poll_steps = vec![snapshot(0, 2, 0), snapshot(1, 2, 5), snapshot(2, 2, 9)];
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(3));
        let job = open_job(&api, &progress).await;

        let outcome = controller.await_completion(&job).await.unwrap();

        match outcome {
            CompletionOutcome::Completed { snapshot, .. } => {
                assert_eq!(snapshot.records_processed, 9)
            }
            other => panic!("Expected Completed, got: {:?}", other),
        }
        assert_eq!(api.count("job_progress"), 3);
        assert_eq!(progress.polls.lock().unwrap().len(), 3);
        controller.close(job).await.unwrap();
    }

    #[tokio::test]
    async fn times_out_after_max_attempts() {
        let mut api = FakeBulkApi::new("750A");
        api.poll_steps = vec![snapshot(1, 2, 5)];
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(4));
        let job = open_job(&api, &progress).await;

        let outcome = controller.await_completion(&job).await.unwrap();

        assert_eq!(
            outcome,
            CompletionOutcome::TimedOut {
                attempts: 4,
                last_snapshot: Some(ProgressSnapshot {
                    batches_completed: 1,
                    batches_total: 2,
                    records_processed: 5,
                }),
            }
        );
        assert_eq!(api.count("job_progress"), 4);
        controller.close(job).await.unwrap();
    }

    #[tokio::test]
    async fn zero_batches_on_first_poll() {
        let mut api = FakeBulkApi::new("750A");
        api.poll_steps = vec![snapshot(0, 0, 0)];
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(10));
        let job = open_job(&api, &progress).await;

        let outcome = controller.await_completion(&job).await.unwrap();

        assert!(matches!(outcome, CompletionOutcome::ZeroBatches { .. }));
        assert_eq!(api.count("job_progress"), 1);
        controller.close(job).await.unwrap();
    }

    #[tokio::test]
    async fn transport_errors_are_retried_within_the_ceiling() {
        let mut api = FakeBulkApi::new("750A");
        api.poll_steps = vec![
            PollStep::TransportError,
            PollStep::TransportError,
            snapshot(1, 1, 3),
        ];
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(3));
        let job = open_job(&api, &progress).await;

        let outcome = controller.await_completion(&job).await.unwrap();

        assert!(matches!(outcome, CompletionOutcome::Completed { .. }));
        controller.close(job).await.unwrap();
    }

    #[tokio::test]
    async fn transport_errors_count_toward_timeout() {
        let mut api = FakeBulkApi::new("750A");
        api.poll_steps = vec![PollStep::TransportError];
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(2));
        let job = open_job(&api, &progress).await;

        let outcome = controller.await_completion(&job).await.unwrap();

        assert_eq!(
            outcome,
            CompletionOutcome::TimedOut {
                attempts: 2,
                last_snapshot: None,
            }
        );
        controller.close(job).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_status_aborts_polling() {
        let mut api = FakeBulkApi::new("750A");
        api.poll_steps = vec![PollStep::Malformed];
        let progress = RecordingProgress::default();
        let controller = JobController::new(&api, &progress, policy(5));
        let job = open_job(&api, &progress).await;

        let result = controller.await_completion(&job).await;

        assert!(matches!(result, Err(AppError::MalformedResponse(_))));
        assert_eq!(api.count("job_progress"), 1);
        controller.close(job).await.unwrap();
    }
}
