//! Batch discovery and record totals.

use tracing::debug;

use crate::error::AppError;
use crate::salesforce::bulk_query::BulkApi;
use crate::salesforce::redact_id;
use crate::salesforce::types::{BatchRecord, BatchState};

/// Lists a finished job's batches and totals their records.
pub struct BatchCollector<'a, A: BulkApi> {
    api: &'a A,
}

impl<'a, A: BulkApi> BatchCollector<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Returns the job's `Completed` batches in server order.
    ///
    /// Batches in any other state are dropped. With PK chunking the submitted
    /// batch always ends up `Not Processed`, so dropping is the normal case.
    ///
    /// # Errors
    ///
    /// `AppError::BatchJobMismatch` if an entry belongs to another job.
    pub async fn list_completed_batches(&self, job_id: &str) -> Result<Vec<BatchRecord>, AppError> {
        let batches = self.api.list_batches(job_id).await?;

        let mut completed = Vec::with_capacity(batches.len());
        for batch in batches {
            if batch.job_id != job_id {
                return Err(AppError::BatchJobMismatch {
                    batch_id: batch.batch_id,
                    expected: job_id.to_string(),
                    actual: batch.job_id,
                });
            }
            if batch.state == BatchState::Completed {
                completed.push(batch);
            } else {
                debug!(
                    "[EXPORT] Skipping batch {} in state {}",
                    redact_id(&batch.batch_id),
                    batch.state.as_str()
                );
            }
        }

        Ok(completed)
    }

    /// Sum of `records_processed` over the retained batches.
    ///
    /// # Errors
    ///
    /// `AppError::NoCompletedBatches` for an empty set: a job reported as
    /// complete must have at least one completed batch.
    pub fn total_processed_records(
        &self,
        job_id: &str,
        batches: &[BatchRecord],
    ) -> Result<u64, AppError> {
        if batches.is_empty() {
            return Err(AppError::NoCompletedBatches {
                job_id: job_id.to_string(),
            });
        }
        Ok(batches.iter().map(|b| b.records_processed).sum())
    }
}
