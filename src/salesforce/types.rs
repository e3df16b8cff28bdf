//! Typed views of async bulk API resources.

use serde::Serialize;

use crate::config::DataFormat;

/// Lifecycle state of a bulk job as tracked locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    /// Described locally, not yet acknowledged by Salesforce.
    Created,
    Open,
    Closed,
}

/// The job an export run owns from creation to closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDescriptor {
    /// Queried sObject, e.g. `Asset`.
    pub subject_type: String,
    pub data_format: DataFormat,
    pub chunking_enabled: bool,
    /// Assigned by Salesforce; empty until creation succeeds.
    pub job_id: String,
    pub state: JobState,
}

impl JobDescriptor {
    pub fn new(subject_type: impl Into<String>, data_format: DataFormat, chunking_enabled: bool) -> Self {
        Self {
            subject_type: subject_type.into(),
            data_format,
            chunking_enabled,
            job_id: String::new(),
            state: JobState::Created,
        }
    }
}

/// Processing state of a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchState {
    Queued,
    InProgress,
    Completed,
    Failed,
    NotProcessed,
}

impl BatchState {
    /// Wire literal as returned in `<state>`.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Queued => "Queued",
            BatchState::InProgress => "InProgress",
            BatchState::Completed => "Completed",
            BatchState::Failed => "Failed",
            BatchState::NotProcessed => "Not Processed",
        }
    }

    /// Parses a wire literal. Unknown literals yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Queued" => Some(BatchState::Queued),
            "InProgress" => Some(BatchState::InProgress),
            "Completed" => Some(BatchState::Completed),
            "Failed" => Some(BatchState::Failed),
            // The async API spells this one with a space.
            "Not Processed" | "NotProcessed" => Some(BatchState::NotProcessed),
            _ => None,
        }
    }
}

/// One entry of a job's batch list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub job_id: String,
    pub state: BatchState,
    pub records_processed: u64,
    /// Result-set handles in server order; empty until discovered.
    pub result_handles: Vec<String>,
}

/// Counters from a single job status poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub batches_completed: u64,
    pub batches_total: u64,
    pub records_processed: u64,
}

impl ProgressSnapshot {
    /// Batch completion in whole percent; 0 when there are no batches.
    pub fn percent_complete(&self) -> u64 {
        percent(self.batches_completed, self.batches_total)
    }
}

/// `part * 100 / whole`, or 0 for an empty whole.
pub(crate) fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        0
    } else {
        part.saturating_mul(100) / whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_state_parsing() {
        let test_cases = [
            ("Queued", Some(BatchState::Queued)),
            ("InProgress", Some(BatchState::InProgress)),
            ("Completed", Some(BatchState::Completed)),
            ("Failed", Some(BatchState::Failed)),
            ("Not Processed", Some(BatchState::NotProcessed)),
            ("Done", None),
            ("completed", None),
        ];

        for (literal, expected) in test_cases {
            assert_eq!(BatchState::parse(literal), expected, "Failed for input: {}", literal);
        }
    }

    #[test]
    fn new_descriptor_has_no_job_id() {
        let job = JobDescriptor::new("Asset", DataFormat::Csv, true);
        assert!(job.job_id.is_empty());
        assert_eq!(job.state, JobState::Created);
    }

    #[test]
    fn percent_guards_zero_total() {
        let snapshot = ProgressSnapshot::default();
        assert_eq!(snapshot.percent_complete(), 0);

        let snapshot = ProgressSnapshot {
            batches_completed: 1,
            batches_total: 3,
            records_processed: 0,
        };
        assert_eq!(snapshot.percent_complete(), 33);
    }
}
