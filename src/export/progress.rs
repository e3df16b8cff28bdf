//! Progress reporting port.
//!
//! The controller and assembler report progress through [`ProgressReporter`]
//! instead of logging directly, so verbosity and destination are chosen by
//! the caller.

use tracing::info;

use crate::salesforce::redact_id;
use crate::salesforce::types::{percent, ProgressSnapshot};

/// Receives incremental progress of an export run.
pub trait ProgressReporter: Send + Sync {
    /// A status poll returned `snapshot` (attempt is 1-based).
    fn polled(&self, job_id: &str, snapshot: &ProgressSnapshot, attempt: u32, max_attempts: u32);

    /// Result handles for batch `done` of `total` were discovered.
    fn results_discovered(&self, done: usize, total: usize);

    /// `written` of `total` records are in the report.
    fn records_written(&self, written: u64, total: u64);
}

/// Reports progress as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn polled(&self, job_id: &str, snapshot: &ProgressSnapshot, attempt: u32, max_attempts: u32) {
        info!(
            "[EXPORT] Job {} batch {} of {}, progress {}% (poll {}/{})",
            redact_id(job_id),
            snapshot.batches_completed,
            snapshot.batches_total,
            snapshot.percent_complete(),
            attempt,
            max_attempts
        );
    }

    fn results_discovered(&self, done: usize, total: usize) {
        info!(
            "[EXPORT] Fetched result handles for batch {} of {}, progress {}%",
            done,
            total,
            percent(done as u64, total as u64)
        );
    }

    fn records_written(&self, written: u64, total: u64) {
        info!(
            "[EXPORT] Written {} records of {}, progress {}%",
            written,
            total,
            percent(written, total)
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every progress call for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingProgress {
        pub polls: Mutex<Vec<ProgressSnapshot>>,
        pub discovered: Mutex<Vec<(usize, usize)>>,
        pub written: Mutex<Vec<(u64, u64)>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn polled(&self, _job_id: &str, snapshot: &ProgressSnapshot, _attempt: u32, _max: u32) {
            self.polls.lock().unwrap().push(*snapshot);
        }

        fn results_discovered(&self, done: usize, total: usize) {
            self.discovered.lock().unwrap().push((done, total));
        }

        fn records_written(&self, written: u64, total: u64) {
            self.written.lock().unwrap().push((written, total));
        }
    }
}
