//! Scripted in-memory `BulkApi` for orchestration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AppError;
use crate::salesforce::bulk_query::{ApiFuture, BulkApi, JOB_STATE_CLOSED};
use crate::salesforce::types::{BatchRecord, BatchState, JobDescriptor, ProgressSnapshot};

/// One scripted answer to a status poll.
#[derive(Debug, Clone)]
pub enum PollStep {
    Snapshot(ProgressSnapshot),
    TransportError,
    Malformed,
}

pub fn snapshot(completed: u64, total: u64, records: u64) -> PollStep {
    PollStep::Snapshot(ProgressSnapshot {
        batches_completed: completed,
        batches_total: total,
        records_processed: records,
    })
}

pub fn batch(id: &str, job_id: &str, state: BatchState, records: u64) -> BatchRecord {
    BatchRecord {
        batch_id: id.to_string(),
        job_id: job_id.to_string(),
        state,
        records_processed: records,
        result_handles: Vec::new(),
    }
}

/// Fake remote API. Poll steps are consumed in order; the last one repeats.
#[derive(Debug)]
pub struct FakeBulkApi {
    pub job_id: String,
    pub echoed_job_id: Option<String>,
    pub poll_steps: Vec<PollStep>,
    pub batches: Vec<BatchRecord>,
    /// batch id → result handles
    pub results: HashMap<String, Vec<String>>,
    /// result handle → body
    pub bodies: HashMap<String, String>,
    pub close_state: String,
    /// Name of a call that fails with a transport error.
    pub fail_call: Option<&'static str>,
    polls: Mutex<usize>,
    calls: Mutex<Vec<String>>,
}

impl FakeBulkApi {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            echoed_job_id: None,
            poll_steps: vec![snapshot(1, 1, 0)],
            batches: Vec::new(),
            results: HashMap::new(),
            bodies: HashMap::new(),
            close_state: JOB_STATE_CLOSED.to_string(),
            fail_call: None,
            polls: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Adds a completed batch with one result set per body.
    pub fn with_batch(mut self, batch_id: &str, state: BatchState, records: u64, bodies: &[&str]) -> Self {
        self.batches.push(batch(batch_id, &self.job_id.clone(), state, records));
        let handles: Vec<String> = (0..bodies.len())
            .map(|i| format!("{}-R{}", batch_id, i))
            .collect();
        for (handle, body) in handles.iter().zip(bodies) {
            self.bodies.insert(handle.clone(), body.to_string());
        }
        self.results.insert(batch_id.to_string(), handles);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: &'static str) -> Result<(), AppError> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.fail_call == Some(call) {
            return Err(AppError::ConnectionFailed(format!("{} failed", call)));
        }
        Ok(())
    }
}

impl BulkApi for FakeBulkApi {
    fn create_job<'a>(&'a self, _job: &'a JobDescriptor) -> ApiFuture<'a, String> {
        Box::pin(async move {
            self.record("create_job")?;
            Ok(self.job_id.clone())
        })
    }

    fn submit_query<'a>(&'a self, _job_id: &'a str, _query: &'a str) -> ApiFuture<'a, String> {
        Box::pin(async move {
            self.record("submit_query")?;
            Ok(self.echoed_job_id.clone().unwrap_or_else(|| self.job_id.clone()))
        })
    }

    fn job_progress<'a>(&'a self, _job_id: &'a str) -> ApiFuture<'a, ProgressSnapshot> {
        Box::pin(async move {
            self.record("job_progress")?;
            let step = {
                let mut polls = self.polls.lock().unwrap();
                let idx = (*polls).min(self.poll_steps.len() - 1);
                *polls += 1;
                self.poll_steps[idx].clone()
            };
            match step {
                PollStep::Snapshot(s) => Ok(s),
                PollStep::TransportError => Err(AppError::SalesforceError("HTTP 503".into())),
                PollStep::Malformed => Err(AppError::MalformedResponse("missing counter".into())),
            }
        })
    }

    fn list_batches<'a>(&'a self, _job_id: &'a str) -> ApiFuture<'a, Vec<BatchRecord>> {
        Box::pin(async move {
            self.record("list_batches")?;
            Ok(self.batches.clone())
        })
    }

    fn list_results<'a>(&'a self, _job_id: &'a str, batch_id: &'a str) -> ApiFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.record("list_results")?;
            Ok(self.results.get(batch_id).cloned().unwrap_or_default())
        })
    }

    fn fetch_result<'a>(
        &'a self,
        _job_id: &'a str,
        _batch_id: &'a str,
        handle: &'a str,
    ) -> ApiFuture<'a, String> {
        Box::pin(async move {
            self.record("fetch_result")?;
            self.bodies
                .get(handle)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("result {}", handle)))
        })
    }

    fn close_job<'a>(&'a self, _job_id: &'a str) -> ApiFuture<'a, String> {
        Box::pin(async move {
            self.record("close_job")?;
            Ok(self.close_state.clone())
        })
    }
}
