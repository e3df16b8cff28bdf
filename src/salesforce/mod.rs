//! Salesforce async bulk API access.
//!
//! - **Transport** (`client`): session-header auth, sanitized logging,
//!   non-success statuses mapped to `AppError`
//! - **Response decoding** (`xml`): namespace-agnostic, required fields
//! - **Typed API** (`bulk_query`): the job/batch/result calls the export uses

pub mod bulk_query;
pub mod client;
pub mod types;
pub mod xml;

pub use bulk_query::{ApiFuture, BulkApi, BulkQueryClient, JOB_STATE_CLOSED};
pub use client::SalesforceClient;
pub use types::{BatchRecord, BatchState, JobDescriptor, JobState, ProgressSnapshot};

/// Redacts a job or batch id for logging (shows first 8 chars).
pub fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}
