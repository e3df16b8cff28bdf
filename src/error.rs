use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "x-sfdc-session",
    "sessionid",
    "session_id",
    "bearer ",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the terminal.
#[derive(Debug, Clone)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Job lifecycle ─────────────────────────────────────────────────────────
    #[error("Job creation failed: {0}")]
    JobCreationFailed(String),

    #[error("Query submission echoed job {actual}, expected {expected}")]
    QuerySubmissionFailed { expected: String, actual: String },

    #[error("Job {job_id} close not confirmed (state: {state})")]
    JobCloseFailed { job_id: String, state: String },

    #[error("Job {job_id} has no completed batches")]
    NoCompletedBatches { job_id: String },

    #[error("Batch {batch_id} belongs to job {actual}, expected {expected}")]
    BatchJobMismatch {
        batch_id: String,
        expected: String,
        actual: String,
    },

    #[error("Reconciliation failed: {processed} records processed, {written} written")]
    ReconciliationFailed { processed: u64, written: u64 },

    // ── API ───────────────────────────────────────────────────────────────────
    #[error("Salesforce error: {0}")]
    SalesforceError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Local ─────────────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true for errors raised by an HTTP exchange with the remote API.
    ///
    /// These are the only errors the completion poll retries; every other
    /// call site treats them as fatal.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::SalesforceError(_)
                | AppError::RateLimited { .. }
                | AppError::NotFound(_)
                | AppError::ConnectionFailed(_)
        )
    }

    /// Converts the error into a presentation suitable for terminal output.
    /// Never leaks session ids.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Job lifecycle ─────────────────────────────────────────────────
            AppError::JobCreationFailed(msg) => ErrorPresentation {
                title: "Job Creation Failed".into(),
                message: sanitize_message(msg, "Salesforce did not return a job id."),
                action: Some("Check the subject type and session, then retry".into()),
            },

            AppError::QuerySubmissionFailed { .. } => ErrorPresentation {
                title: "Query Submission Failed".into(),
                message: "Salesforce acknowledged the query for a different job.".into(),
                action: Some("Retry the export".into()),
            },

            AppError::JobCloseFailed { job_id, state } => ErrorPresentation {
                title: "Job Not Closed".into(),
                message: format!(
                    "Salesforce reported job {} as '{}' instead of Closed.",
                    job_id, state
                ),
                action: Some("Close the job manually in Setup > Bulk Data Load Jobs".into()),
            },

            AppError::NoCompletedBatches { job_id } => ErrorPresentation {
                title: "No Completed Batches".into(),
                message: format!("Job {} finished without any completed batch.", job_id),
                action: Some("Inspect the batch states in Salesforce".into()),
            },

            AppError::BatchJobMismatch { batch_id, .. } => ErrorPresentation {
                title: "Inconsistent Batch List".into(),
                message: format!("Batch {} does not belong to the export job.", batch_id),
                action: None,
            },

            AppError::ReconciliationFailed { processed, written } => ErrorPresentation {
                title: "Record Count Mismatch".into(),
                message: format!(
                    "{} records were processed but {} were written to the report.",
                    processed, written
                ),
                action: Some("Discard the report and rerun the export".into()),
            },

            // ── API ───────────────────────────────────────────────────────────
            AppError::SalesforceError(msg) => ErrorPresentation {
                title: "Salesforce Error".into(),
                message: sanitize_message(msg, "A Salesforce error occurred."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("Salesforce is limiting requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            AppError::NotFound(msg) => ErrorPresentation {
                title: "Not Found".into(),
                message: sanitize_message(msg, "A Salesforce resource was not found."),
                action: None,
            },

            AppError::MalformedResponse(msg) => ErrorPresentation {
                title: "Unexpected Response".into(),
                message: sanitize_message(msg, "Salesforce returned an unexpected response."),
                action: None,
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not connect to Salesforce. Please check your network.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── Local ─────────────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: msg.clone(),
                action: Some("Fix the configuration and retry".into()),
            },

            AppError::Io(msg) => ErrorPresentation {
                title: "File Error".into(),
                message: msg.clone(),
                action: Some("Check the output directory permissions".into()),
            },

            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}
