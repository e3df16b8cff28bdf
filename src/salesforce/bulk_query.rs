//! Salesforce async (Bulk API 1.0) query client.
//!
//! This module provides functionality to:
//! - Create and close query jobs
//! - Submit the query as the job's batch
//! - Poll job counters
//! - List batches and their result sets
//! - Fetch result-set rows
//!
//! # Security
//!
//! - Query text is never logged
//! - The session header is never logged
//! - Only HTTP method, path, and status codes are logged (by the transport)

use std::future::Future;
use std::pin::Pin;

use quick_xml::escape::escape;
use tracing::info;

use crate::error::AppError;
use crate::salesforce::client::SalesforceClient;
use crate::salesforce::types::{BatchRecord, JobDescriptor, ProgressSnapshot};
use crate::salesforce::{redact_id, xml};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Namespace of every async API document.
const ASYNC_API_NAMESPACE: &str = "http://www.force.com/2009/06/asyncapi/dataload";

/// Content type for job documents.
const XML_CONTENT_TYPE: &str = "application/xml; charset=UTF-8";

/// Content type for the query batch body.
const CSV_CONTENT_TYPE: &str = "text/csv; charset=UTF-8";

/// Header asking Salesforce to split the query by primary key ranges.
const PK_CHUNKING_HEADER: &str = "Sforce-Enable-PKChunking";

/// Job state literal confirming closure.
pub const JOB_STATE_CLOSED: &str = "Closed";

// ─────────────────────────────────────────────────────────────────────────────
// BulkApi trait
// ─────────────────────────────────────────────────────────────────────────────

/// Boxed future returned by [`BulkApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// Remote job API consumed by the export, allowing test fakes.
pub trait BulkApi: Send + Sync {
    /// Creates a job and returns the id Salesforce assigned (possibly empty).
    fn create_job<'a>(&'a self, job: &'a JobDescriptor) -> ApiFuture<'a, String>;

    /// Submits the query text and returns the job id echoed in the batch info.
    fn submit_query<'a>(&'a self, job_id: &'a str, query: &'a str) -> ApiFuture<'a, String>;

    /// Fetches the job's batch counters.
    fn job_progress<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, ProgressSnapshot>;

    /// Lists every batch of the job.
    fn list_batches<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, Vec<BatchRecord>>;

    /// Lists a batch's result-set handles.
    fn list_results<'a>(&'a self, job_id: &'a str, batch_id: &'a str)
        -> ApiFuture<'a, Vec<String>>;

    /// Fetches the rows of one result set.
    fn fetch_result<'a>(
        &'a self,
        job_id: &'a str,
        batch_id: &'a str,
        handle: &'a str,
    ) -> ApiFuture<'a, String>;

    /// Requests closure and returns the state Salesforce reports.
    fn close_job<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkQueryClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the async query API under `/services/async/{version}`.
#[derive(Debug, Clone)]
pub struct BulkQueryClient {
    transport: SalesforceClient,
    api_version: String,
}

impl BulkQueryClient {
    pub fn new(transport: SalesforceClient, api_version: impl Into<String>) -> Self {
        Self {
            transport,
            api_version: api_version.into(),
        }
    }

    /// Creates a query job.
    ///
    /// # Errors
    ///
    /// - `AppError::MalformedResponse` - response carries no `<id>`
    /// - transport errors from [`SalesforceClient`]
    pub async fn create_query_job(&self, job: &JobDescriptor) -> Result<String, AppError> {
        info!("[BULK] POST /job (creating {} job)", job.subject_type);

        let chunking = if job.chunking_enabled { "true" } else { "false" };
        let body = self
            .transport
            .post_text(
                &self.jobs_path(),
                create_job_body(job),
                XML_CONTENT_TYPE,
                &[(PK_CHUNKING_HEADER, chunking)],
            )
            .await?;

        xml::decode_job_id(&body)
    }

    /// Adds the query as a batch and returns the echoed job id.
    pub async fn add_query_batch(&self, job_id: &str, query: &str) -> Result<String, AppError> {
        info!("[BULK] POST /job/{}/batch (submitting query)", redact_id(job_id));

        let body = self
            .transport
            .post_text(
                &self.batches_path(job_id),
                query.to_string(),
                CSV_CONTENT_TYPE,
                &[],
            )
            .await?;

        xml::decode_batch_job_id(&body)
    }

    /// Gets the job's batch counters.
    pub async fn get_job_progress(&self, job_id: &str) -> Result<ProgressSnapshot, AppError> {
        let body = self.transport.get_text(&self.job_path(job_id)).await?;
        xml::decode_progress(&body)
    }

    /// Gets every batch of the job.
    pub async fn get_batches(&self, job_id: &str) -> Result<Vec<BatchRecord>, AppError> {
        info!("[BULK] GET /job/{}/batch", redact_id(job_id));
        let body = self.transport.get_text(&self.batches_path(job_id)).await?;
        xml::decode_batch_list(&body)
    }

    /// Gets a batch's result-set handles.
    pub async fn get_result_handles(
        &self,
        job_id: &str,
        batch_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let body = self
            .transport
            .get_text(&self.results_path(job_id, batch_id))
            .await?;
        xml::decode_result_list(&body)
    }

    /// Downloads one result set as text.
    pub async fn get_result(
        &self,
        job_id: &str,
        batch_id: &str,
        handle: &str,
    ) -> Result<String, AppError> {
        let path = format!("{}/{}", self.results_path(job_id, batch_id), handle);
        self.transport.get_text(&path).await
    }

    /// Sends the close request and returns the reported state.
    pub async fn close_query_job(&self, job_id: &str) -> Result<String, AppError> {
        info!("[BULK] POST /job/{} (closing)", redact_id(job_id));

        let body = self
            .transport
            .post_text(
                &self.job_path(job_id),
                close_job_body(),
                XML_CONTENT_TYPE,
                &[],
            )
            .await?;

        xml::decode_job_state(&body)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Paths
    // ─────────────────────────────────────────────────────────────────────────

    /// `/services/async/{version}/job`
    fn jobs_path(&self) -> String {
        format!("/services/async/{}/job", self.api_version)
    }

    fn job_path(&self, job_id: &str) -> String {
        format!("{}/{}", self.jobs_path(), job_id)
    }

    fn batches_path(&self, job_id: &str) -> String {
        format!("{}/batch", self.job_path(job_id))
    }

    fn results_path(&self, job_id: &str, batch_id: &str) -> String {
        format!("{}/{}/result", self.batches_path(job_id), batch_id)
    }
}

impl BulkApi for BulkQueryClient {
    fn create_job<'a>(&'a self, job: &'a JobDescriptor) -> ApiFuture<'a, String> {
        Box::pin(self.create_query_job(job))
    }

    fn submit_query<'a>(&'a self, job_id: &'a str, query: &'a str) -> ApiFuture<'a, String> {
        Box::pin(self.add_query_batch(job_id, query))
    }

    fn job_progress<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, ProgressSnapshot> {
        Box::pin(self.get_job_progress(job_id))
    }

    fn list_batches<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, Vec<BatchRecord>> {
        Box::pin(self.get_batches(job_id))
    }

    fn list_results<'a>(
        &'a self,
        job_id: &'a str,
        batch_id: &'a str,
    ) -> ApiFuture<'a, Vec<String>> {
        Box::pin(self.get_result_handles(job_id, batch_id))
    }

    fn fetch_result<'a>(
        &'a self,
        job_id: &'a str,
        batch_id: &'a str,
        handle: &'a str,
    ) -> ApiFuture<'a, String> {
        Box::pin(self.get_result(job_id, batch_id, handle))
    }

    fn close_job<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, String> {
        Box::pin(self.close_query_job(job_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request bodies
// ─────────────────────────────────────────────────────────────────────────────

fn create_job_body(job: &JobDescriptor) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<jobInfo xmlns="{}">
  <operation>query</operation>
  <object>{}</object>
  <concurrencyMode>Parallel</concurrencyMode>
  <contentType>{}</contentType>
</jobInfo>
"#,
        ASYNC_API_NAMESPACE,
        escape(job.subject_type.as_str()),
        job.data_format.as_str()
    )
}

fn close_job_body() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<jobInfo xmlns="{}">
  <state>{}</state>
</jobInfo>
"#,
        ASYNC_API_NAMESPACE, JOB_STATE_CLOSED
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
