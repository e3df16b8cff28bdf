//! Export orchestration.
//!
//! Everything here talks to Salesforce through the [`BulkApi`] trait, so the
//! whole flow runs against an in-memory fake in tests.
//!
//! [`BulkApi`]: crate::salesforce::BulkApi

pub mod assembler;
pub mod batches;
pub mod controller;
pub mod orchestrator;
pub mod progress;
pub mod report;

#[cfg(test)]
mod fake;

pub use assembler::{AssemblyReport, ResultAssembler};
pub use batches::BatchCollector;
pub use controller::{CompletionOutcome, JobController, OpenJob};
pub use orchestrator::{ExportOutcome, ExportSummary, Exporter};
pub use progress::{ProgressReporter, TracingProgress};
pub use report::ReportWriter;
