//! Salesforce bulk query export.
//!
//! Creates a bulk query job for a configured subject type, waits for it to
//! finish, and writes every completed batch's results into one CSV report
//! with a metadata header and footer. The job is always closed.

pub mod config;
pub mod error;
pub mod export;
pub mod salesforce;
