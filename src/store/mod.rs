//! Analytic store seam
//!
//! The executor only needs two round trips: run a query to completion and
//! read back the job's billing metadata.

use crate::models::Row;
use crate::Result;
use async_trait::async_trait;

pub mod bigquery;
pub use bigquery::BigQueryStore;

/// Rows of a completed query job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub job_id: String,
    pub rows: Vec<Row>,
    /// More rows existed than the configured cap allowed
    pub truncated: bool,
    /// Region the job ran in, when the store reports one
    pub location: Option<String>,
}

/// Job-level statistics, fetched after the rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMetadata {
    pub job_id: String,
    pub total_bytes_processed: i64,
    pub total_bytes_billed: i64,
}

#[async_trait]
pub trait AnalyticStore: Send + Sync {
    /// Submit `sql` verbatim and wait for every row
    async fn run_query(&self, sql: &str) -> Result<QueryRows>;

    /// `location` is the job's own region from `run_query`
    async fn job_metadata(&self, job_id: &str, location: Option<&str>) -> Result<JobMetadata>;
}
