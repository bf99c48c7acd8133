//! Query executor
//!
//! Runs query text verbatim against the analytic store and folds every
//! outcome into an `ExecutionResult`. Nothing escapes as an `Err`.

use crate::models::{ExecutionResult, ExecutionSuccess};
use crate::store::AnalyticStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

pub struct QueryExecutor {
    store: Arc<dyn AnalyticStore>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn AnalyticStore>) -> Self {
        Self { store }
    }

    /// Execute `query` to completion, then read the job's byte counters
    pub async fn execute(&self, query: &str) -> ExecutionResult {
        let start = Instant::now();
        debug!(query = %query, "Executing query");

        let rows = match self.store.run_query(query).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Query execution failed");
                return ExecutionResult::failure(e.to_string(), query);
            }
        };

        // Metadata is a second round trip; losing it fails the whole result
        let metadata = match self
            .store
            .job_metadata(&rows.job_id, rows.location.as_deref())
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(job_id = %rows.job_id, error = %e, "Job metadata lookup failed");
                return ExecutionResult::failure(e.to_string(), query);
            }
        };

        info!(
            job_id = %metadata.job_id,
            num_rows = rows.rows.len(),
            total_bytes_processed = metadata.total_bytes_processed,
            truncated = rows.truncated,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );

        ExecutionResult::Success(ExecutionSuccess {
            rows: rows.rows,
            job_id: metadata.job_id,
            total_bytes_processed: metadata.total_bytes_processed,
            total_bytes_billed: metadata.total_bytes_billed,
            query: query.to_string(),
            truncated: rows.truncated,
        })
    }
}
