//! Canned summary queries over the fraud table

use crate::executor::QueryExecutor;
use crate::models::{ExecutionResult, StatisticsRequest};
use crate::schema::SchemaDescriptor;
use std::sync::Arc;
use tracing::info;

pub struct StatisticsHelper {
    schema: Arc<SchemaDescriptor>,
    executor: Arc<QueryExecutor>,
}

impl StatisticsHelper {
    pub fn new(schema: Arc<SchemaDescriptor>, executor: Arc<QueryExecutor>) -> Self {
        Self { schema, executor }
    }

    pub async fn get_statistics(&self, request: &StatisticsRequest) -> ExecutionResult {
        let query = match request.normalized_dimension() {
            Some(dimension) => {
                info!(dimension, "Fetching fraud statistics by dimension");
                dimension_query(&self.schema, dimension)
            }
            None => {
                info!("Fetching fraud statistics overview");
                overview_query(&self.schema)
            }
        };

        self.executor.execute(&query).await
    }
}

/// Top 20 values of `dimension` by fraud count. The dimension is
/// substituted as given.
pub fn dimension_query(schema: &SchemaDescriptor, dimension: &str) -> String {
    format!(
        "SELECT {d}, COUNT(*) AS fraud_count FROM {table} GROUP BY {d} ORDER BY fraud_count DESC LIMIT 20",
        d = dimension,
        table = schema.quoted_name(),
    )
}

pub fn overview_query(schema: &SchemaDescriptor) -> String {
    format!(
        "SELECT COUNT(*) AS total_fraud_cases, \
         COUNT(DISTINCT gender) AS unique_genders, \
         COUNT(DISTINCT age_bracket) AS unique_age_brackets, \
         COUNT(DISTINCT region) AS unique_regions, \
         COUNT(DISTINCT company) AS unique_companies \
         FROM {}",
        schema.quoted_name()
    )
}
