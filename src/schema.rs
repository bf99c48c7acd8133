//! Static table metadata for the aggregated fraud table
//!
//! No live introspection: the dimension list is fixed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Known fraud dimensions, in prompt order
pub const FRAUD_DIMENSIONS: &[&str] = &[
    "gender",
    "age_bracket",
    "income_bracket",
    "education",
    "occupation",
    "company",
    "region",
    "fraud_type",
    "fraud_amount",
    "fraud_date",
    "fraud_id",
    "created_at",
    "updated_at",
];

pub const DEFAULT_PROJECT_ID: &str = "your-gcp-project-id";
pub const DEFAULT_DATASET_ID: &str = "fraud_data";
pub const DEFAULT_TABLE_NAME: &str = "fraud_records";

/// Table identity triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_name: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_name: table_name.into(),
        }
    }
}

impl Default for TableRef {
    fn default() -> Self {
        Self::new(DEFAULT_PROJECT_ID, DEFAULT_DATASET_ID, DEFAULT_TABLE_NAME)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_name)
    }
}

/// Queryable columns of one table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    table: TableRef,
    qualified_name: String,
    columns: Vec<String>,
}

impl SchemaDescriptor {
    /// Describe the fraud table identified by `table`
    pub fn fraud_table(table: TableRef) -> Self {
        let columns = FRAUD_DIMENSIONS.iter().map(|c| c.to_string()).collect();
        Self::with_columns(table, columns)
    }

    pub fn with_columns(table: TableRef, columns: Vec<String>) -> Self {
        let qualified_name = table.to_string();
        Self {
            table,
            qualified_name,
            columns,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// `project.dataset.table`
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Backtick-quoted form for use inside SQL
    pub fn quoted_name(&self) -> String {
        format!("`{}`", self.qualified_name)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}
