//! Core data models for the query façade

use crate::schema::SchemaDescriptor;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use std::sync::Arc;

/// One result row: column name → value, in result-schema column order
pub type Row = serde_json::Map<String, serde_json::Value>;

//
// ================= Translation =================
//

#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub natural_language_text: String,
    pub schema: Arc<SchemaDescriptor>,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, schema: Arc<SchemaDescriptor>) -> Self {
        Self {
            natural_language_text: text.into(),
            schema,
        }
    }
}

/// Always carries query text; a failed completion yields the fallback query
#[derive(Debug, Clone)]
pub struct TranslationResult {
    pub query_text: String,
    pub source_request: String,
    pub schema_used: Arc<SchemaDescriptor>,
    /// True when `query_text` is the fallback rather than model output
    pub fallback_used: bool,
}

impl TranslationResult {
    /// Envelope handed to the agent
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "query": self.query_text,
            "table_name": self.schema_used.table().table_name,
            "table_id": self.schema_used.qualified_name(),
            "user_request": self.source_request,
            "available_dimensions": self.schema_used.columns(),
        })
    }
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSuccess {
    pub rows: Vec<Row>,
    pub job_id: String,
    pub total_bytes_processed: i64,
    pub total_bytes_billed: i64,
    pub query: String,
    /// A configured row cap cut the result short
    pub truncated: bool,
}

impl ExecutionSuccess {
    /// Derived from `rows`, so it can never disagree with them
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFailure {
    pub error: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success(ExecutionSuccess),
    Failure(ExecutionFailure),
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>, query: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        ExecutionResult::Failure(ExecutionFailure {
            error,
            query: query.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    pub fn query(&self) -> &str {
        match self {
            ExecutionResult::Success(s) => &s.query,
            ExecutionResult::Failure(f) => &f.query,
        }
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            ExecutionResult::Success(s) => &s.rows,
            ExecutionResult::Failure(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success(_) => None,
            ExecutionResult::Failure(f) => Some(&f.error),
        }
    }

    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "success": false, "error": e.to_string(), "query": self.query() })
        })
    }
}

impl Serialize for ExecutionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ExecutionResult::Success(s) => {
                let len = if s.truncated { 8 } else { 7 };
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("rows", &s.rows)?;
                map.serialize_entry("num_rows", &s.num_rows())?;
                map.serialize_entry("job_id", &s.job_id)?;
                map.serialize_entry("total_bytes_processed", &s.total_bytes_processed)?;
                map.serialize_entry("total_bytes_billed", &s.total_bytes_billed)?;
                map.serialize_entry("query", &s.query)?;
                if s.truncated {
                    map.serialize_entry("truncated", &true)?;
                }
                map.end()
            }
            ExecutionResult::Failure(f) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", &f.error)?;
                map.serialize_entry("query", &f.query)?;
                map.end()
            }
        }
    }
}

//
// ================= Statistics =================
//

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatisticsRequest {
    #[serde(default)]
    pub dimension: Option<String>,
}

impl StatisticsRequest {
    pub fn overview() -> Self {
        Self { dimension: None }
    }

    pub fn by(dimension: impl Into<String>) -> Self {
        Self {
            dimension: Some(dimension.into()),
        }
    }

    /// Blank dimensions count as absent
    pub fn normalized_dimension(&self) -> Option<&str> {
        self.dimension
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

//
// ================= Pattern analysis =================
//

/// Translate-then-execute outcome for a pattern analysis
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub translation: TranslationResult,
    pub execution: ExecutionResult,
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn from_execution(result: &ExecutionResult) -> Self {
        Self {
            success: result.is_success(),
            data: result.to_envelope(),
            error: result.error().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableRef;
    use serde_json::json;

    fn row(gender: &str, count: i64) -> Row {
        let mut row = Row::new();
        row.insert("gender".into(), json!(gender));
        row.insert("fraud_count".into(), json!(count));
        row
    }

    #[test]
    fn test_success_envelope_counts_rows() {
        let result = ExecutionResult::Success(ExecutionSuccess {
            rows: vec![row("F", 120), row("M", 98)],
            job_id: "job_123".into(),
            total_bytes_processed: 2048,
            total_bytes_billed: 10_485_760,
            query: "SELECT 1".into(),
            truncated: false,
        });

        let envelope = result.to_envelope();
        assert_eq!(envelope["success"], json!(true));
        assert_eq!(envelope["num_rows"], json!(2));
        assert_eq!(envelope["rows"].as_array().map(Vec::len), Some(2));
        assert_eq!(envelope["rows"][0]["gender"], json!("F"));
        assert_eq!(envelope["job_id"], json!("job_123"));
        assert_eq!(envelope["total_bytes_billed"], json!(10_485_760));
        assert!(envelope.get("truncated").is_none());

        let keys: Vec<&String> = envelope.as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            vec![
                "success",
                "rows",
                "num_rows",
                "job_id",
                "total_bytes_processed",
                "total_bytes_billed",
                "query"
            ]
        );
    }

    #[test]
    fn test_failure_envelope_keeps_query() {
        let result = ExecutionResult::failure("Syntax error: Unexpected keyword FROM", "SELEC * FROM t");
        let envelope = result.to_envelope();

        assert_eq!(envelope, json!({
            "success": false,
            "error": "Syntax error: Unexpected keyword FROM",
            "query": "SELEC * FROM t",
        }));
    }

    #[test]
    fn test_failure_message_is_never_empty() {
        let result = ExecutionResult::failure("  ", "SELECT 1");
        assert_eq!(result.error(), Some("unknown error"));
    }

    #[test]
    fn test_translation_envelope() {
        let schema = Arc::new(SchemaDescriptor::fraud_table(TableRef::new("p", "d", "t")));
        let result = TranslationResult {
            query_text: "SELECT 1".into(),
            source_request: "count everything".into(),
            schema_used: schema,
            fallback_used: false,
        };

        let envelope = result.to_envelope();
        assert_eq!(envelope["query"], json!("SELECT 1"));
        assert_eq!(envelope["table_name"], json!("t"));
        assert_eq!(envelope["table_id"], json!("p.d.t"));
        assert_eq!(envelope["user_request"], json!("count everything"));
        assert_eq!(envelope["available_dimensions"][0], json!("gender"));
    }

    #[test]
    fn test_blank_dimension_is_overview() {
        assert_eq!(StatisticsRequest::by("  ").normalized_dimension(), None);
        assert_eq!(StatisticsRequest::by(" region ").normalized_dimension(), Some("region"));
        assert_eq!(StatisticsRequest::overview().normalized_dimension(), None);
    }
}
