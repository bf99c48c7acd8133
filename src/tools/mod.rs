//! Tool trait and registry
//!
//! Each tool is a thin adapter from JSON parameters onto one façade
//! operation. Tool outputs carry the same envelopes the façade produces.

use crate::error::QueryAgentError;
use crate::facade::FraudQueryFacade;
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Trait for a single callable tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the accepted parameters
    fn parameters(&self) -> Value;
    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Look up `input.tool_name` and run it
    pub async fn invoke(&self, input: &ToolInput) -> Result<ToolOutput> {
        let tool = self
            .get(&input.tool_name)
            .ok_or_else(|| QueryAgentError::ToolNotFound(input.tool_name.clone()))?;

        info!(tool = %input.tool_name, "Invoking tool");
        tool.execute(input).await
    }

    /// Name, description and parameter schema of every tool
    pub fn manifest(&self) -> Vec<ToolSpec> {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name(),
                description: tool.description(),
                parameters: tool.parameters(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

//
// ================= Agent profile =================
//

#[derive(Debug, Clone, Serialize)]
pub struct AgentProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub instruction: &'static str,
}

pub const FRAUD_AGENT_NAME: &str = "fraud_agent";

const FRAUD_AGENT_DESCRIPTION: &str =
    "Advanced fraud data analysis agent with BigQuery integration and dynamic query generation";

const FRAUD_AGENT_INSTRUCTION: &str = "\
You are an expert fraud data analyst with access to a comprehensive aggregated fraud dataset.
Your capabilities include:

1. **Dynamic Query Generation**: Use `generate_dynamic_query(user_request)` to create SQL queries from natural language requests
2. **Query Execution**: Use `execute_dynamic_query(query)` to run BigQuery queries and get results
3. **Fraud Analytics**: Use `get_fraud_analytics(dimension)` to get statistics for specific dimensions
4. **Pattern Analysis**: Use `analyze_fraud_patterns(analysis_type, filters)` for comprehensive fraud pattern analysis

**Available Analysis Types:**
- demographic: Analyze fraud by gender, age, education, occupation
- geographic: Analyze fraud by region, location
- temporal: Analyze fraud trends over time
- company: Analyze fraud by company/organization
- comprehensive: Overall fraud statistics and metrics

**Known Fraud Dimensions in the Aggregated Table:**
- gender, age_bracket, income_bracket, education, occupation
- company, region, fraud_type, fraud_amount, fraud_date
- fraud_id, created_at, updated_at

**Response Format:**
- Provide clear explanations of findings
- Include relevant statistics and percentages
- Suggest actionable insights for fraud prevention
- Highlight key patterns and anomalies
";

pub fn fraud_agent_profile() -> AgentProfile {
    AgentProfile {
        name: FRAUD_AGENT_NAME,
        description: FRAUD_AGENT_DESCRIPTION,
        instruction: FRAUD_AGENT_INSTRUCTION,
    }
}

/// Agent profile plus the tools it may call, as served to agent frameworks
pub fn tool_manifest(registry: &ToolRegistry) -> Value {
    json!({
        "agent": fraud_agent_profile(),
        "tools": registry.manifest(),
    })
}

//
// ================= Parameter helpers =================
//

fn ensure_object_parameters(input: &ToolInput) -> Result<()> {
    if input.parameters.is_object() {
        Ok(())
    } else {
        Err(QueryAgentError::InvalidToolInput(
            "tool_input must be a JSON object".to_string(),
        ))
    }
}

fn require_str<'a>(input: &'a ToolInput, key: &str) -> Result<&'a str> {
    input
        .parameters
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            QueryAgentError::InvalidToolInput(format!("Expected non-empty string '{}'", key))
        })
}

fn optional_str<'a>(input: &'a ToolInput, key: &str) -> Result<Option<&'a str>> {
    match input.parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(QueryAgentError::InvalidToolInput(format!(
            "'{}' must be a string",
            key
        ))),
    }
}

//
// ================= Tools =================
//

pub struct GenerateDynamicQueryTool {
    facade: Arc<FraudQueryFacade>,
}

#[async_trait::async_trait]
impl Tool for GenerateDynamicQueryTool {
    fn name(&self) -> &'static str {
        "generate_dynamic_query"
    }

    fn description(&self) -> &'static str {
        "Generate a BigQuery SQL query for the fraud table from a natural language request"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_request": {
                    "type": "string",
                    "description": "Natural language description of the data wanted"
                }
            },
            "required": ["user_request"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        ensure_object_parameters(input)?;
        let user_request = require_str(input, "user_request")?;

        let translation = self.facade.generate_query(user_request).await;

        Ok(ToolOutput {
            success: true,
            data: translation.to_envelope(),
            error: None,
        })
    }
}

pub struct ExecuteDynamicQueryTool {
    facade: Arc<FraudQueryFacade>,
}

#[async_trait::async_trait]
impl Tool for ExecuteDynamicQueryTool {
    fn name(&self) -> &'static str {
        "execute_dynamic_query"
    }

    fn description(&self) -> &'static str {
        "Execute a BigQuery SQL query and return its rows and job metadata"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "SQL query text, run verbatim" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        ensure_object_parameters(input)?;
        let query = require_str(input, "query")?;

        let result = self.facade.execute_query(query).await;
        Ok(ToolOutput::from_execution(&result))
    }
}

pub struct FraudAnalyticsTool {
    facade: Arc<FraudQueryFacade>,
}

#[async_trait::async_trait]
impl Tool for FraudAnalyticsTool {
    fn name(&self) -> &'static str {
        "get_fraud_analytics"
    }

    fn description(&self) -> &'static str {
        "Fraud counts grouped by a dimension, or overall statistics when no dimension is given"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dimension": {
                    "type": "string",
                    "description": "Column to group by (gender, age_bracket, region, ...)"
                }
            }
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        ensure_object_parameters(input)?;
        let dimension = optional_str(input, "dimension")?;

        let result = self.facade.statistics(dimension).await;
        Ok(ToolOutput::from_execution(&result))
    }
}

pub struct AnalyzeFraudPatternsTool {
    facade: Arc<FraudQueryFacade>,
}

#[async_trait::async_trait]
impl Tool for AnalyzeFraudPatternsTool {
    fn name(&self) -> &'static str {
        "analyze_fraud_patterns"
    }

    fn description(&self) -> &'static str {
        "Generate and run a query analyzing fraud patterns of the given type"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "analysis_type": {
                    "type": "string",
                    "description": "demographic, geographic, temporal, company or comprehensive"
                },
                "filters": { "type": "string", "description": "Optional filters to apply" }
            },
            "required": ["analysis_type"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        ensure_object_parameters(input)?;
        let analysis_type = require_str(input, "analysis_type")?;
        let filters = optional_str(input, "filters")?;

        let analysis = self.facade.analyze_patterns(analysis_type, filters).await;
        Ok(ToolOutput::from_execution(&analysis.execution))
    }
}

/// Registry with every fraud tool bound to `facade`
pub fn create_fraud_registry(facade: Arc<FraudQueryFacade>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(GenerateDynamicQueryTool {
        facade: Arc::clone(&facade),
    }));
    registry.register(Arc::new(ExecuteDynamicQueryTool {
        facade: Arc::clone(&facade),
    }));
    registry.register(Arc::new(FraudAnalyticsTool {
        facade: Arc::clone(&facade),
    }));
    registry.register(Arc::new(AnalyzeFraudPatternsTool { facade }));

    registry
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::{CompletionClient, CompletionRequest};
    use crate::models::Row;
    use crate::schema::TableRef;
    use crate::store::{AnalyticStore, JobMetadata, QueryRows};
    use async_trait::async_trait;

    struct EchoSql;

    #[async_trait]
    impl CompletionClient for EchoSql {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            Ok("```sql\nSELECT region, COUNT(*) AS fraud_count FROM `p.d.t` GROUP BY region\n```".into())
        }
    }

    struct OneRowStore;

    #[async_trait]
    impl AnalyticStore for OneRowStore {
        async fn run_query(&self, sql: &str) -> Result<QueryRows> {
            if sql.contains("missing_column") {
                return Err(QueryAgentError::StoreError(
                    "Unrecognized name: missing_column".into(),
                ));
            }
            let mut row = Row::new();
            row.insert("region".into(), json!("North"));
            row.insert("fraud_count".into(), json!(42));
            Ok(QueryRows {
                job_id: "job_tool".into(),
                rows: vec![row],
                truncated: false,
                location: None,
            })
        }

        async fn job_metadata(&self, job_id: &str, _location: Option<&str>) -> Result<JobMetadata> {
            Ok(JobMetadata {
                job_id: job_id.to_string(),
                total_bytes_processed: 64,
                total_bytes_billed: 0,
            })
        }
    }

    pub(crate) fn test_registry() -> ToolRegistry {
        let facade = FraudQueryFacade::from_parts(
            TableRef::new("p", "d", "t"),
            Arc::new(EchoSql),
            Arc::new(OneRowStore),
        );
        create_fraud_registry(Arc::new(facade))
    }

    fn input(tool: &str, parameters: Value) -> ToolInput {
        ToolInput {
            tool_name: tool.to_string(),
            parameters,
        }
    }

    #[test]
    fn test_registry_lists_all_tools() {
        let registry = test_registry();
        assert_eq!(
            registry.list(),
            vec![
                "analyze_fraud_patterns",
                "execute_dynamic_query",
                "generate_dynamic_query",
                "get_fraud_analytics"
            ]
        );
    }

    #[test]
    fn test_manifest_includes_profile_and_schemas() {
        let manifest = tool_manifest(&test_registry());
        assert_eq!(manifest["agent"]["name"], json!("fraud_agent"));
        assert!(manifest["agent"]["instruction"]
            .as_str()
            .unwrap()
            .contains("get_fraud_analytics(dimension)"));
        assert_eq!(manifest["tools"].as_array().map(Vec::len), Some(4));
        assert_eq!(
            manifest["tools"][0]["parameters"]["required"],
            json!(["analysis_type"])
        );
    }

    #[tokio::test]
    async fn test_generate_tool_returns_translation_envelope() {
        let output = test_registry()
            .invoke(&input("generate_dynamic_query", json!({ "user_request": "fraud by region" })))
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(
            output.data["query"],
            json!("SELECT region, COUNT(*) AS fraud_count FROM `p.d.t` GROUP BY region")
        );
        assert_eq!(output.data["table_id"], json!("p.d.t"));
    }

    #[tokio::test]
    async fn test_execute_tool_failure_is_output_not_error() {
        let output = test_registry()
            .invoke(&input("execute_dynamic_query", json!({ "query": "SELECT missing_column FROM t" })))
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("BigQuery error: Unrecognized name: missing_column"));
        assert_eq!(output.data["query"], json!("SELECT missing_column FROM t"));
    }

    #[tokio::test]
    async fn test_analytics_tool_accepts_missing_dimension() {
        let output = test_registry()
            .invoke(&input("get_fraud_analytics", json!({})))
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.data["num_rows"], json!(1));
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_rejected() {
        let registry = test_registry();

        let err = registry
            .invoke(&input("execute_dynamic_query", json!({ "query": 7 })))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryAgentError::InvalidToolInput(_)));

        let err = registry
            .invoke(&input("get_fraud_analytics", json!("region")))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryAgentError::InvalidToolInput(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = test_registry()
            .invoke(&input("drop_table", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryAgentError::ToolNotFound(_)));
    }
}
