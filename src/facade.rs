//! Fraud query façade
//!
//! Owns the translator, executor and statistics helper for one table. The
//! store handle lives as long as the façade and is released with it.

use crate::config::Config;
use crate::executor::QueryExecutor;
use crate::llm::{ChatCompletionClient, CompletionClient};
use crate::models::{
    AnalysisResult, ExecutionResult, StatisticsRequest, TranslationRequest, TranslationResult,
};
use crate::schema::{SchemaDescriptor, TableRef};
use crate::statistics::StatisticsHelper;
use crate::store::{AnalyticStore, BigQueryStore};
use crate::translator::QueryTranslator;
use crate::Result;
use std::sync::Arc;
use tracing::info;

pub struct FraudQueryFacade {
    schema: Arc<SchemaDescriptor>,
    translator: QueryTranslator,
    executor: Arc<QueryExecutor>,
    statistics: StatisticsHelper,
}

impl FraudQueryFacade {
    /// Build the remote clients for `table`. Missing credentials or bad
    /// configuration fail here, not on first use.
    pub async fn connect(config: &Config, table: TableRef) -> Result<Self> {
        let completion = ChatCompletionClient::new(&config.llm, config.verify_ssl)?;
        let store =
            BigQueryStore::connect(&config.bigquery, &table.project_id, config.verify_ssl).await?;

        let facade = Self::from_parts(table, Arc::new(completion), Arc::new(store));
        Ok(Self {
            translator: facade
                .translator
                .with_sampling(config.llm.temperature, config.llm.max_tokens),
            ..facade
        })
    }

    pub fn from_parts(
        table: TableRef,
        completion: Arc<dyn CompletionClient>,
        store: Arc<dyn AnalyticStore>,
    ) -> Self {
        let schema = Arc::new(SchemaDescriptor::fraud_table(table));
        let executor = Arc::new(QueryExecutor::new(store));

        info!(table = %schema.qualified_name(), "Fraud query façade ready");

        Self {
            translator: QueryTranslator::new(completion),
            statistics: StatisticsHelper::new(Arc::clone(&schema), Arc::clone(&executor)),
            executor,
            schema,
        }
    }

    pub fn schema(&self) -> &Arc<SchemaDescriptor> {
        &self.schema
    }

    pub async fn generate_query(&self, text: &str) -> TranslationResult {
        let request = TranslationRequest::new(text, Arc::clone(&self.schema));
        self.translator.translate(&request).await
    }

    pub async fn execute_query(&self, sql: &str) -> ExecutionResult {
        self.executor.execute(sql).await
    }

    pub async fn statistics(&self, dimension: Option<&str>) -> ExecutionResult {
        let request = StatisticsRequest {
            dimension: dimension.map(str::to_string),
        };
        self.statistics.get_statistics(&request).await
    }

    /// Phrase a pattern analysis as a request, translate it, then run it
    pub async fn analyze_patterns(
        &self,
        analysis_type: &str,
        filters: Option<&str>,
    ) -> AnalysisResult {
        let request = analysis_request(analysis_type, filters);
        info!(analysis_type, "Analyzing fraud patterns");

        let translation = self.generate_query(&request).await;
        let execution = self.execute_query(&translation.query_text).await;

        AnalysisResult {
            translation,
            execution,
        }
    }
}

fn analysis_request(analysis_type: &str, filters: Option<&str>) -> String {
    let mut request = format!("Analyze fraud patterns for {} analysis", analysis_type);
    if let Some(filters) = filters.map(str::trim).filter(|f| !f.is_empty()) {
        request.push_str(" with filters: ");
        request.push_str(filters);
    }
    request
}

//
// ================= Tool functions =================
//
// Primitive arguments in, pretty JSON out. Each call builds its own façade;
// construction failures come back as `Err`.

pub async fn generate_fraud_query(
    config: &Config,
    project_id: &str,
    dataset_id: &str,
    table_name: &str,
    user_request: &str,
) -> Result<String> {
    let facade = FraudQueryFacade::connect(config, TableRef::new(project_id, dataset_id, table_name)).await?;
    let result = facade.generate_query(user_request).await;
    Ok(serde_json::to_string_pretty(&result.to_envelope())?)
}

pub async fn execute_fraud_query(
    config: &Config,
    project_id: &str,
    dataset_id: &str,
    table_name: &str,
    query: &str,
) -> Result<String> {
    let facade = FraudQueryFacade::connect(config, TableRef::new(project_id, dataset_id, table_name)).await?;
    let result = facade.execute_query(query).await;
    Ok(serde_json::to_string_pretty(&result)?)
}

pub async fn get_fraud_statistics(
    config: &Config,
    project_id: &str,
    dataset_id: &str,
    table_name: &str,
    dimension: Option<&str>,
) -> Result<String> {
    let facade = FraudQueryFacade::connect(config, TableRef::new(project_id, dataset_id, table_name)).await?;
    let result = facade.statistics(dimension).await;
    Ok(serde_json::to_string_pretty(&result)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryAgentError;
    use crate::llm::CompletionRequest;
    use crate::models::Row;
    use crate::store::{JobMetadata, QueryRows};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedCompletion(String);

    #[async_trait]
    impl CompletionClient for CannedCompletion {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct GenderStore {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnalyticStore for GenderStore {
        async fn run_query(&self, sql: &str) -> Result<QueryRows> {
            self.queries.lock().unwrap().push(sql.to_string());
            if !sql.starts_with("SELECT") {
                return Err(QueryAgentError::StoreError("Syntax error: Unexpected identifier".into()));
            }
            let rows = [("F", 120), ("M", 98)]
                .into_iter()
                .map(|(gender, count)| {
                    let mut row = Row::new();
                    row.insert("gender".into(), json!(gender));
                    row.insert("fraud_count".into(), json!(count));
                    row
                })
                .collect();
            Ok(QueryRows {
                job_id: "job_gender".into(),
                rows,
                truncated: false,
                location: None,
            })
        }

        async fn job_metadata(&self, job_id: &str, _location: Option<&str>) -> Result<JobMetadata> {
            Ok(JobMetadata {
                job_id: job_id.to_string(),
                total_bytes_processed: 1024,
                total_bytes_billed: 10_485_760,
            })
        }
    }

    fn facade(reply: &str) -> (FraudQueryFacade, Arc<GenderStore>) {
        let store = Arc::new(GenderStore::default());
        let facade = FraudQueryFacade::from_parts(
            TableRef::new("acme", "fraud_data", "fraud_records"),
            Arc::new(CannedCompletion(reply.to_string())),
            store.clone(),
        );
        (facade, store)
    }

    const GENDER_SQL: &str = "SELECT gender, COUNT(*) AS fraud_count FROM `acme.fraud_data.fraud_records` GROUP BY gender ORDER BY fraud_count DESC";

    #[tokio::test]
    async fn test_fraud_by_gender_end_to_end() {
        let (facade, store) = facade(&format!("```sql\n{}\n```", GENDER_SQL));

        let translation = facade.generate_query("Show me fraud cases by gender").await;
        assert_eq!(translation.query_text, GENDER_SQL);

        let envelope = facade.execute_query(&translation.query_text).await.to_envelope();
        assert_eq!(envelope["success"], json!(true));
        assert_eq!(envelope["num_rows"], json!(2));
        assert_eq!(envelope["rows"][0], json!({ "gender": "F", "fraud_count": 120 }));
        assert_eq!(envelope["query"], json!(GENDER_SQL));

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0], GENDER_SQL);
    }

    #[tokio::test]
    async fn test_statistics_uses_overview_without_dimension() {
        let (facade, store) = facade("unused");

        facade.statistics(None).await;
        facade.statistics(Some("region")).await;

        let queries = store.queries.lock().unwrap();
        assert!(queries[0].starts_with("SELECT COUNT(*) AS total_fraud_cases"));
        assert!(queries[1].starts_with("SELECT region, COUNT(*) AS fraud_count"));
    }

    #[tokio::test]
    async fn test_analyze_patterns_translates_then_executes() {
        let (facade, store) = facade(GENDER_SQL);

        let analysis = facade
            .analyze_patterns("demographic", Some("region = 'North'"))
            .await;

        assert_eq!(
            analysis.translation.source_request,
            "Analyze fraud patterns for demographic analysis with filters: region = 'North'"
        );
        assert!(analysis.execution.is_success());
        assert_eq!(store.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_model_sql_surfaces_as_failure() {
        let (facade, _) = facade("SELEC * FROM nowhere");

        let analysis = facade.analyze_patterns("temporal", None).await;
        let envelope = analysis.execution.to_envelope();

        assert_eq!(envelope["success"], json!(false));
        assert_eq!(envelope["query"], json!("SELEC * FROM nowhere"));
        assert!(!envelope["error"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_analysis_request_wording() {
        assert_eq!(
            analysis_request("geographic", None),
            "Analyze fraud patterns for geographic analysis"
        );
        assert_eq!(
            analysis_request("geographic", Some("  ")),
            "Analyze fraud patterns for geographic analysis"
        );
    }

    #[tokio::test]
    async fn test_tool_function_fails_without_credentials() {
        let config = Config::parse_with_env(
            "llm:\n  base_url: http://127.0.0.1:9\n  model_name: gpt-3.5-turbo\n  api_key: sk-test\n\
             bigquery:\n  metadata_token_url: http://127.0.0.1:9/token\n  timeout_secs: 2\n",
            &[],
            &|_name: &str| None,
        )
        .unwrap();

        let err = generate_fraud_query(&config, "acme", "fraud_data", "fraud_records", "count")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryAgentError::CredentialsError(_)));
    }

    /// One local server standing in for both the completion endpoint and BigQuery
    async fn spawn_backends() -> String {
        use axum::{extract::Path, routing::get, routing::post, Json, Router};
        use serde_json::Value;

        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(|| async {
                    Json(json!({
                        "choices": [{
                            "message": { "role": "assistant", "content": format!("```sql\n{}\n```", GENDER_SQL) },
                            "finish_reason": "stop"
                        }]
                    }))
                }),
            )
            .route(
                "/bq/projects/:project/queries",
                post(|Path(project): Path<String>, Json(_body): Json<Value>| async move {
                    Json(json!({
                        "jobReference": { "projectId": project, "jobId": "job_tool_fn", "location": "US" },
                        "jobComplete": true,
                        "schema": { "fields": [
                            { "name": "gender", "type": "STRING", "mode": "NULLABLE" },
                            { "name": "fraud_count", "type": "INTEGER", "mode": "NULLABLE" }
                        ]},
                        "rows": [
                            { "f": [ { "v": "F" }, { "v": "120" } ] },
                            { "f": [ { "v": "M" }, { "v": "98" } ] }
                        ]
                    }))
                }),
            )
            .route(
                "/bq/projects/:project/jobs/:job_id",
                get(|Path((project, job_id)): Path<(String, String)>| async move {
                    Json(json!({
                        "jobReference": { "projectId": project, "jobId": job_id },
                        "statistics": { "query": { "totalBytesProcessed": "2048", "totalBytesBilled": "10485760" } }
                    }))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn backend_config(base: &str) -> Config {
        let yaml = format!(
            "llm:\n  base_url: {base}/v1\n  model_name: gpt-3.5-turbo\n  api_key: sk-test\n\
             bigquery:\n  api_base_url: {base}/bq\n  access_token: ya29.test\n",
            base = base
        );
        Config::parse_with_env(&yaml, &[], &|_name: &str| None).unwrap()
    }

    #[tokio::test]
    async fn test_tool_functions_return_pretty_envelopes() {
        let config = backend_config(&spawn_backends().await);

        let generated = generate_fraud_query(
            &config,
            "acme",
            "fraud_data",
            "fraud_records",
            "Show me fraud cases by gender",
        )
        .await
        .unwrap();
        assert!(generated.contains('\n'));
        let generated: serde_json::Value = serde_json::from_str(&generated).unwrap();
        assert_eq!(generated["query"], json!(GENDER_SQL));
        assert_eq!(generated["table_id"], json!("acme.fraud_data.fraud_records"));
        assert_eq!(generated["user_request"], json!("Show me fraud cases by gender"));

        let executed = execute_fraud_query(&config, "acme", "fraud_data", "fraud_records", GENDER_SQL)
            .await
            .unwrap();
        let executed: serde_json::Value = serde_json::from_str(&executed).unwrap();
        assert_eq!(executed["success"], json!(true));
        assert_eq!(executed["num_rows"], json!(2));
        assert_eq!(executed["rows"][0], json!({ "gender": "F", "fraud_count": 120 }));
        assert_eq!(executed["job_id"], json!("job_tool_fn"));
        assert_eq!(executed["total_bytes_billed"], json!(10_485_760));

        let stats = get_fraud_statistics(&config, "acme", "fraud_data", "fraud_records", Some("gender"))
            .await
            .unwrap();
        let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
        assert_eq!(stats["success"], json!(true));
        assert_eq!(
            stats["query"],
            json!("SELECT gender, COUNT(*) AS fraud_count FROM `acme.fraud_data.fraud_records` GROUP BY gender ORDER BY fraud_count DESC LIMIT 20")
        );
    }
}
