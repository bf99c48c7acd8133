//! BigQuery REST v2 store
//!
//! `jobs.query` submits and waits, `jobs.getQueryResults` polls unfinished
//! jobs and pages through large results, `jobs.get` supplies the byte
//! counters. Rows come back as `f`/`v` cells and are decoded against the
//! result schema.

use super::{AnalyticStore, JobMetadata, QueryRows};
use crate::config::{BigQueryConfig, Secret};
use crate::error::QueryAgentError;
use crate::models::Row;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Refresh metadata-server tokens this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

enum TokenSource {
    Static(Secret),
    MetadataServer {
        url: String,
        cached: RwLock<Option<CachedToken>>,
    },
}

struct CachedToken {
    value: Secret,
    expires_at: Instant,
}

pub struct BigQueryStore {
    client: Client,
    api_base_url: String,
    project_id: String,
    location: Option<String>,
    job_timeout_ms: u64,
    max_result_rows: Option<usize>,
    tokens: TokenSource,
}

impl BigQueryStore {
    /// Build the client and resolve credentials once. Credential problems are
    /// fatal here rather than surfacing on the first query.
    pub async fn connect(config: &BigQueryConfig, project_id: &str, verify_ssl: bool) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| QueryAgentError::ConfigError(format!("Failed to build BigQuery HTTP client: {}", e)))?;

        let tokens = match &config.access_token {
            Some(token) if !token.is_empty() => TokenSource::Static(token.clone()),
            _ => TokenSource::MetadataServer {
                url: config.metadata_token_url.clone(),
                cached: RwLock::new(None),
            },
        };

        let store = Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            location: config.location.clone(),
            job_timeout_ms: config.job_timeout_ms,
            max_result_rows: config.max_result_rows,
            tokens,
        };

        store
            .access_token()
            .await
            .map_err(|e| QueryAgentError::CredentialsError(format!("Failed to obtain BigQuery credentials: {}", e)))?;

        info!(project_id = %store.project_id, "BigQuery client initialized");
        Ok(store)
    }

    async fn access_token(&self) -> Result<String> {
        let (url, cached) = match &self.tokens {
            TokenSource::Static(token) => return Ok(token.expose().to_string()),
            TokenSource::MetadataServer { url, cached } => (url, cached),
        };

        {
            let guard = cached.read().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                    return Ok(token.value.expose().to_string());
                }
            }
        }

        let mut guard = cached.write().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.expose().to_string());
            }
        }

        debug!("Fetching access token from metadata server");

        let response = self
            .client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| QueryAgentError::CredentialsError(format!("metadata server unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(QueryAgentError::CredentialsError(format!(
                "metadata server returned {}",
                response.status()
            )));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| QueryAgentError::CredentialsError(format!("malformed metadata token: {}", e)))?;

        let value = token.access_token.clone();
        *guard = Some(CachedToken {
            value: Secret::new(token.access_token),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        Ok(value)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let token = self.access_token().await?;

        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| QueryAgentError::StoreError(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(QueryAgentError::StoreError(format!("HTTP {}: {}", status, message)));
        }

        serde_json::from_str(&text)
            .map_err(|e| QueryAgentError::StoreError(format!("malformed BigQuery response: {}", e)))
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_base_url, job.project_id, job.job_id
        );

        let mut params: Vec<(&str, String)> = vec![("timeoutMs", self.job_timeout_ms.to_string())];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        if let Some(cap) = self.max_result_rows {
            params.push(("maxResults", cap.to_string()));
        }

        self.send(self.client.get(url).query(&params)).await
    }
}

#[async_trait]
impl AnalyticStore for BigQueryStore {
    async fn run_query(&self, sql: &str) -> Result<QueryRows> {
        let url = format!("{}/projects/{}/queries", self.api_base_url, self.project_id);
        let body = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: self.job_timeout_ms,
            request_id: Uuid::new_v4().to_string(),
            location: self.location.as_deref(),
            max_results: self.max_result_rows,
        };

        let mut response: QueryResponse = self.send(self.client.post(url).json(&body)).await?;

        let job = response
            .job_reference
            .clone()
            .ok_or_else(|| QueryAgentError::StoreError("response is missing jobReference".to_string()))?;

        while !response.job_complete {
            debug!(job_id = %job.job_id, "Job still running, polling");
            response = self.get_query_results(&job, None).await?;
        }

        if let Some(errors) = response.errors.as_ref().filter(|e| !e.is_empty()) {
            warn!(job_id = %job.job_id, count = errors.len(), "Query completed with errors");
        }

        let fields = response.schema.take().unwrap_or_default().fields;
        let mut rows = decode_rows(&fields, response.rows.take().unwrap_or_default())?;
        let mut page_token = response.page_token.take();
        let mut truncated = false;

        loop {
            if let Some(cap) = self.max_result_rows {
                if rows.len() >= cap {
                    truncated = rows.len() > cap || page_token.is_some();
                    rows.truncate(cap);
                    break;
                }
            }

            let Some(token) = page_token.take() else {
                break;
            };

            debug!(job_id = %job.job_id, fetched = rows.len(), "Fetching next result page");
            let mut page = self.get_query_results(&job, Some(&token)).await?;
            rows.extend(decode_rows(&fields, page.rows.take().unwrap_or_default())?);
            page_token = page.page_token.take();
        }

        if truncated {
            warn!(job_id = %job.job_id, cap = ?self.max_result_rows, "Result truncated at row cap");
        }

        Ok(QueryRows {
            job_id: job.job_id,
            rows,
            truncated,
            location: job.location.or_else(|| self.location.clone()),
        })
    }

    async fn job_metadata(&self, job_id: &str, location: Option<&str>) -> Result<JobMetadata> {
        let url = format!("{}/projects/{}/jobs/{}", self.api_base_url, self.project_id, job_id);
        let mut request = self.client.get(url);
        if let Some(location) = location.or(self.location.as_deref()) {
            request = request.query(&[("location", location)]);
        }

        let job: Job = self.send(request).await?;

        if let Some(err) = job.status.as_ref().and_then(|s| s.error_result.as_ref()) {
            return Err(QueryAgentError::StoreError(err.describe()));
        }

        let stats = job.statistics.unwrap_or_default();
        let query = stats.query.unwrap_or_default();

        Ok(JobMetadata {
            job_id: job
                .job_reference
                .map(|r| r.job_id)
                .unwrap_or_else(|| job_id.to_string()),
            total_bytes_processed: parse_i64(query.total_bytes_processed.or(stats.total_bytes_processed)),
            total_bytes_billed: parse_i64(query.total_bytes_billed),
        })
    }
}

fn parse_i64(value: Option<String>) -> i64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

//
// ================= Row decoding =================
//

fn decode_rows(fields: &[FieldSchema], rows: Vec<TableRow>) -> Result<Vec<Row>> {
    rows.into_iter().map(|row| decode_record(fields, row.f)).collect()
}

fn decode_record(fields: &[FieldSchema], cells: Vec<TableCell>) -> Result<Row> {
    if cells.len() != fields.len() {
        return Err(QueryAgentError::StoreError(format!(
            "row has {} cells but schema has {} fields",
            cells.len(),
            fields.len()
        )));
    }

    let mut row = Row::with_capacity(fields.len());
    for (field, cell) in fields.iter().zip(cells) {
        row.insert(field.name.clone(), decode_field(field, cell.v)?);
    }
    Ok(row)
}

fn decode_field(field: &FieldSchema, value: Value) -> Result<Value> {
    let repeated = field
        .mode
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("REPEATED"));

    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(items) if repeated => items
            .into_iter()
            .map(|item| {
                let cell: TableCell = serde_json::from_value(item)?;
                decode_value(field, cell.v)
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => decode_value(field, other),
    }
}

fn decode_value(field: &FieldSchema, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match field.field_type.to_ascii_uppercase().as_str() {
        "RECORD" | "STRUCT" => {
            let nested: TableRow = serde_json::from_value(value)?;
            decode_record(&field.fields, nested.f).map(Value::Object)
        }
        "INTEGER" | "INT64" => Ok(match value.as_str().and_then(|s| s.parse::<i64>().ok()) {
            Some(n) => Value::from(n),
            None => value,
        }),
        "FLOAT" | "FLOAT64" => Ok(value
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(value)),
        "BOOLEAN" | "BOOL" => Ok(match value.as_str() {
            Some(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Some(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => value,
        }),
        "TIMESTAMP" => Ok(value
            .as_str()
            .and_then(epoch_to_rfc3339)
            .map(Value::String)
            .unwrap_or(value)),
        _ => Ok(value),
    }
}

/// BigQuery sends TIMESTAMP cells as floating-point epoch seconds
fn epoch_to_rfc3339(raw: &str) -> Option<String> {
    let seconds: f64 = raw.parse().ok()?;
    let micros = (seconds * 1_000_000.0).round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    let ts: DateTime<Utc> = DateTime::from_timestamp(secs, nanos)?;
    Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    rows: Option<Vec<TableRow>>,
    page_token: Option<String>,
    /// Required: a response without it cannot say whether to keep polling
    job_complete: bool,
    errors: Option<Vec<ErrorProto>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: Option<JobReference>,
    statistics: Option<JobStatistics>,
    status: Option<JobStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatistics {
    total_bytes_processed: Option<String>,
    query: Option<QueryStatistics>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryStatistics {
    total_bytes_processed: Option<String>,
    total_bytes_billed: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (None, Some(message)) => message.clone(),
            (Some(reason), None) => reason.clone(),
            (None, None) => "job failed".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}
