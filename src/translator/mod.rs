//! Natural-language → SQL translation
//!
//! One completion call per request. The model's text is used verbatim once
//! Markdown fences are removed; nothing validates it. Any failure degrades to
//! `SELECT * FROM <table> LIMIT 10`.

use crate::llm::{CompletionClient, CompletionRequest};
use crate::models::{TranslationRequest, TranslationResult};
use crate::schema::SchemaDescriptor;
use std::sync::Arc;
use tracing::{info, warn};

pub const SYSTEM_PERSONA: &str =
    "You are a SQL expert. Generate BigQuery SQL queries for fraud data analysis.";

pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// Fence language tags we recognise after an opening ```
const FENCE_LANGUAGES: &[&str] = &["sql", "bigquery", "googlesql", "standardsql"];

pub struct QueryTranslator {
    client: Arc<dyn CompletionClient>,
    temperature: f32,
    max_tokens: u32,
}

impl QueryTranslator {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub async fn translate(&self, request: &TranslationRequest) -> TranslationResult {
        let schema = &request.schema;
        let completion = CompletionRequest {
            system: SYSTEM_PERSONA.to_string(),
            prompt: build_prompt(&request.natural_language_text, schema),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let (query_text, fallback_used) = match self.client.complete(&completion).await {
            Ok(raw) => {
                let cleaned = strip_code_fences(&raw);
                if cleaned.is_empty() {
                    warn!(
                        table = %schema.qualified_name(),
                        "Completion returned no SQL, using fallback query"
                    );
                    (fallback_query(schema), true)
                } else {
                    (cleaned, false)
                }
            }
            Err(e) => {
                warn!(
                    table = %schema.qualified_name(),
                    error = %e,
                    "SQL generation failed, using fallback query"
                );
                (fallback_query(schema), true)
            }
        };

        info!(fallback_used, "Translated request into SQL");

        TranslationResult {
            query_text,
            source_request: request.natural_language_text.clone(),
            schema_used: Arc::clone(schema),
            fallback_used,
        }
    }
}

/// Instruction template sent as the user message
pub fn build_prompt(user_request: &str, schema: &SchemaDescriptor) -> String {
    format!(
        "You are a SQL expert specializing in fraud data analysis.\n\
         Generate a BigQuery SQL query based on the user's request.\n\
         \n\
         Table: {table}\n\
         Available columns: {columns}\n\
         \n\
         User Request: {request}\n\
         \n\
         Generate a SQL query that:\n\
         1. Uses proper BigQuery syntax\n\
         2. Includes appropriate WHERE clauses if needed\n\
         3. Uses GROUP BY for aggregations\n\
         4. Orders results logically\n\
         5. Limits results to reasonable numbers (use LIMIT 100 for large result sets)\n\
         \n\
         Return ONLY the SQL query, no explanations.",
        table = schema.qualified_name(),
        columns = schema.columns().join(", "),
        request = user_request,
    )
}

pub fn fallback_query(schema: &SchemaDescriptor) -> String {
    format!("SELECT * FROM {} LIMIT 10", schema.quoted_name())
}

/// Remove Markdown code fences around model output.
///
/// A response that opens with a fence is unwrapped; otherwise the first
/// fenced block found after leading prose is extracted. Unfenced text comes
/// back trimmed.
pub fn strip_code_fences(raw: &str) -> String {
    let text = raw.trim();

    if let Some(body) = text.strip_prefix("```") {
        return unwrap_fence_body(body);
    }

    if let Some(start) = text.find("```") {
        return unwrap_fence_body(&text[start + 3..]);
    }

    text.to_string()
}

fn unwrap_fence_body(body: &str) -> String {
    let body = strip_fence_language(body);
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

/// Drop a language tag right after the opening fence. The tag may share its
/// line with the query.
fn strip_fence_language(body: &str) -> &str {
    for lang in FENCE_LANGUAGES {
        let Some(tag) = body.get(..lang.len()) else {
            continue;
        };
        if !tag.eq_ignore_ascii_case(lang) {
            continue;
        }
        let rest = &body[lang.len()..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with("```") {
            return rest;
        }
    }
    body
}
