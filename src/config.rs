//! Hierarchical configuration
//!
//! A single `Config` is built once at process start (YAML file, then
//! `key=value` overrides, then `${oc.env:...}` interpolation, then environment
//! fallbacks) and passed by reference to whatever needs it.

use crate::error::QueryAgentError;
use crate::schema::{TableRef, DEFAULT_DATASET_ID, DEFAULT_PROJECT_ID, DEFAULT_TABLE_NAME};
use crate::Result;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";
pub const CONFIG_PATH_ENV: &str = "FRAUD_AGENT_CONFIG";

//
// ================= Secret =================
//

/// String that never shows up in `Debug` output
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(**********)")
    }
}

//
// ================= Sub-agents =================
//

/// Agents that can carry their own configuration block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgent {
    GitlabAgent,
    GosiLawsAgent,
    HrPoliciesAgent,
    FaqsAgent,
    FraudAgent,
}

impl SubAgent {
    pub const ALL: [SubAgent; 5] = [
        SubAgent::GitlabAgent,
        SubAgent::GosiLawsAgent,
        SubAgent::HrPoliciesAgent,
        SubAgent::FaqsAgent,
        SubAgent::FraudAgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubAgent::GitlabAgent => "gitlab_agent",
            SubAgent::GosiLawsAgent => "gosi_laws_agent",
            SubAgent::HrPoliciesAgent => "hr_policies_agent",
            SubAgent::FaqsAgent => "faqs_agent",
            SubAgent::FraudAgent => "fraud_agent",
        }
    }
}

impl fmt::Display for SubAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-agent override block. Table identity is typed; anything else is kept
/// as raw YAML for the agent that owns it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentOverrides {
    pub project_id: Option<String>,
    pub dataset_id: Option<String>,
    pub table_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AgentOverrides {
    /// Table identity with hard-coded defaults for missing fields
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(
            self.project_id.as_deref().unwrap_or(DEFAULT_PROJECT_ID),
            self.dataset_id.as_deref().unwrap_or(DEFAULT_DATASET_ID),
            self.table_name.as_deref().unwrap_or(DEFAULT_TABLE_NAME),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubAgentsConfig {
    pub gitlab_agent: AgentOverrides,
    pub gosi_laws_agent: AgentOverrides,
    pub hr_policies_agent: AgentOverrides,
    pub faqs_agent: AgentOverrides,
    pub fraud_agent: AgentOverrides,
}

impl SubAgentsConfig {
    pub fn get(&self, agent: SubAgent) -> &AgentOverrides {
        match agent {
            SubAgent::GitlabAgent => &self.gitlab_agent,
            SubAgent::GosiLawsAgent => &self.gosi_laws_agent,
            SubAgent::HrPoliciesAgent => &self.hr_policies_agent,
            SubAgent::FaqsAgent => &self.faqs_agent,
            SubAgent::FraudAgent => &self.fraud_agent,
        }
    }

    pub fn get_mut(&mut self, agent: SubAgent) -> &mut AgentOverrides {
        match agent {
            SubAgent::GitlabAgent => &mut self.gitlab_agent,
            SubAgent::GosiLawsAgent => &mut self.gosi_laws_agent,
            SubAgent::HrPoliciesAgent => &mut self.hr_policies_agent,
            SubAgent::FaqsAgent => &mut self.faqs_agent,
            SubAgent::FraudAgent => &mut self.fraud_agent,
        }
    }
}

//
// ================= Sections =================
//

/// Completion endpoint settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model_name: String,
    pub api_key: Secret,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model_name: String::new(),
            api_key: Secret::default(),
            temperature: 0.1,
            max_tokens: 500,
            timeout_secs: 60,
        }
    }
}

/// BigQuery REST settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BigQueryConfig {
    pub api_base_url: String,
    /// Static OAuth bearer token; the metadata server is used when absent
    pub access_token: Option<Secret>,
    pub metadata_token_url: String,
    pub location: Option<String>,
    pub timeout_secs: u64,
    /// Server-side wait per `queries` / `getQueryResults` call
    pub job_timeout_ms: u64,
    /// Stop materializing rows past this count. `None` keeps every row.
    pub max_result_rows: Option<usize>,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            access_token: None,
            metadata_token_url:
                "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
                    .to_string(),
            location: None,
            timeout_secs: 60,
            job_timeout_ms: 10_000,
            max_result_rows: None,
        }
    }
}

fn default_verify_ssl() -> bool {
    true
}

//
// ================= Config =================
//

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub bigquery: BigQueryConfig,
    #[serde(default)]
    pub subagents: SubAgentsConfig,
}

impl Config {
    /// Load from `$FRAUD_AGENT_CONFIG` or `configs/config.yaml`.
    /// A missing file is not an error; overrides and environment still apply.
    pub fn load(overrides: &[String]) -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        if path.exists() {
            info!("Loading config from: {}", path.display());
            Self::from_file(path, overrides)
        } else {
            info!("No config file at {}, using overrides and environment", path.display());
            Self::from_yaml_str("", overrides)
        }
    }

    pub fn from_file(path: impl AsRef<Path>, overrides: &[String]) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content, overrides)
    }

    /// Parse against the process environment
    pub fn from_yaml_str(content: &str, overrides: &[String]) -> Result<Self> {
        Self::parse_with_env(content, overrides, &|name: &str| std::env::var(name).ok())
    }

    /// Parse against an explicit environment lookup
    pub fn parse_with_env(
        content: &str,
        overrides: &[String],
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut tree: Value = serde_yaml::from_str(content)?;
        if tree.is_null() {
            tree = Value::Mapping(Mapping::new());
        }

        for raw in overrides {
            apply_override(&mut tree, raw)?;
        }

        interpolate_env(&mut tree, env)?;

        let mut config: Config = serde_yaml::from_value(tree)?;
        config.apply_env_fallbacks(env);
        config.validate()?;
        Ok(config)
    }

    fn apply_env_fallbacks(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if self.llm.base_url.trim().is_empty() {
            if let Some(url) = lookup("LITELLM_PROXY_API_BASE") {
                self.llm.base_url = url;
            }
        }

        if self.llm.api_key.is_empty() {
            if let Some(key) = lookup("LITELLM_PROXY_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
                self.llm.api_key = Secret::new(key);
            }
        }

        if self.bigquery.access_token.is_none() {
            self.bigquery.access_token = lookup("GOOGLE_OAUTH_ACCESS_TOKEN").map(Secret::new);
        }

        let fraud = self.subagents.get_mut(SubAgent::FraudAgent);
        if fraud.project_id.is_none() {
            fraud.project_id = lookup("FRAUD_PROJECT_ID");
        }
        if fraud.dataset_id.is_none() {
            fraud.dataset_id = lookup("FRAUD_DATASET_ID");
        }
        if fraud.table_name.is_none() {
            fraud.table_name = lookup("FRAUD_TABLE_NAME");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.base_url.trim().is_empty() {
            return Err(QueryAgentError::ConfigError("llm.base_url is required".to_string()));
        }
        if self.llm.model_name.trim().is_empty() {
            return Err(QueryAgentError::ConfigError("llm.model_name is required".to_string()));
        }
        if self.llm.api_key.is_empty() {
            return Err(QueryAgentError::CredentialsError(
                "llm.api_key is required (or LITELLM_PROXY_API_KEY / OPENAI_API_KEY)".to_string(),
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(QueryAgentError::ConfigError("llm.max_tokens must be > 0".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(QueryAgentError::ConfigError(format!(
                "llm.temperature must be within 0..=2, got {}",
                self.llm.temperature
            )));
        }
        if self.bigquery.max_result_rows == Some(0) {
            return Err(QueryAgentError::ConfigError(
                "bigquery.max_result_rows must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Table identity configured for `agent`
    pub fn table_for(&self, agent: SubAgent) -> TableRef {
        self.subagents.get(agent).table_ref()
    }
}

//
// ================= Overrides =================
//

/// Apply one `a.b=value`, `+a.b=value` or `~a.b` override
fn apply_override(tree: &mut Value, raw: &str) -> Result<()> {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_prefix('~') {
        let path = rest.split_once('=').map(|(p, _)| p).unwrap_or(rest);
        return remove_path(tree, path);
    }

    let raw = raw
        .strip_prefix("++")
        .or_else(|| raw.strip_prefix('+'))
        .unwrap_or(raw);

    let (path, value) = raw.split_once('=').ok_or_else(|| {
        QueryAgentError::ConfigError(format!("override '{}' is not of the form key=value", raw))
    })?;

    let parsed = if value.is_empty() {
        Value::String(String::new())
    } else {
        serde_yaml::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
    };

    set_path(tree, path.trim(), parsed)
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let keys: Vec<&str> = path.split('.').collect();
    if keys.iter().any(|k| k.is_empty()) {
        return Err(QueryAgentError::ConfigError(format!("invalid override key '{}'", path)));
    }
    Ok(keys)
}

fn set_path(tree: &mut Value, path: &str, value: Value) -> Result<()> {
    let keys = split_path(path)?;
    let (last, parents) = keys
        .split_last()
        .ok_or_else(|| QueryAgentError::ConfigError("empty override key".to_string()))?;

    let mut current = tree;
    for key in parents {
        if current.is_null() {
            *current = Value::Mapping(Mapping::new());
        }
        let map = current.as_mapping_mut().ok_or_else(|| {
            QueryAgentError::ConfigError(format!("cannot override '{}': '{}' is not a mapping", path, key))
        })?;
        let k = Value::String(key.to_string());
        if !map.contains_key(&k) {
            map.insert(k.clone(), Value::Null);
        }
        current = map
            .get_mut(&k)
            .ok_or_else(|| QueryAgentError::ConfigError(format!("cannot override '{}'", path)))?;
    }

    if current.is_null() {
        *current = Value::Mapping(Mapping::new());
    }
    let map = current.as_mapping_mut().ok_or_else(|| {
        QueryAgentError::ConfigError(format!("cannot override '{}': parent is not a mapping", path))
    })?;
    map.insert(Value::String(last.to_string()), value);
    Ok(())
}

fn remove_path(tree: &mut Value, path: &str) -> Result<()> {
    let keys = split_path(path.trim())?;
    let (last, parents) = keys
        .split_last()
        .ok_or_else(|| QueryAgentError::ConfigError("empty override key".to_string()))?;

    let mut current = tree;
    for key in parents {
        let k = Value::String(key.to_string());
        match current.as_mapping_mut().and_then(|m| m.get_mut(&k)) {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }

    if let Some(map) = current.as_mapping_mut() {
        map.remove(&Value::String(last.to_string()));
    }
    Ok(())
}

//
// ================= Interpolation =================
//

const ENV_MARKER: &str = "${oc.env:";

fn interpolate_env(value: &mut Value, env: &dyn Fn(&str) -> Option<String>) -> Result<()> {
    match value {
        Value::String(s) if s.contains(ENV_MARKER) => {
            *s = resolve_env_refs(s, env)?;
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                interpolate_env(v, env)?;
            }
        }
        Value::Sequence(items) => {
            for v in items.iter_mut() {
                interpolate_env(v, env)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Expand `${oc.env:NAME}` and `${oc.env:NAME,default}`
fn resolve_env_refs(input: &str, env: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(ENV_MARKER) {
        out.push_str(&rest[..start]);
        let after = &rest[start + ENV_MARKER.len()..];
        let end = after.find('}').ok_or_else(|| {
            QueryAgentError::ConfigError(format!("unterminated interpolation in '{}'", input))
        })?;

        let body = &after[..end];
        let (name, default) = match body.split_once(',') {
            Some((name, default)) => (name.trim(), Some(default.trim())),
            None => (body.trim(), None),
        };

        let resolved = env(name)
            .or_else(|| default.map(|d| d.to_string()))
            .ok_or_else(|| {
                QueryAgentError::ConfigError(format!("environment variable '{}' is not set", name))
            })?;

        out.push_str(&resolved);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
