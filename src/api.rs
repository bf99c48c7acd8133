//! REST API server for the fraud query agent
//!
//! Exposes the tool registry over HTTP so an agent framework can list and
//! invoke the fraud tools.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::error::QueryAgentError;
use crate::models::ToolInput;
use crate::tools::{tool_manifest, ToolRegistry};

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ToolRegistry>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Tool Endpoints
/// =============================

async fn list_tools(State(state): State<ApiState>) -> Json<ApiResponse> {
    Json(ApiResponse::success(tool_manifest(&state.registry)))
}

async fn invoke_tool(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(parameters): Json<serde_json::Value>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(tool = %name, "Received tool invocation");

    let input = ToolInput {
        tool_name: name,
        parameters,
    };

    match state.registry.invoke(&input).await {
        // Query failures are still a 200: the envelope carries success=false
        Ok(output) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: output.success,
                data: Some(output.data),
                error: output.error,
                timestamp: chrono::Utc::now().to_rfc3339(),
            }),
        ),
        Err(e) => {
            let status = match &e {
                QueryAgentError::ToolNotFound(_) => StatusCode::NOT_FOUND,
                QueryAgentError::InvalidToolInput(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(tool = %input.tool_name, %status, error = %e, "Tool invocation rejected");
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(registry: Arc<ToolRegistry>) -> Router {
    let state = ApiState { registry };

    Router::new()
        .route("/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/:name", post(invoke_tool))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    registry: Arc<ToolRegistry>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(registry);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::test_registry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(Arc::new(test_registry()))
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
    }

    #[tokio::test]
    async fn test_list_tools() {
        let (status, body) = send(Request::get("/api/tools").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["agent"]["name"], json!("fraud_agent"));
        assert_eq!(body["data"]["tools"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn test_invoke_statistics_tool() {
        let (status, body) = send(post_json(
            "/api/tools/get_fraud_analytics",
            json!({ "dimension": "region" }),
        ))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["rows"][0]["region"], json!("North"));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_failed_query_is_ok_status_with_error() {
        let (status, body) = send(post_json(
            "/api/tools/execute_dynamic_query",
            json!({ "query": "SELECT missing_column FROM t" }),
        ))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["data"]["query"], json!("SELECT missing_column FROM t"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_404() {
        let (status, body) = send(post_json("/api/tools/drop_everything", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_400() {
        let (status, _) = send(post_json("/api/tools/generate_dynamic_query", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
