//! MCP HTTP server.
//!
//! Serves the tool registry over MCP Streamable HTTP plus a plain JSON
//! mirror for schedulers and scripts.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/mcp` | MCP Streamable HTTP (stateless) |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool; the body is its JSON parameters |
//! | `GET`  | `/health` | Health check (returns version), never authenticated |
//!
//! # Error Contract
//!
//! Transport-level errors use
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no tool registered with name: x" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404).
//! Tool outcomes, including tool failures, are always `200` with the tool's
//! own `{"status": ...}` JSON.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{require_id_token, IdTokenVerifier};
use crate::config::Config;
use crate::mcp::McpBridge;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Clone)]
struct AppState {
    ctx: Arc<ToolContext>,
    tools: Arc<ToolRegistry>,
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let ctx = Arc::new(ToolContext::from_config(config.clone())?);
    let tools = Arc::new(ToolRegistry::with_builtins());
    let verifier = if config.auth.is_enabled() {
        Some(Arc::new(IdTokenVerifier::new(config.auth.audience.trim())?))
    } else {
        tracing::warn!("auth.audience not set; serving without authentication");
        None
    };

    let app = build_router(ctx, tools.clone(), verifier);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        tools = tools.len(),
        "terra-incognita server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the full router. With a verifier, everything but `/health`
/// requires a valid ID token.
pub fn build_router(
    ctx: Arc<ToolContext>,
    tools: Arc<ToolRegistry>,
    verifier: Option<Arc<IdTokenVerifier>>,
) -> Router {
    let bridge = McpBridge::new(ctx.clone(), tools.clone());
    let mut mcp_config = StreamableHttpServerConfig::default();
    mcp_config.stateful_mode = false;
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        mcp_config,
    );

    let mut protected = Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .with_state(AppState { ctx, tools })
        .nest_service("/mcp", mcp);
    if let Some(verifier) = verifier {
        protected = protected.layer(middleware::from_fn_with_state(verifier, require_id_token));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .merge(protected)
        .layer(cors)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

/// Runs a tool. An empty body means no parameters, which is how the
/// scheduler calls the workflow tools.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice::<Value>(&body)
            .map_err(|e| bad_request(format!("invalid JSON body: {}", e)))?
    };
    if !params.is_object() {
        return Err(bad_request("parameters must be a JSON object"));
    }

    state
        .tools
        .call(&name, params, &state.ctx)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))
}
