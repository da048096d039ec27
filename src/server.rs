//! HTTP API and JSON-RPC tool server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/add` | Ingest a file or directory |
//! | `POST` | `/search` | Search chunks (keyword, vector, hybrid) |
//! | `POST` | `/ask` | Context-assembly question answering |
//! | `GET`  | `/graph` | Graph summary counts |
//! | `GET`  | `/neighbors/{node}` | Edges touching a node |
//! | `GET`  | `/trace/{node}` | Provenance chain |
//! | `POST` | `/link` | Create a manual edge |
//! | `POST` | `/relate` | Compute semantic edges |
//! | `GET`  | `/tools/list` | Tool discovery for RPC clients |
//! | `POST` | `/rpc` | JSON-RPC 2.0 tool invocation |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Missing required fields in request bodies are rejected by serde with a
//! 422; operational failures map to 500 with the error message as detail.
//!
//! The store handle is threaded through request state — there is no
//! process-global store cache.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::ask::{self, AskOptions, AskResult};
use crate::error::RagError;
use crate::graph::{self, GraphSummary, Neighbors, TraceHop};
use crate::ingest::{self, AddOptions, AddReport};
use crate::search::{self, SearchResult};
use crate::store::Store;
use crate::tools::{ToolContext, ToolRegistry};

/// Shared application state for all route handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    tools: Arc<ToolRegistry>,
}

/// Start the HTTP server on `bind`, serving `store`.
pub async fn run_server(store: Store, bind: &str) -> anyhow::Result<()> {
    let state = AppState {
        store: Arc::new(store),
        tools: Arc::new(ToolRegistry::with_builtins()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/add", post(handle_add))
        .route("/search", post(handle_search))
        .route("/ask", post(handle_ask))
        .route("/graph", get(handle_graph))
        .route("/neighbors/{*node}", get(handle_neighbors))
        .route("/trace/{*node}", get(handle_trace))
        .route("/link", post(handle_link))
        .route("/relate", post(handle_relate))
        .route("/tools/list", get(handle_tools_list))
        .route("/rpc", post(handle_rpc))
        .layer(cors)
        .with_state(state);

    println!("ragdag server listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Error mapping ────────────────────────────────────────────────────────

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

/// Map library errors onto the HTTP contract: user-recoverable problems are
/// 400s, everything else is a 500 with the message as detail.
fn from_anyhow(e: anyhow::Error) -> AppError {
    let (status, code) = match e.downcast_ref::<RagError>() {
        Some(RagError::NotAStore(_)) | Some(RagError::BadConfig(_)) => {
            (StatusCode::BAD_REQUEST, "bad_request")
        }
        Some(RagError::ProviderUnavailable(_)) => (StatusCode::BAD_REQUEST, "provider_unavailable"),
        Some(RagError::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    AppError {
        status,
        code: code.to_string(),
        message: format!("{:#}", e),
    }
}

// ── GET /health ──────────────────────────────────────────────────────────

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

// ── POST /add ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AddRequest {
    path: String,
    domain: Option<String>,
    #[serde(default)]
    flat: bool,
    #[serde(default = "default_true")]
    embed: bool,
}

fn default_true() -> bool {
    true
}

async fn handle_add(
    State(state): State<AppState>,
    Json(req): Json<AddRequest>,
) -> Result<Json<AddReport>, AppError> {
    if req.path.trim().is_empty() {
        return Err(bad_request("path must not be empty"));
    }
    let opts = AddOptions {
        domain: req.domain,
        flat: req.flat,
        embed: req.embed,
    };
    let report = ingest::add(&state.store, &[req.path.into()], &opts)
        .await
        .map_err(from_anyhow)?;
    Ok(Json(report))
}

// ── POST /search ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    mode: Option<String>,
    domain: Option<String>,
    top_k: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let results = search::search(
        &state.store,
        &req.query,
        req.mode.as_deref(),
        req.domain.as_deref(),
        req.top_k,
    )
    .await
    .map_err(from_anyhow)?;
    Ok(Json(results))
}

// ── POST /ask ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    domain: Option<String>,
    #[serde(default = "default_true")]
    use_llm: bool,
    top_k: Option<usize>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResult>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let opts = AskOptions {
        domain: req.domain,
        top_k: req.top_k,
        use_llm: req.use_llm,
    };
    let result = ask::ask(&state.store, &req.question, &opts)
        .await
        .map_err(from_anyhow)?;
    Ok(Json(result))
}

// ── GET /graph ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GraphQuery {
    domain: Option<String>,
}

async fn handle_graph(
    State(state): State<AppState>,
    Query(query): Query<GraphQuery>,
) -> Result<Json<GraphSummary>, AppError> {
    let stats = graph::summary(&state.store, query.domain.as_deref()).map_err(from_anyhow)?;
    Ok(Json(stats))
}

// ── GET /neighbors/{node}, GET /trace/{node} ─────────────────────────────

async fn handle_neighbors(
    State(state): State<AppState>,
    AxumPath(node): AxumPath<String>,
) -> Result<Json<Neighbors>, AppError> {
    let result = graph::neighbors(&state.store, &node).map_err(from_anyhow)?;
    Ok(Json(result))
}

async fn handle_trace(
    State(state): State<AppState>,
    AxumPath(node): AxumPath<String>,
) -> Result<Json<Vec<TraceHop>>, AppError> {
    let hops = graph::trace(&state.store, &node).map_err(from_anyhow)?;
    Ok(Json(hops))
}

// ── POST /link ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LinkRequest {
    source: String,
    target: String,
    edge_type: Option<String>,
}

#[derive(Serialize)]
struct OkResponse {
    status: String,
}

async fn handle_link(
    State(state): State<AppState>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<OkResponse>, AppError> {
    if req.source.trim().is_empty() || req.target.trim().is_empty() {
        return Err(bad_request("source and target must not be empty"));
    }
    graph::link(
        &state.store,
        &req.source,
        &req.target,
        req.edge_type.as_deref(),
    )
    .map_err(from_anyhow)?;
    Ok(Json(OkResponse {
        status: "ok".to_string(),
    }))
}

// ── POST /relate ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RelateRequest {
    domain: Option<String>,
    threshold: Option<f64>,
}

#[derive(Serialize)]
struct RelateResponse {
    added: u64,
}

async fn handle_relate(
    State(state): State<AppState>,
    Json(req): Json<RelateRequest>,
) -> Result<Json<RelateResponse>, AppError> {
    let threshold = req
        .threshold
        .unwrap_or_else(|| state.store.config().get_f64("edges.relate_threshold", 0.8));
    let added =
        graph::relate(&state.store, req.domain.as_deref(), threshold).map_err(from_anyhow)?;
    Ok(Json(RelateResponse { added }))
}

// ── Tool discovery and JSON-RPC dispatch ─────────────────────────────────

#[derive(Serialize)]
struct ToolDescriptor {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
}

async fn handle_tools_list(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolDescriptor {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

#[derive(Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<serde_json::Value>,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 endpoint: the method is the tool name, params the tool's
/// arguments object, and the result a `{ "text": ... }` rendering.
async fn handle_rpc(
    State(state): State<AppState>,
    Json(req): Json<RpcRequest>,
) -> Json<RpcResponse> {
    let Some(tool) = state.tools.find(&req.method) else {
        return Json(RpcResponse {
            jsonrpc: "2.0",
            id: req.id,
            result: None,
            error: Some(RpcError {
                code: -32601,
                message: format!("no tool registered with name: {}", req.method),
            }),
        });
    };

    let ctx = ToolContext {
        store: state.store.clone(),
    };
    let params = if req.params.is_null() {
        serde_json::json!({})
    } else {
        req.params
    };

    match tool.execute(params, &ctx).await {
        Ok(text) => Json(RpcResponse {
            jsonrpc: "2.0",
            id: req.id,
            result: Some(serde_json::json!({ "text": text })),
            error: None,
        }),
        Err(e) => Json(RpcResponse {
            jsonrpc: "2.0",
            id: req.id,
            result: None,
            error: Some(RpcError {
                code: -32000,
                message: format!("{:#}", e),
            }),
        }),
    }
}
