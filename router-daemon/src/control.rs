//! The local control HTTP surface (§6): a single `POST /command` door
//! that is semantically the same entry point as the tool adapter, plus
//! `GET /health`. Meant for callers whose transport is "just HTTP on
//! loopback" rather than a dedicated protocol adapter.

use std::sync::Arc;
use std::time::Instant;

use astra_router_core::{AdapterError, ErrorCode, SessionToken, TabId, ToolAdapter};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::health::HealthStatus;

const SESSION_HEADER: &str = "x-session-token";
const AUTH_HEADER: &str = "authorization";

pub struct AppState {
    pub adapter: ToolAdapter,
    pub router: astra_router_core::RouterHandle,
    pub metrics: Arc<astra_router_core::RouterMetrics>,
    pub shared_secret: Option<String>,
    pub started_at: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/command", post(handle_command))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    #[serde(rename = "type")]
    name: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "tabId", default)]
    tab_id: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    payload: serde_json::Value,
    #[serde(rename = "tabId", skip_serializing_if = "Option::is_none")]
    tab_id: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

struct HttpError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { code: self.code, message: self.message })).into_response()
    }
}

fn router_error_status(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::UnknownSession | ErrorCode::SessionClosed => StatusCode::NOT_FOUND,
        ErrorCode::TabOwnershipConflict => StatusCode::CONFLICT,
        ErrorCode::QueueOverflow | ErrorCode::RouterSaturated => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Timeout | ErrorCode::LinkBackpressureTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Cancelled => StatusCode::CONFLICT,
        ErrorCode::LinkLost => StatusCode::BAD_GATEWAY,
        ErrorCode::MalformedResponse | ErrorCode::DownstreamError => StatusCode::BAD_GATEWAY,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
    }
}

impl From<AdapterError> for HttpError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::InvalidArguments { source, .. } => HttpError {
                status: StatusCode::BAD_REQUEST,
                code: source.code().as_str(),
                message: source.to_string(),
            },
            AdapterError::Router(source) => HttpError {
                status: router_error_status(source.code()),
                code: source.code().as_str(),
                message: source.to_string(),
            },
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), HttpError> {
    let Some(secret) = &state.shared_secret else {
        return Ok(());
    };
    let expected = format!("Bearer {secret}");
    let presented = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(HttpError {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED",
            message: "missing or incorrect shared secret".to_string(),
        })
    }
}

fn session_token(headers: &HeaderMap) -> Result<SessionToken, HttpError> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(SessionToken::from)
        .ok_or_else(|| HttpError {
            status: StatusCode::BAD_REQUEST,
            code: "MISSING_SESSION_TOKEN",
            message: format!("request must carry a {SESSION_HEADER} header"),
        })
}

async fn handle_command(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, HttpError> {
    authorize(&state, &headers)?;
    let token = session_token(&headers)?;

    let outcome = state
        .adapter
        .handle_tool_call(&token, &request.name, request.payload, request.tab_id.map(TabId), None, None)
        .await?;

    Ok(Json(CommandResponse {
        payload: outcome.payload,
        tab_id: outcome.tab_id.map(|t| t.0),
    }))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let stats = state.router.stats().await;
    let metrics = state.metrics.snapshot();
    Json(HealthStatus::from_stats(stats, metrics, state.started_at.elapsed()))
}
