//! HTTP control surface of a hub.
//!
//! - `POST /tunnel` with `{"m_addr", "s_addr", "s_name"}` asks the hub to
//!   expose `s_addr` (dialled by agent `s_name`) on the public bind `m_addr`
//! - `GET /agents` lists registered agent names
//! - `GET /metrics` renders Prometheus text when metrics are enabled
//! - anything else answers `server running`

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use revtun_core::{BuildTunnelRequest, HubHandle};
use revtun_observability::{gather_metrics, metrics_enabled};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Body of `POST /tunnel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelRequest {
    pub m_addr: String,
    pub s_addr: String,
    pub s_name: String,
}

#[derive(Debug, Serialize)]
struct ApiError {
    code: &'static str,
    message: String,
}

fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    let error = ApiError {
        code,
        message: message.into(),
    };
    (status, Json(serde_json::json!({ "error": error }))).into_response()
}

pub fn router(hub: HubHandle) -> Router {
    let mut app = Router::new()
        .route("/tunnel", post(build_tunnel_handler))
        .route("/agents", get(list_agents_handler));
    if metrics_enabled() {
        app = app.route("/metrics", get(|| async { gather_metrics() }));
    }
    app.fallback(index_handler).with_state(hub)
}

async fn index_handler() -> &'static str {
    "server running"
}

/// POST /tunnel
///
/// Success only means the hub queued the request. An unknown agent is
/// dropped inside the hub and still answers 200.
pub async fn build_tunnel_handler(
    State(hub): State<HubHandle>,
    payload: Result<Json<TunnelRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("Rejecting tunnel request: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", rejection.body_text());
        }
    };
    debug!(?payload, "Tunnel request");

    let request = match BuildTunnelRequest::parse(&payload.m_addr, &payload.s_addr, &payload.s_name)
    {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejecting tunnel request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string());
        }
    };

    if hub.build_tunnel(request).await {
        StatusCode::OK.into_response()
    } else {
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "HUB_UNAVAILABLE",
            "hub is not accepting requests",
        )
    }
}

/// GET /agents
pub async fn list_agents_handler(State(hub): State<HubHandle>) -> Response {
    match hub.agents().await {
        Ok(names) => Json(names).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, "HUB_UNAVAILABLE", e.to_string()),
    }
}
