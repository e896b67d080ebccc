//! HTTP surface: `POST /rpc`, protected `/api/*` control endpoints, and
//! plugin paths.
//!
//! Auth applies to `/rpc` and `/api/*` and to explicit plugin routes;
//! wildcard plugin handlers (webhooks, the diff viewer) authenticate
//! themselves — webhooks by provider signature, the viewer by capability
//! token.

pub mod acp_ws;
pub mod auth;
pub mod origin;
pub mod rpc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;

use oc_acp_protocol::RpcRequest;
use oc_webhook_guard::{apply_security_headers, client_key, is_loopback, HTML_VIEWER_CSP};

use crate::diffs::ViewerLookup;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/api/health", get(api_health))
        .route("/api/status", get(api_status))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_gateway_token,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            enforce_browser_origin,
        ));

    // Wildcard plugin handlers and the runtime WS leg bring their own auth.
    let plugins = Router::new()
        .route("/plugins/diffs/view/:id/:token", get(diff_viewer))
        .route("/plugins/diffs/assets/:name", get(diff_asset))
        .route("/acp/ws", get(acp_ws::upgrade));

    let cors = cors_layer(&state);
    protected
        .merge(plugins)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(state: &AppState) -> tower_http::cors::CorsLayer {
    use tower_http::cors::{AllowOrigin, CorsLayer};
    let origins: Vec<HeaderValue> = state
        .config
        .gateway
        .control_ui
        .allowed_origins
        .iter()
        .filter(|o| o.trim() != "*")
        .filter_map(|o| o.trim().parse().ok())
        .collect();
    if state
        .config
        .gateway
        .control_ui
        .allowed_origins
        .iter()
        .any(|o| o.trim() == "*")
    {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        CorsLayer::new().allow_origin(origins)
    }
}

/// Reject browser requests from unapproved origins with a bare 404; a
/// rejected origin learns nothing about what lives here.
async fn enforce_browser_origin(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !origin::check_browser_origin(req.headers(), &state.config.gateway) {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(req).await
}

async fn handle_rpc(State(state): State<AppState>, Json(req): Json<RpcRequest>) -> Response {
    state.heartbeat.beat();
    let resp = rpc::dispatch(&state, req).await;
    Json(resp).into_response()
}

async fn api_health(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "ok": true,
        "lastHeartbeatMs": state.heartbeat.last_beat_ms(),
    }))
    .into_response()
}

async fn api_status(State(state): State<AppState>) -> Response {
    let resp = rpc::dispatch(
        &state,
        RpcRequest {
            id: 0,
            method: "status".into(),
            params: serde_json::Value::Null,
        },
    )
    .await;
    Json(resp.result.unwrap_or_default()).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Diff viewer plugin routes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const RETRY_AFTER_SECONDS: &str = "60";

/// Bundled viewer assets served under `/plugins/diffs/assets/`.
const VIEWER_ASSETS: &[(&str, &str, &str)] = &[
    (
        "viewer.js",
        "application/javascript",
        "document.querySelectorAll('.hunk').forEach(h => h.addEventListener('click', () => h.classList.toggle('folded')));\n",
    ),
    (
        "viewer.css",
        "text/css",
        ".hunk.folded .lines { display: none; }\n.add { background: #e6ffed; }\n.del { background: #ffeef0; }\n",
    ),
];

fn allow_remote_viewer(state: &AppState) -> bool {
    // Remote viewer access rides the explicit origin allowlist decision.
    !state.config.gateway.control_ui.allowed_origins.is_empty()
}

async fn diff_viewer(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((id, token)): Path<(String, String)>,
) -> Response {
    let client = client_key(&addr.to_string());
    if !is_loopback(&client) && !allow_remote_viewer(&state) {
        return not_found();
    }

    match state.diffs.lookup_viewer(&id, &token, &client, chrono::Utc::now()) {
        ViewerLookup::Ok(_, html) => {
            let mut response = (StatusCode::OK, html).into_response();
            apply_security_headers(response.headers_mut(), "text/html; charset=utf-8");
            response.headers_mut().insert(
                "content-security-policy",
                HeaderValue::from_static(HTML_VIEWER_CSP),
            );
            response
        }
        ViewerLookup::NotFound => not_found(),
        ViewerLookup::LockedOut => {
            let mut response = (StatusCode::TOO_MANY_REQUESTS, "too many requests\n").into_response();
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from_static(RETRY_AFTER_SECONDS));
            apply_security_headers(response.headers_mut(), "text/plain; charset=utf-8");
            response
        }
    }
}

async fn diff_asset(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
) -> Response {
    let client = client_key(&addr.to_string());
    if !is_loopback(&client) && !allow_remote_viewer(&state) {
        return not_found();
    }
    match VIEWER_ASSETS.iter().find(|(n, _, _)| *n == name) {
        Some((_, content_type, body)) => {
            let mut response = (StatusCode::OK, *body).into_response();
            // Static assets besides the content type get the same guard set.
            apply_security_headers(response.headers_mut(), "text/plain");
            if let Ok(value) = HeaderValue::from_str(content_type) {
                response.headers_mut().insert("content-type", value);
            }
            response
        }
        None => not_found(),
    }
}

fn not_found() -> Response {
    let mut response = (StatusCode::NOT_FOUND, "not found\n").into_response();
    apply_security_headers(response.headers_mut(), "text/plain; charset=utf-8");
    response
}
