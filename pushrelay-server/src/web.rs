//! HTTP and WebSocket surface.
//!
//! - `GET /ws` upgrades to a push session. The handshake is authenticated by
//!   [`auth_gate`] before the upgrade handler runs.
//! - `POST /push` hands a notification to a connected user. Guarded by
//!   [`ip_filter_guard`].
//! - `GET /` and `GET /health` are unauthenticated liveness probes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, Query, Request, State, WebSocketUpgrade};
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthClaims;
use crate::error::{AuthError, RelayError};
use crate::protocol::ServerEvent;
use crate::server::SharedState;
use crate::session::Session;

/// Plain-text liveness banner served at `/`.
pub const SERVICE_BANNER: &str = concat!("pushrelay/", env!("CARGO_PKG_VERSION"));

/// Per-connection outbound queue depth.
const OUTBOUND_BUFFER: usize = 64;

/// A socket write that takes longer than this is treated as a dead peer.
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(30);

// ── Router ─────────────────────────────────────────────────────────────

pub fn router(state: Arc<SharedState>) -> Router {
    let sessions = Router::new()
        .route("/ws", get(ws_upgrade))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), auth_gate));

    let push = Router::new()
        .route("/push", post(submit_push))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            ip_filter_guard,
        ));

    Router::new()
        .route("/", get(liveness))
        .route("/health", get(health))
        .merge(sessions)
        .merge(push)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Middleware ─────────────────────────────────────────────────────────

/// Reject handshakes without a valid bearer token; attach the claims for
/// the upgrade handler otherwise.
async fn auth_gate(
    State(state): State<Arc<SharedState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let claims = match state.auth.authenticate(req.headers()) {
        Ok(claims) => claims,
        Err(e) => {
            match &e {
                AuthError::Internal(detail) => {
                    tracing::error!(%detail, "Authentication processing error")
                }
                AuthError::InvalidToken(detail) => {
                    tracing::warn!(%detail, "JWT verification failed")
                }
                AuthError::MissingToken => tracing::warn!("Handshake without token"),
            }
            return Err(e.into());
        }
    };
    tracing::debug!(sub = ?claims.sub, "Authorized handshake");
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

async fn ip_filter_guard(
    State(state): State<Arc<SharedState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, RelayError> {
    if let Err(e) = state.ip_filter.check(addr.ip()) {
        tracing::warn!(%addr, "Access denied for IP address");
        return Err(e);
    }
    Ok(next.run(req).await)
}

// ── WebSocket sessions ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HandshakeParams {
    overwrite: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    Extension(claims): Extension<AuthClaims>,
    State(state): State<Arc<SharedState>>,
) -> impl IntoResponse {
    let overwrite = params.overwrite.as_deref() == Some("true");
    ws.on_upgrade(move |socket| handle_ws(socket, state, claims, overwrite))
}

async fn handle_ws(
    mut socket: WebSocket,
    state: Arc<SharedState>,
    claims: AuthClaims,
    overwrite: bool,
) {
    tracing::info!(sub = ?claims.sub, overwrite, "User attempting to connect");
    let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
    let mut session = Session::new();

    let conn = match session.admit(&state.arbiter, claims.subject(), overwrite, tx) {
        Ok(conn) => conn,
        Err(e) => {
            send_event(&mut socket, &ServerEvent::rejected(&e)).await;
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };

    if !send_event(&mut socket, &ServerEvent::connected()).await {
        session.disconnect(&state.arbiter, "send failed");
        return;
    }

    let reason = loop {
        tokio::select! {
            frame = socket.recv() => match frame {
                Some(Ok(WsMessage::Close(_))) | None => break "client closed",
                Some(Err(_)) => break "transport error",
                // Clients have nothing to say after the handshake.
                Some(Ok(_)) => {}
            },
            Some(event) = rx.recv() => {
                if !send_event(&mut socket, &event).await {
                    break "send failed";
                }
            }
            _ = conn.closed() => {
                let _ = socket.send(WsMessage::Close(None)).await;
                break "server disconnect";
            }
        }
    };
    session.disconnect(&state.arbiter, reason);
}

/// Write one event frame. Returns `false` if the peer is gone or stalled.
async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    let frame = WsMessage::Text(event.to_json().into());
    match tokio::time::timeout(WS_SEND_TIMEOUT, socket.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!("WebSocket send failed: {e}");
            false
        }
        Err(_) => {
            tracing::debug!("WebSocket send timed out");
            false
        }
    }
}

// ── Push endpoint ──────────────────────────────────────────────────────

async fn submit_push(
    State(state): State<Arc<SharedState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, RelayError> {
    if let Err(e) = state.dispatcher.deliver_body(&body) {
        if let RelayError::Validation(ref v) = e {
            tracing::warn!("Rejected push request: {v}");
        }
        return Err(e);
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Push notification sent successfully",
    })))
}

// ── Probes ─────────────────────────────────────────────────────────────

async fn liveness() -> &'static str {
    SERVICE_BANNER
}

#[derive(Serialize)]
struct HealthResponse {
    service: &'static str,
    connections: usize,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: SERVICE_BANNER,
        connections: state.registry.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
