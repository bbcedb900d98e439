//! FedReconcile Ingress
//!
//! HTTP surface of the relay:
//! - `POST /api/auth` login
//! - `POST /gtas-validator/api` upload relay behind the session gate
//! - `GET /gtas-validator/download/{lease}/{filename}` artifact server
//! - Shared middleware and the JSON error contract

pub mod artifacts;
pub mod auth;
pub mod middleware;
pub mod relay;
pub mod state;
pub mod types;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub use auth::{LoginRequest, LoginResponse, SessionGate};
pub use relay::RelayResponse;
pub use state::AppState;
pub use types::{IngressError, IngressResult, RequestId, RequestMetadata};

pub const LOGIN_PATH: &str = "/api/auth";
pub const RELAY_PATH: &str = "/gtas-validator/api";
pub const DOWNLOAD_PREFIX: &str = "/gtas-validator/download";

const DOWNLOAD_ROUTE: &str = "/gtas-validator/download/{lease}/{filename}";

/// Build the application router
///
/// The session gate wraps only the relay route and runs before the body is read.
pub fn router(state: AppState) -> Router {
    let gate = SessionGate::for_relay(state.codec.clone(), state.metrics.clone());
    let max_upload_bytes = state.max_upload_bytes;

    let protected = Router::new()
        .route(RELAY_PATH, post(relay::relay))
        .route_layer(DefaultBodyLimit::max(max_upload_bytes))
        .route_layer(from_fn(move |req, next| {
            middleware::body_size_limit_middleware(req, next, max_upload_bytes)
        }))
        .route_layer(from_fn_with_state(gate, auth::require_session));

    Router::new()
        .route(LOGIN_PATH, post(auth::login))
        .route(DOWNLOAD_ROUTE, get(artifacts::download))
        .merge(protected)
        .with_state(state)
        .layer(from_fn(middleware::security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(middleware::request_context_middleware))
}
