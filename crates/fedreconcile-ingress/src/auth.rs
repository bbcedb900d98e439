//! Login endpoint and session gate

use crate::middleware::RequestMetadataExt;
use crate::state::AppState;
use crate::types::{IngressError, IngressResult};
use axum::{
    Json,
    extract::{Request, State, rejection::JsonRejection},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use fedreconcile_core::{Principal, Role, TokenCodec};
use fedreconcile_observability::{Metrics, RelayOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub message: String,
}

/// `POST /api/auth`
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> IngressResult<Json<LoginResponse>> {
    let Json(request) = payload.map_err(|rejection| {
        debug!("Rejected login body: {}", rejection);
        IngressError::BadRequest("Request body must be JSON with username and password.".to_string())
    })?;

    let identity = state
        .identities
        .authenticate(&request.username, &request.password)
        .await
        .map_err(|e| IngressError::Internal(format!("Identity store failure: {}", e)))?;

    let Some(identity) = identity else {
        state.metrics.record_login(false);
        warn!("Failed login for '{}'", request.username);
        return Err(IngressError::Unauthenticated(
            "Invalid username or password.".to_string(),
        ));
    };

    let (token, claims) = state
        .codec
        .issue(identity.subject_id, identity.role)
        .map_err(|e| IngressError::Internal(format!("Failed to issue credential: {}", e)))?;

    state.metrics.record_login(true);
    info!(
        "User {} ({}) logged in; session expires {}",
        claims.subject_id, claims.role, claims.expires_at
    );

    Ok(Json(LoginResponse {
        success: true,
        token,
        message: "Authentication successful.".to_string(),
    }))
}

/// Extract the credential from `Authorization: Bearer <credential>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, credential) = value.split_once(' ')?;
    let credential = credential.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !credential.is_empty()).then_some(credential)
}

/// Verifies the caller's credential and role before a protected handler runs
#[derive(Clone)]
pub struct SessionGate {
    codec: Arc<TokenCodec>,
    allowed: Arc<[Role]>,
    metrics: Arc<Metrics>,
}

impl SessionGate {
    pub fn new(
        codec: Arc<TokenCodec>,
        allowed: impl IntoIterator<Item = Role>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            codec,
            allowed: allowed.into_iter().collect(),
            metrics,
        }
    }

    /// Gate for the validation relay: admins and analysts
    pub fn for_relay(codec: Arc<TokenCodec>, metrics: Arc<Metrics>) -> Self {
        Self::new(codec, [Role::Admin, Role::Analyst], metrics)
    }

    /// Resolve the principal behind a request's headers
    pub fn authorize(&self, headers: &HeaderMap) -> IngressResult<Principal> {
        let Some(credential) = bearer_token(headers) else {
            return Err(IngressError::Unauthenticated(
                "Authentication required. No token provided.".to_string(),
            ));
        };

        let claims = self.codec.decode(credential).map_err(|e| {
            debug!("Credential rejected: {}", e);
            IngressError::Unauthenticated("Invalid or expired authentication token.".to_string())
        })?;

        if !self.allowed.contains(&claims.role) {
            warn!(
                "User {} with role '{}' denied access",
                claims.subject_id, claims.role
            );
            return Err(IngressError::Forbidden(
                "Access denied. Insufficient privileges.".to_string(),
            ));
        }

        Ok(claims.principal())
    }
}

/// Middleware wrapping protected routes; attaches the [`Principal`] on success
pub async fn require_session(
    State(gate): State<SessionGate>,
    mut req: Request,
    next: Next,
) -> Result<Response, IngressError> {
    let context = request_context(&req);

    let principal = match gate.authorize(req.headers()) {
        Ok(principal) => principal,
        Err(err) => {
            let outcome = match err {
                IngressError::Forbidden(_) => RelayOutcome::Forbidden,
                _ => RelayOutcome::Unauthenticated,
            };
            warn!("Rejected {} for {}: {}", context, req.uri().path(), err);
            gate.metrics.record_relay(outcome);
            return Err(err);
        }
    };

    info!(
        "User {} ({}) authenticated and authorized for {} [{}]",
        principal.subject_id,
        principal.role,
        req.uri().path(),
        context
    );

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Who is calling, as recorded by the request context middleware
fn request_context(req: &Request) -> String {
    req.extensions()
        .get::<RequestMetadataExt>()
        .map(|ext| ext.0.to_string())
        .unwrap_or_else(|| "unidentified request".to_string())
}
