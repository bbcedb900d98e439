//! Shared ingress types and utilities

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use fedreconcile_egress::EgressError;
use fedreconcile_storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Request ID for tracing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Reuse an ID supplied by a proxy in front of us
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of every error response: `{success: false, message}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureBody {
    pub success: bool,
    pub message: String,
}

/// Ingress error types
#[derive(Debug, Error)]
pub enum IngressError {
    /// Missing, malformed, expired or tampered credential
    #[error("{0}")]
    Unauthenticated(String),

    /// Valid credential, role not allowed
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    /// The validation service answered with a failure
    #[error("{0}")]
    UpstreamError(String),

    /// The validation service (or its identity provider) could not be reached
    #[error("{0}")]
    UpstreamUnreachable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Request too large: limit is {0} bytes")]
    PayloadTooLarge(usize),

    #[error("{0}")]
    Internal(String),
}

impl IngressError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngressError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            IngressError::Forbidden(_) => StatusCode::FORBIDDEN,
            IngressError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IngressError::UpstreamError(_)
            | IngressError::UpstreamUnreachable(_)
            | IngressError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngressError::NotFound(_) => StatusCode::NOT_FOUND,
            IngressError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl From<EgressError> for IngressError {
    fn from(err: EgressError) -> Self {
        match &err {
            EgressError::UpstreamError { .. } | EgressError::ParseError(_) => {
                IngressError::UpstreamError(err.to_string())
            }
            EgressError::IdentityError(_) => IngressError::UpstreamUnreachable(
                "Failed to authenticate to the validation service.".to_string(),
            ),
            _ if err.is_unreachable() => {
                IngressError::UpstreamUnreachable(format!("Validation service unreachable: {}", err))
            }
            _ => IngressError::Internal(err.to_string()),
        }
    }
}

impl From<StorageError> for IngressError {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            IngressError::NotFound("File not found or no longer available.".to_string())
        } else {
            IngressError::Internal(format!("Scratch storage failure: {}", err))
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed ({}): {}", status.as_u16(), self);
        }

        let body = FailureBody {
            success: false,
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Ingress result type
pub type IngressResult<T> = Result<T, IngressError>;

/// Request metadata collected during ingress
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub request_id: RequestId,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self {
            request_id: RequestId::generate(),
            client_ip: None,
            user_agent: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_client_ip(mut self, ip: String) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_user_agent(mut self, ua: String) -> Self {
        self.user_agent = Some(ua);
        self
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetadata {
    /// Milliseconds since the request reached the ingress layer
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.received_at).num_milliseconds()
    }
}

/// `req_... from 203.0.113.1 (curl/8.4.0)`, for audit lines
impl std::fmt::Display for RequestMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {}",
            self.request_id,
            self.client_ip.as_deref().unwrap_or("unknown")
        )?;
        if let Some(user_agent) = &self.user_agent {
            write!(f, " ({})", user_agent)?;
        }
        Ok(())
    }
}
