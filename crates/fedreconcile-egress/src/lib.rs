//! FedReconcile Egress
//!
//! This crate talks to the external validation service:
//! - Shared HTTP client construction
//! - Service-to-service identity tokens
//! - Versioned request/response contract
//! - The validation connector itself

pub mod client;
pub mod contract;
pub mod identity;
pub mod validator;

use thiserror::Error;

pub use contract::{
    Artifact, ContractVersion, InputFile, ValidationOutcome, ValidationSubmission,
};
pub use identity::{MetadataServerTokenProvider, NoAuth, ServiceTokenProvider, StaticTokenProvider};
pub use validator::{ValidationService, ValidatorConfig, ValidatorConnector};

/// Egress error types
#[derive(Debug, Error)]
pub enum EgressError {
    /// Transport failure reaching the validation service
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The validation service answered, but with a failure
    #[error("Validation service responded with an error: {status_code} - {message}")]
    UpstreamError { status_code: u16, message: String },

    /// No service-to-service credential could be obtained
    #[error("Failed to obtain service identity token: {0}")]
    IdentityError(String),

    #[error("Failed to parse validation response: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Request timeout after {0}s")]
    Timeout(u64),
}

impl EgressError {
    /// True when the service could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            EgressError::HttpError(_) | EgressError::IdentityError(_) | EgressError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EgressError>;
