//! Error types for FedReconcile Core

use crate::token::TokenError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid credential: {0}")]
    Token(#[from] TokenError),

    #[error("Session expired")]
    SessionExpired,

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Identity store error: {0}")]
    IdentityStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
