//! Session claims carried inside a bearer credential

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role granted to an authenticated subject
///
/// Roles outside the known set survive decoding as [`Role::Other`] so the
/// session gate can answer `Forbidden` instead of `Unauthenticated`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Analyst,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Analyst => "analyst",
            Role::Other(name) => name,
        }
    }

    /// True for the roles this system knows how to authorize
    pub fn is_known(&self) -> bool {
        !matches!(self, Role::Other(_))
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "admin" => Role::Admin,
            // Legacy credentials used the longer name
            "analyst" | "gtas_analyst" => Role::Analyst,
            _ => Role::Other(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim set serialized into the middle segment of a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "sub")]
    pub subject_id: String,

    pub role: Role,

    #[serde(rename = "iss")]
    pub issuer: String,

    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl SessionClaims {
    /// `expiresAt` must be strictly after `issuedAt`
    pub fn has_valid_lifetime(&self) -> bool {
        self.expires_at > self.issued_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn principal(&self) -> Principal {
        Principal {
            subject_id: self.subject_id.clone(),
            role: self.role.clone(),
        }
    }
}

/// Identity resolved by the session gate and attached to the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: String,
    pub role: Role,
}
