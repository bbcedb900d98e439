//! Client-side session object
//!
//! Holders pass a `ClientSession` explicitly and check expiry before every use.
//! The claims are read without signature verification; the server stays
//! authoritative and revalidates the credential on each call.

use crate::claims::{Role, SessionClaims};
use crate::error::{Error, Result};
use crate::token::peek_claims;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct ClientSession {
    credential: String,
    claims: SessionClaims,
}

impl ClientSession {
    /// Wrap a credential returned by the login endpoint
    pub fn from_credential(credential: impl Into<String>) -> Result<Self> {
        let credential = credential.into();
        let claims = peek_claims(&credential)?;
        Ok(Self { credential, claims })
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn claims(&self) -> &SessionClaims {
        &self.claims
    }

    pub fn role(&self) -> &Role {
        &self.claims.role
    }

    pub fn subject_id(&self) -> &str {
        &self.claims.subject_id
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.claims.is_expired_at(now)
    }

    /// Fail with `SessionExpired` once the credential has lapsed
    pub fn ensure_valid_at(&self, now: DateTime<Utc>) -> Result<&Self> {
        if self.is_expired_at(now) {
            return Err(Error::SessionExpired);
        }
        Ok(self)
    }

    pub fn ensure_valid(&self) -> Result<&Self> {
        self.ensure_valid_at(Utc::now())
    }

    /// Value for an `Authorization` header
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.credential)
    }

    /// End the session; the credential is dropped with it
    pub fn logout(self) {
        tracing::debug!("Session for {} discarded", self.claims.subject_id);
    }
}
