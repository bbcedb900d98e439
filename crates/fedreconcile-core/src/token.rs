//! Bearer credential codec
//!
//! A credential is three base64url segments, `header.claims.signature`, where the
//! signature is HMAC-SHA256 over `header.claims` keyed with a shared secret.
//! Decoding checks, in order: segment count, signature (constant time), header
//! algorithm, issuer, claim lifetime, and expiry.

use crate::claims::{Role, SessionClaims};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";
const TOKEN_TYPE: &str = "JWT";

/// Default `iss` claim
pub const DEFAULT_ISSUER: &str = "fedreconcile";

/// Default credential lifetime in minutes
pub const DEFAULT_TTL_MINUTES: i64 = 60;

/// Shortest accepted signing secret, in bytes
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed credential: {0}")]
    Malformed(String),

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature mismatch")]
    BadSignature,

    #[error("Issuer mismatch: expected {expected}, found {found}")]
    IssuerMismatch { expected: String, found: String },

    #[error("Credential expiry must be after issue time")]
    InvalidLifetime,

    #[error("Credential expired")]
    Expired,

    #[error("Signing secret too short: {0} bytes (minimum {MIN_SECRET_LEN})")]
    WeakSecret(usize),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Issues and verifies bearer credentials
#[derive(Clone)]
pub struct TokenCodec {
    key: Vec<u8>,
    issuer: String,
    ttl: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("key", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenCodec {
    /// Create a codec from a shared secret
    pub fn new(secret: impl AsRef<[u8]>, issuer: impl Into<String>) -> Result<Self, TokenError> {
        let key = secret.as_ref().to_vec();
        if key.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret(key.len()));
        }

        Ok(Self {
            key,
            issuer: issuer.into(),
            ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
        })
    }

    /// Create a codec with a random per-process secret
    ///
    /// Credentials issued by this codec do not survive a restart.
    pub fn with_random_secret(issuer: impl Into<String>) -> Self {
        let key: [u8; 32] = rand::random();
        Self {
            key: key.to_vec(),
            issuer: issuer.into(),
            ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
        }
    }

    /// Set the lifetime of issued credentials
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a credential for a subject, valid from now for the configured lifetime
    pub fn issue(
        &self,
        subject_id: impl Into<String>,
        role: Role,
    ) -> Result<(String, SessionClaims), TokenError> {
        self.issue_at(subject_id, role, Utc::now())
    }

    /// Issue a credential as if the clock read `now`
    pub fn issue_at(
        &self,
        subject_id: impl Into<String>,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<(String, SessionClaims), TokenError> {
        // Claims travel with second precision; truncate so decode(encode(c)) == c
        let issued_at = now.trunc_subsecs(0);
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or(TokenError::InvalidLifetime)?;
        let claims = SessionClaims {
            subject_id: subject_id.into(),
            role,
            issuer: self.issuer.clone(),
            issued_at,
            expires_at,
        };

        let credential = self.encode(&claims)?;
        Ok((credential, claims))
    }

    /// Serialize and sign a claim set
    pub fn encode(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        if !claims.has_valid_lifetime() {
            return Err(TokenError::InvalidLifetime);
        }

        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: TOKEN_TYPE.to_string(),
        };

        let encoded_header = encode_segment(&header)?;
        let encoded_claims = encode_segment(claims)?;
        let signing_input = format!("{}.{}", encoded_header, encoded_claims);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(&signing_input)?);

        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Verify a credential against the current time
    pub fn decode(&self, credential: &str) -> Result<SessionClaims, TokenError> {
        self.decode_at(credential, Utc::now())
    }

    /// Verify a credential as if the clock read `now`
    pub fn decode_at(
        &self,
        credential: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims, TokenError> {
        let (encoded_header, encoded_claims, encoded_signature) = split_segments(credential)?;

        let signature = URL_SAFE_NO_PAD
            .decode(encoded_signature)
            .map_err(|e| TokenError::Malformed(format!("signature segment: {}", e)))?;

        let mut mac = self.mac()?;
        mac.update(encoded_header.as_bytes());
        mac.update(b".");
        mac.update(encoded_claims.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let header: Header = decode_segment(encoded_header)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let claims: SessionClaims = decode_segment(encoded_claims)?;

        if claims.issuer != self.issuer {
            return Err(TokenError::IssuerMismatch {
                expected: self.issuer.clone(),
                found: claims.issuer,
            });
        }

        if !claims.has_valid_lifetime() {
            return Err(TokenError::InvalidLifetime);
        }

        if claims.is_expired_at(now) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::WeakSecret(self.key.len()))
    }

    fn sign(&self, signing_input: &str) -> Result<Vec<u8>, TokenError> {
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Read the claim set of a credential without verifying it
///
/// Clients use this to learn their role and expiry; the server never does.
pub fn peek_claims(credential: &str) -> Result<SessionClaims, TokenError> {
    let (_, encoded_claims, _) = split_segments(credential)?;
    decode_segment(encoded_claims)
}

fn split_segments(credential: &str) -> Result<(&str, &str, &str), TokenError> {
    let mut parts = credential.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(claims), Some(signature), None) => Ok((header, claims, signature)),
        _ => Err(TokenError::Malformed(
            "expected exactly three segments".to_string(),
        )),
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|e| TokenError::Malformed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    fn codec() -> TokenCodec {
        TokenCodec::new(SECRET, DEFAULT_ISSUER).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let (credential, claims) = codec.issue("adminUser", Role::Admin).unwrap();

        let decoded = codec.decode(&credential).unwrap();
        assert_eq!(decoded, claims);
        assert_eq!(decoded.subject_id, "adminUser");
        assert_eq!(decoded.role, Role::Admin);
        assert_eq!(decoded.expires_at - decoded.issued_at, Duration::minutes(60));
    }

    #[test]
    fn test_unknown_role_survives_round_trip() {
        let codec = codec();
        let (credential, _) = codec.issue("someone", Role::from("viewer")).unwrap();

        let decoded = codec.decode(&credential).unwrap();
        assert_eq!(decoded.role, Role::Other("viewer".to_string()));
    }

    #[test]
    fn test_expired_credential_rejected() {
        let codec = codec().with_ttl(Duration::seconds(30));
        let issued = Utc::now() - Duration::minutes(5);
        let (credential, _) = codec.issue_at("adminUser", Role::Admin, issued).unwrap();

        assert_eq!(codec.decode(&credential), Err(TokenError::Expired));
    }

    #[test]
    fn test_decode_at_just_before_expiry() {
        let codec = codec().with_ttl(Duration::seconds(30));
        let issued = Utc::now();
        let (credential, claims) = codec.issue_at("adminUser", Role::Admin, issued).unwrap();

        let decoded = codec
            .decode_at(&credential, claims.expires_at - Duration::seconds(1))
            .unwrap();
        assert_eq!(decoded, claims);
        assert_eq!(
            codec.decode_at(&credential, claims.expires_at),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let codec = codec();
        let (credential, claims) = codec.issue("gtasAnalyst", Role::Analyst).unwrap();

        let mut forged = claims.clone();
        forged.role = Role::Admin;
        let forged_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        let parts: Vec<&str> = credential.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_segment, parts[2]);

        assert_eq!(codec.decode(&tampered), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let other = TokenCodec::new("another-secret-that-is-also-32-bytes!!", DEFAULT_ISSUER).unwrap();
        let (credential, _) = other.issue("adminUser", Role::Admin).unwrap();

        assert_eq!(codec().decode(&credential), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_wrong_segment_count() {
        let codec = codec();
        assert!(matches!(codec.decode("abc.def"), Err(TokenError::Malformed(_))));
        assert!(matches!(codec.decode("a.b.c.d"), Err(TokenError::Malformed(_))));
        assert!(matches!(codec.decode(""), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_issuer_mismatch() {
        let issuing = TokenCodec::new(SECRET, "someone-else").unwrap();
        let (credential, _) = issuing.issue("adminUser", Role::Admin).unwrap();

        assert!(matches!(
            codec().decode(&credential),
            Err(TokenError::IssuerMismatch { .. })
        ));
    }

    #[test]
    fn test_unsupported_algorithm_with_valid_mac() {
        let codec = codec();
        let (_, claims) = codec.issue("adminUser", Role::Admin).unwrap();

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let input = format!("{}.{}", header, body);
        let signature = URL_SAFE_NO_PAD.encode(codec.sign(&input).unwrap());

        assert_eq!(
            codec.decode(&format!("{}.{}", input, signature)),
            Err(TokenError::UnsupportedAlgorithm("none".to_string()))
        );
    }

    #[test]
    fn test_encode_rejects_inverted_lifetime() {
        let codec = codec();
        let now = Utc::now().trunc_subsecs(0);
        let claims = SessionClaims {
            subject_id: "adminUser".to_string(),
            role: Role::Admin,
            issuer: DEFAULT_ISSUER.to_string(),
            issued_at: now,
            expires_at: now,
        };

        assert_eq!(codec.encode(&claims), Err(TokenError::InvalidLifetime));
    }

    #[test]
    fn test_short_secret_rejected() {
        assert_eq!(
            TokenCodec::new("short", DEFAULT_ISSUER).unwrap_err(),
            TokenError::WeakSecret(5)
        );
    }

    #[test]
    fn test_random_secret_codecs_are_independent() {
        let a = TokenCodec::with_random_secret(DEFAULT_ISSUER);
        let b = TokenCodec::with_random_secret(DEFAULT_ISSUER);
        let (credential, _) = a.issue("adminUser", Role::Admin).unwrap();

        assert!(a.decode(&credential).is_ok());
        assert_eq!(b.decode(&credential), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_peek_claims_skips_verification() {
        let (credential, claims) = codec().issue("gtasAnalyst", Role::Analyst).unwrap();
        assert_eq!(peek_claims(&credential).unwrap(), claims);
    }

    #[test]
    fn test_oversized_ttl_rejected_without_panic() {
        let unbounded = codec().with_ttl(Duration::MAX);
        assert_eq!(
            unbounded.issue("adminUser", Role::Admin).unwrap_err(),
            TokenError::InvalidLifetime
        );

        let huge = codec().with_ttl(Duration::days(100_000_000));
        assert_eq!(
            huge.issue("adminUser", Role::Admin).unwrap_err(),
            TokenError::InvalidLifetime
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", codec());
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("<redacted>"));
    }
}
