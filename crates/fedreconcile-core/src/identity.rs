//! Identity store used by the login endpoint
//!
//! Passwords are kept as Argon2 PHC strings and verified with Argon2; plaintext
//! passwords never outlive store construction.

use crate::claims::Role;
use crate::error::{Error, Result};
use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Identity resolved from a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: String,
    pub role: Role,
}

/// A login record as it appears in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Argon2 PHC string, e.g. `$argon2id$v=19$...`
    pub password_hash: String,
    pub subject_id: String,
    pub role: Role,
}

/// Source of login identities
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolve a username/password pair
    ///
    /// Returns `Ok(None)` for unknown users and wrong passwords alike.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Identity>>;
}

/// Hash a password into an Argon2 PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash(e.to_string()))
}

/// Check a password against an Argon2 PHC string
pub fn verify_password(password_hash: &str, password: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Unparseable password hash in identity store: {}", e);
            false
        }
    }
}

/// Fixed in-memory identity store
pub struct StaticIdentityStore {
    users: HashMap<String, UserRecord>,
}

impl StaticIdentityStore {
    /// Build a store from configured user records
    pub fn new(records: impl IntoIterator<Item = UserRecord>) -> Result<Self> {
        let mut users = HashMap::new();
        for record in records {
            PasswordHash::new(&record.password_hash).map_err(|e| {
                Error::Config(format!(
                    "Invalid password hash for user '{}': {}",
                    record.username, e
                ))
            })?;
            if users.insert(record.username.clone(), record).is_some() {
                return Err(Error::Config("Duplicate username in user list".to_string()));
            }
        }

        Ok(Self { users })
    }

    /// The two demonstration accounts
    ///
    /// `admin/password123` resolves to `adminUser` (admin) and
    /// `analyst/gtaspass` to `gtasAnalyst` (analyst).
    pub fn demo() -> Result<Self> {
        Self::new([
            UserRecord {
                username: "admin".to_string(),
                password_hash: hash_password("password123")?,
                subject_id: "adminUser".to_string(),
                role: Role::Admin,
            },
            UserRecord {
                username: "analyst".to_string(),
                password_hash: hash_password("gtaspass")?,
                subject_id: "gtasAnalyst".to_string(),
                role: Role::Analyst,
            },
        ])
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl IdentityStore for StaticIdentityStore {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Identity>> {
        let Some(record) = self.users.get(username) else {
            debug!("Login attempt for unknown user");
            return Ok(None);
        };

        if !verify_password(&record.password_hash, password) {
            debug!("Password mismatch for user '{}'", username);
            return Ok(None);
        }

        Ok(Some(Identity {
            subject_id: record.subject_id.clone(),
            role: record.role.clone(),
        }))
    }
}
