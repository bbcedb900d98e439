//! Service-to-service identity tokens
//!
//! The validation service sits behind the cloud provider's IAM frontend and
//! expects an OIDC identity token minted for its URL. On GCP compute the token
//! comes from the instance metadata server.

use crate::{EgressError, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default metadata server origin on GCP compute
pub const METADATA_BASE_URL: &str = "http://metadata.google.internal";

const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

/// Identity tokens live for an hour; refresh comfortably before that
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(50 * 60);

#[async_trait]
pub trait ServiceTokenProvider: Send + Sync {
    /// Identity token for `audience`, or `None` when calls go unauthenticated
    async fn token(&self, audience: &str) -> Result<Option<String>>;
}

/// Sends no `Authorization` header (local emulators)
#[derive(Debug, Default, Clone)]
pub struct NoAuth;

#[async_trait]
impl ServiceTokenProvider for NoAuth {
    async fn token(&self, _audience: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A fixed token, e.g. from `gcloud auth print-identity-token`
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(EgressError::ConfigError(
                "Static identity token is empty".to_string(),
            ));
        }
        Ok(Self { token })
    }
}

#[async_trait]
impl ServiceTokenProvider for StaticTokenProvider {
    async fn token(&self, _audience: &str) -> Result<Option<String>> {
        Ok(Some(self.token.clone()))
    }
}

struct CachedToken {
    token: String,
    fetched_at: Instant,
}

/// Mints identity tokens from the instance metadata server, caching per audience
pub struct MetadataServerTokenProvider {
    client: Client,
    base_url: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl MetadataServerTokenProvider {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, METADATA_BASE_URL)
    }

    /// Point at a different metadata origin (tests, sidecars)
    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    async fn fetch(&self, audience: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &format!("{}{}", self.base_url, IDENTITY_PATH),
            &[("audience", audience), ("format", "full")],
        )
        .map_err(|e| EgressError::ConfigError(format!("Invalid metadata URL: {}", e)))?;

        let response = self
            .client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| EgressError::IdentityError(format!("metadata server unreachable: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EgressError::IdentityError(format!("reading metadata response: {}", e)))?;

        if !status.is_success() {
            warn!("Metadata server returned {} for identity token", status);
            return Err(EgressError::IdentityError(format!(
                "metadata server returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token = body.trim().to_string();
        if token.is_empty() {
            return Err(EgressError::IdentityError(
                "metadata server returned an empty token".to_string(),
            ));
        }

        Ok(token)
    }
}

#[async_trait]
impl ServiceTokenProvider for MetadataServerTokenProvider {
    async fn token(&self, audience: &str) -> Result<Option<String>> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(audience)
                && cached.fetched_at.elapsed() < self.cache_ttl
            {
                return Ok(Some(cached.token.clone()));
            }
        }

        // The lock is not held across the fetch; concurrent misses may both fetch
        let token = self.fetch(audience).await?;
        debug!(
            "Obtained identity token for {} (length: {} chars)",
            audience,
            token.len()
        );
        self.cache.lock().await.insert(
            audience.to_string(),
            CachedToken {
                token: token.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(Some(token))
    }
}
