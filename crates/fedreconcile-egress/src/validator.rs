//! Validation service connector

use crate::{
    EgressError, Result,
    client::{HttpClientConfig, create_client},
    contract::{CONTRACT_VERSION_HEADER, ContractVersion, ValidationOutcome, ValidationResponse, ValidationSubmission},
    identity::ServiceTokenProvider,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Anything that can run a validation over an upload pair
#[async_trait]
pub trait ValidationService: Send + Sync {
    async fn validate(&self, submission: &ValidationSubmission) -> Result<ValidationOutcome>;

    /// Wire contract in use, for metrics and logs
    fn contract_version(&self) -> ContractVersion {
        ContractVersion::default()
    }
}

/// Validation connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Full URL of the validation function
    pub endpoint: String,

    /// Identity token audience (defaults to the endpoint)
    #[serde(default)]
    pub audience: Option<String>,

    #[serde(default)]
    pub contract_version: ContractVersion,

    #[serde(default)]
    pub client_config: HttpClientConfig,
}

impl ValidatorConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            audience: None,
            contract_version: ContractVersion::default(),
            client_config: HttpClientConfig::default(),
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_contract_version(mut self, version: ContractVersion) -> Self {
        self.contract_version = version;
        self
    }

    pub fn with_client_config(mut self, client_config: HttpClientConfig) -> Self {
        self.client_config = client_config;
        self
    }

    pub fn audience(&self) -> &str {
        self.audience.as_deref().unwrap_or(&self.endpoint)
    }
}

/// Calls the external validation service over HTTPS
pub struct ValidatorConnector {
    config: ValidatorConfig,
    client: Client,
    tokens: Arc<dyn ServiceTokenProvider>,
}

impl ValidatorConnector {
    pub fn new(config: ValidatorConfig, tokens: Arc<dyn ServiceTokenProvider>) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(EgressError::ConfigError(
                "Validation endpoint is not configured".to_string(),
            ));
        }
        let client = create_client(&config.client_config)?;
        Ok(Self {
            config,
            client,
            tokens,
        })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }
}

#[async_trait]
impl ValidationService for ValidatorConnector {
    #[instrument(
        skip(self, submission),
        fields(
            contract = %self.config.contract_version,
            primary = %submission.primary.name,
            secondary = %submission.secondary.name,
        )
    )]
    async fn validate(&self, submission: &ValidationSubmission) -> Result<ValidationOutcome> {
        let body = self.config.contract_version.request_body(submission);
        let token = self.tokens.token(self.config.audience()).await?;

        debug!(
            "Forwarding {} + {} bytes to validation service",
            submission.primary.bytes.len(),
            submission.secondary.bytes.len()
        );

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(
                CONTRACT_VERSION_HEADER,
                self.config.contract_version.header_value(),
            )
            .json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EgressError::Timeout(self.config.client_config.timeout_secs)
            } else {
                EgressError::from(e)
            }
        })?;

        let status = response.status();
        debug!("Validation service status: {}", status);

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            warn!("Validation service returned {}: {}", status, message);
            return Err(EgressError::UpstreamError {
                status_code: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        let parsed: ValidationResponse = serde_json::from_str(&text)
            .map_err(|e| EgressError::ParseError(format!("{}", e)))?;

        parsed.into_outcome(status.as_u16())
    }

    fn contract_version(&self) -> ContractVersion {
        self.config.contract_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NoAuth;

    #[test]
    fn test_audience_defaults_to_endpoint() {
        let config = ValidatorConfig::new("https://validator.example.run.app");
        assert_eq!(config.audience(), "https://validator.example.run.app");

        let config = config.with_audience("https://other");
        assert_eq!(config.audience(), "https://other");
    }

    #[test]
    fn test_config_deserialization_defaults() {
        let config: ValidatorConfig =
            serde_json::from_str(r#"{"endpoint": "http://localhost:8081"}"#).unwrap();
        assert_eq!(config.contract_version, ContractVersion::V2);
        assert!(config.audience.is_none());
        assert_eq!(config.client_config.timeout_secs, 300);

        let config: ValidatorConfig =
            serde_json::from_str(r#"{"endpoint": "x", "contract_version": "v1"}"#).unwrap();
        assert_eq!(config.contract_version, ContractVersion::V1);
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let result = ValidatorConnector::new(ValidatorConfig::new(" "), Arc::new(NoAuth));
        assert!(matches!(result, Err(EgressError::ConfigError(_))));
    }
}
