//! Wiring from [`ServerConfig`] to running services

use crate::config::{IdentityMode, ServerConfig};
use anyhow::{Context, Result, anyhow};
use fedreconcile_core::{IdentityStore, StaticIdentityStore, TokenCodec};
use fedreconcile_egress::client::create_client;
use fedreconcile_egress::{
    MetadataServerTokenProvider, NoAuth, ServiceTokenProvider, StaticTokenProvider,
    ValidationService, ValidatorConfig, ValidatorConnector,
};
use fedreconcile_ingress::AppState;
use fedreconcile_observability::{
    ComponentStatus, HealthState, Metrics, MetricsRefresher, ReadinessChecker,
};
use fedreconcile_storage::{LeaseRegistry, ScratchStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything `main` needs to serve
pub struct Services {
    pub state: AppState,
    pub health: HealthState,
    pub leases: Arc<LeaseRegistry>,
}

pub fn build_codec(config: &ServerConfig) -> Result<TokenCodec> {
    let codec = match &config.auth.token_secret {
        Some(secret) => TokenCodec::new(secret.as_bytes(), config.auth.issuer.clone())
            .context("Invalid auth.token_secret")?,
        None => {
            warn!("No auth.token_secret configured; credentials will not survive a restart");
            TokenCodec::with_random_secret(config.auth.issuer.clone())
        }
    };

    let ttl = chrono::Duration::try_minutes(config.auth.ttl_minutes)
        .context("auth.ttl_minutes is out of range")?;
    Ok(codec.with_ttl(ttl))
}

pub fn build_identities(config: &ServerConfig) -> Result<StaticIdentityStore> {
    if config.auth.users.is_empty() {
        warn!("No auth.users configured; enabling the demonstration accounts");
        return StaticIdentityStore::demo().context("Failed to build demonstration accounts");
    }

    let store = StaticIdentityStore::new(config.auth.users.iter().cloned())
        .context("Invalid auth.users")?;
    info!("✓ Loaded {} login account(s)", store.len());
    Ok(store)
}

pub fn build_token_provider(config: &ServerConfig) -> Result<Arc<dyn ServiceTokenProvider>> {
    let settings = &config.validator;
    let provider: Arc<dyn ServiceTokenProvider> = match settings.identity {
        IdentityMode::Metadata => {
            let client = create_client(&settings.http)?;
            let provider = match &settings.metadata_base_url {
                Some(base_url) => MetadataServerTokenProvider::with_base_url(client, base_url),
                None => MetadataServerTokenProvider::new(client),
            };
            info!("✓ Service identity: metadata server tokens");
            Arc::new(provider)
        }
        IdentityMode::Static => {
            let token = settings
                .static_token
                .clone()
                .ok_or_else(|| anyhow!("validator.static_token is required for static identity"))?;
            info!("✓ Service identity: static token");
            Arc::new(StaticTokenProvider::new(token)?)
        }
        IdentityMode::None => {
            warn!("Service identity disabled; validation calls carry no Authorization header");
            Arc::new(NoAuth)
        }
    };

    Ok(provider)
}

pub fn build_validator(
    config: &ServerConfig,
    tokens: Arc<dyn ServiceTokenProvider>,
) -> Result<ValidatorConnector> {
    let settings = &config.validator;
    let mut validator_config = ValidatorConfig::new(settings.endpoint.clone())
        .with_contract_version(settings.contract_version)
        .with_client_config(settings.http.clone());
    if let Some(audience) = &settings.audience {
        validator_config = validator_config.with_audience(audience.clone());
    }

    let connector = ValidatorConnector::new(validator_config, tokens)?;
    info!(
        "✓ Validation service: {} (contract {}, timeout {}s)",
        settings.endpoint, settings.contract_version, settings.http.timeout_secs
    );
    Ok(connector)
}

pub fn build_leases(config: &ServerConfig) -> Result<Arc<LeaseRegistry>> {
    let store = ScratchStore::new(&config.scratch.directory).with_context(|| {
        format!("Failed to open scratch directory {}", config.scratch.directory)
    })?;
    info!(
        "📁 Scratch directory: {} (grace window {}s)",
        store.root().display(),
        config.scratch.grace_secs
    );
    Ok(Arc::new(LeaseRegistry::new(
        store,
        Duration::from_secs(config.scratch.grace_secs),
    )))
}

/// Readiness of the scratch root and validation service settings
pub struct RelayReadiness {
    leases: Arc<LeaseRegistry>,
    validator: Arc<dyn ValidationService>,
    endpoint: String,
}

impl ReadinessChecker for RelayReadiness {
    fn component_statuses(&self) -> Vec<ComponentStatus> {
        let root = self.leases.store().root();
        let scratch_ok = root.is_dir();

        vec![
            ComponentStatus {
                name: "scratch".to_string(),
                healthy: scratch_ok,
                detail: Some(if scratch_ok {
                    format!("{} ({} active leases)", root.display(), self.leases.active_leases())
                } else {
                    format!("{} is missing", root.display())
                }),
            },
            ComponentStatus {
                name: "validator".to_string(),
                healthy: !self.endpoint.is_empty(),
                detail: Some(format!(
                    "{} (contract {})",
                    self.endpoint,
                    self.validator.contract_version()
                )),
            },
        ]
    }
}

/// Copies lease registry counters into the gauges on each scrape
pub fn lease_refresher(leases: Arc<LeaseRegistry>) -> MetricsRefresher {
    Arc::new(move |metrics: &Metrics| {
        let stats = leases.stats();
        metrics.set_lease_stats(
            leases.active_leases(),
            stats.leases_reclaimed,
            stats.reclaim_failures,
            stats.bytes_freed,
        );
    })
}

pub fn build_services(config: &ServerConfig) -> Result<Services> {
    config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    let codec = Arc::new(build_codec(config)?);
    let identities: Arc<dyn IdentityStore> = Arc::new(build_identities(config)?);
    let tokens = build_token_provider(config)?;
    let validator: Arc<dyn ValidationService> = Arc::new(build_validator(config, tokens)?);
    let leases = build_leases(config)?;
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let state = AppState::new(
        codec,
        identities,
        validator.clone(),
        leases.clone(),
        metrics.clone(),
    )
    .with_max_upload_bytes(config.limits.max_upload_bytes);

    let readiness = RelayReadiness {
        leases: leases.clone(),
        validator,
        endpoint: config.validator.endpoint.clone(),
    };
    let health = HealthState::new(metrics)
        .with_readiness_checker(Arc::new(readiness))
        .with_refresher(lease_refresher(leases.clone()));

    Ok(Services {
        state,
        health,
        leases,
    })
}
