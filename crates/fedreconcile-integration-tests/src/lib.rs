//! End-to-end harness for FedReconcile
//!
//! Wires the real router, lease registry and validation connector together
//! against a wiremock stand-in for the validation service.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use fedreconcile_core::{StaticIdentityStore, TokenCodec};
use fedreconcile_egress::{
    ContractVersion, StaticTokenProvider, ValidatorConfig, ValidatorConnector,
};
use fedreconcile_ingress::{AppState, LOGIN_PATH, RELAY_PATH};
use fedreconcile_observability::{HealthState, Metrics, health_router};
use fedreconcile_storage::{LeaseRegistry, ScratchStore};
use http_body_util::BodyExt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;

pub const SERVICE_TOKEN: &str = "svc-identity-token";
pub const VALIDATOR_PATH: &str = "/gtas-validator-http";

const SECRET: &[u8] = b"integration-secret-at-least-32-bytes!";

/// Demo accounts hash with Argon2; build them once per test binary
fn demo_store() -> Arc<StaticIdentityStore> {
    static STORE: OnceLock<Arc<StaticIdentityStore>> = OnceLock::new();
    STORE
        .get_or_init(|| Arc::new(StaticIdentityStore::demo().unwrap()))
        .clone()
}

/// A relay wired to a mock validation service
pub struct TestRelay {
    pub app: Router,
    pub upstream: MockServer,
    pub codec: Arc<TokenCodec>,
    pub leases: Arc<LeaseRegistry>,
    pub metrics: Arc<Metrics>,
    _scratch: TempDir,
}

impl TestRelay {
    pub async fn start(contract: ContractVersion, grace: Duration) -> Self {
        Self::start_with_endpoint(contract, grace, None).await
    }

    /// Relay whose validation endpoint refuses connections
    pub async fn start_unreachable(grace: Duration) -> Self {
        // Nothing listens on the discard port in test environments
        Self::start_with_endpoint(
            ContractVersion::V2,
            grace,
            Some(format!("http://127.0.0.1:9{}", VALIDATOR_PATH)),
        )
        .await
    }

    /// Point the relay at `endpoint` instead of the mock validation service
    pub async fn start_with_endpoint(
        contract: ContractVersion,
        grace: Duration,
        endpoint: Option<String>,
    ) -> Self {
        let upstream = MockServer::start().await;
        let scratch = tempfile::tempdir().unwrap();

        let codec = Arc::new(TokenCodec::new(SECRET, "fedreconcile").unwrap());
        let endpoint =
            endpoint.unwrap_or_else(|| format!("{}{}", upstream.uri(), VALIDATOR_PATH));
        let config = ValidatorConfig::new(endpoint).with_contract_version(contract);
        let validator = ValidatorConnector::new(
            config,
            Arc::new(StaticTokenProvider::new(SERVICE_TOKEN).unwrap()),
        )
        .unwrap();

        let leases = Arc::new(LeaseRegistry::new(
            ScratchStore::new(scratch.path().join("scratch")).unwrap(),
            grace,
        ));
        let metrics = Arc::new(Metrics::new().unwrap());

        let state = AppState::new(
            codec.clone(),
            demo_store(),
            Arc::new(validator),
            leases.clone(),
            metrics.clone(),
        );
        let app = fedreconcile_ingress::router(state)
            .merge(health_router(HealthState::new(metrics.clone())));

        Self {
            app,
            upstream,
            codec,
            leases,
            metrics,
            _scratch: scratch,
        }
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    pub async fn call_json(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.call(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Log in through the HTTP endpoint and return the credential
    pub async fn login(&self, username: &str, password: &str) -> String {
        let (status, json) = self
            .call_json(
                Request::builder()
                    .method("POST")
                    .uri(LOGIN_PATH)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({"username": username, "password": password})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", json);
        json["token"].as_str().unwrap().to_string()
    }

    /// Post `(field, file name, bytes)` parts to the relay
    pub async fn relay(
        &self,
        credential: Option<&str>,
        parts: &[(&str, &str, &[u8])],
    ) -> (StatusCode, serde_json::Value) {
        let (content_type, body) = multipart_body(parts);
        let mut builder = Request::builder()
            .method("POST")
            .uri(RELAY_PATH)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(credential) = credential {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", credential));
        }
        self.call_json(builder.body(Body::from(body)).unwrap()).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.call(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Number of requests the mock validation service received
    pub async fn upstream_calls(&self) -> usize {
        self.upstream
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or_default()
    }
}

/// Encode `(field, file name, bytes)` parts as multipart/form-data
pub fn multipart_body(parts: &[(&str, &str, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "fedreconcile-integration-boundary";
    let mut body = Vec::new();
    for (field, file_name, bytes) in parts {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: text/csv\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}

/// Validation service reply carrying the given artifacts
pub fn validation_reply(report: Option<&[u8]>, journal: Option<&[u8]>) -> serde_json::Value {
    let mut reply = serde_json::json!({
        "success": true,
        "message": "Validation complete. Reports generated by Cloud Function."
    });
    if let Some(report) = report {
        reply["exceptionReportB64"] = STANDARD.encode(report).into();
        reply["exceptionReportFileName"] = "exception_report.xlsx".into();
    }
    if let Some(journal) = journal {
        reply["fbdiJournalB64"] = STANDARD.encode(journal).into();
        reply["fbdiJournalFileName"] = "fbdi_journal_corrections.csv".into();
    }
    reply
}
