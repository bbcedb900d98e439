//! Upload relay: stage the upload pair, forward it, stage the artifacts

use crate::middleware::RequestMetadataExt;
use crate::state::AppState;
use crate::types::{IngressError, IngressResult};
use crate::{DOWNLOAD_PREFIX, artifacts::ArtifactKind};
use axum::{
    Extension, Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use bytes::Bytes;
use fedreconcile_core::Principal;
use fedreconcile_egress::{Artifact, InputFile, ValidationSubmission};
use fedreconcile_observability::RelayOutcome;
use fedreconcile_storage::{LeaseGuard, LeaseId, sanitize_file_name};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Form field names accepted for the GTAS report
pub const PRIMARY_FIELDS: [&str; 2] = ["gtas", "primaryFile"];

/// Form field names accepted for the ERP balances
pub const SECONDARY_FIELDS: [&str; 2] = ["erp", "secondaryFile"];

const DEFAULT_PRIMARY_NAME: &str = "gtas_report.csv";
const DEFAULT_SECONDARY_NAME: &str = "erp_balances.csv";
const DEFAULT_MESSAGE: &str = "Validation complete. Reports generated by the validation service.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_report_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbdi_journal_url: Option<String>,
}

/// `POST /gtas-validator/api`
#[instrument(
    skip_all,
    fields(
        subject = %principal.subject_id,
        request_id = tracing::field::Empty,
        client_ip = tracing::field::Empty
    )
)]
pub async fn relay(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    metadata: Option<Extension<RequestMetadataExt>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> IngressResult<Json<RelayResponse>> {
    let metadata = metadata.map(|Extension(ext)| ext.0);
    if let Some(metadata) = &metadata {
        let span = tracing::Span::current();
        span.record("request_id", metadata.request_id.as_str());
        if let Some(ip) = &metadata.client_ip {
            span.record("client_ip", ip.as_str());
        }
    }

    let result = run_relay(&state, multipart).await;
    state.metrics.record_relay(relay_outcome(&result));
    if let Some(metadata) = &metadata {
        debug!("Relay for {} finished in {}ms", metadata, metadata.elapsed_ms());
    }
    result.map(Json)
}

async fn run_relay(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> IngressResult<RelayResponse> {
    let multipart = multipart.map_err(|rejection| {
        debug!("Rejected relay body: {}", rejection);
        IngressError::BadRequest("Request must be multipart/form-data.".to_string())
    })?;

    // Nothing is staged or forwarded until both files are present
    let submission = read_upload_pair(state, multipart).await?;

    let lease = state.leases.acquire().await?;
    state.metrics.record_lease_acquired();

    let result = forward(state, &lease, &submission).await;
    let lease_id = lease.id().clone();
    lease.release();

    match &result {
        Ok(_) => info!("Relay call complete; artifacts held under lease {}", lease_id),
        Err(e) => warn!("Relay call failed under lease {}: {}", lease_id, e),
    }

    result
}

async fn read_upload_pair(
    state: &AppState,
    mut multipart: Multipart,
) -> IngressResult<ValidationSubmission> {
    let mut primary = None;
    let mut secondary = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(state, e))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        let (slot, default_name, label) = if PRIMARY_FIELDS.contains(&name.as_str()) {
            (&mut primary, DEFAULT_PRIMARY_NAME, "GTAS")
        } else if SECONDARY_FIELDS.contains(&name.as_str()) {
            (&mut secondary, DEFAULT_SECONDARY_NAME, "ERP")
        } else {
            debug!("Ignoring form field '{}'", name);
            continue;
        };

        let raw_name = field.file_name().unwrap_or_default().to_string();
        let file_name = sanitize_file_name(&raw_name, default_name);
        let bytes: Bytes = field.bytes().await.map_err(|e| multipart_error(state, e))?;

        if bytes.is_empty() {
            // An unselected file input arrives as a nameless empty part
            if raw_name.is_empty() {
                continue;
            }
            return Err(IngressError::BadRequest(format!(
                "The uploaded {} file '{}' is empty.",
                label, file_name
            )));
        }

        *slot = Some(InputFile::new(file_name, bytes));
    }

    match (primary, secondary) {
        (Some(primary), Some(secondary)) => {
            state.metrics.record_upload("primary", primary.bytes.len());
            state.metrics.record_upload("secondary", secondary.bytes.len());
            Ok(ValidationSubmission { primary, secondary })
        }
        _ => Err(IngressError::BadRequest(
            "Both GTAS and ERP files are required.".to_string(),
        )),
    }
}

fn multipart_error(state: &AppState, err: MultipartError) -> IngressError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IngressError::PayloadTooLarge(state.max_upload_bytes)
    } else {
        IngressError::BadRequest(format!("Malformed multipart body: {}", err.body_text()))
    }
}

async fn forward(
    state: &AppState,
    lease: &LeaseGuard,
    submission: &ValidationSubmission,
) -> IngressResult<RelayResponse> {
    lease
        .stage(&submission.primary.name, &submission.primary.bytes)
        .await?;
    lease
        .stage(&submission.secondary.name, &submission.secondary.bytes)
        .await?;

    let started = Instant::now();
    let result = state.validator.validate(submission).await;
    state.metrics.record_upstream(
        &state.validator.contract_version().to_string(),
        result.is_ok(),
        started.elapsed().as_secs_f64(),
    );
    let outcome = result?;

    let exception_report_url = stage_artifact(
        state,
        lease,
        outcome.exception_report,
        ArtifactKind::ExceptionReport,
    )
    .await?;
    let fbdi_journal_url = stage_artifact(
        state,
        lease,
        outcome.correction_journal,
        ArtifactKind::CorrectionJournal,
    )
    .await?;

    let message = outcome
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    Ok(RelayResponse {
        success: true,
        message,
        exception_report_url,
        fbdi_journal_url,
    })
}

async fn stage_artifact(
    state: &AppState,
    lease: &LeaseGuard,
    artifact: Option<Artifact>,
    kind: ArtifactKind,
) -> IngressResult<Option<String>> {
    let Some(artifact) = artifact else {
        debug!("No {} returned", kind.label());
        return Ok(None);
    };

    let name = sanitize_file_name(&artifact.file_name, kind.default_name());
    lease.stage(&name, &artifact.bytes).await?;
    state.metrics.record_artifact_staged(kind.label());

    Ok(Some(download_url(lease.id(), &name)))
}

/// Relative download reference for a staged file
pub fn download_url(lease: &LeaseId, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        DOWNLOAD_PREFIX,
        lease,
        urlencoding::encode(file_name)
    )
}

fn relay_outcome<T>(result: &IngressResult<T>) -> RelayOutcome {
    match result {
        Ok(_) => RelayOutcome::Success,
        Err(IngressError::BadRequest(_) | IngressError::PayloadTooLarge(_)) => {
            RelayOutcome::BadRequest
        }
        Err(IngressError::UpstreamError(_)) => RelayOutcome::UpstreamError,
        Err(IngressError::UpstreamUnreachable(_)) => RelayOutcome::UpstreamUnreachable,
        Err(IngressError::Unauthenticated(_)) => RelayOutcome::Unauthenticated,
        Err(IngressError::Forbidden(_)) => RelayOutcome::Forbidden,
        Err(IngressError::NotFound(_) | IngressError::Internal(_)) => RelayOutcome::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockValidator, multipart_body, test_state_with};
    use axum::{Router, body::Body, http::Request, routing::post};
    use fedreconcile_core::Role;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/relay", post(relay))
            .layer(Extension(Principal {
                subject_id: "adminUser".to_string(),
                role: Role::Admin,
            }))
            .with_state(state)
    }

    async fn post_parts(app: Router, parts: &[(&str, &str, &[u8])]) -> (StatusCode, serde_json::Value) {
        let (content_type, body) = multipart_body(parts);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/relay")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request_without_upstream_call() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(MockValidator::both_artifacts());
        let state = test_state_with(dir.path(), validator.clone());
        let leases = state.leases.clone();

        let (status, json) = post_parts(app(state), &[("gtas", "gtas.csv", b"a,b\n".as_slice())]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Both GTAS and ERP files are required.");
        assert_eq!(validator.calls(), 0);
        assert_eq!(leases.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_unselected_file_input_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(MockValidator::both_artifacts());
        let state = test_state_with(dir.path(), validator.clone());

        let (status, json) = post_parts(
            app(state),
            &[("gtas", "gtas.csv", b"a,b\n".as_slice()), ("erp", "", b"".as_slice())],
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Both GTAS and ERP files are required.");
        assert_eq!(validator.calls(), 0);
    }

    #[tokio::test]
    async fn test_named_empty_file_has_its_own_message() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(MockValidator::both_artifacts());
        let state = test_state_with(dir.path(), validator.clone());
        let leases = state.leases.clone();

        let (status, json) = post_parts(
            app(state),
            &[("gtas", "gtas.csv", b"a,b\n".as_slice()), ("erp", "erp.csv", b"".as_slice())],
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "The uploaded ERP file 'erp.csv' is empty.");
        assert_eq!(validator.calls(), 0);
        assert_eq!(leases.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(MockValidator::both_artifacts());
        let state = test_state_with(dir.path(), validator.clone());

        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/relay")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(validator.calls(), 0);
    }

    #[tokio::test]
    async fn test_success_returns_lease_scoped_urls() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(MockValidator::both_artifacts());
        let state = test_state_with(dir.path(), validator.clone());
        let leases = state.leases.clone();

        let (status, json) = post_parts(
            app(state),
            &[
                ("primaryFile", "gtas_q3.csv", b"gtas".as_slice()),
                ("secondaryFile", "erp_q3.csv", b"erp".as_slice()),
            ],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(validator.calls(), 1);

        let report_url = json["exceptionReportUrl"].as_str().unwrap();
        let journal_url = json["fbdiJournalUrl"].as_str().unwrap();
        assert!(report_url.starts_with("/gtas-validator/download/"));
        assert!(report_url.ends_with("/exception_report.xlsx"));
        assert!(journal_url.ends_with("/fbdi_journal_corrections.csv"));

        // Inputs and artifacts live under the same lease
        let lease = LeaseId::parse(report_url.split('/').nth(3).unwrap()).unwrap();
        let mut files = leases.files(&lease);
        files.sort();
        assert_eq!(
            files,
            vec![
                "erp_q3.csv",
                "exception_report.xlsx",
                "fbdi_journal_corrections.csv",
                "gtas_q3.csv"
            ]
        );
        assert!(leases.is_live(&lease));
    }

    #[tokio::test]
    async fn test_upstream_failure_releases_lease() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(MockValidator::failing(500, "Rules engine crashed"));
        let state = test_state_with(dir.path(), validator.clone());
        let leases = state.leases.clone();

        let (status, json) = post_parts(
            app(state),
            &[("gtas", "g.csv", b"g".as_slice()), ("erp", "e.csv", b"e".as_slice())],
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert!(json["message"].as_str().unwrap().contains("500 - Rules engine crashed"));

        // Released with a grace deadline, reclaimed once it passes
        assert_eq!(leases.active_leases(), 1);
        tokio::time::sleep(leases.grace() + std::time::Duration::from_millis(200)).await;
        assert_eq!(leases.active_leases(), 0);
    }

    #[test]
    fn test_download_url_encodes_name() {
        let lease = LeaseId::generate();
        let url = download_url(&lease, "Q3 report.xlsx");
        assert_eq!(
            url,
            format!("/gtas-validator/download/{}/Q3%20report.xlsx", lease)
        );
    }
}
