//! Artifact server

use crate::state::AppState;
use crate::types::IngressError;
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use fedreconcile_egress::contract::{DEFAULT_EXCEPTION_REPORT_NAME, DEFAULT_JOURNAL_NAME};
use fedreconcile_storage::LeaseId;
use tracing::{debug, info};

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// The two files the validation service can return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    ExceptionReport,
    CorrectionJournal,
}

impl ArtifactKind {
    pub fn default_name(&self) -> &'static str {
        match self {
            ArtifactKind::ExceptionReport => DEFAULT_EXCEPTION_REPORT_NAME,
            ArtifactKind::CorrectionJournal => DEFAULT_JOURNAL_NAME,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::ExceptionReport => "exception_report",
            ArtifactKind::CorrectionJournal => "fbdi_journal",
        }
    }
}

/// Content type chosen by file suffix
pub fn content_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".xlsx") {
        XLSX_CONTENT_TYPE
    } else if lower.ends_with(".csv") {
        "text/csv"
    } else {
        "application/octet-stream"
    }
}

/// `attachment` with a quoted ASCII name, plus an RFC 5987 `filename*` when the
/// real name does not fit in one
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    let value = if fallback == file_name {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(file_name)
        )
    };

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// `GET /gtas-validator/download/{lease}/{filename}`
pub async fn download(
    State(state): State<AppState>,
    Path((lease, file_name)): Path<(String, String)>,
) -> Result<Response, IngressError> {
    let not_found = || IngressError::NotFound("File not found or no longer available.".to_string());

    let Some(lease) = LeaseId::parse(&lease) else {
        debug!("Download with malformed lease id");
        state.metrics.record_download(false);
        return Err(not_found());
    };

    let bytes = match state.leases.read(&lease, &file_name).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => {
            debug!("Download miss for {}/{}: {}", lease, file_name, e);
            state.metrics.record_download(false);
            return Err(not_found());
        }
        Err(e) => return Err(e.into()),
    };

    state.metrics.record_download(true);
    info!(
        "Serving {} ({} bytes) from lease {}",
        file_name,
        bytes.len(),
        lease
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&file_name))),
            (header::CONTENT_DISPOSITION, content_disposition(&file_name)),
        ],
        bytes,
    )
        .into_response())
}
