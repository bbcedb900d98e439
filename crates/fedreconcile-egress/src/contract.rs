//! Wire contract with the validation service
//!
//! The request shape has changed between deployments, so the version is chosen
//! explicitly in configuration instead of assuming the latest one.
//!
//! - `v1`: `{gtas_file_b64, erp_file_b64, gtas_file_name, erp_file_name}`
//! - `v2`: `{primaryFileB64, secondaryFileB64, primaryFileName, secondaryFileName}`
//!
//! Both versions share one response shape.

use crate::{EgressError, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name used when the service omits the exception report name
pub const DEFAULT_EXCEPTION_REPORT_NAME: &str = "exception_report.xlsx";

/// Name used when the service omits the FBDI journal name
pub const DEFAULT_JOURNAL_NAME: &str = "fbdi_journal_corrections.csv";

/// Header carrying the contract version on every request
pub const CONTRACT_VERSION_HEADER: &str = "x-contract-version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractVersion {
    V1,
    #[default]
    V2,
}

impl ContractVersion {
    pub fn header_value(&self) -> &'static str {
        match self {
            ContractVersion::V1 => "1",
            ContractVersion::V2 => "2",
        }
    }

    /// Build the JSON request body for this version
    pub fn request_body(&self, submission: &ValidationSubmission) -> serde_json::Value {
        let primary_b64 = STANDARD.encode(&submission.primary.bytes);
        let secondary_b64 = STANDARD.encode(&submission.secondary.bytes);

        match self {
            ContractVersion::V1 => serde_json::json!({
                "gtas_file_b64": primary_b64,
                "erp_file_b64": secondary_b64,
                "gtas_file_name": submission.primary.name,
                "erp_file_name": submission.secondary.name,
            }),
            ContractVersion::V2 => serde_json::json!({
                "primaryFileB64": primary_b64,
                "secondaryFileB64": secondary_b64,
                "primaryFileName": submission.primary.name,
                "secondaryFileName": submission.secondary.name,
            }),
        }
    }
}

impl fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractVersion::V1 => f.write_str("v1"),
            ContractVersion::V2 => f.write_str("v2"),
        }
    }
}

impl FromStr for ContractVersion {
    type Err = EgressError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "v1" | "1" => Ok(ContractVersion::V1),
            "v2" | "2" => Ok(ContractVersion::V2),
            other => Err(EgressError::ConfigError(format!(
                "Unknown contract version '{}'. Use 'v1' or 'v2'",
                other
            ))),
        }
    }
}

/// One uploaded input file
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Bytes,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// The upload pair: GTAS report (primary) and ERP balances (secondary)
#[derive(Debug, Clone)]
pub struct ValidationSubmission {
    pub primary: InputFile,
    pub secondary: InputFile,
}

/// Raw response body as the service sends it
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub exception_report_b64: Option<String>,
    #[serde(default)]
    pub fbdi_journal_b64: Option<String>,
    #[serde(default)]
    pub exception_report_file_name: Option<String>,
    #[serde(default)]
    pub fbdi_journal_file_name: Option<String>,
}

/// A decoded output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Decoded result of a successful validation call
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub message: Option<String>,
    pub exception_report: Option<Artifact>,
    pub correction_journal: Option<Artifact>,
}

impl ValidationResponse {
    /// Decode artifacts; an explicit `success: false` is an upstream failure
    pub fn into_outcome(self, status_code: u16) -> Result<ValidationOutcome> {
        if self.success == Some(false) {
            return Err(EgressError::UpstreamError {
                status_code,
                message: self
                    .message
                    .unwrap_or_else(|| "validation reported failure".to_string()),
            });
        }

        let exception_report = decode_artifact(
            self.exception_report_b64,
            self.exception_report_file_name,
            DEFAULT_EXCEPTION_REPORT_NAME,
        )?;
        let correction_journal = decode_artifact(
            self.fbdi_journal_b64,
            self.fbdi_journal_file_name,
            DEFAULT_JOURNAL_NAME,
        )?;

        Ok(ValidationOutcome {
            message: self.message,
            exception_report,
            correction_journal,
        })
    }
}

fn decode_artifact(
    payload: Option<String>,
    file_name: Option<String>,
    default_name: &str,
) -> Result<Option<Artifact>> {
    let Some(payload) = payload.filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| EgressError::ParseError(format!("{} is not valid base64: {}", default_name, e)))?;

    let file_name = file_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| default_name.to_string());

    Ok(Some(Artifact { file_name, bytes }))
}
