//! HTTP client for a running relay

use anyhow::{Context, Result, anyhow, bail};
use fedreconcile_core::ClientSession;
use fedreconcile_ingress::types::FailureBody;
use fedreconcile_ingress::{LOGIN_PATH, LoginRequest, LoginResponse, RELAY_PATH, RelayResponse};
use fedreconcile_storage::sanitize_file_name;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub struct RelayClient {
    http: Client,
    base_url: Url,
}

/// One artifact written to disk
#[derive(Debug, Clone)]
pub struct SavedArtifact {
    pub path: PathBuf,
    pub bytes: usize,
}

impl RelayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid server URL '{}'", base_url))?;
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(format!("fedreconcile-cli/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid path '{}'", path))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<ClientSession> {
        let response = self
            .http
            .post(self.url(LOGIN_PATH)?)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .context("Login request failed")?;

        let reply: LoginResponse = read_success(response).await?;
        let session = ClientSession::from_credential(reply.token)?;
        debug!(
            "Logged in as {} ({}) until {}",
            session.subject_id(),
            session.role(),
            session.claims().expires_at
        );
        Ok(session)
    }

    /// Upload the GTAS/ERP pair; the session is checked for expiry first
    pub async fn validate(
        &self,
        session: &ClientSession,
        gtas: &Path,
        erp: &Path,
    ) -> Result<RelayResponse> {
        session.ensure_valid()?;

        let form = Form::new()
            .part("gtas", file_part(gtas).await?)
            .part("erp", file_part(erp).await?);

        let response = self
            .http
            .post(self.url(RELAY_PATH)?)
            .bearer_auth(session.credential())
            .multipart(form)
            .send()
            .await
            .context("Validation request failed")?;

        read_success(response).await
    }

    /// Fetch an artifact URL returned by [`validate`](Self::validate) into `out_dir`
    pub async fn download(&self, url: &str, out_dir: &Path) -> Result<SavedArtifact> {
        let url = self.url(url)?;
        let raw_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(|segment| urlencoding::decode(segment).map(|name| name.into_owned()))
            .transpose()
            .context("Artifact URL is not valid UTF-8")?
            .unwrap_or_default();
        let file_name = sanitize_file_name(&raw_name, "artifact.bin");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Download of {} failed", url))?;
        if !response.status().is_success() {
            bail!("{}", failure_message(response).await);
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;
        let path = out_dir.join(file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(SavedArtifact {
            path,
            bytes: bytes.len(),
        })
    }
}

async fn file_part(path: &Path) -> Result<Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());
    Ok(Part::bytes(bytes).file_name(name))
}

async fn read_success<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(anyhow!(failure_message(response).await));
    }
    response
        .json::<T>()
        .await
        .context("Unexpected response from server")
}

async fn failure_message(response: Response) -> String {
    let status = response.status();
    match response.json::<FailureBody>().await {
        Ok(body) => format!("{} ({})", body.message, status),
        Err(_) => format!("Server responded with {}", status),
    }
}
