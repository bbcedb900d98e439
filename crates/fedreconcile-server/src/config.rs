use fedreconcile_core::UserRecord;
use fedreconcile_core::token::{DEFAULT_ISSUER, DEFAULT_TTL_MINUTES, MIN_SECRET_LEN};
use fedreconcile_egress::ContractVersion;
use fedreconcile_egress::client::HttpClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Deployed validation function
pub const DEFAULT_VALIDATOR_ENDPOINT: &str =
    "https://us-central1-fedreconcile-prototype.cloudfunctions.net/gtas-validator-http";

/// Longest credential lifetime accepted from configuration
pub const MAX_TTL_MINUTES: i64 = 7 * 24 * 60;

/// Longest artifact grace window accepted from configuration
pub const MAX_GRACE_SECS: u64 = 24 * 60 * 60;

/// How the relay authenticates itself to the validation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Identity tokens from the platform metadata server
    #[default]
    Metadata,
    /// A fixed bearer token from configuration
    Static,
    /// No Authorization header (local emulators)
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub validator: ValidatorSettings,

    #[serde(default)]
    pub scratch: ScratchSettings,

    #[serde(default)]
    pub limits: LimitSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HMAC signing secret; a random one is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<String>,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,

    /// Login accounts; the two demonstration accounts are used when empty
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSettings {
    #[serde(default = "default_validator_endpoint")]
    pub endpoint: String,

    /// Identity token audience; defaults to the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    #[serde(default)]
    pub contract_version: ContractVersion,

    #[serde(default)]
    pub identity: IdentityMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_base_url: Option<String>,

    #[serde(default)]
    pub http: HttpClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchSettings {
    #[serde(default = "default_scratch_dir")]
    pub directory: String,

    /// Seconds artifacts stay downloadable after a relay call completes
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthSettings::default(),
            validator: ValidatorSettings::default(),
            scratch: ScratchSettings::default(),
            limits: LimitSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_secret: None,
            issuer: default_issuer(),
            ttl_minutes: default_ttl_minutes(),
            users: Vec::new(),
        }
    }
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            endpoint: default_validator_endpoint(),
            audience: None,
            contract_version: ContractVersion::default(),
            identity: IdentityMode::default(),
            static_token: None,
            metadata_base_url: None,
            http: HttpClientConfig::default(),
        }
    }
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            directory: default_scratch_dir(),
            grace_secs: default_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_false(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file (YAML or TOML)
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    /// Merge overrides from an arbitrary variable lookup
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server settings
        if let Some(val) = lookup("FEDRECONCILE_HOST") {
            self.host = val;
        }

        if let Some(val) = lookup("FEDRECONCILE_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => eprintln!("Warning: Invalid FEDRECONCILE_PORT '{}', ignoring", val),
            }
        }

        // Credential settings
        if let Some(val) = lookup("FEDRECONCILE_TOKEN_SECRET") {
            self.auth.token_secret = Some(val);
        }

        if let Some(val) = lookup("FEDRECONCILE_TOKEN_ISSUER") {
            self.auth.issuer = val;
        }

        if let Some(val) = lookup("FEDRECONCILE_TOKEN_TTL_MINUTES")
            && let Ok(minutes) = val.parse::<i64>()
        {
            self.auth.ttl_minutes = minutes;
        }

        // Validation service
        if let Some(val) = lookup("FEDRECONCILE_VALIDATOR_URL") {
            self.validator.endpoint = val;
        }

        if let Some(val) = lookup("FEDRECONCILE_VALIDATOR_AUDIENCE") {
            self.validator.audience = Some(val);
        }

        if let Some(val) = lookup("FEDRECONCILE_CONTRACT_VERSION") {
            match val.parse::<ContractVersion>() {
                Ok(version) => self.validator.contract_version = version,
                Err(e) => eprintln!("Warning: {}, using {}", e, self.validator.contract_version),
            }
        }

        if let Some(val) = lookup("FEDRECONCILE_IDENTITY_MODE") {
            match val.to_lowercase().as_str() {
                "metadata" => self.validator.identity = IdentityMode::Metadata,
                "static" => self.validator.identity = IdentityMode::Static,
                "none" => self.validator.identity = IdentityMode::None,
                _ => eprintln!(
                    "Warning: Invalid FEDRECONCILE_IDENTITY_MODE '{}', using default",
                    val
                ),
            }
        }

        if let Some(val) = lookup("FEDRECONCILE_SERVICE_TOKEN") {
            self.validator.static_token = Some(val);
        }

        if let Some(val) = lookup("FEDRECONCILE_METADATA_URL") {
            self.validator.metadata_base_url = Some(val);
        }

        if let Some(val) = lookup("FEDRECONCILE_VALIDATOR_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.validator.http.timeout_secs = secs;
        }

        // Scratch storage
        if let Some(val) = lookup("FEDRECONCILE_SCRATCH_DIR") {
            self.scratch.directory = val;
        }

        if let Some(val) = lookup("FEDRECONCILE_GRACE_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.scratch.grace_secs = secs;
        }

        if let Some(val) = lookup("FEDRECONCILE_SWEEP_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.scratch.sweep_interval_secs = secs;
        }

        if let Some(val) = lookup("FEDRECONCILE_MAX_UPLOAD_BYTES")
            && let Ok(bytes) = val.parse::<usize>()
        {
            self.limits.max_upload_bytes = bytes;
        }

        // Logging settings
        if let Some(val) = lookup("FEDRECONCILE_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Some(val) = lookup("FEDRECONCILE_LOG_JSON")
            && let Ok(json) = val.parse::<bool>()
        {
            self.logging.json = json;
        }
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> Result<(), String> {
        if self.validator.endpoint.trim().is_empty() {
            return Err("validator.endpoint must not be empty".to_string());
        }

        if self.validator.identity == IdentityMode::Static
            && self
                .validator
                .static_token
                .as_deref()
                .is_none_or(|token| token.trim().is_empty())
        {
            return Err("validator.static_token is required when identity is 'static'".to_string());
        }

        if let Some(secret) = &self.auth.token_secret
            && secret.len() < MIN_SECRET_LEN
        {
            return Err(format!(
                "auth.token_secret must be at least {} bytes",
                MIN_SECRET_LEN
            ));
        }

        if self.auth.ttl_minutes <= 0 {
            return Err("auth.ttl_minutes must be positive".to_string());
        }

        if self.auth.ttl_minutes > MAX_TTL_MINUTES {
            return Err(format!(
                "auth.ttl_minutes must be at most {} (7 days)",
                MAX_TTL_MINUTES
            ));
        }

        if self.scratch.grace_secs == 0 {
            return Err("scratch.grace_secs must be positive".to_string());
        }

        if self.scratch.grace_secs > MAX_GRACE_SECS {
            return Err(format!(
                "scratch.grace_secs must be at most {} (24 hours)",
                MAX_GRACE_SECS
            ));
        }

        if self.scratch.sweep_interval_secs == 0 {
            return Err("scratch.sweep_interval_secs must be positive".to_string());
        }

        if self.limits.max_upload_bytes == 0 {
            return Err("limits.max_upload_bytes must be positive".to_string());
        }

        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

fn default_ttl_minutes() -> i64 {
    DEFAULT_TTL_MINUTES
}

fn default_validator_endpoint() -> String {
    DEFAULT_VALIDATOR_ENDPOINT.to_string()
}

fn default_scratch_dir() -> String {
    std::env::temp_dir()
        .join("fedreconcile")
        .to_string_lossy()
        .into_owned()
}

fn default_grace_secs() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_upload_bytes() -> usize {
    fedreconcile_ingress::state::DEFAULT_MAX_UPLOAD_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_false() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.auth.issuer, DEFAULT_ISSUER);
        assert_eq!(config.auth.ttl_minutes, 60);
        assert!(config.auth.users.is_empty());
        assert_eq!(config.validator.endpoint, DEFAULT_VALIDATOR_ENDPOINT);
        assert_eq!(config.validator.contract_version, ContractVersion::V2);
        assert_eq!(config.validator.identity, IdentityMode::Metadata);
        assert_eq!(config.scratch.grace_secs, 5);
        assert_eq!(config.limits.max_upload_bytes, 50 * 1024 * 1024);
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
port: 8088
validator:
  endpoint: http://localhost:8081
  contract_version: v1
  identity: none
scratch:
  grace_secs: 30
logging:
  level: debug
  json: true
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.validator.endpoint, "http://localhost:8081");
        assert_eq!(config.validator.contract_version, ContractVersion::V1);
        assert_eq!(config.validator.identity, IdentityMode::None);
        assert_eq!(config.validator.http.timeout_secs, 300);
        assert_eq!(config.scratch.grace_secs, 30);
        assert_eq!(config.scratch.sweep_interval_secs, 60);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_toml_file_with_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
host = "0.0.0.0"

[auth]
issuer = "fedreconcile-prod"
ttl_minutes = 15

[[auth.users]]
username = "admin"
password_hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2g"
subject_id = "adminUser"
role = "admin"

[validator]
identity = "static"
static_token = "svc-token"
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.auth.issuer, "fedreconcile-prod");
        assert_eq!(config.auth.ttl_minutes, 15);
        assert_eq!(config.auth.users.len(), 1);
        assert_eq!(config.auth.users[0].subject_id, "adminUser");
        assert_eq!(config.validator.identity, IdentityMode::Static);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        assert!(ServerConfig::from_file(Path::new("/nonexistent/config.yaml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config.merge_env_with(lookup(&[
            ("FEDRECONCILE_PORT", "9000"),
            ("FEDRECONCILE_VALIDATOR_URL", "http://validator:8080"),
            ("FEDRECONCILE_CONTRACT_VERSION", "1"),
            ("FEDRECONCILE_IDENTITY_MODE", "STATIC"),
            ("FEDRECONCILE_SERVICE_TOKEN", "abc"),
            ("FEDRECONCILE_GRACE_SECS", "12"),
            ("FEDRECONCILE_MAX_UPLOAD_BYTES", "1024"),
            ("FEDRECONCILE_LOG_JSON", "true"),
        ]));

        assert_eq!(config.port, 9000);
        assert_eq!(config.validator.endpoint, "http://validator:8080");
        assert_eq!(config.validator.contract_version, ContractVersion::V1);
        assert_eq!(config.validator.identity, IdentityMode::Static);
        assert_eq!(config.validator.static_token.as_deref(), Some("abc"));
        assert_eq!(config.scratch.grace_secs, 12);
        assert_eq!(config.limits.max_upload_bytes, 1024);
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let mut config = ServerConfig::default();
        config.merge_env_with(lookup(&[
            ("FEDRECONCILE_PORT", "not-a-port"),
            ("FEDRECONCILE_CONTRACT_VERSION", "v9"),
            ("FEDRECONCILE_IDENTITY_MODE", "kerberos"),
            ("FEDRECONCILE_GRACE_SECS", "-1"),
        ]));

        assert_eq!(config.port, 3000);
        assert_eq!(config.validator.contract_version, ContractVersion::V2);
        assert_eq!(config.validator.identity, IdentityMode::Metadata);
        assert_eq!(config.scratch.grace_secs, 5);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = ServerConfig::default();
        config.validator.identity = IdentityMode::Static;
        assert!(config.validate().unwrap_err().contains("static_token"));

        let mut config = ServerConfig::default();
        config.auth.token_secret = Some("short".to_string());
        assert!(config.validate().unwrap_err().contains("token_secret"));

        let mut config = ServerConfig::default();
        config.scratch.grace_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.validator.endpoint = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_lifetimes() {
        let mut config = ServerConfig::default();
        config.auth.ttl_minutes = 1_000_000_000_000;
        assert!(config.validate().unwrap_err().contains("ttl_minutes"));

        let mut config = ServerConfig::default();
        config.auth.ttl_minutes = i64::MAX;
        assert!(config.validate().unwrap_err().contains("ttl_minutes"));

        let mut config = ServerConfig::default();
        config.scratch.grace_secs = u64::MAX;
        assert!(config.validate().unwrap_err().contains("grace_secs"));

        let mut config = ServerConfig::default();
        config.auth.ttl_minutes = MAX_TTL_MINUTES;
        config.scratch.grace_secs = MAX_GRACE_SECS;
        assert!(config.validate().is_ok());
    }
}
