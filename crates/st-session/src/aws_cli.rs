//! AWS CLI integration
//!
//! The ambient credential context (profiles, SSO, environment) belongs to the
//! AWS CLI. We ask it for credentials, the default region and, from the CLI
//! crate, the instance inventory, and never interpret credentials ourselves.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;

use st_core::config::AwsConfig;
use st_core::TunnelError;

/// stderr fragments that mean the credential context was rejected
const AUTH_MARKERS: &[&str] = &[
    "Unable to locate credentials",
    "ExpiredToken",
    "AccessDenied",
    "UnrecognizedClient",
    "InvalidClientTokenId",
    "AuthFailure",
    "The SSO session associated with this profile has expired",
    "Error loading SSO Token",
];

/// Thin wrapper around the `aws` executable
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    profile: Option<String>,
    region: Option<String>,
}

impl AwsCli {
    /// Build from configuration
    pub fn from_config(config: &AwsConfig) -> Self {
        Self {
            program: config.cli_program.clone(),
            profile: config.profile.clone(),
            region: config.configured_region(),
        }
    }

    /// Pin the region passed to every call
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Run a CLI command and return its stdout
    pub async fn run(&self, args: &[&str]) -> Result<Vec<u8>, TunnelError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile]);
        }
        if let Some(region) = &self.region {
            cmd.args(["--region", region]);
        }

        tracing::debug!("Running {} {}", self.program, args.join(" "));
        let output = cmd.output().await.map_err(|e| {
            TunnelError::Relay(format!("failed to run {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_cli_failure(&stderr));
        }
        Ok(output.stdout)
    }

    /// Run a CLI command with JSON output and decode it
    pub async fn json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, TunnelError> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(["--output", "json"]);
        let stdout = self.run(&full).await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| TunnelError::Relay(format!("unexpected CLI output: {}", e)))
    }

    /// Region from config/environment, else `aws configure get region`
    pub async fn resolve_region(&self) -> Result<String, TunnelError> {
        if let Some(region) = &self.region {
            return Ok(region.clone());
        }
        let stdout = self.run(&["configure", "get", "region"]).await.map_err(|_| {
            TunnelError::Config(st_core::ConfigError::MissingField(
                "aws.region (not set in config, environment, or AWS CLI profile)".into(),
            ))
        })?;
        let region = String::from_utf8_lossy(&stdout).trim().to_string();
        if region.is_empty() {
            return Err(TunnelError::Config(st_core::ConfigError::MissingField(
                "aws.region".into(),
            )));
        }
        Ok(region)
    }

    /// Profile name, if any
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }
}

fn classify_cli_failure(stderr: &str) -> TunnelError {
    if AUTH_MARKERS.iter().any(|m| stderr.contains(m)) {
        TunnelError::Auth(stderr.to_string())
    } else {
        TunnelError::Relay(stderr.to_string())
    }
}

/// Temporary credentials as printed by `aws configure export-credentials`
#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub expiration: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl AwsCredentials {
    /// Still usable for at least `slack` from now
    fn is_fresh(&self, slack: chrono::Duration) -> bool {
        match &self.expiration {
            None => true,
            Some(raw) => chrono::DateTime::parse_from_rfc3339(raw)
                .map(|exp| exp.with_timezone(&chrono::Utc) > chrono::Utc::now() + slack)
                .unwrap_or(false),
        }
    }
}

/// Caches exported credentials until shortly before they expire
pub struct CredentialCache {
    cli: AwsCli,
    cached: Mutex<Option<AwsCredentials>>,
}

impl CredentialCache {
    pub fn new(cli: AwsCli) -> Self {
        Self {
            cli,
            cached: Mutex::new(None),
        }
    }

    /// Current credentials, refreshing through the CLI when stale
    pub async fn get(&self) -> Result<AwsCredentials, TunnelError> {
        let mut cached = self.cached.lock().await;
        if let Some(creds) = cached.as_ref() {
            if creds.is_fresh(chrono::Duration::minutes(5)) {
                return Ok(creds.clone());
            }
        }

        let stdout = self
            .cli
            .run(&["configure", "export-credentials", "--format", "process"])
            .await?;
        let creds: AwsCredentials = serde_json::from_slice(&stdout)
            .map_err(|e| TunnelError::Auth(format!("unreadable exported credentials: {}", e)))?;
        tracing::debug!("Refreshed AWS credentials ({:?})", creds);
        *cached = Some(creds.clone());
        Ok(creds)
    }

    /// Drop cached credentials so the next call re-exports them
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
