//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Top-level configuration for ssm-tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Port on the instance that every tunnel forwards to
    pub remote_port: u16,

    /// Local interface the transport listens on
    pub bind_host: String,

    /// SSM document used to open port-forwarding sessions
    pub document_name: String,

    /// SSM document run against the target to renew a session
    pub renew_document: String,

    /// AWS context
    pub aws: AwsConfig,

    /// Renewal policy
    pub renewal: RenewalConfig,

    /// Transport process settings
    pub transport: TransportConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            remote_port: 22,
            bind_host: "127.0.0.1".to_string(),
            document_name: "AWS-StartPortForwardingSession".to_string(),
            renew_document: "AWS-RefreshPortForwardingSession".to_string(),
            aws: AwsConfig::default(),
            renewal: RenewalConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl TunnelConfig {
    /// Reject settings the session manager cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_port == 0 {
            return Err(ConfigError::Invalid("remote_port must be non-zero".into()));
        }
        if self.document_name.is_empty() {
            return Err(ConfigError::MissingField("document_name".into()));
        }
        if self.transport.program.is_empty() {
            return Err(ConfigError::MissingField("transport.program".into()));
        }

        let renewal = &self.renewal;
        if renewal.max_failures == 0 {
            return Err(ConfigError::Invalid(
                "renewal.max_failures must be at least 1".into(),
            ));
        }
        if renewal.check_interval.is_zero() || renewal.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "renewal intervals must be non-zero".into(),
            ));
        }
        if renewal.margin >= renewal.period {
            return Err(ConfigError::Invalid(format!(
                "renewal.margin ({:?}) must be shorter than renewal.period ({:?})",
                renewal.margin, renewal.period
            )));
        }
        if renewal.poll_timeout < renewal.poll_interval {
            return Err(ConfigError::Invalid(
                "renewal.poll_timeout must be at least renewal.poll_interval".into(),
            ));
        }
        let attempts = renewal
            .poll_timeout
            .saturating_add(renewal.check_interval)
            .checked_mul(renewal.max_failures);
        if attempts.map_or(true, |needed| renewal.margin < needed) {
            return Err(ConfigError::Invalid(format!(
                "renewal.margin ({:?}) must fit {} renewal attempts of up to {:?} each",
                renewal.margin,
                renewal.max_failures,
                renewal.poll_timeout.saturating_add(renewal.check_interval)
            )));
        }
        Ok(())
    }
}

/// AWS context the tool runs in. Credentials are never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Named profile passed to the AWS CLI and the transport plugin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Region; falls back to the environment and then the CLI's configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// SSM endpoint override (e.g. a VPC endpoint)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// AWS CLI executable used for credentials and inventory
    pub cli_program: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: None,
            region: None,
            endpoint: None,
            cli_program: "aws".to_string(),
        }
    }
}

impl AwsConfig {
    /// Region from config or the standard environment variables
    pub fn configured_region(&self) -> Option<String> {
        self.region
            .clone()
            .or_else(|| std::env::var("AWS_REGION").ok())
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
            .filter(|r| !r.is_empty())
    }

    /// SSM endpoint for a region, honoring the override
    pub fn ssm_endpoint(&self, region: &str) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://ssm.{}.amazonaws.com", region))
    }
}

/// When and how sessions are renewed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Scheduler wake-up cadence
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,

    /// Renew once the session has this little time left
    #[serde(with = "duration_secs")]
    pub margin: Duration,

    /// How far a successful renewal pushes the deadline
    #[serde(with = "duration_secs")]
    pub period: Duration,

    /// Consecutive failures before a session is declared failed
    pub max_failures: u32,

    /// Delay between renewal status polls
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Give up on a single renewal after this long
    #[serde(with = "duration_secs")]
    pub poll_timeout: Duration,

    /// Query the control plane each tick to catch out-of-band termination
    pub check_relay_status: bool,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            margin: Duration::from_secs(180),
            period: Duration::from_secs(3600),
            max_failures: 3,
            poll_interval: Duration::from_millis(1000),
            poll_timeout: Duration::from_secs(30),
            check_relay_status: true,
        }
    }
}

/// How the forwarding process is launched and stopped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Executable to run
    pub program: String,

    /// Argument template. Placeholders: `{ticket}`, `{region}`, `{profile}`,
    /// `{parameters}`, `{endpoint}`, `{session_id}`, `{target}`,
    /// `{local_port}`, `{remote_port}`.
    pub args: Vec<String>,

    /// An exit inside this window counts as a failed start
    #[serde(with = "duration_millis")]
    pub start_grace: Duration,

    /// Wait this long after SIGTERM before killing
    #[serde(with = "duration_secs")]
    pub stop_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            program: "session-manager-plugin".to_string(),
            args: [
                "{ticket}",
                "{region}",
                "StartSession",
                "{profile}",
                "{parameters}",
                "{endpoint}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            start_grace: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(5),
        }
    }
}
