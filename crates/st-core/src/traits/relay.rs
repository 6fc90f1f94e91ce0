//! Relay control-plane traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TunnelError;
use crate::types::{SessionId, TargetId};

/// What the control plane hands back when a relay session is opened.
///
/// The stream URL and token are what the transport process needs to attach
/// to the session; they are opaque to the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelayTicket {
    pub session_id: SessionId,
    #[serde(default)]
    pub stream_url: String,
    #[serde(default)]
    pub token_value: String,
}

impl RelayTicket {
    /// Ticket carrying only an ID, for relays that need nothing else
    pub fn bare(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            stream_url: String::new(),
            token_value: String::new(),
        }
    }

    /// JSON form expected by the transport plugin
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Relay session status as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    Connected,
    Connecting,
    Disconnected,
    Terminating,
    Terminated,
    Failed,
    Unknown(String),
}

impl RelayStatus {
    /// Parse a control-plane status name
    pub fn from_name(name: &str) -> Self {
        match name {
            "Connected" => RelayStatus::Connected,
            "Connecting" => RelayStatus::Connecting,
            "Disconnected" => RelayStatus::Disconnected,
            "Terminating" => RelayStatus::Terminating,
            "Terminated" => RelayStatus::Terminated,
            "Failed" => RelayStatus::Failed,
            other => RelayStatus::Unknown(other.to_string()),
        }
    }

    /// The session is gone for good (revoked, expired or failed)
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            RelayStatus::Terminating | RelayStatus::Terminated | RelayStatus::Failed
        )
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayStatus::Connected => write!(f, "Connected"),
            RelayStatus::Connecting => write!(f, "Connecting"),
            RelayStatus::Disconnected => write!(f, "Disconnected"),
            RelayStatus::Terminating => write!(f, "Terminating"),
            RelayStatus::Terminated => write!(f, "Terminated"),
            RelayStatus::Failed => write!(f, "Failed"),
            RelayStatus::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Control-plane operations for relay sessions
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Open a relay session tunneling `remote_port` on the target
    async fn start_session(
        &self,
        target: &TargetId,
        remote_port: u16,
    ) -> Result<RelayTicket, TunnelError>;

    /// Renew a session, waiting until the control plane reports completion
    async fn renew_session(
        &self,
        session_id: &SessionId,
        target: &TargetId,
    ) -> Result<(), TunnelError>;

    /// Non-blocking status query
    async fn describe_session(&self, session_id: &SessionId) -> Result<RelayStatus, TunnelError>;

    /// Best-effort termination. `Ok(true)` when confirmed or already gone.
    async fn terminate_session(&self, session_id: &SessionId) -> Result<bool, TunnelError>;
}
