//! Transport process traits

use async_trait::async_trait;

use crate::error::TunnelError;
use crate::traits::RelayTicket;
use crate::types::TargetId;

/// Everything needed to launch the forwarding process for one session
#[derive(Debug, Clone)]
pub struct TransportLaunch {
    pub ticket: RelayTicket,
    pub target_id: TargetId,
    pub local_port: u16,
    pub remote_port: u16,
}

/// How a transport process went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// It had already exited before we asked
    AlreadyExited,
    /// It exited within the grace period
    Graceful,
    /// It had to be killed
    Killed,
    /// Kill was sent but the process was never reaped
    Unresponsive,
}

/// A running forwarding process, exclusively owned by one session
#[async_trait]
pub trait TransportProcess: Send + Sync {
    /// OS process ID, when known
    fn pid(&self) -> Option<u32>;

    /// Non-blocking liveness check
    fn is_alive(&mut self) -> bool;

    /// Ask the process to exit, escalating to a kill after a bounded wait
    async fn stop(&mut self) -> StopOutcome;
}

/// Launches transport processes
#[async_trait]
pub trait TransportSupervisor: Send + Sync {
    /// Spawn the process. An immediate non-zero exit is `TransportStartFailed`.
    async fn start(
        &self,
        launch: &TransportLaunch,
    ) -> Result<Box<dyn TransportProcess>, TunnelError>;
}
