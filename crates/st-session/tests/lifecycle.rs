//! Session lifecycle integration tests
//!
//! Drives the orchestrator with real transport processes (`sleep` standing
//! in for the plugin) and an in-memory control plane.

#![cfg(unix)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use st_core::config::TunnelConfig;
use st_core::traits::{RelayClient, RelayStatus, RelayTicket, StopOutcome};
use st_core::{SessionId, SessionState, TargetId, TunnelError};
use st_session::{PluginSupervisor, SessionOrchestrator, TerminateOutcome};

#[derive(Default)]
struct MemoryRelay {
    next: AtomicU32,
    terminated: Mutex<Vec<SessionId>>,
}

#[async_trait]
impl RelayClient for MemoryRelay {
    async fn start_session(
        &self,
        _target: &TargetId,
        _remote_port: u16,
    ) -> Result<RelayTicket, TunnelError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(RelayTicket::bare(format!("test-{}", n)))
    }

    async fn renew_session(
        &self,
        _session_id: &SessionId,
        _target: &TargetId,
    ) -> Result<(), TunnelError> {
        Ok(())
    }

    async fn describe_session(&self, _session_id: &SessionId) -> Result<RelayStatus, TunnelError> {
        Ok(RelayStatus::Connected)
    }

    async fn terminate_session(&self, session_id: &SessionId) -> Result<bool, TunnelError> {
        self.terminated.lock().unwrap().push(session_id.clone());
        Ok(true)
    }
}

fn config(program: &str, args: &[&str]) -> TunnelConfig {
    let mut config = TunnelConfig::default();
    config.transport.program = program.to_string();
    config.transport.args = args.iter().map(|a| a.to_string()).collect();
    config.transport.start_grace = Duration::from_millis(200);
    config.transport.stop_timeout = Duration::from_secs(2);
    config
}

fn orchestrator(config: &TunnelConfig) -> (SessionOrchestrator, Arc<MemoryRelay>) {
    let relay = Arc::new(MemoryRelay::default());
    let supervisor = Arc::new(PluginSupervisor::from_config(config, "us-east-1"));
    (
        SessionOrchestrator::new(config, relay.clone(), supervisor),
        relay,
    )
}

fn process_exists(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_connect_and_terminate_real_process() {
    let config = config("sleep", &["3600"]);
    let (orchestrator, relay) = orchestrator(&config);

    let session = orchestrator.connect(&TargetId::new("i-1")).await.unwrap();
    assert_eq!(session.state, SessionState::Active);
    let pid = session.transport_pid.expect("transport pid");
    assert!(process_exists(pid));

    match orchestrator.terminate(&session.session_id).await {
        TerminateOutcome::Terminated(report) => {
            assert_eq!(report.transport, Some(StopOutcome::Graceful));
            assert!(report.is_clean());
        }
        TerminateOutcome::NotFound => panic!("session should exist"),
    }
    assert!(!process_exists(pid));
    assert!(orchestrator.list_sessions().is_empty());
    assert_eq!(relay.terminated.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_crashing_transport_is_rolled_back() {
    let config = config("sh", &["-c", "exit 2"]);
    let (orchestrator, relay) = orchestrator(&config);

    let err = orchestrator
        .connect(&TargetId::new("i-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::TransportStartFailed(_)));
    assert_eq!(
        *relay.terminated.lock().unwrap(),
        vec![SessionId::new("test-0")]
    );
    assert!(orchestrator.list_sessions().is_empty());
}

#[tokio::test]
async fn test_exit_stops_every_process() {
    let config = config("sleep", &["3600"]);
    let (orchestrator, relay) = orchestrator(&config);

    let mut pids = Vec::new();
    for target in ["i-1", "i-2", "i-3"] {
        let session = orchestrator.connect(&TargetId::new(target)).await.unwrap();
        pids.push(session.transport_pid.unwrap());
    }

    let report = orchestrator.exit().await;
    assert_eq!(report.sessions.len(), 3);
    assert_eq!(report.exit_code(), 0);
    assert!(pids.iter().all(|pid| !process_exists(*pid)));
    assert_eq!(relay.terminated.lock().unwrap().len(), 3);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_transport_sees_allocated_port() {
    // GNU sleep adds up its arguments, so the port only lengthens the nap
    let config = config("sleep", &["3600", "{local_port}"]);
    let (orchestrator, _relay) = orchestrator(&config);

    let session = orchestrator.connect(&TargetId::new("i-1")).await.unwrap();
    let pid = session.transport_pid.unwrap();
    let cmdline = std::fs::read_to_string(format!("/proc/{}/cmdline", pid)).unwrap();
    assert!(cmdline.contains(&session.local_port.to_string()));

    orchestrator.exit().await;
}
