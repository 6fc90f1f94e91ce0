//! Session orchestrator
//!
//! The operator-facing surface: `connect`, `list_sessions`, `terminate` and
//! `exit`. It wires the port allocator, relay client, transport supervisor
//! and renewal schedulers together around the registry, and runs a reaper
//! task that tears down sessions the schedulers report as failed.
//!
//! # Teardown order
//!
//! Every teardown path (operator terminate, failure reaping, shutdown) first
//! claims the registry entry, then stops the renewal task and waits for it,
//! stops the transport, releases the port and finally terminates the relay
//! session. A claim can only succeed once per entry, so no two paths ever
//! stop the same transport.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use st_core::config::{RenewalConfig, TunnelConfig};
use st_core::time::current_time_millis;
use st_core::traits::{
    RelayClient, RelayTicket, StopOutcome, TransportLaunch, TransportProcess, TransportSupervisor,
};
use st_core::{Session, SessionId, SessionState, TargetId, TunnelError};

use crate::port::{PortAllocator, PortLease};
use crate::registry::{SessionRegistry, Teardown};
use crate::renewal::{FailureEvent, RenewalScheduler};

/// What happened when one session was torn down
#[derive(Debug, Clone)]
pub struct TeardownReport {
    pub session_id: SessionId,
    pub target_id: TargetId,
    pub local_port: u16,
    /// The session had already failed before teardown
    pub was_failed: bool,
    pub failure: Option<String>,
    /// `None` when no transport was left to stop
    pub transport: Option<StopOutcome>,
    /// Why the relay session could not be confirmed terminated
    pub relay_error: Option<String>,
}

impl TeardownReport {
    /// Transport gone and relay termination confirmed
    pub fn is_clean(&self) -> bool {
        self.relay_error.is_none() && self.transport != Some(StopOutcome::Unresponsive)
    }
}

/// Result of `terminate`
#[derive(Debug, Clone)]
pub enum TerminateOutcome {
    Terminated(TeardownReport),
    /// Unknown session, or one already being torn down
    NotFound,
}

/// Result of `exit`
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub sessions: Vec<TeardownReport>,
}

impl ShutdownReport {
    /// Sessions that were in `Failed` when shutdown began
    pub fn failed(&self) -> impl Iterator<Item = &TeardownReport> {
        self.sessions.iter().filter(|r| r.was_failed)
    }

    /// Sessions whose teardown reported a problem
    pub fn errors(&self) -> impl Iterator<Item = &TeardownReport> {
        self.sessions.iter().filter(|r| !r.is_clean())
    }

    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none() && self.errors().next().is_none()
    }

    /// Process exit code: 0 after a clean shutdown, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

/// Owns every tunnel opened by this process
pub struct SessionOrchestrator {
    remote_port: u16,
    renewal: RenewalConfig,
    registry: Arc<SessionRegistry>,
    ports: PortAllocator,
    relay: Arc<dyn RelayClient>,
    transport: Arc<dyn TransportSupervisor>,
    failures: mpsc::UnboundedSender<FailureEvent>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl SessionOrchestrator {
    /// Create the orchestrator and start its reaper task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &TunnelConfig,
        relay: Arc<dyn RelayClient>,
        transport: Arc<dyn TransportSupervisor>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let (failures, events) = mpsc::unbounded_channel();

        let reaper = tokio::spawn(run_reaper(
            Arc::clone(&registry),
            Arc::clone(&relay),
            events,
            shutdown.clone(),
        ));

        Self {
            remote_port: config.remote_port,
            renewal: config.renewal.clone(),
            registry,
            ports: PortAllocator::new(config.bind_host.clone()),
            relay,
            transport,
            failures,
            reaper: Mutex::new(Some(reaper)),
            shutdown,
        }
    }

    /// Open a tunnel to `target` and start renewing it.
    ///
    /// On any failure after the relay session was opened, that session is
    /// terminated before the error is returned.
    pub async fn connect(&self, target: &TargetId) -> Result<Session, TunnelError> {
        if self.shutdown.is_cancelled() {
            return Err(TunnelError::Relay("session manager is shutting down".into()));
        }

        let lease = self.ports.allocate()?;
        tracing::info!(
            "Connecting to {} (remote port {}, local port {})",
            target,
            self.remote_port,
            lease.port()
        );

        let ticket = self.relay.start_session(target, self.remote_port).await?;
        let session_id = ticket.session_id.clone();

        let (transport, lease) = match self.launch(&ticket, target, lease).await {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!("Transport for {} did not start: {}", session_id, e);
                self.rollback(&session_id).await;
                return Err(e);
            }
        };

        let session = Session {
            session_id: session_id.clone(),
            target_id: target.clone(),
            local_port: lease.port(),
            remote_port: self.remote_port,
            state: SessionState::Active,
            expires_at: Instant::now() + self.renewal.period,
            renewals: 0,
            consecutive_failures: 0,
            failure: None,
            created_at: current_time_millis(),
            transport_pid: transport.pid(),
        };

        if let Err((duplicate, mut transport, _lease)) =
            self.registry.insert(session.clone(), transport, lease)
        {
            // The relay session belongs to the existing entry; leave it alone
            transport.stop().await;
            return Err(TunnelError::Relay(format!(
                "relay reused session id {}",
                duplicate.0
            )));
        }

        let handle = RenewalScheduler::new(
            session_id.clone(),
            target.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.relay),
            self.renewal.clone(),
            self.failures.clone(),
        )
        .spawn();
        if let Err(handle) = self.registry.attach_renewal(&session_id, handle) {
            handle.stop().await;
        }

        tracing::info!(
            "Session {} active: localhost:{} -> {}:{}",
            session_id,
            session.local_port,
            target,
            self.remote_port
        );
        Ok(session)
    }

    /// Start the transport, retrying once on a fresh port if the first one
    /// was taken in the meantime.
    async fn launch(
        &self,
        ticket: &RelayTicket,
        target: &TargetId,
        mut lease: PortLease,
    ) -> Result<(Box<dyn TransportProcess>, PortLease), TunnelError> {
        let mut retried = false;
        loop {
            let result = if self.ports.probe(lease.port()) {
                let launch = TransportLaunch {
                    ticket: ticket.clone(),
                    target_id: target.clone(),
                    local_port: lease.port(),
                    remote_port: self.remote_port,
                };
                self.transport.start(&launch).await
            } else {
                Err(TunnelError::PortUnavailable(format!(
                    "local port {} was taken before the transport started",
                    lease.port()
                )))
            };

            match result {
                Ok(process) => return Ok((process, lease)),
                Err(TunnelError::PortUnavailable(reason)) if !retried => {
                    tracing::warn!("{}; retrying with a fresh port", reason);
                    retried = true;
                    let fresh = self.ports.allocate()?;
                    lease = fresh;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn rollback(&self, session_id: &SessionId) {
        match self.relay.terminate_session(session_id).await {
            Ok(true) => tracing::info!("Rolled back relay session {}", session_id),
            Ok(false) => tracing::warn!(
                "Rollback of relay session {} was not confirmed",
                session_id
            ),
            Err(e) => tracing::warn!("Failed to roll back relay session {}: {}", session_id, e),
        }
    }

    /// Snapshot of all sessions, oldest first. Failed sessions stay listed
    /// until terminated.
    pub fn list_sessions(&self) -> Vec<Session> {
        self.registry.list_all()
    }

    /// Snapshot of one session
    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.registry.get(session_id)
    }

    /// Tear down one session and forget it
    pub async fn terminate(&self, session_id: &SessionId) -> TerminateOutcome {
        let Some(teardown) = self.registry.claim_teardown(session_id) else {
            tracing::debug!("Terminate {}: not found or already being torn down", session_id);
            return TerminateOutcome::NotFound;
        };

        let report = dismantle(teardown, self.relay.as_ref()).await;
        self.registry.remove(session_id);
        tracing::info!("Terminated session {}", session_id);
        TerminateOutcome::Terminated(report)
    }

    /// Tear down everything. Errors are collected per session and never stop
    /// the remaining teardowns.
    pub async fn exit(&self) -> ShutdownReport {
        self.shutdown.cancel();
        if let Some(reaper) = self.reaper.lock().await.take() {
            if let Err(e) = reaper.await {
                tracing::warn!("Reaper task ended abnormally: {}", e);
            }
        }

        let ids: Vec<SessionId> = self
            .registry
            .list_all()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        if !ids.is_empty() {
            tracing::info!("Shutting down {} session(s)", ids.len());
        }

        let reports = futures::future::join_all(ids.iter().map(|id| async move {
            let teardown = self.registry.claim_teardown(id)?;
            let report = dismantle(teardown, self.relay.as_ref()).await;
            self.registry.remove(id);
            Some(report)
        }))
        .await;

        ShutdownReport {
            sessions: reports.into_iter().flatten().collect(),
        }
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Stop renewal, stop the transport, release the port, close the relay
/// session; in that order.
async fn dismantle(teardown: Teardown, relay: &dyn RelayClient) -> TeardownReport {
    let Teardown {
        session,
        transport,
        renewal,
        lease,
        relay_closed,
    } = teardown;
    let session_id = session.session_id.clone();

    if let Some(handle) = renewal {
        handle.stop().await;
    }

    let stopped = match transport {
        Some(mut process) => {
            let outcome = process.stop().await;
            tracing::debug!("Transport for {}: {:?}", session_id, outcome);
            Some(outcome)
        }
        None => None,
    };
    drop(lease);

    let relay_error = if relay_closed {
        None
    } else {
        match relay.terminate_session(&session_id).await {
            Ok(true) => None,
            Ok(false) => Some("termination not confirmed".to_string()),
            Err(e) => {
                tracing::warn!("Failed to terminate relay session {}: {}", session_id, e);
                Some(e.to_string())
            }
        }
    };

    TeardownReport {
        session_id,
        target_id: session.target_id,
        local_port: session.local_port,
        was_failed: session.state == SessionState::Failed,
        failure: session.failure,
        transport: stopped,
        relay_error,
    }
}

/// Tear down sessions the renewal schedulers gave up on, leaving a `Failed`
/// record behind.
async fn run_reaper(
    registry: Arc<SessionRegistry>,
    relay: Arc<dyn RelayClient>,
    mut events: mpsc::UnboundedReceiver<FailureEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(teardown) = registry.claim_teardown(&event.session_id) else {
            continue;
        };
        let report = dismantle(teardown, relay.as_ref()).await;
        registry.release_claim(&event.session_id, report.relay_error.is_none());
        tracing::warn!(
            "Session {} to {} failed ({}); local port {} released",
            event.session_id,
            report.target_id,
            event.reason,
            report.local_port
        );
    }
}
