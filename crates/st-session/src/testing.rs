//! In-process fakes for the relay and transport seams

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use st_core::time::current_time_millis;
use st_core::traits::{
    RelayClient, RelayStatus, RelayTicket, StopOutcome, TransportLaunch, TransportProcess,
    TransportSupervisor,
};
use st_core::{Session, SessionId, SessionState, TargetId, TunnelError};

/// An `Active` session on `i-1` expiring in an hour
pub fn session(id: &str) -> Session {
    Session {
        session_id: SessionId::new(id),
        target_id: TargetId::new("i-1"),
        local_port: 40000,
        remote_port: 22,
        state: SessionState::Active,
        expires_at: Instant::now() + Duration::from_secs(3600),
        renewals: 0,
        consecutive_failures: 0,
        failure: None,
        created_at: current_time_millis(),
        transport_pid: Some(4242),
    }
}

#[derive(Default)]
struct ProcessState {
    exited: AtomicBool,
    stops: AtomicU32,
}

/// Transport process whose liveness is controlled by the test
#[derive(Clone, Default)]
pub struct FakeProcess {
    state: Arc<ProcessState>,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the process dying on its own
    pub fn exit(&self) {
        self.state.exited.store(true, Ordering::SeqCst);
    }

    pub fn running(&self) -> bool {
        !self.state.exited.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.state.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn is_alive(&mut self) -> bool {
        self.running()
    }

    async fn stop(&mut self) -> StopOutcome {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        if self.state.exited.swap(true, Ordering::SeqCst) {
            StopOutcome::AlreadyExited
        } else {
            StopOutcome::Graceful
        }
    }
}

/// How a queued transport start should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Run,
    PortTaken,
    Crash,
}

/// Supervisor handing out `FakeProcess`es
#[derive(Default)]
pub struct FakeSupervisor {
    queued: Mutex<VecDeque<StartBehavior>>,
    launches: Mutex<Vec<TransportLaunch>>,
    processes: Mutex<Vec<FakeProcess>>,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next starts; once the queue is empty every start runs
    pub fn then(self, behavior: StartBehavior) -> Self {
        self.queued.lock().unwrap().push_back(behavior);
        self
    }

    pub fn launches(&self) -> Vec<TransportLaunch> {
        self.launches.lock().unwrap().clone()
    }

    pub fn processes(&self) -> Vec<FakeProcess> {
        self.processes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportSupervisor for FakeSupervisor {
    async fn start(
        &self,
        launch: &TransportLaunch,
    ) -> Result<Box<dyn TransportProcess>, TunnelError> {
        self.launches.lock().unwrap().push(launch.clone());
        let behavior = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StartBehavior::Run);

        match behavior {
            StartBehavior::Run => {
                let process = FakeProcess::new();
                self.processes.lock().unwrap().push(process.clone());
                Ok(Box::new(process))
            }
            StartBehavior::PortTaken => Err(TunnelError::PortUnavailable(format!(
                "bind 127.0.0.1:{}: address already in use",
                launch.local_port
            ))),
            StartBehavior::Crash => Err(TunnelError::TransportStartFailed(
                "plugin exited early (exit status: 1)".into(),
            )),
        }
    }
}

/// How renewals should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewBehavior {
    Succeed,
    Fail,
    Unauthorized,
    Hang,
    /// Poll for this long, then give up
    TimeOut(Duration),
}

/// Control plane kept in memory
pub struct FakeRelay {
    fixed_id: Option<String>,
    next_id: AtomicU32,
    unreachable: AtomicBool,
    renew: Mutex<RenewBehavior>,
    renews: AtomicU32,
    statuses: Mutex<HashMap<String, RelayStatus>>,
    terminated: Mutex<Vec<SessionId>>,
    refuse_terminate: Mutex<HashSet<String>>,
}

impl Default for FakeRelay {
    fn default() -> Self {
        Self {
            fixed_id: None,
            next_id: AtomicU32::new(1),
            unreachable: AtomicBool::new(false),
            renew: Mutex::new(RenewBehavior::Succeed),
            renews: AtomicU32::new(0),
            statuses: Mutex::new(HashMap::new()),
            terminated: Mutex::new(Vec::new()),
            refuse_terminate: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always hand out this session ID
    pub fn with_session_id(mut self, id: &str) -> Self {
        self.fixed_id = Some(id.to_string());
        self
    }

    pub fn with_renew(self, behavior: RenewBehavior) -> Self {
        *self.renew.lock().unwrap() = behavior;
        self
    }

    /// Reject termination of this session
    pub fn fail_terminate(&self, id: &str) {
        self.refuse_terminate.lock().unwrap().insert(id.to_string());
    }

    /// Refuse every target
    pub fn set_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    /// Terminate a session behind the session manager's back
    pub fn end_session(&self, id: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(id.to_string(), RelayStatus::Terminated);
    }

    pub fn renew_calls(&self) -> u32 {
        self.renews.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> Vec<SessionId> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayClient for FakeRelay {
    async fn start_session(
        &self,
        target: &TargetId,
        _remote_port: u16,
    ) -> Result<RelayTicket, TunnelError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TunnelError::TargetUnreachable(format!(
                "{} is not connected",
                target
            )));
        }
        let id = match &self.fixed_id {
            Some(id) => id.clone(),
            None => format!("s-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
        };
        self.statuses
            .lock()
            .unwrap()
            .insert(id.clone(), RelayStatus::Connected);
        Ok(RelayTicket::bare(id))
    }

    async fn renew_session(
        &self,
        session_id: &SessionId,
        _target: &TargetId,
    ) -> Result<(), TunnelError> {
        self.renews.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.renew.lock().unwrap();
        match behavior {
            RenewBehavior::Succeed => Ok(()),
            RenewBehavior::Fail => Err(TunnelError::RenewalFailed("Failed".into())),
            RenewBehavior::Unauthorized => Err(TunnelError::Auth("ExpiredTokenException".into())),
            RenewBehavior::Hang => {
                futures::future::pending::<()>().await;
                Err(TunnelError::RenewalTimeout {
                    session_id: session_id.to_string(),
                    waited: Duration::ZERO,
                })
            }
            RenewBehavior::TimeOut(waited) => {
                tokio::time::sleep(waited).await;
                Err(TunnelError::RenewalTimeout {
                    session_id: session_id.to_string(),
                    waited,
                })
            }
        }
    }

    async fn describe_session(&self, session_id: &SessionId) -> Result<RelayStatus, TunnelError> {
        self.statuses
            .lock()
            .unwrap()
            .get(session_id.as_str())
            .cloned()
            .ok_or_else(|| TunnelError::SessionNotFound(session_id.to_string()))
    }

    async fn terminate_session(&self, session_id: &SessionId) -> Result<bool, TunnelError> {
        if self
            .refuse_terminate
            .lock()
            .unwrap()
            .contains(session_id.as_str())
        {
            return Err(TunnelError::Relay(format!(
                "TerminateSession refused for {}",
                session_id
            )));
        }
        self.terminated.lock().unwrap().push(session_id.clone());
        self.statuses
            .lock()
            .unwrap()
            .insert(session_id.to_string(), RelayStatus::Terminated);
        Ok(true)
    }
}
