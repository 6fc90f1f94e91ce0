//! Renewal scheduler
//!
//! One background task per live session. It wakes every `check_interval`,
//! checks that the transport and relay session are still there, and renews
//! the relay session once fewer than `margin` remain before expiry. Once a
//! session is marked `Failed` the task reports it and exits; it never renews
//! again.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use st_core::config::RenewalConfig;
use st_core::traits::RelayClient;
use st_core::{SessionId, SessionState, TargetId};

use crate::registry::SessionRegistry;

/// Sent to the orchestrator when a session fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEvent {
    pub session_id: SessionId,
    pub reason: String,
}

/// Owner's handle on a running scheduler task
pub struct RenewalHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RenewalHandle {
    /// Cancel the task and wait until it has exited
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!("Renewal task panicked: {}", e);
            }
        }
    }

    /// Whether the task has already exited on its own
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

enum Tick {
    Continue,
    Stop,
}

/// Renews one session until it is stopped or fails
pub struct RenewalScheduler {
    session_id: SessionId,
    target_id: TargetId,
    registry: Arc<SessionRegistry>,
    relay: Arc<dyn RelayClient>,
    config: RenewalConfig,
    failures: mpsc::UnboundedSender<FailureEvent>,
}

impl RenewalScheduler {
    pub fn new(
        session_id: SessionId,
        target_id: TargetId,
        registry: Arc<SessionRegistry>,
        relay: Arc<dyn RelayClient>,
        config: RenewalConfig,
        failures: mpsc::UnboundedSender<FailureEvent>,
    ) -> Self {
        Self {
            session_id,
            target_id,
            registry,
            relay,
            config,
            failures,
        }
    }

    /// Start the background task
    pub fn spawn(self) -> RenewalHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        RenewalHandle { cancel, task }
    }

    async fn run(self, cancel: CancellationToken) {
        let period = self.config.check_interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            "Renewal scheduler for {} started (check every {:?}, margin {:?})",
            self.session_id,
            period,
            self.config.margin
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                tick = self.check() => tick,
            };
            if let Tick::Stop = tick {
                break;
            }
        }

        tracing::debug!("Renewal scheduler for {} stopped", self.session_id);
    }

    async fn check(&self) -> Tick {
        let Some(session) = self.registry.get_live(&self.session_id) else {
            return Tick::Stop;
        };

        match self.registry.transport_alive(&self.session_id) {
            Some(true) => {}
            Some(false) => return self.fail("transport process exited"),
            None => return Tick::Stop,
        }

        if self.config.check_relay_status {
            match self.relay.describe_session(&self.session_id).await {
                Ok(status) if status.is_ended() => {
                    let reason = format!("relay session {}", status.to_string().to_lowercase());
                    return self.fail(reason);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Status check for {} failed: {}", self.session_id, e);
                }
            }
        }

        let now = Instant::now();
        if now >= session.expires_at {
            return self.fail("relay session expired without a successful renewal");
        }
        if session.remaining(now) > self.config.margin {
            return Tick::Continue;
        }

        self.renew().await
    }

    async fn renew(&self) -> Tick {
        if self
            .registry
            .update(&self.session_id, |s| s.state = SessionState::Renewing)
            .is_none()
        {
            return Tick::Stop;
        }

        tracing::debug!("Renewing {}", self.session_id);
        match self
            .relay
            .renew_session(&self.session_id, &self.target_id)
            .await
        {
            Ok(()) => {
                let period = self.config.period;
                let updated = self.registry.update(&self.session_id, |s| {
                    s.state = SessionState::Active;
                    s.expires_at = Instant::now() + period;
                    s.renewals += 1;
                    s.consecutive_failures = 0;
                });
                match updated {
                    Some(s) => {
                        tracing::info!(
                            "Renewed {} (renewal #{}, next expiry in {:?})",
                            self.session_id,
                            s.renewals,
                            period
                        );
                        Tick::Continue
                    }
                    None => Tick::Stop,
                }
            }
            Err(e) => {
                let updated = self.registry.update(&self.session_id, |s| {
                    s.state = SessionState::Active;
                    s.consecutive_failures += 1;
                });
                let Some(session) = updated else {
                    return Tick::Stop;
                };
                tracing::warn!(
                    "Renewal of {} failed ({}/{}): {}",
                    self.session_id,
                    session.consecutive_failures,
                    self.config.max_failures,
                    e
                );

                if e.is_fatal() {
                    return self.fail(format!("renewal rejected: {}", e));
                }
                if session.consecutive_failures >= self.config.max_failures {
                    return self.fail(format!(
                        "{} consecutive renewal failures, last: {}",
                        session.consecutive_failures, e
                    ));
                }
                if Instant::now() >= session.expires_at {
                    return self.fail(format!(
                        "relay session expired without a successful renewal, last error: {}",
                        e
                    ));
                }
                Tick::Continue
            }
        }
    }

    fn fail(&self, reason: impl Into<String>) -> Tick {
        let reason = reason.into();
        if self.registry.mark_failed(&self.session_id, reason.clone()) {
            tracing::warn!("Session {} failed: {}", self.session_id, reason);
            let event = FailureEvent {
                session_id: self.session_id.clone(),
                reason,
            };
            if self.failures.send(event).is_err() {
                tracing::debug!("No one is listening for failure of {}", self.session_id);
            }
        }
        Tick::Stop
    }
}
