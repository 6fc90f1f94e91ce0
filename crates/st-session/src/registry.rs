//! Session registry
//!
//! The single source of truth for what is currently tunneled. Entries are
//! inserted fully built, so a lister never observes a half-constructed
//! session. Exactly one teardown path may own an entry at a time; that
//! ownership is taken with `claim_teardown`, a compare-and-set on the entry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use st_core::traits::TransportProcess;
use st_core::{Session, SessionId, SessionState};

use crate::port::PortLease;
use crate::renewal::RenewalHandle;

struct SessionEntry {
    session: Session,
    transport: Option<Box<dyn TransportProcess>>,
    renewal: Option<RenewalHandle>,
    lease: Option<PortLease>,
    /// A teardown path owns this entry
    claimed: bool,
    /// The relay session has already been terminated
    relay_closed: bool,
}

/// Everything a teardown path needs, moved out of the registry
pub struct Teardown {
    /// Snapshot taken when the claim succeeded
    pub session: Session,
    pub transport: Option<Box<dyn TransportProcess>>,
    pub renewal: Option<RenewalHandle>,
    pub lease: Option<PortLease>,
    pub relay_closed: bool,
}

/// Why an insert was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSession(pub SessionId);

/// In-memory map of sessions keyed by relay session ID
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fully built session. The transport and lease are owned by the
    /// entry from here on.
    pub fn insert(
        &self,
        session: Session,
        transport: Box<dyn TransportProcess>,
        lease: PortLease,
    ) -> Result<(), (DuplicateSession, Box<dyn TransportProcess>, PortLease)> {
        match self.sessions.entry(session.session_id.clone()) {
            Entry::Occupied(_) => Err((DuplicateSession(session.session_id), transport, lease)),
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    session,
                    transport: Some(transport),
                    renewal: None,
                    lease: Some(lease),
                    claimed: false,
                    relay_closed: false,
                });
                Ok(())
            }
        }
    }

    /// Snapshot of one session
    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.get(session_id).map(|e| e.session.clone())
    }

    /// Snapshot of a session that is live and not being torn down
    pub fn get_live(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions
            .get(session_id)
            .filter(|e| !e.claimed && e.session.state.is_live())
            .map(|e| e.session.clone())
    }

    /// Drop an entry and whatever it still owns
    pub fn remove(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.remove(session_id).map(|(_, e)| e.session)
    }

    /// Snapshot of every session, oldest first
    pub fn list_all(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.iter().map(|e| e.session.clone()).collect();
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    /// Apply a scheduler transition. Refused once the entry is claimed or
    /// no longer live.
    pub fn update<F>(&self, session_id: &SessionId, f: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.claimed || !entry.session.state.is_live() {
            return None;
        }
        f(&mut entry.session);
        Some(entry.session.clone())
    }

    /// Hand the renewal task to its entry. Returned back if the entry is
    /// gone or already claimed, so the caller can stop it.
    pub fn attach_renewal(
        &self,
        session_id: &SessionId,
        handle: RenewalHandle,
    ) -> Result<(), RenewalHandle> {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) if !entry.claimed => {
                entry.renewal = Some(handle);
                Ok(())
            }
            _ => Err(handle),
        }
    }

    /// Take exclusive ownership of an entry for teardown.
    ///
    /// Returns `None` if the session is unknown or another path already
    /// claimed it. The entry stays listed until `remove` or `release_claim`.
    pub fn claim_teardown(&self, session_id: &SessionId) -> Option<Teardown> {
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.claimed {
            return None;
        }
        entry.claimed = true;
        if entry.session.state != SessionState::Failed {
            entry.session.state = SessionState::Terminated;
        }

        Some(Teardown {
            session: entry.session.clone(),
            transport: entry.transport.take(),
            renewal: entry.renewal.take(),
            lease: entry.lease.take(),
            relay_closed: entry.relay_closed,
        })
    }

    /// Return a torn-down entry to the registry as a record, e.g. a failed
    /// session kept visible until the operator terminates it.
    pub fn release_claim(&self, session_id: &SessionId, relay_closed: bool) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.claimed = false;
            entry.relay_closed = relay_closed;
            entry.session.transport_pid = None;
        }
    }

    /// Mark a live, unclaimed session `Failed`. Returns whether it changed.
    pub fn mark_failed(&self, session_id: &SessionId, reason: impl Into<String>) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) if !entry.claimed && entry.session.state.is_live() => {
                entry.session.state = SessionState::Failed;
                entry.session.failure = Some(reason.into());
                true
            }
            _ => false,
        }
    }

    /// Whether the session's transport is still running. `None` when the
    /// session is unknown, claimed, or has no transport.
    pub fn transport_alive(&self, session_id: &SessionId) -> Option<bool> {
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.claimed {
            return None;
        }
        entry.transport.as_mut().map(|t| t.is_alive())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
