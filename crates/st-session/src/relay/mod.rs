//! Relay control-plane client
//!
//! `SsmRelay` speaks the SSM JSON API directly; `poll_until` is the shared
//! wait loop behind renewal.

mod sigv4;
mod ssm;

pub use ssm::SsmRelay;

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use st_core::{SessionId, TunnelError};

/// One observation of an asynchronous control-plane command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Still running
    Pending,
    /// Finished successfully
    Done,
    /// Finished unsuccessfully
    Failed(String),
}

/// Poll `check` every `interval` until it reports completion.
///
/// Never returns success on timeout: running out of time is
/// `RenewalTimeout`, a failed command is `RenewalFailed`.
pub async fn poll_until<F, Fut>(
    session_id: &SessionId,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<(), TunnelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus, TunnelError>>,
{
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        match check().await? {
            PollStatus::Done => return Ok(()),
            PollStatus::Failed(reason) => return Err(TunnelError::RenewalFailed(reason)),
            PollStatus::Pending => {
                tracing::trace!("Renewal of {} still pending", session_id);
            }
        }

        if Instant::now() + interval > deadline {
            return Err(TunnelError::RenewalTimeout {
                session_id: session_id.to_string(),
                waited: started.elapsed(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}
