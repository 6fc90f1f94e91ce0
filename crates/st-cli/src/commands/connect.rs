//! Connect command implementation

use anyhow::{Context, Result};

use crate::output::{print_info, print_success};
use st_core::{Session, TargetId};
use st_session::SessionOrchestrator;

/// Open a tunnel to `target` and report where it listens
pub async fn connect_command(
    orchestrator: &SessionOrchestrator,
    target: &TargetId,
) -> Result<Session> {
    print_info(&format!("Opening tunnel to {}...", target));

    let session = orchestrator
        .connect(target)
        .await
        .with_context(|| format!("Failed to connect to {}", target))?;

    print_success(&format!(
        "Tunnel {} open: localhost:{} -> {}:{}",
        session.session_id, session.local_port, session.target_id, session.remote_port
    ));
    if session.remote_port == 22 {
        print_info(&format!(
            "Connect with: ssh -p {} <user>@localhost",
            session.local_port
        ));
    }
    Ok(session)
}
