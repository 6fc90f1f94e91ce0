//! Terminate command implementation

use anyhow::Result;

use crate::output::{format_teardown, print_success, print_warning};
use st_core::SessionId;
use st_session::{SessionOrchestrator, TerminateOutcome};

/// Tear down one session.
///
/// An unknown ID is reported, not treated as an error.
pub async fn terminate_command(
    orchestrator: &SessionOrchestrator,
    session_id: &SessionId,
) -> Result<()> {
    match orchestrator.terminate(session_id).await {
        TerminateOutcome::Terminated(report) if report.is_clean() => {
            print_success(&format!("Closed {}", format_teardown(&report)));
        }
        TerminateOutcome::Terminated(report) => {
            print_warning(&format!("Closed with errors: {}", format_teardown(&report)));
        }
        TerminateOutcome::NotFound => {
            print_warning(&format!("No session {}", session_id));
        }
    }
    Ok(())
}
