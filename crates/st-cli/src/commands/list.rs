//! List command implementation

use tokio::time::Instant;

use crate::output::format_sessions;
use st_core::Session;
use st_session::SessionOrchestrator;

/// Print every tracked session, failed ones included.
///
/// Returns the listing so `terminate #n` can refer to it.
pub fn list_command(orchestrator: &SessionOrchestrator) -> Vec<Session> {
    let sessions = orchestrator.list_sessions();
    println!("{}", format_sessions(&sessions, Instant::now()));
    sessions
}
