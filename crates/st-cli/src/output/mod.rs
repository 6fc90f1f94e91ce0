//! Output formatting utilities for the CLI
//!
//! Tables for instances and sessions, the shutdown summary, and colored
//! one-line status messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};
use tokio::time::Instant;

use st_core::time::format_duration;
use st_core::traits::StopOutcome;
use st_core::{Instance, Session, SessionState};
use st_session::{ShutdownReport, TeardownReport};

/// Format an instance listing as a numbered table
///
/// The `#` column is what `connect #n` refers to.
pub fn format_instances(instances: &[Instance]) -> String {
    if instances.is_empty() {
        return "No instances found".to_string();
    }

    #[derive(Tabled)]
    struct InstanceRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "INSTANCE ID")]
        id: String,
        #[tabled(rename = "STATE")]
        state: String,
    }

    let rows: Vec<InstanceRow> = instances
        .iter()
        .enumerate()
        .map(|(i, inst)| InstanceRow {
            index: i + 1,
            name: truncate(&inst.name, 40),
            id: inst.id.to_string(),
            state: inst.state.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the session listing
///
/// Expiry is shown relative to `now`; failed sessions show their reason
/// instead.
pub fn format_sessions(sessions: &[Session], now: Instant) -> String {
    if sessions.is_empty() {
        return "No active sessions".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "SESSION ID")]
        id: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "LOCAL PORT")]
        local_port: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "EXPIRES IN")]
        expires: String,
        #[tabled(rename = "RENEWALS")]
        renewals: u32,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .enumerate()
        .map(|(i, s)| SessionRow {
            index: i + 1,
            id: truncate(s.session_id.as_str(), 36),
            target: s.target_id.to_string(),
            local_port: format!("localhost:{}", s.local_port),
            state: s.state.to_string(),
            expires: match s.state {
                SessionState::Failed => s
                    .failure
                    .as_deref()
                    .map(|f| truncate(f, 40))
                    .unwrap_or_else(|| "-".to_string()),
                _ => format_duration(s.remaining(now)),
            },
            renewals: s.renewals,
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// One line describing how a teardown went
pub fn format_teardown(report: &TeardownReport) -> String {
    let transport = match report.transport {
        Some(StopOutcome::AlreadyExited) => "transport had already exited",
        Some(StopOutcome::Graceful) => "transport stopped",
        Some(StopOutcome::Killed) => "transport killed",
        Some(StopOutcome::Unresponsive) => "transport did not exit after kill",
        None => "no transport",
    };
    let mut line = format!(
        "{} ({} on localhost:{}): {}",
        report.session_id, report.target_id, report.local_port, transport
    );
    if let Some(err) = &report.relay_error {
        line.push_str(&format!(", relay session not confirmed closed: {}", err));
    }
    if let Some(failure) = report.failure.as_ref().filter(|_| report.was_failed) {
        line.push_str(&format!(" [failed earlier: {}]", failure));
    }
    line
}

/// Multi-line shutdown summary
pub fn format_shutdown(report: &ShutdownReport) -> String {
    if report.sessions.is_empty() {
        return "No sessions to close".to_string();
    }

    let mut output = format!("Closed {} session(s)\n", report.sessions.len());
    for session in &report.sessions {
        output.push_str("  ");
        output.push_str(&format_teardown(session));
        output.push('\n');
    }
    let failed = report.failed().count();
    let errors = report.errors().count();
    if failed > 0 {
        output.push_str(&format!("{} session(s) had failed before exit\n", failed));
    }
    if errors > 0 {
        output.push_str(&format!("{} teardown(s) reported errors\n", errors));
    }
    output
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_marked<W: std::io::Write>(
    mut writer: W,
    color: crossterm::style::Color,
    mark: &str,
    msg: &str,
) {
    use crossterm::style::{Print, ResetColor, SetForegroundColor};

    let _ = crossterm::execute!(
        writer,
        SetForegroundColor(color),
        Print(mark),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_marked(std::io::stdout(), crossterm::style::Color::Green, "✓ ", msg);
}

/// Print an error message in red with an X prefix to stderr
pub fn print_error(msg: &str) {
    print_marked(std::io::stderr(), crossterm::style::Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    print_marked(std::io::stderr(), crossterm::style::Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_marked(std::io::stdout(), crossterm::style::Color::Cyan, "ℹ ", msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_core::{InstanceState, SessionId, TargetId};
    use std::time::Duration;

    fn session(id: &str, state: SessionState, failure: Option<&str>) -> Session {
        Session {
            session_id: SessionId::new(id),
            target_id: TargetId::new("i-0abc"),
            local_port: 41234,
            remote_port: 22,
            state,
            expires_at: Instant::now() + Duration::from_secs(3000),
            renewals: 2,
            consecutive_failures: 0,
            failure: failure.map(String::from),
            created_at: 0,
            transport_pid: Some(100),
        }
    }

    fn report(id: &str, was_failed: bool, relay_error: Option<&str>) -> TeardownReport {
        TeardownReport {
            session_id: SessionId::new(id),
            target_id: TargetId::new("i-0abc"),
            local_port: 41234,
            was_failed,
            failure: was_failed.then(|| "transport process exited".to_string()),
            transport: Some(StopOutcome::Graceful),
            relay_error: relay_error.map(String::from),
        }
    }

    #[test]
    fn test_empty_listings() {
        assert_eq!(format_instances(&[]), "No instances found");
        assert_eq!(format_sessions(&[], Instant::now()), "No active sessions");
        assert_eq!(
            format_shutdown(&ShutdownReport::default()),
            "No sessions to close"
        );
    }

    #[test]
    fn test_format_instances_numbers_rows() {
        let table = format_instances(&[Instance {
            id: TargetId::new("i-0abc"),
            name: "bastion".into(),
            state: InstanceState::Running,
        }]);
        assert!(table.contains("INSTANCE ID"));
        assert!(table.contains("i-0abc"));
        assert!(table.contains("bastion"));
        assert!(table.contains("running"));
    }

    #[test]
    fn test_format_sessions_shows_port_and_expiry() {
        let now = Instant::now();
        let table = format_sessions(&[session("s-1", SessionState::Active, None)], now);
        assert!(table.contains("localhost:41234"));
        assert!(table.contains("active"));
        assert!(table.contains("50m"));
    }

    #[test]
    fn test_format_sessions_shows_failure_reason() {
        let table = format_sessions(
            &[session(
                "s-1",
                SessionState::Failed,
                Some("transport process exited"),
            )],
            Instant::now(),
        );
        assert!(table.contains("failed"));
        assert!(table.contains("transport process exited"));
    }

    #[test]
    fn test_format_teardown() {
        let line = format_teardown(&report("s-1", false, None));
        assert_eq!(line, "s-1 (i-0abc on localhost:41234): transport stopped");

        let line = format_teardown(&report("s-2", true, Some("timed out")));
        assert!(line.contains("relay session not confirmed closed: timed out"));
        assert!(line.contains("failed earlier: transport process exited"));
    }

    #[test]
    fn test_format_shutdown_counts_problems() {
        let summary = format_shutdown(&ShutdownReport {
            sessions: vec![report("s-1", false, None), report("s-2", true, None)],
        });
        assert!(summary.starts_with("Closed 2 session(s)"));
        assert!(summary.contains("1 session(s) had failed before exit"));
        assert!(!summary.contains("teardown(s) reported errors"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-name", 10), "a-very-...");
    }
}
