//! Transport process supervision
//!
//! Each session owns one forwarding process (by default
//! `session-manager-plugin`). It is spawned with `kill_on_drop`, watched for
//! an early exit during the start grace window, and stopped with SIGTERM
//! followed by SIGKILL.

use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use st_core::config::TunnelConfig;
use st_core::traits::{StopOutcome, TransportLaunch, TransportProcess, TransportSupervisor};
use st_core::{SessionId, TunnelError};

/// stderr fragments meaning the local port was taken before the plugin bound it
const ADDR_IN_USE_MARKERS: &[&str] = &["address already in use", "only one usage of each socket"];

/// Starts the configured plugin for each session
#[derive(Debug, Clone)]
pub struct PluginSupervisor {
    program: String,
    args: Vec<String>,
    region: String,
    profile: Option<String>,
    endpoint: String,
    document_name: String,
    start_grace: Duration,
    stop_timeout: Duration,
}

impl PluginSupervisor {
    /// Build from configuration for an already resolved region
    pub fn from_config(config: &TunnelConfig, region: &str) -> Self {
        Self {
            program: config.transport.program.clone(),
            args: config.transport.args.clone(),
            region: region.to_string(),
            profile: config.aws.profile.clone(),
            endpoint: config.aws.ssm_endpoint(region),
            document_name: config.document_name.clone(),
            start_grace: config.transport.start_grace,
            stop_timeout: config.transport.stop_timeout,
        }
    }

    /// Render the argument template for one launch
    pub fn render_args(&self, launch: &TransportLaunch) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| render(arg, |name| self.placeholder(name, launch)))
            .collect()
    }

    fn placeholder(&self, name: &str, launch: &TransportLaunch) -> Option<String> {
        let value = match name {
            "ticket" => launch.ticket.to_json(),
            "region" => self.region.clone(),
            "profile" => self.profile.clone().unwrap_or_default(),
            "endpoint" => self.endpoint.clone(),
            "parameters" => json!({
                "Target": launch.target_id.as_str(),
                "DocumentName": self.document_name,
                "Parameters": {
                    "portNumber": [launch.remote_port.to_string()],
                    "localPortNumber": [launch.local_port.to_string()],
                },
            })
            .to_string(),
            "session_id" => launch.ticket.session_id.to_string(),
            "target" => launch.target_id.to_string(),
            "local_port" => launch.local_port.to_string(),
            "remote_port" => launch.remote_port.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// Single-pass `{name}` substitution; unknown names are left as written.
fn render(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl TransportSupervisor for PluginSupervisor {
    async fn start(
        &self,
        launch: &TransportLaunch,
    ) -> Result<Box<dyn TransportProcess>, TunnelError> {
        let session_id = launch.ticket.session_id.clone();
        let args = self.render_args(launch);

        tracing::debug!(
            "Starting transport for {} on local port {}",
            session_id,
            launch.local_port
        );
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TunnelError::TransportStartFailed(format!("cannot run {}: {}", self.program, e))
            })?;

        tokio::time::sleep(self.start_grace).await;

        let exited = child
            .try_wait()
            .map_err(|e| TunnelError::TransportStartFailed(e.to_string()))?;
        if let Some(status) = exited {
            let stderr = match child.stderr.take() {
                Some(mut pipe) => {
                    let mut buf = String::new();
                    let _ = pipe.read_to_string(&mut buf).await;
                    buf.trim().to_string()
                }
                None => String::new(),
            };
            return Err(classify_early_exit(&self.program, status, &stderr));
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(session_id.clone(), stderr));
        }

        let pid = child.id();
        tracing::info!(
            "Transport for {} running (pid {})",
            session_id,
            pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into())
        );
        Ok(Box::new(PluginProcess {
            child,
            pid,
            session_id,
            stop_timeout: self.stop_timeout,
        }))
    }
}

fn classify_early_exit(program: &str, status: std::process::ExitStatus, stderr: &str) -> TunnelError {
    let lowered = stderr.to_lowercase();
    if ADDR_IN_USE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return TunnelError::PortUnavailable(stderr.to_string());
    }
    if stderr.is_empty() {
        TunnelError::TransportStartFailed(format!("{} exited early ({})", program, status))
    } else {
        TunnelError::TransportStartFailed(format!(
            "{} exited early ({}): {}",
            program, status, stderr
        ))
    }
}

/// Forward plugin stderr into the log so the pipe never fills
async fn drain_stderr(session_id: SessionId, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!("[{}] {}", session_id, line);
    }
}

/// A running plugin process
pub struct PluginProcess {
    child: Child,
    pid: Option<u32>,
    session_id: SessionId,
    stop_timeout: Duration,
}

impl PluginProcess {
    #[cfg(unix)]
    fn terminate(&self) -> bool {
        match self.child.id() {
            Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
            None => false,
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> bool {
        false
    }
}

#[async_trait]
impl TransportProcess for PluginProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn stop(&mut self) -> StopOutcome {
        if !self.is_alive() {
            tracing::debug!("Transport for {} had already exited", self.session_id);
            return StopOutcome::AlreadyExited;
        }

        if self.terminate() {
            if tokio::time::timeout(self.stop_timeout, self.child.wait())
                .await
                .is_ok()
            {
                tracing::debug!("Transport for {} stopped", self.session_id);
                return StopOutcome::Graceful;
            }
            tracing::warn!(
                "Transport for {} ignored SIGTERM for {:?}, killing",
                self.session_id,
                self.stop_timeout
            );
        }

        if let Err(e) = self.child.start_kill() {
            tracing::warn!("Failed to kill transport for {}: {}", self.session_id, e);
        }
        match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
            Ok(_) => StopOutcome::Killed,
            Err(_) => {
                tracing::warn!("Transport for {} did not exit after SIGKILL", self.session_id);
                StopOutcome::Unresponsive
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use st_core::traits::RelayTicket;
    use st_core::TargetId;

    fn launch() -> TransportLaunch {
        TransportLaunch {
            ticket: RelayTicket {
                session_id: SessionId::new("s-123"),
                stream_url: "wss://example/stream".into(),
                token_value: "tok".into(),
            },
            target_id: TargetId::new("i-0abc"),
            local_port: 40123,
            remote_port: 22,
        }
    }

    fn supervisor(program: &str, args: &[&str]) -> PluginSupervisor {
        let mut config = TunnelConfig::default();
        config.transport.program = program.into();
        config.transport.args = args.iter().map(|a| a.to_string()).collect();
        config.transport.stop_timeout = Duration::from_secs(2);
        PluginSupervisor::from_config(&config, "us-east-1")
    }

    #[test]
    fn test_default_args_follow_plugin_contract() {
        let mut config = TunnelConfig::default();
        config.aws.profile = Some("dev".into());
        let supervisor = PluginSupervisor::from_config(&config, "eu-west-1");
        let args = supervisor.render_args(&launch());

        assert_eq!(args.len(), 6);
        let ticket: serde_json::Value = serde_json::from_str(&args[0]).unwrap();
        assert_eq!(ticket["SessionId"], "s-123");
        assert_eq!(ticket["TokenValue"], "tok");
        assert_eq!(args[1], "eu-west-1");
        assert_eq!(args[2], "StartSession");
        assert_eq!(args[3], "dev");

        let params: serde_json::Value = serde_json::from_str(&args[4]).unwrap();
        assert_eq!(params["Target"], "i-0abc");
        assert_eq!(params["Parameters"]["localPortNumber"][0], "40123");
        assert_eq!(params["Parameters"]["portNumber"][0], "22");
        assert_eq!(args[5], "https://ssm.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let supervisor = supervisor("true", &["--port={local_port}", "{nope}", "{unclosed"]);
        assert_eq!(
            supervisor.render_args(&launch()),
            vec!["--port=40123", "{nope}", "{unclosed"]
        );
    }

    #[test]
    fn test_render_is_single_pass() {
        let out = render("{a}-{b}", |name| match name {
            "a" => Some("{b}".to_string()),
            "b" => Some("x".to_string()),
            _ => None,
        });
        assert_eq!(out, "{b}-x");
    }

    #[tokio::test]
    async fn test_running_process_stops_gracefully() {
        let supervisor = supervisor("sleep", &["30"]);
        let mut process = supervisor.start(&launch()).await.unwrap();

        assert!(process.pid().is_some());
        assert!(process.is_alive());
        assert_eq!(process.stop().await, StopOutcome::Graceful);
        assert!(!process.is_alive());
        assert_eq!(process.stop().await, StopOutcome::AlreadyExited);
    }

    #[tokio::test]
    async fn test_sigterm_ignored_is_killed() {
        let supervisor = supervisor("sh", &["-c", "trap '' TERM; sleep 30"]);
        let mut process = supervisor.start(&launch()).await.unwrap();
        assert_eq!(process.stop().await, StopOutcome::Killed);
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_early_exit_is_start_failure() {
        let supervisor = supervisor("sh", &["-c", "echo boom >&2; exit 3"]);
        let err = supervisor.start(&launch()).await.err().unwrap();
        match err {
            TunnelError::TransportStartFailed(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_address_in_use_is_port_unavailable() {
        let supervisor = supervisor(
            "sh",
            &["-c", "echo 'listen tcp 127.0.0.1:40123: bind: address already in use' >&2; exit 1"],
        );
        let err = supervisor.start(&launch()).await.err().unwrap();
        assert!(matches!(err, TunnelError::PortUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_start_failure() {
        let supervisor = supervisor("definitely-not-a-plugin", &[]);
        let err = supervisor.start(&launch()).await.err().unwrap();
        assert!(matches!(err, TunnelError::TransportStartFailed(_)));
    }
}
