//! SSM control plane over the AWS JSON 1.1 protocol

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use st_core::config::TunnelConfig;
use st_core::traits::{RelayClient, RelayStatus, RelayTicket};
use st_core::{SessionId, TargetId, TunnelError};

use super::sigv4::{self, SignableRequest};
use super::{poll_until, PollStatus};
use crate::aws_cli::{AwsCli, CredentialCache};

const SERVICE: &str = "ssm";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Error body returned by the JSON protocol
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiError {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default, alias = "Message")]
    message: String,
}

impl ApiError {
    /// Bare error code, e.g. `InvalidTarget`
    fn code(&self) -> &str {
        let code = self.kind.rsplit('#').next().unwrap_or_default();
        code.split(':').next().unwrap_or_default()
    }
}

fn classify(error: &ApiError) -> TunnelError {
    let message = if error.message.is_empty() {
        error.code().to_string()
    } else {
        error.message.clone()
    };
    match error.code() {
        "TargetNotConnected" | "InvalidTarget" | "InvalidInstanceId" => {
            TunnelError::TargetUnreachable(message)
        }
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "ExpiredTokenException"
        | "InvalidSignatureException"
        | "IncompleteSignature"
        | "MissingAuthenticationToken" => TunnelError::Auth(message),
        "DoesNotExistException" | "InvalidCommandId" => TunnelError::SessionNotFound(message),
        code => TunnelError::Relay(format!("{}: {}", code, message)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendCommandResponse {
    command: CommandSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommandSummary {
    command_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommandInvocation {
    status: String,
    #[serde(default)]
    status_details: String,
    #[serde(default)]
    response_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSessionsResponse {
    #[serde(default)]
    sessions: Vec<SessionSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionSummary {
    session_id: String,
    #[serde(default)]
    status: String,
}

/// Map a command invocation onto a poll observation
fn invocation_status(invocation: &CommandInvocation) -> PollStatus {
    match invocation.status.as_str() {
        "Success" => PollStatus::Done,
        "Pending" | "InProgress" | "Delayed" | "Cancelling" => PollStatus::Pending,
        other => {
            let mut reason = other.to_string();
            if !invocation.status_details.is_empty() && invocation.status_details != other {
                reason = format!("{} ({})", reason, invocation.status_details);
            }
            if let Some(code) = invocation.response_code.filter(|c| *c >= 0) {
                reason = format!("{}, exit code {}", reason, code);
            }
            PollStatus::Failed(reason)
        }
    }
}

/// `RelayClient` backed by AWS Systems Manager
pub struct SsmRelay {
    http: reqwest::Client,
    credentials: CredentialCache,
    region: String,
    endpoint: reqwest::Url,
    document_name: String,
    renew_document: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl SsmRelay {
    /// Build from configuration, resolving the region through the AWS CLI
    /// if neither the config nor the environment names one.
    pub async fn from_config(config: &TunnelConfig) -> Result<Self, TunnelError> {
        let cli = AwsCli::from_config(&config.aws);
        let region = cli.resolve_region().await?;
        let cli = cli.with_region(region.clone());

        let raw_endpoint = config.aws.ssm_endpoint(&region);
        let endpoint = reqwest::Url::parse(&raw_endpoint).map_err(|e| {
            TunnelError::Config(st_core::ConfigError::Invalid(format!(
                "aws.endpoint {:?}: {}",
                raw_endpoint, e
            )))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TunnelError::Relay(format!("failed to build HTTP client: {}", e)))?;

        tracing::debug!("SSM relay for region {} at {}", region, endpoint);
        Ok(Self {
            http,
            credentials: CredentialCache::new(cli),
            region,
            endpoint,
            document_name: config.document_name.clone(),
            renew_document: config.renew_document.clone(),
            poll_interval: config.renewal.poll_interval,
            poll_timeout: config.renewal.poll_timeout,
        })
    }

    /// Region the relay talks to
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Control-plane endpoint URL
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn host_header(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Send one signed request. The outer error is a transport or credential
    /// problem; the inner one is the service's own error body.
    async fn send(&self, operation: &str, body: &Value) -> Result<Result<Value, ApiError>, TunnelError> {
        let credentials = self.credentials.get().await?;
        let payload = serde_json::to_vec(body)
            .map_err(|e| TunnelError::Relay(format!("cannot encode {} request: {}", operation, e)))?;
        let target = format!("AmazonSSM.{}", operation);

        let request = SignableRequest {
            method: "POST",
            path: self.endpoint.path(),
            headers: vec![
                ("content-type".to_string(), CONTENT_TYPE.to_string()),
                ("host".to_string(), self.host_header()),
                ("x-amz-target".to_string(), target),
            ],
            payload: &payload,
        };
        let signed = sigv4::sign(
            &request,
            &credentials,
            &self.region,
            SERVICE,
            chrono::Utc::now(),
        );

        let mut builder = self.http.post(self.endpoint.clone());
        for (name, value) in request.headers.iter().chain(signed.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tracing::trace!("SSM {} {}", operation, body);
        let response = builder
            .body(payload.clone())
            .send()
            .await
            .map_err(|e| TunnelError::Relay(format!("{} request failed: {}", operation, e)))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TunnelError::Relay(format!("{} response unreadable: {}", operation, e)))?;

        if status.is_success() {
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).map_err(|e| {
                    TunnelError::Relay(format!("{} returned invalid JSON: {}", operation, e))
                })?
            };
            return Ok(Ok(value));
        }

        let mut error: ApiError = serde_json::from_slice(&bytes).unwrap_or_default();
        if error.kind.is_empty() {
            error.kind = format!("HTTP{}", status.as_u16());
        }
        tracing::debug!("SSM {} failed: {} {}", operation, error.code(), error.message);
        Ok(Err(error))
    }

    /// Send a request and decode its response, classifying service errors
    async fn call<T: DeserializeOwned>(&self, operation: &str, body: Value) -> Result<T, TunnelError> {
        match self.send(operation, &body).await? {
            Ok(value) => serde_json::from_value(value).map_err(|e| {
                TunnelError::Relay(format!("unexpected {} response: {}", operation, e))
            }),
            Err(api) => {
                let err = classify(&api);
                if matches!(err, TunnelError::Auth(_)) {
                    self.credentials.invalidate().await;
                }
                Err(err)
            }
        }
    }

    async fn find_session(
        &self,
        session_id: &SessionId,
        state: &str,
    ) -> Result<Option<RelayStatus>, TunnelError> {
        let response: DescribeSessionsResponse = self
            .call(
                "DescribeSessions",
                json!({
                    "State": state,
                    "Filters": [{ "key": "SessionId", "value": session_id.as_str() }],
                }),
            )
            .await?;

        Ok(response
            .sessions
            .into_iter()
            .find(|s| s.session_id == session_id.as_str())
            .map(|s| RelayStatus::from_name(&s.status)))
    }
}

#[async_trait]
impl RelayClient for SsmRelay {
    async fn start_session(
        &self,
        target: &TargetId,
        remote_port: u16,
    ) -> Result<RelayTicket, TunnelError> {
        let ticket: RelayTicket = self
            .call(
                "StartSession",
                json!({
                    "Target": target.as_str(),
                    "DocumentName": self.document_name,
                    "Parameters": { "portNumber": [remote_port.to_string()] },
                    "Reason": "ssm-tunnel port forwarding",
                }),
            )
            .await?;
        tracing::info!("Opened relay session {} to {}", ticket.session_id, target);
        Ok(ticket)
    }

    async fn renew_session(
        &self,
        session_id: &SessionId,
        target: &TargetId,
    ) -> Result<(), TunnelError> {
        let sent: SendCommandResponse = self
            .call(
                "SendCommand",
                json!({
                    "DocumentName": self.renew_document,
                    "InstanceIds": [target.as_str()],
                    "Comment": format!("ssm-tunnel renewal of {}", session_id),
                }),
            )
            .await
            .map_err(|e| match e {
                TunnelError::SessionNotFound(msg) => TunnelError::SessionNotFound(format!(
                    "{} ({})",
                    session_id, msg
                )),
                other => other,
            })?;
        let command_id = sent.command.command_id;
        tracing::debug!("Renewal command {} sent for {}", command_id, session_id);

        poll_until(session_id, self.poll_interval, self.poll_timeout, || {
            let request = json!({
                "CommandId": command_id,
                "InstanceId": target.as_str(),
            });
            async move {
                match self.send("GetCommandInvocation", &request).await? {
                    Ok(value) => {
                        let invocation: CommandInvocation = serde_json::from_value(value)
                            .map_err(|e| {
                                TunnelError::Relay(format!(
                                    "unexpected GetCommandInvocation response: {}",
                                    e
                                ))
                            })?;
                        Ok(invocation_status(&invocation))
                    }
                    // Invocations become visible shortly after SendCommand returns
                    Err(api) if api.code() == "InvocationDoesNotExist" => Ok(PollStatus::Pending),
                    Err(api) => Err(classify(&api)),
                }
            }
        })
        .await
    }

    async fn describe_session(&self, session_id: &SessionId) -> Result<RelayStatus, TunnelError> {
        if let Some(status) = self.find_session(session_id, "Active").await? {
            return Ok(status);
        }
        if let Some(status) = self.find_session(session_id, "History").await? {
            return Ok(status);
        }
        Err(TunnelError::SessionNotFound(session_id.to_string()))
    }

    async fn terminate_session(&self, session_id: &SessionId) -> Result<bool, TunnelError> {
        match self
            .call::<Value>("TerminateSession", json!({ "SessionId": session_id.as_str() }))
            .await
        {
            Ok(_) => {
                tracing::info!("Terminated relay session {}", session_id);
                Ok(true)
            }
            Err(TunnelError::SessionNotFound(_)) => {
                tracing::debug!("Relay session {} was already gone", session_id);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(body: &str) -> ApiError {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_error_code_strips_namespace() {
        let err = api_error(
            r#"{"__type":"com.amazonaws.ssm#TargetNotConnected","message":"i-1 is not connected."}"#,
        );
        assert_eq!(err.code(), "TargetNotConnected");

        let err = api_error(r#"{"__type":"InvalidTarget:http://internal.amazon.com/","Message":"bad"}"#);
        assert_eq!(err.code(), "InvalidTarget");
        assert_eq!(err.message, "bad");
    }

    #[test]
    fn test_classify_target_errors() {
        let err = classify(&api_error(
            r#"{"__type":"TargetNotConnected","message":"i-1 is not connected."}"#,
        ));
        assert!(matches!(err, TunnelError::TargetUnreachable(m) if m == "i-1 is not connected."));

        let err = classify(&api_error(r#"{"__type":"InvalidTarget"}"#));
        assert!(matches!(err, TunnelError::TargetUnreachable(m) if m == "InvalidTarget"));
    }

    #[test]
    fn test_classify_auth_errors() {
        for code in [
            "AccessDeniedException",
            "UnrecognizedClientException",
            "ExpiredTokenException",
        ] {
            let err = classify(&ApiError {
                kind: code.into(),
                message: "denied".into(),
            });
            assert!(matches!(err, TunnelError::Auth(_)), "{} should be auth", code);
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn test_classify_missing_and_other() {
        let err = classify(&api_error(r#"{"__type":"DoesNotExistException","message":"gone"}"#));
        assert!(matches!(err, TunnelError::SessionNotFound(_)));

        let err = classify(&api_error(r#"{"__type":"ThrottlingException","message":"slow down"}"#));
        assert!(matches!(err, TunnelError::Relay(m) if m == "ThrottlingException: slow down"));
    }

    #[test]
    fn test_invocation_status_mapping() {
        let invocation = |status: &str| CommandInvocation {
            status: status.into(),
            status_details: String::new(),
            response_code: None,
        };
        assert_eq!(invocation_status(&invocation("Success")), PollStatus::Done);
        assert_eq!(invocation_status(&invocation("InProgress")), PollStatus::Pending);
        assert_eq!(invocation_status(&invocation("Delayed")), PollStatus::Pending);
        assert!(matches!(
            invocation_status(&invocation("TimedOut")),
            PollStatus::Failed(_)
        ));

        let failed = CommandInvocation {
            status: "Failed".into(),
            status_details: "Failed".into(),
            response_code: Some(1),
        };
        assert_eq!(
            invocation_status(&failed),
            PollStatus::Failed("Failed, exit code 1".into())
        );
    }

    #[test]
    fn test_start_session_response_is_a_ticket() {
        let ticket: RelayTicket = serde_json::from_str(
            r#"{"SessionId":"user-0abc","StreamUrl":"wss://ssmmessages/x","TokenValue":"tok"}"#,
        )
        .unwrap();
        assert_eq!(ticket.session_id.as_str(), "user-0abc");
        assert_eq!(ticket.token_value, "tok");
    }

    #[test]
    fn test_describe_sessions_response_parsing() {
        let response: DescribeSessionsResponse = serde_json::from_str(
            r#"{"Sessions":[{"SessionId":"s-1","Target":"i-1","Status":"Terminated"}]}"#,
        )
        .unwrap();
        assert_eq!(response.sessions.len(), 1);
        assert!(RelayStatus::from_name(&response.sessions[0].status).is_ended());

        let empty: DescribeSessionsResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_override_is_used() {
        let mut config = TunnelConfig::default();
        config.aws.region = Some("eu-west-1".into());
        config.aws.endpoint = Some("https://vpce-123.ssm.eu-west-1.vpce.amazonaws.com".into());
        let relay = SsmRelay::from_config(&config).await.unwrap();

        assert_eq!(relay.region(), "eu-west-1");
        assert_eq!(
            relay.endpoint(),
            "https://vpce-123.ssm.eu-west-1.vpce.amazonaws.com/"
        );
        assert_eq!(relay.host_header(), "vpce-123.ssm.eu-west-1.vpce.amazonaws.com");
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_config_error() {
        let mut config = TunnelConfig::default();
        config.aws.region = Some("eu-west-1".into());
        config.aws.endpoint = Some("not a url".into());
        assert!(matches!(
            SsmRelay::from_config(&config).await,
            Err(TunnelError::Config(_))
        ));
    }
}
