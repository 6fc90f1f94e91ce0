//! The interactive prompt
//!
//! [`Shell`] keeps the last instance and session listings so selectors like
//! `#2` resolve against what the operator just saw. Reading lines and
//! signal handling live in the binary.

use std::sync::Arc;

use anyhow::Result;

use super::{connect_command, instances_command, list_command, terminate_command};
use crate::output::{print_error, print_info};
use crate::prompt::{resolve_session, resolve_target, PromptCommand, PromptError, HELP};
use st_core::traits::InstanceInventory;
use st_core::{Instance, Session, SessionState};
use st_session::SessionOrchestrator;

/// What the prompt loop should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    orchestrator: Arc<SessionOrchestrator>,
    inventory: Arc<dyn InstanceInventory>,
    instances: Vec<Instance>,
    sessions: Vec<Session>,
    reported_failures: Vec<String>,
}

impl Shell {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        inventory: Arc<dyn InstanceInventory>,
    ) -> Self {
        Self {
            orchestrator,
            inventory,
            instances: Vec::new(),
            sessions: Vec::new(),
            reported_failures: Vec::new(),
        }
    }

    /// Run one prompt line. Errors are printed, never returned.
    pub async fn handle_line(&mut self, line: &str) -> Flow {
        self.report_new_failures();

        let command = match PromptCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                print_error(&e.to_string());
                return Flow::Continue;
            }
        };

        let result = match command {
            PromptCommand::Empty => Ok(()),
            PromptCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            PromptCommand::Exit => return Flow::Exit,
            PromptCommand::Instances(filter) => self.instances(filter.as_deref()).await,
            PromptCommand::Connect(selector) => self.connect(&selector).await,
            PromptCommand::List => {
                self.sessions = list_command(&self.orchestrator);
                Ok(())
            }
            PromptCommand::Terminate(selector) => self.terminate(&selector).await,
        };

        if let Err(e) = result {
            print_error(&format!("{:#}", e));
        }
        Flow::Continue
    }

    async fn instances(&mut self, filter: Option<&str>) -> Result<()> {
        self.instances = instances_command(self.inventory.as_ref(), filter).await?;
        Ok(())
    }

    /// Connect by selector, fetching the inventory first if nothing was
    /// listed yet and the selector needs it.
    pub async fn connect(&mut self, selector: &str) -> Result<()> {
        let target = match resolve_target(selector, &self.instances) {
            Ok(target) => target,
            Err(PromptError::NoMatch(_) | PromptError::OutOfRange { .. })
                if self.instances.is_empty() =>
            {
                self.instances = self.inventory.list_instances(None).await?;
                resolve_target(selector, &self.instances)?
            }
            Err(e) => return Err(e.into()),
        };
        connect_command(&self.orchestrator, &target).await?;
        Ok(())
    }

    async fn terminate(&mut self, selector: &str) -> Result<()> {
        if self.sessions.is_empty() {
            self.sessions = self.orchestrator.list_sessions();
        }
        let session_id = resolve_session(selector, &self.sessions)?;
        terminate_command(&self.orchestrator, &session_id).await?;
        self.sessions.retain(|s| s.session_id != session_id);
        Ok(())
    }

    /// Mention sessions that failed in the background since the last line
    fn report_new_failures(&mut self) {
        for session in self.orchestrator.list_sessions() {
            if session.state != SessionState::Failed
                || self
                    .reported_failures
                    .iter()
                    .any(|id| id == session.session_id.as_str())
            {
                continue;
            }
            print_info(&format!(
                "Session {} to {} failed: {}",
                session.session_id,
                session.target_id,
                session.failure.as_deref().unwrap_or("unknown reason")
            ));
            self.reported_failures
                .push(session.session_id.as_str().to_string());
        }
    }
}
