//! Interactive prompt commands
//!
//! Parsing of prompt lines and resolution of the instance/session selectors
//! an operator types (`#2`, an ID, a name or a unique fragment of one).

use thiserror::Error;

use st_core::{Instance, Session, SessionId, TargetId};

/// Help text shown by `help`
pub const HELP: &str = "\
Commands:
  instances [filter]      List instances, optionally filtered by name or ID
  connect <id|name|#>     Open a tunnel to an instance
  list                    Show tunnels and their local ports
  terminate <session|#>   Close a tunnel
  help                    Show this help
  exit                    Close all tunnels and quit

Commands may also be written with a leading '/'.";

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptCommand {
    Instances(Option<String>),
    Connect(String),
    List,
    Terminate(String),
    Help,
    Exit,
    Empty,
}

/// Why a prompt line or selector was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Unknown command '{0}' (type 'help' for a list)")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    MissingArgument(&'static str),

    #[error("No match for '{0}'")]
    NoMatch(String),

    #[error("'{selector}' is ambiguous: {candidates}")]
    Ambiguous {
        selector: String,
        candidates: String,
    },

    #[error("#{index} is out of range (1-{len})")]
    OutOfRange { index: usize, len: usize },
}

impl PromptCommand {
    /// Parse one prompt line
    pub fn parse(line: &str) -> Result<Self, PromptError> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let argument = (!rest.is_empty()).then(|| rest.to_string());

        match word.to_lowercase().as_str() {
            "" => Ok(PromptCommand::Empty),
            "instances" | "ls" => Ok(PromptCommand::Instances(argument)),
            "connect" => argument
                .map(PromptCommand::Connect)
                .ok_or(PromptError::MissingArgument("connect <id|name|#>")),
            "list" | "sessions" => Ok(PromptCommand::List),
            "terminate" | "kill" => argument
                .map(PromptCommand::Terminate)
                .ok_or(PromptError::MissingArgument("terminate <session|#>")),
            "help" | "?" => Ok(PromptCommand::Help),
            "exit" | "quit" => Ok(PromptCommand::Exit),
            other => Err(PromptError::UnknownCommand(other.to_string())),
        }
    }
}

/// `#3` or `3` as a 1-based position
fn index_of(selector: &str) -> Option<usize> {
    selector.strip_prefix('#').unwrap_or(selector).parse().ok()
}

fn pick<T: Clone>(items: &[T], index: usize) -> Result<T, PromptError> {
    index
        .checked_sub(1)
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or(PromptError::OutOfRange {
            index,
            len: items.len(),
        })
}

/// Resolve what the operator typed after `connect` against the last
/// instance listing.
///
/// Order: position (`#n`), exact ID, exact name (case-insensitive), unique
/// substring of name or ID. An `i-` prefixed selector that matches nothing
/// is taken as a raw instance ID.
pub fn resolve_target(selector: &str, instances: &[Instance]) -> Result<TargetId, PromptError> {
    let selector = selector.trim();
    if let Some(index) = index_of(selector) {
        return pick(instances, index).map(|i| i.id);
    }

    if let Some(found) = instances.iter().find(|i| i.id.as_str() == selector) {
        return Ok(found.id.clone());
    }

    let named: Vec<&Instance> = instances
        .iter()
        .filter(|i| i.name.eq_ignore_ascii_case(selector))
        .collect();
    if named.len() == 1 {
        return Ok(named[0].id.clone());
    }

    let partial: Vec<&Instance> = if named.len() > 1 {
        named
    } else {
        instances.iter().filter(|i| i.matches(selector)).collect()
    };
    match partial.as_slice() {
        [one] => Ok(one.id.clone()),
        [] if selector.starts_with("i-") => Ok(TargetId::new(selector)),
        [] => Err(PromptError::NoMatch(selector.to_string())),
        many => Err(PromptError::Ambiguous {
            selector: selector.to_string(),
            candidates: many
                .iter()
                .map(|i| format!("{} ({})", i.name, i.id))
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

/// Resolve a session by position in the listing, exact ID or unique prefix
pub fn resolve_session(selector: &str, sessions: &[Session]) -> Result<SessionId, PromptError> {
    let selector = selector.trim();
    if let Some(index) = index_of(selector) {
        return pick(sessions, index).map(|s| s.session_id);
    }

    if let Some(found) = sessions.iter().find(|s| s.session_id.as_str() == selector) {
        return Ok(found.session_id.clone());
    }

    let prefixed: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.session_id.as_str().starts_with(selector))
        .collect();
    match prefixed.as_slice() {
        [one] => Ok(one.session_id.clone()),
        // Unknown IDs still go to the orchestrator, which reports not found
        [] => Ok(SessionId::new(selector)),
        many => Err(PromptError::Ambiguous {
            selector: selector.to_string(),
            candidates: many
                .iter()
                .map(|s| s.session_id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}
