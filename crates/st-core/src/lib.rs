//! st-core: Core abstractions and configuration for ssm-tunnel
//!
//! This crate provides the shared types, error taxonomy, collaborator traits
//! and configuration structures used by the session manager and the CLI.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, TunnelError};
pub use types::{Instance, InstanceState, Session, SessionId, SessionState, TargetId};
