//! st-session: session lifecycle manager for ssm-tunnel
//!
//! Allocates local ports, opens relay sessions on the SSM control plane,
//! supervises the forwarding process of each session, renews sessions
//! before they expire and tears everything down again. The
//! [`SessionOrchestrator`] is the entry point; the remaining modules are
//! its parts.

pub mod aws_cli;
pub mod orchestrator;
pub mod port;
pub mod registry;
pub mod relay;
pub mod renewal;
pub mod transport;

#[cfg(test)]
mod testing;

pub use orchestrator::{SessionOrchestrator, ShutdownReport, TeardownReport, TerminateOutcome};
pub use port::{PortAllocator, PortLease};
pub use registry::SessionRegistry;
pub use relay::SsmRelay;
pub use transport::PluginSupervisor;
