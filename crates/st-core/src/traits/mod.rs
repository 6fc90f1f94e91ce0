//! Core trait definitions
//!
//! The session manager only talks to the outside world through these seams,
//! which keeps it testable with in-process fakes.

mod inventory;
mod relay;
mod transport;

pub use inventory::InstanceInventory;
pub use relay::{RelayClient, RelayStatus, RelayTicket};
pub use transport::{StopOutcome, TransportLaunch, TransportProcess, TransportSupervisor};
