//! ssm-tunnel: interactive SSM port-forwarding tunnels
//!
//! The `ssm-tunnel` binary lists EC2 instances, opens tunnels to them and
//! keeps those tunnels renewed until the operator closes them or exits.

pub mod commands;
pub mod inventory;
pub mod output;
pub mod prompt;
