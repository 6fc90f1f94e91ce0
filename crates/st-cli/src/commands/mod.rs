//! CLI command implementations

mod config;
mod connect;
mod instances;
mod interactive;
mod list;
mod terminate;

pub use config::{config_init, config_path, config_show, load_effective_config, Overrides};
pub use connect::connect_command;
pub use instances::instances_command;
pub use interactive::{Flow, Shell};
pub use list::list_command;
pub use terminate::terminate_command;
