//! CLI command implementations

mod config;
mod connect;
mod daemon;
mod disconnect;
mod list;
mod services;

pub use config::{config_path, config_show};
pub use connect::{connect_command, ConnectOptions};
pub use daemon::{daemon_portforward, PortforwardArgs};
pub use disconnect::disconnect_command;
pub use list::list_command;
pub use services::services_command;
