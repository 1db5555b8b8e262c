pub mod call;
pub mod config;
pub mod probe;
pub mod utils;

pub use call::{handle_call_command, CallArgs};
pub use config::{handle_config_command, load_config, ConfigCommands};
pub use probe::handle_probe_command;
