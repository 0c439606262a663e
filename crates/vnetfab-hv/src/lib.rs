//! Hypervisor command protocol: a line-oriented TCP control plane for
//! creating and wiring ATM switches, ATM bridges, Frame-Relay switches,
//! NICs, and NIOs at runtime, plus a startup config-file format for the
//! same.

pub mod command;
pub mod config;
pub mod modules;
pub mod reply;
pub mod server;
pub mod state;

pub use command::{CmdHandler, CmdOutcome, Command, CommandTable, Module};
pub use config::{parse as parse_config, ConfigError, Statement as ConfigStatement};
pub use reply::{format_line, ReplyCode};
pub use server::serve;
pub use state::HvState;

/// Builds the full command table this crate knows how to serve: `atmsw`,
/// `frsw`, `atm_bridge`, `nio`, and the base `hypervisor` module.
pub fn default_command_table() -> CommandTable {
    CommandTable::new()
        .register_module("atmsw", modules::atmsw_module())
        .register_module("frsw", modules::frsw_module())
        .register_module("atm_bridge", modules::atm_bridge_module())
        .register_module("nio", modules::nio_module())
        .register_module("nic", modules::nic_module())
        .register_module("hypervisor", modules::hypervisor_module())
}
