//! Process-level configuration, read from the environment so the binary
//! needs no flags for the common case.

use std::env;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7200";

pub struct RouterConfig {
    /// Address the hypervisor TCP server binds to.
    pub listen_addr: String,
    /// Optional startup config file (`IF:`/`VP:`/`VC:`/`BRIDGE:` statements)
    /// applied before the server starts accepting connections.
    pub config_path: Option<String>,
}

impl RouterConfig {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env::var("VNETFAB_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            config_path: env::var("VNETFAB_CONFIG").ok(),
        }
    }
}
