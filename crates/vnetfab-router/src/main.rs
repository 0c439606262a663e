//! Entry point: loads an optional startup config file, then serves the
//! hypervisor command protocol until the process is killed.

mod config;

use anyhow::Context;
use tracing::{error, info, warn};

use vnetfab_hv::{default_command_table, parse_config, ConfigStatement, HvState};

use config::RouterConfig;

/// Replays the parsed config-file statements as hypervisor commands against
/// a freshly-built state, logging (but not aborting on) per-statement
/// failures so one bad line doesn't keep the rest of the topology from
/// coming up.
fn apply_config(table: &vnetfab_hv::CommandTable, state: &HvState, statements: Vec<ConfigStatement>) {
    for statement in statements {
        let (module, cmd, args): (&str, &str, Vec<String>) = match statement {
            ConfigStatement::If { name, kind, args } if kind == "null" => {
                let _ = args;
                ("nio", "create_null", vec![name])
            }
            ConfigStatement::If { name, kind, mut args } if kind == "udp" => {
                let mut full = vec![name];
                full.append(&mut args);
                ("nio", "create_udp", full)
            }
            ConfigStatement::If { name, kind, .. } => {
                warn!(%name, %kind, "unsupported IF kind in config file, skipping");
                continue;
            }
            ConfigStatement::Vp { in_if, in_vpi, out_if, out_vpi } => (
                "atmsw",
                "create_vpc",
                vec!["main".to_string(), in_if, in_vpi.to_string(), out_if, out_vpi.to_string()],
            ),
            ConfigStatement::Vc { in_if, in_vpi, in_vci, out_if, out_vpi, out_vci } => (
                "atmsw",
                "create_vcc",
                vec![
                    "main".to_string(),
                    in_if,
                    in_vpi.to_string(),
                    in_vci.to_string(),
                    out_if,
                    out_vpi.to_string(),
                    out_vci.to_string(),
                ],
            ),
            ConfigStatement::Bridge { eth_if, atm_if, vpi, vci } => (
                "atm_bridge",
                "create",
                vec![eth_if.clone(), vpi.to_string(), vci.to_string(), eth_if, atm_if],
            ),
        };

        let replies = table.dispatch(state, module, cmd, &args);
        if let Some((code, _, text)) = replies.last() {
            if code.code() >= 200 {
                warn!(%module, %cmd, %text, "config statement failed");
            } else {
                info!(%module, %cmd, "config statement applied");
            }
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cfg = RouterConfig::from_env();

    let table = default_command_table();
    let state = HvState::new();
    state
        .atm_switches
        .add("main", std::sync::Mutex::new(vnetfab_atm::AtmSwitch::new()))
        .context("failed to create default ATM switch")?;

    if let Some(path) = &cfg.config_path {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
        let statements = parse_config(&text).with_context(|| format!("parsing config file {path:?}"))?;
        info!(%path, count = statements.len(), "applying startup config");
        apply_config(&table, &state, statements);
    }

    vnetfab_hv::serve(&cfg.listen_addr, table, state).context("hypervisor server failed")
}

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run() {
        error!(error = %e, "vnetfab-router exiting");
        std::process::exit(1);
    }
}
