//! Per-object-kind command modules: `atmsw`, `atm_bridge`, `frsw`, `nio`,
//! `nic`, and the base `hypervisor` module, mirroring the per-type
//! hypervisor modules dynamips registers (`hv_atmsw.c`, `hv_frsw.c`, ...).
//!
//! Beyond the plain create/delete/rename/list bookkeeping, `create_vpc`,
//! `create_vcc`, `frsw create_vc`, `atm_bridge create`, and `nic connect`
//! all resolve the NIO names they're given through [`HvState::nios`] and
//! register an RX listener on the input side, so a cross-connect entered
//! through this protocol actually moves frames rather than only living in
//! a forwarding table.

use std::sync::{Arc, Mutex};

use vnetfab_atm::cell::CELL_SIZE;
use vnetfab_atm::AtmSwitch;
use vnetfab_atm_bridge::AtmBridge;
use vnetfab_frsw::FrswSwitch;
use vnetfab_nic::{NicProfile, SoftwareStyle};
use vnetfab_nio::{Nio, RxHandler, Transport};

use crate::command::{parse_u32, CmdOutcome, Module};
use crate::reply::ReplyCode;
use crate::state::{HvState, NicInstance};

fn err(code: ReplyCode, msg: impl Into<String>) -> CmdOutcome {
    CmdOutcome::Err(code, msg.into())
}

fn parse_u64(s: &str) -> Result<u64, CmdOutcome> {
    s.parse().map_err(|_| CmdOutcome::Err(ReplyCode::ErrInvalidParam, format!("'{s}' is not a valid number")))
}

/// Binds (or rebinds) the RX listener that drives cells arriving on
/// `input_port` through `sw`'s forwarding table and out whatever port
/// `handle_cell` names. Re-running this for a second VPC/VCC on the same
/// input is harmless: the closure doesn't care which cross-connect fired,
/// only that `sw` owns one covering the cell it just got handed.
fn bind_atm_cell_listener(
    state: &HvState,
    sw: Arc<Mutex<AtmSwitch>>,
    switch_name: &str,
    input_port: &str,
    input_nio: Arc<Mutex<Nio>>,
) {
    let key = format!("atmsw:{switch_name}:{input_port}");
    let nios = state.nios.clone();
    let input_port = input_port.to_string();
    let handler: RxHandler = Box::new(move |_name, frame| {
        if frame.len() != CELL_SIZE {
            return;
        }
        let mut cell = [0u8; CELL_SIZE];
        cell.copy_from_slice(frame);
        let out_port = sw.lock().unwrap().handle_cell(&input_port, &mut cell);
        if let Some(out_port) = out_port {
            if let Some(out_nio) = nios.find(&out_port) {
                let _ = out_nio.lock().unwrap().send(&cell);
            }
        }
    });
    state.set_listener(key, input_nio, handler);
}

fn bind_frsw_listener(
    state: &HvState,
    sw: Arc<Mutex<FrswSwitch>>,
    switch_name: &str,
    input_port: &str,
    input_nio: Arc<Mutex<Nio>>,
) {
    let key = format!("frsw:{switch_name}:{input_port}");
    let nios = state.nios.clone();
    let input_port = input_port.to_string();
    let handler: RxHandler = Box::new(move |_name, frame| {
        let mut frame = frame.to_vec();
        let out_port = sw.lock().unwrap().handle_frame(&input_port, &mut frame);
        if let Some(out_port) = out_port {
            if let Some(out_nio) = nios.find(&out_port) {
                let _ = out_nio.lock().unwrap().send(&frame);
            }
        }
    });
    state.set_listener(key, input_nio, handler);
}

fn bind_atm_bridge_listeners(
    state: &HvState,
    bridge: Arc<Mutex<AtmBridge>>,
    bridge_name: &str,
    eth_nio: Arc<Mutex<Nio>>,
    atm_nio: Arc<Mutex<Nio>>,
) {
    let eth_to_atm = bridge.clone();
    let atm_out = atm_nio.clone();
    let eth_handler: RxHandler = Box::new(move |_name, frame| {
        let cells = eth_to_atm.lock().unwrap().eth_to_atm(frame);
        let mut atm_out = atm_out.lock().unwrap();
        for cell in &cells {
            let _ = atm_out.send(cell);
        }
    });
    state.set_listener(format!("atm_bridge:{bridge_name}:eth"), eth_nio.clone(), eth_handler);

    let eth_out = eth_nio;
    let atm_handler: RxHandler = Box::new(move |_name, frame| {
        if frame.len() != CELL_SIZE {
            return;
        }
        let mut cell = [0u8; CELL_SIZE];
        cell.copy_from_slice(frame);
        if let Ok(Some(eth_frame)) = bridge.lock().unwrap().atm_to_eth(&cell) {
            let _ = eth_out.lock().unwrap().send(&eth_frame);
        }
    });
    state.set_listener(format!("atm_bridge:{bridge_name}:atm"), atm_nio, atm_handler);
}

fn bind_nic_listener(state: &HvState, nic: Arc<Mutex<NicInstance>>, nic_name: &str, nio: Arc<Mutex<Nio>>) {
    let key = format!("nic:{nic_name}");
    let nio_out = nio.clone();
    let handler: RxHandler = Box::new(move |_name, frame| {
        let mut inst = nic.lock().unwrap();
        inst.engine.enqueue_rx_frame(frame.to_vec());
        let NicInstance { engine, mem } = &mut *inst;
        engine.poll(mem);
        while let Some(tx_frame) = engine.pop_tx_frame() {
            let _ = nio_out.lock().unwrap().send(&tx_frame);
        }
    });
    state.set_listener(key, nio, handler);
}

fn parse_nic_profile(name: &str) -> Option<NicProfile> {
    match name {
        "dec21140" => Some(NicProfile::Dec21140),
        "am79c971" => Some(NicProfile::Am79c971 { style: SoftwareStyle::Style0 }),
        "i8255x" => Some(NicProfile::I8255x),
        "i8254x" => Some(NicProfile::I8254x),
        "pos-oc3" => Some(NicProfile::PosOc3),
        _ => None,
    }
}

pub fn atmsw_module() -> Module {
    Module::new()
        .register("create", 1, 1, |state, args| {
            match state.atm_switches.add(&args[0], Mutex::new(AtmSwitch::new())) {
                Ok(_) => CmdOutcome::Ok(vec![format!("ATMSW '{}' created", args[0])]),
                Err(e) => err(ReplyCode::ErrCreate, e.to_string()),
            }
        })
        .register("delete", 1, 1, |state, args| {
            state.clear_listeners_with_prefix(&format!("atmsw:{}:", args[0]));
            match state.atm_switches.delete_if_unused(&args[0]) {
                Ok(true) => CmdOutcome::Ok(vec![format!("ATMSW '{}' deleted", args[0])]),
                Ok(false) => err(ReplyCode::ErrDelete, "switch still in use"),
                Err(e) => err(ReplyCode::ErrDelete, e.to_string()),
            }
        })
        .register("create_vpc", 5, 5, |state, args| {
            let Some(sw) = state.atm_switches.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no ATMSW '{}'", args[0]));
            };
            let Some(input_nio) = state.nios.find(&args[1]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[1]));
            };
            if state.nios.find(&args[3]).is_none() {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[3]));
            }
            let vpi_in = match parse_u32(&args[2]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let vpi_out = match parse_u32(&args[4]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let result = sw.lock().unwrap().create_vpc(&args[1], vpi_in, &args[3], vpi_out);
            match result {
                Ok(()) => {
                    bind_atm_cell_listener(state, sw, &args[0], &args[1], input_nio);
                    CmdOutcome::Ok(vec!["VPC created".to_string()])
                }
                Err(e) => err(ReplyCode::ErrBinding, e.to_string()),
            }
        })
        .register("create_vcc", 7, 7, |state, args| {
            let Some(sw) = state.atm_switches.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no ATMSW '{}'", args[0]));
            };
            let Some(input_nio) = state.nios.find(&args[1]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[1]));
            };
            if state.nios.find(&args[4]).is_none() {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[4]));
            }
            let vpi_in = match parse_u32(&args[2]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let vci_in = match parse_u32(&args[3]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let vpi_out = match parse_u32(&args[5]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let vci_out = match parse_u32(&args[6]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let result = sw.lock().unwrap().create_vcc(&args[1], vpi_in, vci_in, &args[4], vpi_out, vci_out);
            match result {
                Ok(()) => {
                    bind_atm_cell_listener(state, sw, &args[0], &args[1], input_nio);
                    CmdOutcome::Ok(vec!["VCC created".to_string()])
                }
                Err(e) => err(ReplyCode::ErrBinding, e.to_string()),
            }
        })
        .register("delete_vpc", 3, 3, |state, args| {
            let Some(sw) = state.atm_switches.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no ATMSW '{}'", args[0]));
            };
            let vpi_in = match parse_u32(&args[2]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let result = sw.lock().unwrap().delete_vpc(&args[1], vpi_in);
            match result {
                Ok(()) => CmdOutcome::Ok(vec![]),
                Err(e) => err(ReplyCode::ErrBinding, e.to_string()),
            }
        })
        .register("delete_vcc", 4, 4, |state, args| {
            let Some(sw) = state.atm_switches.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no ATMSW '{}'", args[0]));
            };
            let vpi_in = match parse_u32(&args[2]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let vci_in = match parse_u32(&args[3]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let result = sw.lock().unwrap().delete_vcc(&args[1], vpi_in, vci_in);
            match result {
                Ok(()) => CmdOutcome::Ok(vec![]),
                Err(e) => err(ReplyCode::ErrBinding, e.to_string()),
            }
        })
        .register("rename", 2, 2, |state, args| match state.atm_switches.rename(&args[0], &args[1]) {
            Ok(()) => CmdOutcome::Ok(vec![]),
            Err(e) => err(ReplyCode::ErrRename, e.to_string()),
        })
        .register("list", 0, 0, |state, _args| {
            let mut names = Vec::new();
            state.atm_switches.foreach_type(|name, _| names.push(name.to_string()));
            CmdOutcome::Ok(names)
        })
}

pub fn frsw_module() -> Module {
    Module::new()
        .register("create", 1, 1, |state, args| {
            match state.frsw_switches.add(&args[0], Mutex::new(FrswSwitch::new())) {
                Ok(_) => CmdOutcome::Ok(vec![format!("FRSW '{}' created", args[0])]),
                Err(e) => err(ReplyCode::ErrCreate, e.to_string()),
            }
        })
        .register("delete", 1, 1, |state, args| {
            state.clear_listeners_with_prefix(&format!("frsw:{}:", args[0]));
            match state.frsw_switches.delete_if_unused(&args[0]) {
                Ok(true) => CmdOutcome::Ok(vec![format!("FRSW '{}' deleted", args[0])]),
                Ok(false) => err(ReplyCode::ErrDelete, "switch still in use"),
                Err(e) => err(ReplyCode::ErrDelete, e.to_string()),
            }
        })
        .register("create_vc", 5, 5, |state, args| {
            let Some(sw) = state.frsw_switches.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no FRSW '{}'", args[0]));
            };
            let Some(input_nio) = state.nios.find(&args[1]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[1]));
            };
            if state.nios.find(&args[3]).is_none() {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[3]));
            }
            let (dlci_in, dlci_out) = match (parse_u32(&args[2]), parse_u32(&args[4])) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return e,
            };
            let result = sw.lock().unwrap().create_vc(&args[1], dlci_in, &args[3], dlci_out);
            match result {
                Ok(()) => {
                    bind_frsw_listener(state, sw, &args[0], &args[1], input_nio);
                    CmdOutcome::Ok(vec!["VC created".to_string()])
                }
                Err(e) => err(ReplyCode::ErrBinding, e.to_string()),
            }
        })
        .register("delete_vc", 3, 3, |state, args| {
            let Some(sw) = state.frsw_switches.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no FRSW '{}'", args[0]));
            };
            let dlci_in = match parse_u32(&args[2]) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let result = sw.lock().unwrap().delete_vc(&args[1], dlci_in);
            match result {
                Ok(()) => CmdOutcome::Ok(vec![]),
                Err(e) => err(ReplyCode::ErrBinding, e.to_string()),
            }
        })
        .register("rename", 2, 2, |state, args| match state.frsw_switches.rename(&args[0], &args[1]) {
            Ok(()) => CmdOutcome::Ok(vec![]),
            Err(e) => err(ReplyCode::ErrRename, e.to_string()),
        })
        .register("list", 0, 0, |state, _args| {
            let mut names = Vec::new();
            state.frsw_switches.foreach_type(|name, _| names.push(name.to_string()));
            CmdOutcome::Ok(names)
        })
}

pub fn atm_bridge_module() -> Module {
    Module::new()
        .register("create", 5, 5, |state, args| {
            let (vpi, vci) = match (parse_u32(&args[1]), parse_u32(&args[2])) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return e,
            };
            let Some(eth_nio) = state.nios.find(&args[3]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[3]));
            };
            let Some(atm_nio) = state.nios.find(&args[4]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[4]));
            };
            match state.atm_bridges.add(&args[0], Mutex::new(AtmBridge::new(vpi, vci))) {
                Ok(bridge) => {
                    bind_atm_bridge_listeners(state, bridge, &args[0], eth_nio, atm_nio);
                    CmdOutcome::Ok(vec![format!("BRIDGE '{}' created", args[0])])
                }
                Err(e) => err(ReplyCode::ErrCreate, e.to_string()),
            }
        })
        .register("delete", 1, 1, |state, args| {
            state.clear_listener(&format!("atm_bridge:{}:eth", args[0]));
            state.clear_listener(&format!("atm_bridge:{}:atm", args[0]));
            match state.atm_bridges.delete_if_unused(&args[0]) {
                Ok(true) => CmdOutcome::Ok(vec![format!("BRIDGE '{}' deleted", args[0])]),
                Ok(false) => err(ReplyCode::ErrDelete, "bridge still in use"),
                Err(e) => err(ReplyCode::ErrDelete, e.to_string()),
            }
        })
        .register("rename", 2, 2, |state, args| match state.atm_bridges.rename(&args[0], &args[1]) {
            Ok(()) => CmdOutcome::Ok(vec![]),
            Err(e) => err(ReplyCode::ErrRename, e.to_string()),
        })
        .register("list", 0, 0, |state, _args| {
            let mut names = Vec::new();
            state.atm_bridges.foreach_type(|name, _| names.push(name.to_string()));
            CmdOutcome::Ok(names)
        })
}

pub fn nio_module() -> Module {
    Module::new()
        .register("create_udp", 2, 4, |state, args| {
            let local_port = match parse_u32(&args[1]) {
                Ok(v) => v as u16,
                Err(e) => return e,
            };
            let bind = format!("0.0.0.0:{local_port}").parse().unwrap();
            let remote = if args.len() == 4 {
                let host = &args[2];
                let port = match parse_u32(&args[3]) {
                    Ok(v) => v as u16,
                    Err(e) => return e,
                };
                match format!("{host}:{port}").parse() {
                    Ok(addr) => Some(addr),
                    Err(_) => return err(ReplyCode::ErrInvalidParam, "bad remote address"),
                }
            } else {
                None
            };
            let transport = match Transport::udp(bind, remote) {
                Ok(t) => t,
                Err(e) => return err(ReplyCode::ErrCreate, e.to_string()),
            };
            match state.nios.add(&args[0], Mutex::new(Nio::new(&args[0], transport))) {
                Ok(_) => CmdOutcome::Ok(vec![format!("NIO '{}' created", args[0])]),
                Err(e) => err(ReplyCode::ErrCreate, e.to_string()),
            }
        })
        .register("create_null", 1, 1, |state, args| {
            match state.nios.add(&args[0], Mutex::new(Nio::new(&args[0], Transport::null()))) {
                Ok(_) => CmdOutcome::Ok(vec![format!("NIO '{}' created", args[0])]),
                Err(e) => err(ReplyCode::ErrCreate, e.to_string()),
            }
        })
        .register("delete", 1, 1, |state, args| match state.nios.delete_if_unused(&args[0]) {
            Ok(true) => CmdOutcome::Ok(vec![format!("NIO '{}' deleted", args[0])]),
            Ok(false) => err(ReplyCode::ErrDelete, "NIO still in use"),
            Err(e) => err(ReplyCode::ErrDelete, e.to_string()),
        })
        .register("rename", 2, 2, |state, args| match state.nios.rename(&args[0], &args[1]) {
            Ok(()) => CmdOutcome::Ok(vec![]),
            Err(e) => err(ReplyCode::ErrRename, e.to_string()),
        })
        .register("list", 0, 0, |state, _args| {
            let mut names = Vec::new();
            state.nios.foreach_type(|name, _| names.push(name.to_string()));
            CmdOutcome::Ok(names)
        })
        .register("get_stats", 1, 1, |state, args| {
            let Some(nio) = state.nios.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[0]));
            };
            let stats = nio.lock().unwrap().stats().to_string();
            CmdOutcome::Ok(vec![stats])
        })
        .register("set_debug", 2, 2, |state, args| {
            let Some(nio) = state.nios.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[0]));
            };
            let enabled = match args[1].as_str() {
                "on" | "1" | "true" => true,
                "off" | "0" | "false" => false,
                _ => return err(ReplyCode::ErrInvalidParam, "expected on/off"),
            };
            nio.lock().unwrap().set_debug(enabled);
            CmdOutcome::Ok(vec![])
        })
}

/// The DMA-ring NIC emulators: creating one just builds the engine and its
/// backing memory, `connect` is what actually wires it to a real NIO the
/// same way `atmsw create_vpc`/`frsw create_vc` wire a switch port.
pub fn nic_module() -> Module {
    Module::new()
        .register("create", 2, 2, |state, args| {
            let Some(profile) = parse_nic_profile(&args[1]) else {
                return err(ReplyCode::ErrInvalidParam, format!("unknown NIC profile '{}'", args[1]));
            };
            let instance = NicInstance::new(profile.build_engine());
            match state.nics.add(&args[0], Mutex::new(instance)) {
                Ok(_) => CmdOutcome::Ok(vec![format!("NIC '{}' created as {}", args[0], profile.name())]),
                Err(e) => err(ReplyCode::ErrCreate, e.to_string()),
            }
        })
        .register("delete", 1, 1, |state, args| {
            state.clear_listener(&format!("nic:{}", args[0]));
            match state.nics.delete_if_unused(&args[0]) {
                Ok(true) => CmdOutcome::Ok(vec![format!("NIC '{}' deleted", args[0])]),
                Ok(false) => err(ReplyCode::ErrDelete, "NIC still in use"),
                Err(e) => err(ReplyCode::ErrDelete, e.to_string()),
            }
        })
        .register("rename", 2, 2, |state, args| match state.nics.rename(&args[0], &args[1]) {
            Ok(()) => CmdOutcome::Ok(vec![]),
            Err(e) => err(ReplyCode::ErrRename, e.to_string()),
        })
        .register("list", 0, 0, |state, _args| {
            let mut names = Vec::new();
            state.nics.foreach_type(|name, _| names.push(name.to_string()));
            CmdOutcome::Ok(names)
        })
        .register("set_promiscuous", 2, 2, |state, args| {
            let Some(nic) = state.nics.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIC '{}'", args[0]));
            };
            let promiscuous = match args[1].as_str() {
                "on" | "1" | "true" => true,
                "off" | "0" | "false" => false,
                _ => return err(ReplyCode::ErrInvalidParam, "expected on/off"),
            };
            nic.lock().unwrap().engine.set_promiscuous(promiscuous);
            CmdOutcome::Ok(vec![])
        })
        .register("configure_rx", 3, 3, |state, args| {
            let Some(nic) = state.nics.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIC '{}'", args[0]));
            };
            let (base, count) = match (parse_u64(&args[1]), parse_u32(&args[2])) {
                (Ok(b), Ok(c)) => (b, c),
                (Err(e), _) | (_, Err(e)) => return e,
            };
            nic.lock().unwrap().engine.configure_rx(base, count);
            CmdOutcome::Ok(vec![])
        })
        .register("configure_tx", 3, 3, |state, args| {
            let Some(nic) = state.nics.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIC '{}'", args[0]));
            };
            let (base, count) = match (parse_u64(&args[1]), parse_u32(&args[2])) {
                (Ok(b), Ok(c)) => (b, c),
                (Err(e), _) | (_, Err(e)) => return e,
            };
            nic.lock().unwrap().engine.configure_tx(base, count);
            CmdOutcome::Ok(vec![])
        })
        .register("connect", 2, 2, |state, args| {
            let Some(nic) = state.nics.find(&args[0]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIC '{}'", args[0]));
            };
            let Some(nio) = state.nios.find(&args[1]) else {
                return err(ReplyCode::ErrUnknownObject, format!("no NIO '{}'", args[1]));
            };
            bind_nic_listener(state, nic, &args[0], nio);
            CmdOutcome::Ok(vec![format!("NIC '{}' connected to NIO '{}'", args[0], args[1])])
        })
        .register("disconnect", 1, 1, |state, args| {
            state.clear_listener(&format!("nic:{}", args[0]));
            CmdOutcome::Ok(vec![])
        })
}

pub fn hypervisor_module() -> Module {
    Module::new()
        .register("version", 0, 0, |_state, _args| CmdOutcome::Ok(vec!["vnetfab-hv 0.1.0".to_string()]))
        .register("reset", 0, 0, |state, _args| {
            state.clear_listeners_with_prefix("");
            state.atm_switches.delete_type();
            state.atm_bridges.delete_type();
            state.frsw_switches.delete_type();
            state.nios.delete_type();
            state.nics.delete_type();
            CmdOutcome::Ok(vec![])
        })
}
