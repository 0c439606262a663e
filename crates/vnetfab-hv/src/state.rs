//! Shared hypervisor state: one [`Registry`] per object kind this
//! dispatch table drives, plus the RX-listener multiplexer that actually
//! moves frames between NIOs and the switches/bridges/NICs bound to them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use vnetfab_atm::AtmSwitch;
use vnetfab_atm_bridge::AtmBridge;
use vnetfab_frsw::FrswSwitch;
use vnetfab_memory::DenseMemory;
use vnetfab_nic::DmaRingEngine;
use vnetfab_nio::{ListenerKey, Nio, RxHandler, RxListenerMux};
use vnetfab_registry::Registry;

/// A DMA-ring engine plus the flat guest-memory block its descriptor rings
/// and buffers live in. The hypervisor command layer is the closest thing
/// this fabric has to a guest driver, so it owns both halves together
/// rather than asking callers to bring their own [`MemoryBus`](vnetfab_memory::MemoryBus).
pub struct NicInstance {
    pub engine: DmaRingEngine,
    pub mem: DenseMemory,
}

/// Default backing store for a NIC instance's descriptor rings and packet
/// buffers: comfortably larger than any ring/buffer layout the `nic`
/// module's commands can address, without needing a real guest to exist.
const NIC_MEMORY_SIZE: usize = 1 << 20;

impl NicInstance {
    pub fn new(engine: DmaRingEngine) -> Self {
        Self {
            engine,
            mem: DenseMemory::new(NIC_MEMORY_SIZE).expect("fixed-size NIC memory allocation cannot fail"),
        }
    }
}

pub struct HvState {
    pub atm_switches: Registry<Mutex<AtmSwitch>>,
    pub atm_bridges: Registry<Mutex<AtmBridge>>,
    pub frsw_switches: Registry<Mutex<FrswSwitch>>,
    /// Shared behind an `Arc` (rather than owned directly, like the other
    /// registries) so RX-listener closures can hold their own clone and
    /// resolve an output port by name at delivery time, without borrowing
    /// `HvState` itself.
    pub nios: Arc<Registry<Mutex<Nio>>>,
    pub nics: Registry<Mutex<NicInstance>>,
    rx_mux: Mutex<RxListenerMux>,
    listener_keys: Mutex<HashMap<String, ListenerKey>>,
}

impl Default for HvState {
    fn default() -> Self {
        Self::new()
    }
}

impl HvState {
    pub fn new() -> Self {
        Self {
            atm_switches: Registry::default(),
            atm_bridges: Registry::default(),
            frsw_switches: Registry::default(),
            nios: Arc::new(Registry::default()),
            nics: Registry::default(),
            rx_mux: Mutex::new(RxListenerMux::new().expect("failed to set up the RX listener mux")),
            listener_keys: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an RX listener under `key`, tearing down and replacing
    /// whatever was previously registered under that same key. Command
    /// handlers use this so re-issuing a `create_vpc`/`create_vc`/bridge
    /// `create` for the same input port is idempotent rather than piling
    /// up duplicate listeners on one NIO.
    pub fn set_listener(&self, key: String, nio: Arc<Mutex<Nio>>, handler: RxHandler) {
        let mut mux = self.rx_mux.lock().unwrap();
        let mut keys = self.listener_keys.lock().unwrap();
        if let Some(old) = keys.remove(&key) {
            mux.remove(old);
        }
        match mux.add(nio, handler) {
            Ok(new_key) => {
                keys.insert(key, new_key);
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to register RX listener");
            }
        }
    }

    pub fn clear_listener(&self, key: &str) {
        let mut mux = self.rx_mux.lock().unwrap();
        let mut keys = self.listener_keys.lock().unwrap();
        if let Some(old) = keys.remove(key) {
            mux.remove(old);
        }
    }

    /// Removes every listener whose key starts with `prefix`, used when
    /// deleting an object to drop the `Arc` clones its listeners hold so
    /// `Registry::delete_if_unused` sees the registry's reference as the
    /// last one.
    pub fn clear_listeners_with_prefix(&self, prefix: &str) {
        let mut mux = self.rx_mux.lock().unwrap();
        let mut keys = self.listener_keys.lock().unwrap();
        let matching: Vec<String> = keys.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        for key in matching {
            if let Some(listener_key) = keys.remove(&key) {
                mux.remove(listener_key);
            }
        }
    }

    /// Drives one pass of the shared RX-listener poll loop. Callers run
    /// this in a background thread for as long as the hypervisor serves
    /// requests; it's what actually makes a bound switch/bridge/NIC move
    /// frames instead of merely holding a forwarding table.
    pub fn pump_rx(&self, timeout: Option<std::time::Duration>) -> std::io::Result<()> {
        self.rx_mux.lock().unwrap().poll_once(timeout)
    }
}
