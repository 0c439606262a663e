//! DMA-ring NIC emulation shared across every chip this fabric pretends to
//! be: the descriptor read/write logic, ownership-bit handshake, and
//! interrupt aggregation live once in [`engine::DmaRingEngine`]; each chip
//! in [`profiles`] only supplies its descriptor shape and register
//! polarity.

pub mod descriptor;
pub mod engine;
pub mod hdlc;
pub mod mac_filter;
pub mod mii;
pub mod profiles;

pub use descriptor::{Descriptor, DescriptorLayout, SoftwareStyle};
pub use engine::DmaRingEngine;
pub use mac_filter::MacFilter;
pub use mii::{MiiBus, MiiPhy};
pub use profiles::{NicProfile, IRQ_RX, IRQ_TX};
