//! Wire-format helpers shared by the switch and NIC crates: checksums,
//! CRCs, endian helpers, a best-effort packet analyzer, and the ISL
//! encapsulation rewrite.
//!
//! Every function here is a pure transform over byte slices — no I/O, no
//! state beyond lazily-built CRC tables — so the switch/NIC crates can unit
//! test their forwarding logic against golden byte vectors without needing
//! a network stack in the loop.

pub mod analyzer;
pub mod checksum;
pub mod crc32;
pub mod endian;
pub mod hdlc_crc;
pub mod hec;
pub mod isl;

pub use analyzer::{analyze, EtherType, IpAddrBytes, L4Protocol, PacketInfo};
pub use checksum::{internet_checksum, pseudo_header_sum, verify_ipv4_checksum};
pub use crc32::{crc32 as crc32_checksum, crc32_update, CRC32_INIT};
pub use hdlc_crc::{hdlc_crc_update, hdlc_fcs, HDLC_CRC_INIT};
pub use hec::{compute_hec, insert_hec};
