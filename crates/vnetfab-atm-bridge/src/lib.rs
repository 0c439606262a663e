//! RFC 1483 bridging between Ethernet and a single ATM VPI/VCI.

pub mod bridge;

pub use bridge::{AtmBridge, BridgeError, RFC1483B_HEADER};
