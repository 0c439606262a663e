//! Polymorphic network I/O endpoints: the transports the fabric can bind a
//! switch, bridge, or NIC to, plus the filter chain, bandwidth shaper, and
//! RX-listener multiplexer shared across all of them.

pub mod filter;
pub mod nio;
pub mod rxl;
pub mod shaper;
pub mod transport;

pub use filter::{FilterAction, FilterChain, FilterDirection, PacketFilter, PeriodicDropFilter};
pub use nio::{Nio, NioStats, MAX_PKT_SIZE};
pub use rxl::{ListenerKey, RxHandler, RxListenerMux};
pub use shaper::BandwidthShaper;
pub use transport::{FifoEndpoint, Transport, TransportError};
