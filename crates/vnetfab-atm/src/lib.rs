//! ATM cell-layer primitives: header bitfields, AAL5 segmentation and
//! reassembly, and the VP/VC cross-connect table a virtual ATM switch
//! forwards cells through.

pub mod aal5;
pub mod cell;
pub mod switch;

pub use aal5::{CellOutcome, Reassembler, ReassemblyError};
pub use switch::{AtmError, AtmSwitch, PortId};
