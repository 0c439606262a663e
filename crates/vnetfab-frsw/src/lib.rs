//! Frame-Relay DLCI switching and LMI status-exchange synthesis.

pub mod header;
pub mod lmi;
pub mod switch;

pub use header::{dlci, is_lmi_dlci, rewrite_dlci, DLCI_LMI_ANSI, DLCI_LMI_CISCO};
pub use lmi::{LmiResponder, PvcStatus};
pub use switch::{FrswError, FrswSwitch, PortId};
