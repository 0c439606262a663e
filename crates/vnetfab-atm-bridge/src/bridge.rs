//! RFC 1483 bridged-Ethernet-over-ATM translation: wraps Ethernet frames in
//! the RFC1483b SNAP/LLC header before segmenting them onto a fixed VPI/VCI,
//! and strips that header back off reassembled PDUs arriving on it.
//!
//! Like [`vnetfab_atm::AtmSwitch::handle_cell`], both directions here are
//! pure functions over their inputs: no NIO handles are touched by this
//! crate, keeping the translation itself unit-testable on its own.

use thiserror::Error;

use vnetfab_atm::aal5::{self, CellOutcome, ReassemblyError};
use vnetfab_atm::cell::{self, CELL_SIZE};

/// LLC/SNAP + bridged-PDU control field prefixing an RFC1483b-encapsulated
/// Ethernet frame: `AA AA 03` (LLC UI), `00 80 C2` (the 802.1 bridging OUI),
/// `00 07` (bridged Ethernet/802.3 without an FCS), `00 00` (pad).
pub const RFC1483B_HEADER: [u8; 10] = [0xaa, 0xaa, 0x03, 0x00, 0x80, 0xc2, 0x00, 0x07, 0x00, 0x00];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
    #[error("reassembled PDU of {0} bytes is too short to carry an RFC1483b header")]
    PduTooShort(usize),
    #[error("reassembled PDU does not start with the RFC1483b bridged-Ethernet header")]
    NotRfc1483Bridged,
}

/// Translates Ethernet frames to and from ATM cells on one fixed VPI/VCI.
pub struct AtmBridge {
    vpi: u32,
    vci: u32,
    reasm: aal5::Reassembler,
}

impl AtmBridge {
    pub fn new(vpi: u32, vci: u32) -> Self {
        Self { vpi, vci, reasm: aal5::Reassembler::new() }
    }

    pub fn vpi(&self) -> u32 {
        self.vpi
    }

    pub fn vci(&self) -> u32 {
        self.vci
    }

    /// Wraps an Ethernet frame in the RFC1483b header and segments it into
    /// cells carrying this bridge's configured VPI/VCI.
    pub fn eth_to_atm(&self, frame: &[u8]) -> Vec<[u8; CELL_SIZE]> {
        let mut pdu = Vec::with_capacity(RFC1483B_HEADER.len() + frame.len());
        pdu.extend_from_slice(&RFC1483B_HEADER);
        pdu.extend_from_slice(frame);
        aal5::segment(self.vpi, self.vci, &pdu)
    }

    /// Feeds one received cell into the bridge's reassembly context. Cells
    /// whose header VPI/VCI doesn't match this bridge's configuration are
    /// not this bridge's traffic and are passed back untouched so the
    /// caller can route them elsewhere.
    pub fn atm_to_eth<'c>(
        &mut self,
        cell: &'c [u8; CELL_SIZE],
    ) -> Result<Option<Vec<u8>>, BridgeError> {
        let header = cell::header_word(cell);
        if cell::vpi(header) != self.vpi || cell::vci(header) != self.vci {
            return Ok(None);
        }

        match self.reasm.feed(cell)? {
            CellOutcome::Continuing | CellOutcome::NetworkTraffic => Ok(None),
            CellOutcome::Complete(pdu) => {
                if pdu.len() < RFC1483B_HEADER.len() {
                    return Err(BridgeError::PduTooShort(pdu.len()));
                }
                if pdu[..RFC1483B_HEADER.len()] != RFC1483B_HEADER {
                    return Err(BridgeError::NotRfc1483Bridged);
                }
                Ok(Some(pdu[RFC1483B_HEADER.len()..].to_vec()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eth_frame_round_trips_through_atm_cells() {
        let bridge_tx = AtmBridge::new(1, 35);
        let mut bridge_rx = AtmBridge::new(1, 35);

        let frame: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();
        let cells = bridge_tx.eth_to_atm(&frame);
        assert!(cells.len() > 1);

        let mut received = None;
        for c in &cells {
            if let Some(out) = bridge_rx.atm_to_eth(c).unwrap() {
                received = Some(out);
            }
        }
        assert_eq!(received, Some(frame));
    }

    #[test]
    fn cells_on_a_different_vcc_are_ignored() {
        let mut bridge = AtmBridge::new(1, 35);
        let cells = AtmBridge::new(2, 99).eth_to_atm(b"not for this bridge");
        for c in &cells {
            assert_eq!(bridge.atm_to_eth(c).unwrap(), None);
        }
    }

    #[test]
    fn pdu_missing_rfc1483_header_is_rejected() {
        let mut bridge = AtmBridge::new(1, 35);
        // Segment a PDU directly, bypassing the header this bridge expects.
        let cells = vnetfab_atm::aal5::segment(1, 35, b"bare pdu, no header");
        let mut result = Ok(None);
        for c in &cells {
            result = bridge.atm_to_eth(c);
        }
        assert_eq!(result, Err(BridgeError::NotRfc1483Bridged));
    }
}
