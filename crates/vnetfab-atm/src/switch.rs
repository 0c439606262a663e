//! Virtual ATM cell switch: VP and VC cross-connect tables keyed by
//! `(input port, VPI[, VCI])`, each mapping to an output port and the
//! VPI/VCI to rewrite onto the forwarded cell.
//!
//! Unlike the reference switch, which calls straight into the network I/O
//! layer as it forwards, [`AtmSwitch::handle_cell`] is a pure function: it
//! rewrites the cell in place and hands back which port to send it out of,
//! leaving the actual send to the caller. That keeps the forwarding table
//! itself trivially unit-testable without any NIO plumbing in the loop.

use std::collections::HashMap;

use thiserror::Error;

use crate::cell::{self, CELL_SIZE};

pub type PortId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AtmError {
    #[error("a VP cross-connect already exists for input {0:?} VPI {1}")]
    VpAlreadyExists(PortId, u32),
    #[error("a VC cross-connect already exists for input {0:?} VPI {1} VCI {2}")]
    VcAlreadyExists(PortId, u32, u32),
    #[error("VP switching already configured for input {0:?} VPI {1}; cannot also VC switch")]
    VpConflict(PortId, u32),
    #[error("no matching cross-connect for input {0:?} VPI {1}")]
    VpNotFound(PortId, u32),
    #[error("no matching cross-connect for input {0:?} VPI {1} VCI {2}")]
    VcNotFound(PortId, u32, u32),
    /// Returned instead of `Ok(())` by `create_vcc` when the
    /// `legacy_vcc_quirk` feature is enabled, even though the connection
    /// was installed. See `DESIGN.md`'s Open Question notes.
    #[cfg(feature = "legacy_vcc_quirk")]
    #[error("legacy quirk: reporting failure despite successful VCC creation")]
    LegacyQuirk,
}

struct VpConn {
    output: PortId,
    vpi_out: u32,
    cell_count: u64,
}

struct VcConn {
    output: PortId,
    vpi_out: u32,
    vci_out: u32,
    cell_count: u64,
}

#[derive(Default)]
pub struct AtmSwitch {
    vp_table: HashMap<(PortId, u32), VpConn>,
    vc_table: HashMap<(PortId, u32, u32), VcConn>,
    cell_drop: u64,
}

impl AtmSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_vpc(
        &mut self,
        input: &str,
        vpi_in: u32,
        output: &str,
        vpi_out: u32,
    ) -> Result<(), AtmError> {
        let key = (input.to_string(), vpi_in);
        if self.vp_table.contains_key(&key) {
            return Err(AtmError::VpAlreadyExists(input.to_string(), vpi_in));
        }
        if self
            .vc_table
            .keys()
            .any(|(vc_input, vc_vpi, _)| vc_input == input && *vc_vpi == vpi_in)
        {
            return Err(AtmError::VpConflict(input.to_string(), vpi_in));
        }
        self.vp_table.insert(
            key,
            VpConn {
                output: output.to_string(),
                vpi_out,
                cell_count: 0,
            },
        );
        Ok(())
    }

    pub fn delete_vpc(&mut self, input: &str, vpi_in: u32) -> Result<(), AtmError> {
        self.vp_table
            .remove(&(input.to_string(), vpi_in))
            .map(|_| ())
            .ok_or_else(|| AtmError::VpNotFound(input.to_string(), vpi_in))
    }

    pub fn create_vcc(
        &mut self,
        input: &str,
        vpi_in: u32,
        vci_in: u32,
        output: &str,
        vpi_out: u32,
        vci_out: u32,
    ) -> Result<(), AtmError> {
        if self.vp_table.contains_key(&(input.to_string(), vpi_in)) {
            return Err(AtmError::VpConflict(input.to_string(), vpi_in));
        }
        let key = (input.to_string(), vpi_in, vci_in);
        if self.vc_table.contains_key(&key) {
            return Err(AtmError::VcAlreadyExists(input.to_string(), vpi_in, vci_in));
        }
        self.vc_table.insert(
            key,
            VcConn {
                output: output.to_string(),
                vpi_out,
                vci_out,
                cell_count: 0,
            },
        );

        #[cfg(feature = "legacy_vcc_quirk")]
        return Err(AtmError::LegacyQuirk);

        #[cfg(not(feature = "legacy_vcc_quirk"))]
        Ok(())
    }

    pub fn delete_vcc(&mut self, input: &str, vpi_in: u32, vci_in: u32) -> Result<(), AtmError> {
        self.vc_table
            .remove(&(input.to_string(), vpi_in, vci_in))
            .map(|_| ())
            .ok_or_else(|| AtmError::VcNotFound(input.to_string(), vpi_in, vci_in))
    }

    pub fn cell_drop_count(&self) -> u64 {
        self.cell_drop
    }

    /// Looks up `input`'s cross-connect for the cell's VPI (and VCI, if no
    /// VP match), rewrites the cell's header in place (VPI/VCI swap plus
    /// recomputed HEC), and returns which port to forward it out of. `None`
    /// means no matching cross-connect; the cell is counted as dropped.
    pub fn handle_cell(&mut self, input: &str, cell: &mut [u8; CELL_SIZE]) -> Option<PortId> {
        let header = cell::header_word(cell);
        let vpi = cell::vpi(header);
        let vci = cell::vci(header);

        if let Some(vpc) = self.vp_table.get_mut(&(input.to_string(), vpi)) {
            let new_header = cell::rewrite_vpi(header, vpc.vpi_out);
            cell::rewrite_and_reseal(cell, new_header);
            vpc.cell_count += 1;
            return Some(vpc.output.clone());
        }

        if let Some(vcc) = self.vc_table.get_mut(&(input.to_string(), vpi, vci)) {
            let new_header = cell::rewrite_vpi_vci(header, vcc.vpi_out, vcc.vci_out);
            cell::rewrite_and_reseal(cell, new_header);
            vcc.cell_count += 1;
            return Some(vcc.output.clone());
        }

        self.cell_drop += 1;
        None
    }
}

#[cfg(test)]
#[cfg(not(feature = "legacy_vcc_quirk"))]
mod tests {
    use super::*;
    use crate::cell::build_header;
    use vnetfab_packet::insert_hec;

    fn make_cell(vpi: u32, vci: u32) -> [u8; CELL_SIZE] {
        let mut cell = [0u8; CELL_SIZE];
        cell::set_header_word(&mut cell, build_header(vpi, vci));
        insert_hec(&mut cell);
        cell
    }

    #[test]
    fn vp_switch_rewrites_vpi_and_forwards() {
        let mut sw = AtmSwitch::new();
        sw.create_vpc("in0", 1, "out0", 2).unwrap();

        let mut cell = make_cell(1, 77);
        let out = sw.handle_cell("in0", &mut cell).unwrap();
        assert_eq!(out, "out0");
        let header = cell::header_word(&cell);
        assert_eq!(cell::vpi(header), 2);
        assert_eq!(cell::vci(header), 77); // VP switching leaves VCI untouched
    }

    #[test]
    fn vc_switch_rewrites_vpi_and_vci() {
        let mut sw = AtmSwitch::new();
        sw.create_vcc("in0", 1, 32, "out0", 3, 99).unwrap();

        let mut cell = make_cell(1, 32);
        let out = sw.handle_cell("in0", &mut cell).unwrap();
        assert_eq!(out, "out0");
        let header = cell::header_word(&cell);
        assert_eq!(cell::vpi(header), 3);
        assert_eq!(cell::vci(header), 99);
    }

    #[test]
    fn unmatched_cell_is_dropped() {
        let mut sw = AtmSwitch::new();
        let mut cell = make_cell(9, 9);
        assert_eq!(sw.handle_cell("in0", &mut cell), None);
        assert_eq!(sw.cell_drop_count(), 1);
    }

    #[test]
    fn vcc_creation_conflicts_with_existing_vp_switching() {
        let mut sw = AtmSwitch::new();
        sw.create_vpc("in0", 1, "out0", 2).unwrap();
        assert_eq!(
            sw.create_vcc("in0", 1, 50, "out0", 3, 60),
            Err(AtmError::VpConflict("in0".to_string(), 1))
        );
    }

    #[test]
    fn vpc_creation_conflicts_with_existing_vc_switching() {
        let mut sw = AtmSwitch::new();
        sw.create_vcc("in0", 1, 50, "out0", 3, 60).unwrap();
        assert_eq!(
            sw.create_vpc("in0", 1, "out0", 2),
            Err(AtmError::VpConflict("in0".to_string(), 1))
        );
    }

    #[test]
    fn duplicate_vpc_is_rejected() {
        let mut sw = AtmSwitch::new();
        sw.create_vpc("in0", 1, "out0", 2).unwrap();
        assert_eq!(
            sw.create_vpc("in0", 1, "out1", 5),
            Err(AtmError::VpAlreadyExists("in0".to_string(), 1))
        );
    }
}
