//! Virtual Frame-Relay switch: a DLCI-keyed cross-connect table, one entry
//! per `(input port, DLCI in)` mapping to an output port and the DLCI to
//! rewrite onto the forwarded frame.
//!
//! As with the ATM switch, [`FrswSwitch::handle_frame`] is a pure function:
//! it rewrites the frame's header in place and hands back which port to
//! forward it out of, rather than sending it itself.

use std::collections::HashMap;

use thiserror::Error;

use crate::header::{self, HEADER_SIZE};

pub type PortId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrswError {
    #[error("a DLCI cross-connect already exists for input {0:?} DLCI {1}")]
    AlreadyExists(PortId, u32),
    #[error("no matching cross-connect for input {0:?} DLCI {1}")]
    NotFound(PortId, u32),
}

struct Conn {
    output: PortId,
    dlci_out: u32,
    frame_count: u64,
}

#[derive(Default)]
pub struct FrswSwitch {
    table: HashMap<(PortId, u32), Conn>,
    drop_count: u64,
}

impl FrswSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_vc(
        &mut self,
        input: &str,
        dlci_in: u32,
        output: &str,
        dlci_out: u32,
    ) -> Result<(), FrswError> {
        let key = (input.to_string(), dlci_in);
        if self.table.contains_key(&key) {
            return Err(FrswError::AlreadyExists(input.to_string(), dlci_in));
        }
        self.table.insert(
            key,
            Conn { output: output.to_string(), dlci_out, frame_count: 0 },
        );
        Ok(())
    }

    pub fn delete_vc(&mut self, input: &str, dlci_in: u32) -> Result<(), FrswError> {
        self.table
            .remove(&(input.to_string(), dlci_in))
            .map(|_| ())
            .ok_or_else(|| FrswError::NotFound(input.to_string(), dlci_in))
    }

    pub fn drop_count(&self) -> u64 {
        self.drop_count
    }

    /// Looks up `input`'s cross-connect for the frame's DLCI, rewrites the
    /// Q.922 header in place, and returns the port to forward it out of.
    /// LMI frames (DLCI 0 or 1023) are never switched — the caller is
    /// expected to have routed those to a per-NIO LMI responder instead.
    pub fn handle_frame(&mut self, input: &str, frame: &mut [u8]) -> Option<PortId> {
        if frame.len() < HEADER_SIZE {
            self.drop_count += 1;
            return None;
        }
        let mut header: [u8; HEADER_SIZE] = frame[..HEADER_SIZE].try_into().unwrap();
        let dlci_in = header::dlci(&header);

        if header::is_lmi_dlci(dlci_in) {
            return None;
        }

        let Some(conn) = self.table.get_mut(&(input.to_string(), dlci_in)) else {
            self.drop_count += 1;
            return None;
        };
        header::rewrite_dlci(&mut header, conn.dlci_out);
        frame[..HEADER_SIZE].copy_from_slice(&header);
        conn.frame_count += 1;
        Some(conn.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::build_header;

    fn make_frame(dlci: u32, payload: &[u8]) -> Vec<u8> {
        let mut frame = build_header(dlci).to_vec();
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn matching_vc_rewrites_dlci_and_forwards() {
        let mut sw = FrswSwitch::new();
        sw.create_vc("in0", 100, "out0", 200).unwrap();

        let mut frame = make_frame(100, b"hello");
        let out = sw.handle_frame("in0", &mut frame).unwrap();
        assert_eq!(out, "out0");
        assert_eq!(header::dlci(&frame[..2].try_into().unwrap()), 200);
        assert_eq!(&frame[2..], b"hello");
    }

    #[test]
    fn unmatched_frame_is_dropped() {
        let mut sw = FrswSwitch::new();
        let mut frame = make_frame(5, b"x");
        assert_eq!(sw.handle_frame("in0", &mut frame), None);
        assert_eq!(sw.drop_count(), 1);
    }

    #[test]
    fn lmi_dlcis_are_never_switched() {
        let mut sw = FrswSwitch::new();
        sw.create_vc("in0", 0, "out0", 0).unwrap();
        let mut frame = make_frame(0, b"lmi");
        assert_eq!(sw.handle_frame("in0", &mut frame), None);
        // Not counted as a drop either: it's simply not this switch's job.
        assert_eq!(sw.drop_count(), 0);
    }

    #[test]
    fn duplicate_vc_is_rejected() {
        let mut sw = FrswSwitch::new();
        sw.create_vc("in0", 100, "out0", 200).unwrap();
        assert_eq!(
            sw.create_vc("in0", 100, "out1", 300),
            Err(FrswError::AlreadyExists("in0".to_string(), 100))
        );
    }
}
