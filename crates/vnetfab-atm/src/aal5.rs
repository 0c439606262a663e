//! AAL5 segmentation and reassembly: cuts a variable-length PDU into
//! 48-byte ATM cell payloads on the way out, and glues received cell
//! payloads back into a PDU (validated against a trailing CRC-32 and
//! length field) on the way in.

use thiserror::Error;

use vnetfab_packet::crc32::{crc32_update, CRC32_INIT};

use crate::cell::{self, CELL_SIZE, PAYLOAD_SIZE, PTI_EOP, PTI_NETWORK};

/// Maximum reassembled PDU size a single reassembly context will buffer
/// before giving up and resetting, bounding how much memory one VCC's
/// in-flight traffic can pin.
pub const REASSEMBLY_MAX_SIZE: usize = 16384;

/// Offset within the 48-byte cell payload where the AAL5 trailer starts:
/// 2 control bytes + 2 length bytes + 4 CRC bytes.
const TRAILER_OFFSET: usize = PAYLOAD_SIZE - 8;
/// The CRC covers everything up to (but not including) its own field —
/// i.e. the data/padding plus the 4-byte control+length field.
const CRC_COVERAGE_LEN: usize = PAYLOAD_SIZE - 4;

fn flush_full_cell(
    current: &mut [u8; CELL_SIZE],
    fill: &mut usize,
    crc: &mut u32,
    header: u32,
    cells: &mut Vec<[u8; CELL_SIZE]>,
) {
    if *fill == PAYLOAD_SIZE {
        *crc = crc32_update(*crc, &current[cell::HEADER_SIZE..]);
        cell::rewrite_and_reseal(current, header);
        cells.push(*current);
        *current = [0u8; CELL_SIZE];
        *fill = 0;
    }
}

/// Segments `payload` into a sequence of 53-byte ATM cells carrying
/// `vpi`/`vci`, returning the cells in order. Full cells are emitted as
/// soon as they fill; the trailer rides along in the last data cell if it
/// has room, otherwise gets a trailing cell of its own.
pub fn segment(vpi: u32, vci: u32, payload: &[u8]) -> Vec<[u8; CELL_SIZE]> {
    let mut cells = Vec::new();
    let base_header = cell::build_header(vpi, vci);
    let mut crc = CRC32_INIT;

    let mut current = [0u8; CELL_SIZE];
    let mut fill = 0usize;
    let mut pos = 0usize;

    while pos < payload.len() {
        let take = (payload.len() - pos).min(PAYLOAD_SIZE - fill);
        current[cell::HEADER_SIZE + fill..cell::HEADER_SIZE + fill + take]
            .copy_from_slice(&payload[pos..pos + take]);
        fill += take;
        pos += take;
        flush_full_cell(&mut current, &mut fill, &mut crc, base_header, &mut cells);
    }

    // Room for the 8-byte trailer in the in-progress cell? If not, flush it
    // as a zero-padded plain data cell and start a fresh one for the
    // trailer.
    if PAYLOAD_SIZE - fill < 8 {
        fill = PAYLOAD_SIZE;
        flush_full_cell(&mut current, &mut fill, &mut crc, base_header, &mut cells);
    }

    // Bytes between `fill` and the trailer are already zero (array init).
    current[cell::HEADER_SIZE + TRAILER_OFFSET..cell::HEADER_SIZE + TRAILER_OFFSET + 2].fill(0);
    current[cell::HEADER_SIZE + TRAILER_OFFSET + 2..cell::HEADER_SIZE + TRAILER_OFFSET + 4]
        .copy_from_slice(&(payload.len() as u16).to_be_bytes());

    crc = crc32_update(crc, &current[cell::HEADER_SIZE..cell::HEADER_SIZE + CRC_COVERAGE_LEN]);
    current[cell::HEADER_SIZE + CRC_COVERAGE_LEN..cell::HEADER_SIZE + PAYLOAD_SIZE]
        .copy_from_slice(&(!crc).to_be_bytes());

    let final_header = base_header | PTI_EOP;
    cell::rewrite_and_reseal(&mut current, final_header);
    cells.push(current);

    cells
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("reassembly buffer exceeded the {0}-byte limit")]
    BufferOverflow(usize),
    #[error("trailer length {declared} does not fit the {buffered} bytes received")]
    LengthMismatch { declared: usize, buffered: usize },
    #[error("AAL5 CRC-32 mismatch")]
    CrcMismatch,
}

/// Outcome of feeding one cell into a [`Reassembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum CellOutcome {
    /// More cells are needed before the PDU is complete.
    Continuing,
    /// This cell carried network/OAM traffic this switch does not
    /// reassemble; the cell is ignored and the context is untouched.
    NetworkTraffic,
    /// The PDU is complete; here it is.
    Complete(Vec<u8>),
}

/// Per-VCC reassembly state. One instance tracks exactly one in-flight PDU;
/// a switch or bridge keeps one per active virtual circuit.
#[derive(Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feeds one received 53-byte cell into the reassembly buffer.
    pub fn feed(&mut self, cell: &[u8; CELL_SIZE]) -> Result<CellOutcome, ReassemblyError> {
        let header = cell::header_word(cell);

        if self.buffer.len() + PAYLOAD_SIZE > REASSEMBLY_MAX_SIZE {
            self.reset();
            return Err(ReassemblyError::BufferOverflow(REASSEMBLY_MAX_SIZE));
        }

        if header & PTI_NETWORK != 0 {
            return Ok(CellOutcome::NetworkTraffic);
        }

        self.buffer.extend_from_slice(&cell[cell::HEADER_SIZE..]);

        if header & PTI_EOP == 0 {
            return Ok(CellOutcome::Continuing);
        }

        let total = self.buffer.len();
        let trailer_offset = total - 8;
        let declared_len = u16::from_be_bytes(
            self.buffer[trailer_offset + 2..trailer_offset + 4].try_into().unwrap(),
        ) as usize;
        let expected_crc =
            u32::from_be_bytes(self.buffer[trailer_offset + 4..total].try_into().unwrap());

        if declared_len > trailer_offset {
            self.reset();
            return Err(ReassemblyError::LengthMismatch {
                declared: declared_len,
                buffered: trailer_offset,
            });
        }

        let crc = !crc32_update(CRC32_INIT, &self.buffer[..total - 4]);
        if crc != expected_crc {
            self.reset();
            return Err(ReassemblyError::CrcMismatch);
        }

        let pdu = self.buffer[..declared_len].to_vec();
        self.reset();
        Ok(CellOutcome::Complete(pdu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_then_reassemble_short_pdu_round_trips() {
        let payload = b"short pdu that fits in one cell".to_vec();
        let cells = segment(1, 32, &payload);
        assert_eq!(cells.len(), 1);

        let mut reasm = Reassembler::new();
        let outcome = reasm.feed(&cells[0]).unwrap();
        assert_eq!(outcome, CellOutcome::Complete(payload));
    }

    #[test]
    fn segment_then_reassemble_multi_cell_pdu_round_trips() {
        let payload: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        let cells = segment(5, 200, &payload);
        assert!(cells.len() > 1);

        let mut reasm = Reassembler::new();
        let mut result = None;
        for (i, cell) in cells.iter().enumerate() {
            let outcome = reasm.feed(cell).unwrap();
            if i + 1 == cells.len() {
                result = Some(outcome);
            } else {
                assert_eq!(outcome, CellOutcome::Continuing);
            }
        }
        assert_eq!(result, Some(CellOutcome::Complete(payload)));
    }

    #[test]
    fn reassembly_rejects_corrupted_payload() {
        let payload = b"payload protected by aal5 crc".to_vec();
        let mut cells = segment(1, 1, &payload);
        let last = cells.len() - 1;
        cells[last][10] ^= 0xFF;

        let mut reasm = Reassembler::new();
        for cell in &cells[..cells.len() - 1] {
            reasm.feed(cell).unwrap();
        }
        assert_eq!(reasm.feed(&cells[last]), Err(ReassemblyError::CrcMismatch));
    }

    #[test]
    fn oversized_pdu_overflows_the_reassembly_buffer() {
        let payload = vec![0xBBu8; REASSEMBLY_MAX_SIZE + PAYLOAD_SIZE];
        let cells = segment(1, 1, &payload);

        let mut reasm = Reassembler::new();
        let mut result = Ok(CellOutcome::Continuing);
        for cell in &cells {
            result = reasm.feed(cell);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(ReassemblyError::BufferOverflow(REASSEMBLY_MAX_SIZE)));
    }

    #[test]
    fn network_traffic_cells_are_ignored() {
        let mut cell = [0u8; CELL_SIZE];
        cell::set_header_word(&mut cell, PTI_NETWORK);
        vnetfab_packet::insert_hec(&mut cell);

        let mut reasm = Reassembler::new();
        assert_eq!(reasm.feed(&cell), Ok(CellOutcome::NetworkTraffic));
    }

    #[test]
    fn exact_multiple_of_payload_still_fits_trailer_in_new_cell() {
        // Exactly two cells' worth of data forces the trailer into its own
        // third cell, since there's no room left in the second.
        let payload = vec![0xAAu8; PAYLOAD_SIZE * 2];
        let cells = segment(1, 1, &payload);
        assert_eq!(cells.len(), 3);

        let mut reasm = Reassembler::new();
        let mut result = None;
        for cell in &cells {
            result = Some(reasm.feed(cell).unwrap());
        }
        assert_eq!(result, Some(CellOutcome::Complete(payload)));
    }
}
