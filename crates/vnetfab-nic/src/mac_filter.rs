//! Perfect-filter MAC address table plus the tulip-family "setup frame"
//! that loads it: a single TX descriptor carrying 16 addresses, 12 bytes
//! each (the upper 6 bytes of each slot repeated for the wide data path),
//! instead of a frame to be put on the wire.

use std::collections::HashSet;

/// Byte length of a tulip/Am79c971 setup frame: 16 address slots of 12
/// bytes apiece.
pub const SETUP_FRAME_LEN: usize = 192;

const SLOT_COUNT: usize = 16;
const SLOT_LEN: usize = 12;

const BROADCAST: [u8; 6] = [0xFF; 6];

#[derive(Debug, Default)]
pub struct MacFilter {
    promiscuous: bool,
    addresses: HashSet<[u8; 6]>,
}

impl MacFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_promiscuous(&mut self, promiscuous: bool) {
        self.promiscuous = promiscuous;
    }

    pub fn promiscuous(&self) -> bool {
        self.promiscuous
    }

    /// Replaces the perfect-filter table wholesale, as a setup frame does.
    pub fn load(&mut self, addresses: impl IntoIterator<Item = [u8; 6]>) {
        self.addresses = addresses.into_iter().collect();
    }

    /// Parses a 192-byte setup frame into the 16 addresses it carries,
    /// taking the first 6 bytes of each 12-byte slot and skipping all-zero
    /// (unused) slots.
    pub fn parse_setup_frame(raw: &[u8]) -> Vec<[u8; 6]> {
        raw.chunks(SLOT_LEN)
            .take(SLOT_COUNT)
            .filter_map(|slot| {
                let addr: [u8; 6] = slot.get(..6)?.try_into().ok()?;
                if addr == [0u8; 6] {
                    None
                } else {
                    Some(addr)
                }
            })
            .collect()
    }

    /// Whether a frame with this destination address should be accepted.
    /// Broadcast always passes regardless of the filter table.
    pub fn accepts(&self, dest: &[u8]) -> bool {
        if self.promiscuous {
            return true;
        }
        let Ok(dest): Result<[u8; 6], _> = dest.get(..6).unwrap_or(&[]).try_into() else {
            return false;
        };
        dest == BROADCAST || self.addresses.contains(&dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promiscuous_accepts_everything() {
        let mut filter = MacFilter::new();
        filter.set_promiscuous(true);
        assert!(filter.accepts(&[1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn broadcast_always_accepted() {
        let filter = MacFilter::new();
        assert!(filter.accepts(&BROADCAST));
    }

    #[test]
    fn unlisted_unicast_is_rejected() {
        let filter = MacFilter::new();
        assert!(!filter.accepts(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }

    #[test]
    fn listed_address_is_accepted_after_load() {
        let mut filter = MacFilter::new();
        filter.load([[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]]);
        assert!(filter.accepts(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
        assert!(!filter.accepts(&[0, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn setup_frame_parses_non_zero_slots() {
        let mut raw = vec![0u8; SETUP_FRAME_LEN];
        raw[0..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        raw[SLOT_LEN..SLOT_LEN + 6].copy_from_slice(&[7, 8, 9, 10, 11, 12]);

        let addrs = MacFilter::parse_setup_frame(&raw);
        assert_eq!(addrs, vec![[1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12]]);
    }
}
