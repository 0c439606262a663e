//! Concrete per-chip wiring: each profile is just a [`DescriptorLayout`] +
//! [`SoftwareStyle`] + a pair of interrupt cause bits fed into a shared
//! [`DmaRingEngine`]. None of these chips get their own copy of the ring
//! walk logic.

use crate::descriptor::{DescriptorLayout, SoftwareStyle};
use crate::engine::DmaRingEngine;

/// 32-byte tulip-family descriptor: an 8-byte primary buffer pointer, a
/// 2-byte length, a status byte carrying OWN (bit 7), end-of-frame
/// (bit 6), start-of-frame (bit 5), and setup-frame (bit 4), plus a
/// second 8-byte buffer pointer/2-byte length pair for frames that
/// scatter across two buffers within one descriptor.
const TULIP_LAYOUT: DescriptorLayout = DescriptorLayout {
    size: 32,
    buf_addr_off: 0,
    len_off: 8,
    own_byte_off: 12,
    own_bit: 7,
    eop_bit: Some((12, 6)),
    sop_bit: Some((12, 5)),
    setup_bit: Some((12, 4)),
    buf_addr2_off: Some(16),
    len2_off: Some(24),
};

/// Legacy e1000-shaped 16-byte descriptor, reused verbatim for the
/// i8254x profile: 8-byte buffer pointer, 2-byte length, a status byte
/// at offset 12 whose bit 0 is Descriptor Done (used here as the
/// ownership flag), bit 1 is End Of Packet, and bit 2 is Start Of Packet.
/// This chip has no setup-frame or second-buffer convention.
const LEGACY_E1000_LAYOUT: DescriptorLayout = DescriptorLayout {
    size: 16,
    buf_addr_off: 0,
    len_off: 8,
    own_byte_off: 12,
    own_bit: 0,
    eop_bit: Some((12, 1)),
    sop_bit: Some((12, 2)),
    setup_bit: None,
    buf_addr2_off: None,
    len2_off: None,
};

pub const IRQ_TX: u32 = 1 << 0;
pub const IRQ_RX: u32 = 1 << 1;

fn new_dec21140() -> DmaRingEngine {
    DmaRingEngine::new(TULIP_LAYOUT, SoftwareStyle::Style1, IRQ_TX, IRQ_RX)
}

fn new_am79c971(style: SoftwareStyle) -> DmaRingEngine {
    DmaRingEngine::new(TULIP_LAYOUT, style, IRQ_TX, IRQ_RX)
}

fn new_i8255x() -> DmaRingEngine {
    DmaRingEngine::new(TULIP_LAYOUT, SoftwareStyle::Style0, IRQ_TX, IRQ_RX)
}

fn new_i8254x() -> DmaRingEngine {
    // i8254x's ownership convention is the inverse of Style1's clear-means-
    // owned rule: bit 0 set means the device has already written the
    // descriptor (host-owned), so Style1 (bit clear == device-owned) is
    // the right polarity here too.
    DmaRingEngine::new(LEGACY_E1000_LAYOUT, SoftwareStyle::Style1, IRQ_TX, IRQ_RX)
}

fn new_pos_oc3() -> DmaRingEngine {
    DmaRingEngine::new(TULIP_LAYOUT, SoftwareStyle::Style0, IRQ_TX, IRQ_RX)
}

/// Which emulated chip a [`DmaRingEngine`] instance is wired up as. Each
/// variant only changes the descriptor layout/ownership polarity fed into
/// the shared engine; the engine itself is identical across chips.
pub enum NicProfile {
    Dec21140,
    Am79c971 { style: SoftwareStyle },
    I8255x,
    I8254x,
    PosOc3,
}

impl NicProfile {
    pub fn build_engine(&self) -> DmaRingEngine {
        match self {
            NicProfile::Dec21140 => new_dec21140(),
            NicProfile::Am79c971 { style } => new_am79c971(*style),
            NicProfile::I8255x => new_i8255x(),
            NicProfile::I8254x => new_i8254x(),
            NicProfile::PosOc3 => new_pos_oc3(),
        }
    }

    /// Whether frames on this profile's wire are HDLC (POS OC-3's serial
    /// framing) rather than plain Ethernet.
    pub fn is_hdlc(&self) -> bool {
        matches!(self, NicProfile::PosOc3)
    }

    pub fn name(&self) -> &'static str {
        match self {
            NicProfile::Dec21140 => "dec21140",
            NicProfile::Am79c971 { .. } => "am79c971",
            NicProfile::I8255x => "i8255x",
            NicProfile::I8254x => "i8254x",
            NicProfile::PosOc3 => "pos-oc3",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnetfab_memory::{DenseMemory, MemoryBus};

    #[test]
    fn each_profile_can_drain_a_single_owned_tx_descriptor() {
        for profile in [
            NicProfile::Dec21140,
            NicProfile::Am79c971 {
                style: SoftwareStyle::Style0,
            },
            NicProfile::I8255x,
            NicProfile::I8254x,
            NicProfile::PosOc3,
        ] {
            let mut mem = DenseMemory::new(0x10000).unwrap();
            mem.write_physical(0x4000, b"frame");

            let mut engine = profile.build_engine();
            let layout = match &profile {
                NicProfile::I8254x => LEGACY_E1000_LAYOUT,
                _ => TULIP_LAYOUT,
            };
            let style = match &profile {
                NicProfile::Dec21140 | NicProfile::I8254x => SoftwareStyle::Style1,
                NicProfile::Am79c971 { style } => *style,
                _ => SoftwareStyle::Style0,
            };

            let mut raw = [0u8; 16];
            raw[0..8].copy_from_slice(&0x4000u64.to_le_bytes());
            raw[8..10].copy_from_slice(&5u16.to_le_bytes());
            let owned_bit_set = matches!(style, SoftwareStyle::Style0);
            let eop_bit = layout.eop_bit.unwrap();
            if owned_bit_set {
                raw[layout.own_byte_off] |= 1 << layout.own_bit;
            }
            raw[eop_bit.0] |= 1 << eop_bit.1;
            mem.write_physical(0x1000, &raw);

            engine.configure_tx(0x1000, 1);
            engine.poll(&mut mem);
            assert_eq!(
                engine.pop_tx_frame().as_deref(),
                Some(b"frame".as_slice()),
                "profile {} failed to drain its TX descriptor",
                profile.name()
            );
        }
    }
}
