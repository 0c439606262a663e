//! Descriptor read/write as pure functions over a byte buffer, independent
//! of guest memory or any particular chip. [`DmaRingEngine`](crate::engine::DmaRingEngine)
//! calls these against a scratch buffer it DMAs in/out of guest RAM itself,
//! so the bit-twiddling here can be unit tested without a `MemoryBus` at all.

/// Which byte/bit layout a chip's ring descriptors use. dynamips' tulip-class
/// chips (DEC21140, Am79c971) ship two incompatible descriptor formats
/// selectable at runtime; everything downstream of [`DescriptorLayout`]
/// only needs to know the polarity of the ownership bit and where the
/// length/address fields live, not which chip it's emulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareStyle {
    /// Ownership bit set means "owned by the NIC" (ready to process).
    Style0,
    /// Ownership bit set means "owned by the host" (already processed);
    /// the NIC takes ownership when the bit is clear.
    Style1,
}

impl SoftwareStyle {
    fn owned_by_device(self, bit_set: bool) -> bool {
        match self {
            SoftwareStyle::Style0 => bit_set,
            SoftwareStyle::Style1 => !bit_set,
        }
    }

    fn bit_for_device_owned(self, owned_by_device: bool) -> bool {
        match self {
            SoftwareStyle::Style0 => owned_by_device,
            SoftwareStyle::Style1 => !owned_by_device,
        }
    }
}

/// Byte offsets of the fields a descriptor needs, all descriptors in this
/// crate being a fixed size with an 8-byte little-endian buffer pointer.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorLayout {
    pub size: usize,
    pub buf_addr_off: usize,
    pub len_off: usize,
    pub own_byte_off: usize,
    pub own_bit: u8,
    /// Bit marking the last descriptor of a scatter-gather chain. `None`
    /// means every descriptor is implicitly a whole frame (no chaining).
    pub eop_bit: Option<(usize, u8)>,
    /// Bit marking the first descriptor of a scatter-gather chain. `None`
    /// means start-of-packet is not tracked for this chip.
    pub sop_bit: Option<(usize, u8)>,
    /// Bit marking a TX descriptor as a MAC-filter setup frame rather than
    /// a frame to transmit. `None` means this chip has no setup-frame
    /// convention.
    pub setup_bit: Option<(usize, u8)>,
    /// Offset of a second buffer pointer/length pair, for chips that can
    /// scatter one descriptor's payload across two buffers. `None` means
    /// single-buffer descriptors only.
    pub buf_addr2_off: Option<usize>,
    pub len2_off: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub buf_addr: u64,
    pub len: u16,
    pub buf_addr2: Option<u64>,
    pub len2: Option<u16>,
    pub owned_by_device: bool,
    pub eop: bool,
    pub sop: bool,
    pub setup: bool,
}

pub fn decode(layout: &DescriptorLayout, style: SoftwareStyle, raw: &[u8]) -> Descriptor {
    let buf_addr = u64::from_le_bytes(raw[layout.buf_addr_off..layout.buf_addr_off + 8].try_into().unwrap());
    let len = u16::from_le_bytes(raw[layout.len_off..layout.len_off + 2].try_into().unwrap());
    let own_byte = raw[layout.own_byte_off];
    let owned_by_device = style.owned_by_device(own_byte & (1 << layout.own_bit) != 0);
    let eop = match layout.eop_bit {
        Some((off, bit)) => raw[off] & (1 << bit) != 0,
        None => true,
    };
    let sop = match layout.sop_bit {
        Some((off, bit)) => raw[off] & (1 << bit) != 0,
        None => true,
    };
    let setup = match layout.setup_bit {
        Some((off, bit)) => raw[off] & (1 << bit) != 0,
        None => false,
    };
    let buf_addr2 = layout
        .buf_addr2_off
        .map(|off| u64::from_le_bytes(raw[off..off + 8].try_into().unwrap()));
    let len2 = layout
        .len2_off
        .map(|off| u16::from_le_bytes(raw[off..off + 2].try_into().unwrap()));
    Descriptor {
        buf_addr,
        len,
        buf_addr2,
        len2,
        owned_by_device,
        eop,
        sop,
        setup,
    }
}

fn set_owned_by_device(layout: &DescriptorLayout, style: SoftwareStyle, raw: &mut [u8], owned_by_device: bool) {
    let bit = style.bit_for_device_owned(owned_by_device);
    let mask = 1u8 << layout.own_bit;
    if bit {
        raw[layout.own_byte_off] |= mask;
    } else {
        raw[layout.own_byte_off] &= !mask;
    }
}

/// Hands a TX descriptor back to the host once its buffer has been read.
/// TX length is driver-supplied and never rewritten by the device.
pub fn complete_tx(layout: &DescriptorLayout, style: SoftwareStyle, raw: &mut [u8]) {
    set_owned_by_device(layout, style, raw, false);
}

/// Hands an RX descriptor back to the host with the number of bytes the
/// device actually wrote, whether this was the first fragment of the
/// frame (start-of-packet), and whether it was the last (end-of-packet;
/// non-final fragments "continue" into the next descriptor).
pub fn complete_rx(
    layout: &DescriptorLayout,
    style: SoftwareStyle,
    raw: &mut [u8],
    written_len: u16,
    sop: bool,
    eop: bool,
) {
    raw[layout.len_off..layout.len_off + 2].copy_from_slice(&written_len.to_le_bytes());
    if let Some((off, bit)) = layout.eop_bit {
        let mask = 1u8 << bit;
        if eop {
            raw[off] |= mask;
        } else {
            raw[off] &= !mask;
        }
    }
    if let Some((off, bit)) = layout.sop_bit {
        let mask = 1u8 << bit;
        if sop {
            raw[off] |= mask;
        } else {
            raw[off] &= !mask;
        }
    }
    set_owned_by_device(layout, style, raw, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: DescriptorLayout = DescriptorLayout {
        size: 16,
        buf_addr_off: 0,
        len_off: 8,
        own_byte_off: 12,
        own_bit: 7,
        eop_bit: Some((12, 6)),
        sop_bit: Some((12, 5)),
        setup_bit: None,
        buf_addr2_off: None,
        len2_off: None,
    };

    #[test]
    fn style0_owned_by_device_when_bit_set() {
        let mut raw = [0u8; 16];
        raw[12] = 0b1100_0000; // own + eop set
        let desc = decode(&LAYOUT, SoftwareStyle::Style0, &raw);
        assert!(desc.owned_by_device);
        assert!(desc.eop);
    }

    #[test]
    fn style1_owned_by_device_when_bit_clear() {
        let raw = [0u8; 16];
        let desc = decode(&LAYOUT, SoftwareStyle::Style1, &raw);
        assert!(desc.owned_by_device);
    }

    #[test]
    fn complete_rx_clears_ownership_for_both_styles() {
        let mut raw = [0u8; 16];
        raw[12] = 0b1000_0000;
        complete_rx(&LAYOUT, SoftwareStyle::Style0, &mut raw, 64, true, true);
        assert_eq!(raw[12] & 0x80, 0);
        assert_ne!(raw[12] & 0x40, 0);
        assert_ne!(raw[12] & 0x20, 0);
        assert_eq!(u16::from_le_bytes([raw[8], raw[9]]), 64);

        let mut raw = [0u8; 16];
        complete_rx(&LAYOUT, SoftwareStyle::Style1, &mut raw, 64, false, false);
        assert_ne!(raw[12] & 0x80, 0);
        assert_eq!(raw[12] & 0x40, 0);
        assert_eq!(raw[12] & 0x20, 0);
    }

    #[test]
    fn second_buffer_is_decoded_when_layout_has_one() {
        const SCATTER_LAYOUT: DescriptorLayout = DescriptorLayout {
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

        let mut raw = [0u8; 32];
        raw[0..8].copy_from_slice(&0x1000u64.to_le_bytes());
        raw[16..24].copy_from_slice(&0x2000u64.to_le_bytes());
        raw[24..26].copy_from_slice(&10u16.to_le_bytes());
        raw[12] = 0b1001_0000; // own + setup

        let desc = decode(&SCATTER_LAYOUT, SoftwareStyle::Style0, &raw);
        assert_eq!(desc.buf_addr2, Some(0x2000));
        assert_eq!(desc.len2, Some(10));
        assert!(desc.setup);
    }

    #[test]
    fn complete_tx_only_clears_ownership() {
        let mut raw = [0u8; 16];
        raw[8..10].copy_from_slice(&42u16.to_le_bytes());
        raw[12] = 0b1000_0000;
        complete_tx(&LAYOUT, SoftwareStyle::Style0, &mut raw);
        assert_eq!(raw[12] & 0x80, 0);
        assert_eq!(u16::from_le_bytes([raw[8], raw[9]]), 42);
    }
}
