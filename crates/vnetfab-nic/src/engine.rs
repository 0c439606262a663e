//! Chip-agnostic descriptor-ring engine. A [`DmaRingEngine`] knows how to
//! walk a TX ring and drain frames out of it, and how to scatter queued RX
//! frames across a chain of owned RX descriptors; it knows nothing about
//! register maps, PCI BARs, or any particular chip's MMIO layout. Each
//! profile in [`crate::profiles`] wires one of these up behind its own
//! register file.

use std::collections::VecDeque;
use std::time::Instant;

use vnetfab_memory::MemoryBus;

use crate::descriptor::{self, DescriptorLayout, SoftwareStyle};
use crate::mac_filter::MacFilter;

/// Bound on descriptors walked per `poll()` call per ring, so a
/// misconfigured or adversarial ring can't turn a single poll into an
/// unbounded loop.
const MAX_DESCRIPTORS_PER_POLL: u32 = 4096;

const BW_SAMPLES: usize = 10;
const BW_SAMPLE_ITV_MS: u64 = 30;

/// Host-side TX rate limiter, independent of whatever shaping the NIO the
/// drained frames eventually reach also applies. Same sampled-window
/// technique as the NIO's bandwidth shaper: a ring of 10 30ms slots
/// covering a trailing 300ms window.
struct TxShaper {
    kbps: u32,
    samples: [u64; BW_SAMPLES],
    pos: usize,
    last_advance: Instant,
}

impl TxShaper {
    fn new() -> Self {
        Self {
            kbps: 0,
            samples: [0; BW_SAMPLES],
            pos: 0,
            last_advance: Instant::now(),
        }
    }

    fn set_bandwidth(&mut self, kbps: u32) {
        self.kbps = kbps;
    }

    fn threshold_bytes(&self) -> u64 {
        (self.kbps as u64 * 125 * (BW_SAMPLES as u64 * BW_SAMPLE_ITV_MS)) / 1000
    }

    fn advance(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_advance).as_millis() as u64;
        let slots = elapsed_ms / BW_SAMPLE_ITV_MS;
        if slots == 0 {
            return;
        }
        let slots_to_clear = slots.min(BW_SAMPLES as u64);
        for _ in 0..slots_to_clear {
            self.pos = (self.pos + 1) % BW_SAMPLES;
            self.samples[self.pos] = 0;
        }
        self.last_advance = now;
    }

    fn can_transmit(&mut self, now: Instant) -> bool {
        if self.kbps == 0 {
            return true;
        }
        self.advance(now);
        let sum: u64 = self.samples.iter().sum();
        sum < self.threshold_bytes()
    }

    fn record(&mut self, now: Instant, bytes: u64) {
        self.advance(now);
        self.samples[self.pos] += bytes;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Ring {
    base: u64,
    desc_count: u32,
    cursor: u32,
}

impl Ring {
    fn configured(&self) -> bool {
        self.desc_count > 0
    }

    fn desc_addr(&self, layout: &DescriptorLayout) -> u64 {
        self.base + (self.cursor as u64) * (layout.size as u64)
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.desc_count;
    }
}

pub struct DmaRingEngine {
    layout: DescriptorLayout,
    style: SoftwareStyle,
    rx_buffer_size: usize,

    tx: Ring,
    rx: Ring,

    tx_in_progress: Vec<u8>,
    rx_pending: VecDeque<Vec<u8>>,
    rx_in_progress_offset: usize,
    tx_frames: VecDeque<Vec<u8>>,

    mac_filter: MacFilter,
    tx_bandwidth: TxShaper,
    isl_vlan: Option<u16>,

    irq_cause: u32,
    irq_enable: u32,
    tx_cause_bit: u32,
    rx_cause_bit: u32,
}

impl DmaRingEngine {
    pub fn new(
        layout: DescriptorLayout,
        style: SoftwareStyle,
        tx_cause_bit: u32,
        rx_cause_bit: u32,
    ) -> Self {
        Self {
            layout,
            style,
            rx_buffer_size: 2048,
            tx: Ring::default(),
            rx: Ring::default(),
            tx_in_progress: Vec::new(),
            rx_pending: VecDeque::new(),
            rx_in_progress_offset: 0,
            tx_frames: VecDeque::new(),
            mac_filter: MacFilter::new(),
            tx_bandwidth: TxShaper::new(),
            isl_vlan: None,
            irq_cause: 0,
            irq_enable: 0,
            tx_cause_bit,
            rx_cause_bit,
        }
    }

    pub fn configure_tx(&mut self, base: u64, desc_count: u32) {
        self.tx = Ring {
            base,
            desc_count,
            cursor: 0,
        };
    }

    pub fn configure_rx(&mut self, base: u64, desc_count: u32) {
        self.rx = Ring {
            base,
            desc_count,
            cursor: 0,
        };
    }

    pub fn set_rx_buffer_size(&mut self, size: usize) {
        self.rx_buffer_size = size;
    }

    /// Enables/disables promiscuous reception; while set, [`Self::deliver_rx`]
    /// accepts every queued frame regardless of the perfect-filter table.
    pub fn set_promiscuous(&mut self, promiscuous: bool) {
        self.mac_filter.set_promiscuous(promiscuous);
    }

    /// Loads the perfect-filter address table directly, bypassing the
    /// setup-frame TX path. Used by profiles/tests that don't want to
    /// construct a 192-byte setup descriptor.
    pub fn configure_mac_filter(&mut self, addresses: impl IntoIterator<Item = [u8; 6]>) {
        self.mac_filter.load(addresses);
    }

    /// Caps the rate frames are handed off the TX ring, independent of
    /// whatever shaping happens further downstream. `0` disables shaping.
    pub fn set_tx_bandwidth(&mut self, kbps: u32) {
        self.tx_bandwidth.set_bandwidth(kbps);
    }

    /// When set, every frame drained off the TX ring is wrapped in an ISL
    /// trunk header carrying this VLAN ID before it's handed to
    /// [`Self::pop_tx_frame`].
    pub fn set_isl_vlan(&mut self, vlan_id: Option<u16>) {
        self.isl_vlan = vlan_id;
    }

    pub fn enqueue_rx_frame(&mut self, frame: Vec<u8>) {
        self.rx_pending.push_back(frame);
    }

    pub fn pop_tx_frame(&mut self) -> Option<Vec<u8>> {
        self.tx_frames.pop_front()
    }

    /// Drains whatever TX descriptors the device currently owns and
    /// scatters whatever RX frames are queued into whatever RX descriptors
    /// the device currently owns. Safe to call as often as the caller
    /// likes; a poll that finds nothing to do is a no-op.
    pub fn poll(&mut self, mem: &mut dyn MemoryBus) {
        self.drain_tx(mem);
        self.deliver_rx(mem);
    }

    fn drain_tx(&mut self, mem: &mut dyn MemoryBus) {
        if !self.tx.configured() {
            return;
        }
        for _ in 0..MAX_DESCRIPTORS_PER_POLL.min(self.tx.desc_count) {
            let addr = self.tx.desc_addr(&self.layout);
            let mut raw = vec![0u8; self.layout.size];
            mem.read_physical(addr, &mut raw);
            let desc = descriptor::decode(&self.layout, self.style, &raw);
            if !desc.owned_by_device {
                break;
            }

            if desc.setup {
                let mut setup = vec![0u8; desc.len as usize];
                mem.read_physical(desc.buf_addr, &mut setup);
                self.mac_filter.load(MacFilter::parse_setup_frame(&setup));

                descriptor::complete_tx(&self.layout, self.style, &mut raw);
                mem.write_physical(addr, &raw);
                self.tx.advance();
                self.irq_cause |= self.tx_cause_bit;
                continue;
            }

            let mut chunk = vec![0u8; desc.len as usize];
            mem.read_physical(desc.buf_addr, &mut chunk);
            if let (Some(addr2), Some(len2)) = (desc.buf_addr2, desc.len2) {
                if len2 > 0 {
                    let mut chunk2 = vec![0u8; len2 as usize];
                    mem.read_physical(addr2, &mut chunk2);
                    chunk.extend_from_slice(&chunk2);
                }
            }

            if desc.eop && !self.tx_bandwidth.can_transmit(Instant::now()) {
                // The device keeps this descriptor owned and retries on
                // the next poll; it does not drop the frame or clear the
                // own-bit just because the link is saturated right now.
                break;
            }

            self.tx_in_progress.extend_from_slice(&chunk);
            descriptor::complete_tx(&self.layout, self.style, &mut raw);
            mem.write_physical(addr, &raw);
            self.tx.advance();

            if desc.eop {
                let mut frame = std::mem::take(&mut self.tx_in_progress);
                if let Some(vlan_id) = self.isl_vlan {
                    frame = vnetfab_packet::isl::encapsulate(&frame, vlan_id);
                }
                self.tx_bandwidth.record(Instant::now(), frame.len() as u64);
                self.tx_frames.push_back(frame);
                self.irq_cause |= self.tx_cause_bit;
            }
        }
    }

    fn deliver_rx(&mut self, mem: &mut dyn MemoryBus) {
        if !self.rx.configured() {
            return;
        }
        let mut descriptors_used = 0u32;
        loop {
            if self.rx_in_progress_offset == 0 {
                let accepted = match self.rx_pending.front() {
                    Some(frame) => self.mac_filter.accepts(frame),
                    None => break,
                };
                if !accepted {
                    self.rx_pending.pop_front();
                    continue;
                }
            }

            if descriptors_used >= MAX_DESCRIPTORS_PER_POLL.min(self.rx.desc_count) {
                break;
            }

            let addr = self.rx.desc_addr(&self.layout);
            let mut raw = vec![0u8; self.layout.size];
            mem.read_physical(addr, &mut raw);
            let desc = descriptor::decode(&self.layout, self.style, &raw);
            if !desc.owned_by_device {
                break;
            }

            let sop = self.rx_in_progress_offset == 0;
            let frame = self.rx_pending.front().unwrap();
            let remaining = frame.len() - self.rx_in_progress_offset;
            let primary_len = remaining.min(self.rx_buffer_size);
            let primary_start = self.rx_in_progress_offset;
            let primary_chunk = frame[primary_start..primary_start + primary_len].to_vec();
            let secondary_chunk = desc.buf_addr2.and_then(|_| {
                let after_primary = remaining - primary_len;
                if after_primary == 0 {
                    return None;
                }
                let secondary_len = after_primary.min(self.rx_buffer_size);
                let start = primary_start + primary_len;
                Some(frame[start..start + secondary_len].to_vec())
            });

            mem.write_physical(desc.buf_addr, &primary_chunk);
            let mut written = primary_chunk.len();
            if let (Some(buf_addr2), Some(chunk2)) = (desc.buf_addr2, &secondary_chunk) {
                mem.write_physical(buf_addr2, chunk2);
                written += chunk2.len();
            }

            self.rx_in_progress_offset += written;
            let frame_len = self.rx_pending.front().unwrap().len();
            let eop = self.rx_in_progress_offset == frame_len;
            let crc_len = if eop { 4 } else { 0 };
            descriptor::complete_rx(&self.layout, self.style, &mut raw, (written + crc_len) as u16, sop, eop);
            mem.write_physical(addr, &raw);
            self.rx.advance();
            descriptors_used += 1;

            if eop {
                self.rx_pending.pop_front();
                self.rx_in_progress_offset = 0;
                self.irq_cause |= self.rx_cause_bit;
            }
        }
    }

    pub fn write_interrupt_mask_set(&mut self, bits: u32) {
        self.irq_enable |= bits;
    }

    pub fn write_interrupt_mask_clear(&mut self, bits: u32) {
        self.irq_enable &= !bits;
    }

    /// Returns the current cause bits without clearing them.
    pub fn peek_interrupt_cause(&self) -> u32 {
        self.irq_cause
    }

    /// Real hardware's ICR is clear-on-read; model the same contract.
    pub fn read_and_clear_interrupt_cause(&mut self) -> u32 {
        std::mem::take(&mut self.irq_cause)
    }

    pub fn irq_level(&self) -> bool {
        self.irq_cause & self.irq_enable != 0
    }

    /// Interrupt coalescing (ITR-style throttling) is not implemented:
    /// every completed descriptor raises its cause bit immediately. This
    /// hook exists so a profile's register write lands somewhere instead
    /// of panicking on an unknown register.
    pub fn set_interrupt_throttle(&mut self, _interval: u16) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorLayout;
    use vnetfab_memory::DenseMemory;

    const LAYOUT: DescriptorLayout = DescriptorLayout {
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

    fn write_desc(mem: &mut DenseMemory, addr: u64, buf_addr: u64, len: u16, owned: bool, eop: bool) {
        let mut raw = [0u8; 32];
        raw[0..8].copy_from_slice(&buf_addr.to_le_bytes());
        raw[8..10].copy_from_slice(&len.to_le_bytes());
        if owned {
            raw[12] |= 0x80;
        }
        if eop {
            raw[12] |= 0x40;
        }
        mem.write_physical(addr, &raw);
    }

    #[test]
    fn tx_single_descriptor_frame_is_drained() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        mem.write_physical(0x4000, b"hello world");
        write_desc(&mut mem, 0x1000, 0x4000, 11, true, true);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_tx(0x1000, 4);
        engine.poll(&mut mem);

        assert_eq!(engine.pop_tx_frame().as_deref(), Some(b"hello world".as_slice()));
        assert_eq!(engine.peek_interrupt_cause(), 0x1);
    }

    #[test]
    fn tx_stops_at_first_host_owned_descriptor() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        write_desc(&mut mem, 0x1000, 0x4000, 0, false, true);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_tx(0x1000, 4);
        engine.poll(&mut mem);

        assert!(engine.pop_tx_frame().is_none());
        assert_eq!(engine.peek_interrupt_cause(), 0);
    }

    #[test]
    fn rx_frame_larger_than_one_buffer_scatters_across_descriptors() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        write_desc(&mut mem, 0x2000, 0x5000, 0, true, false);
        write_desc(&mut mem, 0x2020, 0x5100, 0, true, false);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_rx(0x2000, 2);
        engine.set_rx_buffer_size(8);
        engine.set_promiscuous(true);
        engine.enqueue_rx_frame(b"0123456789ABCDE".to_vec()); // 15 bytes, 2 chunks of <=8

        engine.poll(&mut mem);

        let mut first = [0u8; 8];
        mem.read_physical(0x5000, &mut first);
        assert_eq!(&first, b"01234567");

        let mut second = [0u8; 7];
        mem.read_physical(0x5100, &mut second);
        assert_eq!(&second, b"89ABCDE");

        assert_eq!(engine.peek_interrupt_cause(), 0x2);
    }

    #[test]
    fn rx_first_descriptor_gets_sop_and_final_length_includes_crc() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        write_desc(&mut mem, 0x2000, 0x5000, 0, true, false);
        write_desc(&mut mem, 0x2020, 0x5100, 0, true, false);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_rx(0x2000, 2);
        engine.set_rx_buffer_size(100);
        engine.set_promiscuous(true);
        engine.enqueue_rx_frame(vec![0xCCu8; 150]);

        engine.poll(&mut mem);

        let mut first_raw = [0u8; 32];
        mem.read_physical(0x2000, &mut first_raw);
        assert_ne!(first_raw[12] & 0x20, 0, "first descriptor must carry SOP");
        assert_eq!(u16::from_le_bytes([first_raw[8], first_raw[9]]), 100);

        let mut second_raw = [0u8; 32];
        mem.read_physical(0x2020, &mut second_raw);
        assert_eq!(second_raw[12] & 0x20, 0, "second descriptor must not repeat SOP");
        assert_ne!(second_raw[12] & 0x40, 0, "final descriptor must carry EOP");
        assert_eq!(
            u16::from_le_bytes([second_raw[8], second_raw[9]]),
            54,
            "final descriptor's length must include the 4-byte CRC"
        );
    }

    #[test]
    fn rx_waits_for_descriptors_when_ring_is_full_of_host_owned_entries() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        write_desc(&mut mem, 0x2000, 0x5000, 0, false, false);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_rx(0x2000, 1);
        engine.set_promiscuous(true);
        engine.enqueue_rx_frame(b"pending".to_vec());
        engine.poll(&mut mem);

        assert_eq!(engine.peek_interrupt_cause(), 0);

        write_desc(&mut mem, 0x2000, 0x5000, 0, true, false);
        engine.poll(&mut mem);
        assert_eq!(engine.peek_interrupt_cause(), 0x2);
    }

    #[test]
    fn irq_level_respects_enable_mask() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        write_desc(&mut mem, 0x1000, 0x4000, 0, true, true);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_tx(0x1000, 1);
        engine.poll(&mut mem);

        assert!(!engine.irq_level());
        engine.write_interrupt_mask_set(0x1);
        assert!(engine.irq_level());
        engine.read_and_clear_interrupt_cause();
        assert!(!engine.irq_level());
    }

    #[test]
    fn rx_drops_frames_that_fail_the_mac_filter_without_consuming_descriptors() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        write_desc(&mut mem, 0x2000, 0x5000, 0, true, false);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_rx(0x2000, 1);
        engine.configure_mac_filter([[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]]);

        let mut frame = vec![0x11u8; 6];
        frame.extend_from_slice(b"payload");
        engine.enqueue_rx_frame(frame);
        engine.poll(&mut mem);

        assert_eq!(engine.peek_interrupt_cause(), 0);
        let mut raw = [0u8; 32];
        mem.read_physical(0x2000, &mut raw);
        assert_ne!(raw[12] & 0x80, 0, "descriptor must remain device-owned, untouched");
    }

    #[test]
    fn tx_setup_frame_loads_mac_filter_instead_of_transmitting() {
        use crate::mac_filter::SETUP_FRAME_LEN;

        let mut mem = DenseMemory::new(0x10000).unwrap();
        let mut setup = vec![0u8; SETUP_FRAME_LEN];
        setup[0..6].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        mem.write_physical(0x4000, &setup);

        let mut raw = [0u8; 32];
        raw[0..8].copy_from_slice(&0x4000u64.to_le_bytes());
        raw[8..10].copy_from_slice(&(SETUP_FRAME_LEN as u16).to_le_bytes());
        raw[12] = 0b1001_0000; // own + setup
        mem.write_physical(0x1000, &raw);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_tx(0x1000, 1);
        engine.poll(&mut mem);

        assert!(engine.pop_tx_frame().is_none(), "a setup frame is never put on the wire");
        assert!(!engine.mac_filter.accepts(&[0x11; 6]));
        assert!(engine.mac_filter.accepts(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }

    #[test]
    fn tx_backs_off_without_clearing_own_bit_when_bandwidth_is_saturated() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        mem.write_physical(0x4000, &vec![0xAAu8; 2000]);
        write_desc(&mut mem, 0x1000, 0x4000, 2000, true, true);
        mem.write_physical(0x5000, &vec![0xBBu8; 10]);
        write_desc(&mut mem, 0x1020, 0x5000, 10, true, true);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_tx(0x1000, 2);
        engine.set_tx_bandwidth(1); // ~37 bytes/300ms window

        engine.poll(&mut mem);

        assert_eq!(engine.pop_tx_frame().as_deref(), Some(vec![0xAAu8; 2000].as_slice()));
        assert!(engine.pop_tx_frame().is_none(), "second frame must back off, not transmit");

        let mut raw = [0u8; 32];
        mem.read_physical(0x1020, &mut raw);
        assert_ne!(raw[12] & 0x80, 0, "own-bit must stay set when the device backs off");
    }

    #[test]
    fn tx_isl_vlan_wraps_drained_frames() {
        let mut mem = DenseMemory::new(0x10000).unwrap();
        mem.write_physical(0x4000, b"plain frame");
        write_desc(&mut mem, 0x1000, 0x4000, 11, true, true);

        let mut engine = DmaRingEngine::new(LAYOUT, SoftwareStyle::Style0, 0x1, 0x2);
        engine.configure_tx(0x1000, 1);
        engine.set_isl_vlan(Some(7));
        engine.poll(&mut mem);

        let frame = engine.pop_tx_frame().unwrap();
        let (payload, vlan_id) = vnetfab_packet::isl::decapsulate(&frame).unwrap();
        assert_eq!(payload, b"plain frame");
        assert_eq!(vlan_id, 7);
    }
}
