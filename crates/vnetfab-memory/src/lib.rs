//! Guest-memory access abstraction shared by every DMA-capable device.
//!
//! The descriptor-ring engine in `vnetfab-nic` never touches guest RAM
//! directly: it goes through a [`MemoryBus`] so the same engine code can run
//! against a flat [`DenseMemory`] array in unit tests and against a real
//! guest address space (with MMIO windows layered on top via
//! [`PhysicalMemoryBus`]) in the router binary.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {addr:#x} with length {len} is out of bounds (size {size:#x})")]
    OutOfBounds { addr: u64, len: usize, size: usize },
    #[error("mmio region [{base:#x}, {base:#x}+{len:#x}) overlaps an existing region")]
    OverlappingMmio { base: u64, len: u64 },
}

/// A byte-addressable physical memory space a device can DMA into/out of.
pub trait MemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]);
    fn write_physical(&mut self, paddr: u64, buf: &[u8]);

    fn read_physical_u16(&mut self, paddr: u64) -> u16 {
        let mut buf = [0u8; 2];
        self.read_physical(paddr, &mut buf);
        u16::from_le_bytes(buf)
    }

    fn read_physical_u32(&mut self, paddr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_physical(paddr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn read_physical_u64(&mut self, paddr: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read_physical(paddr, &mut buf);
        u64::from_le_bytes(buf)
    }

    fn write_physical_u16(&mut self, paddr: u64, value: u16) {
        self.write_physical(paddr, &value.to_le_bytes());
    }

    fn write_physical_u32(&mut self, paddr: u64, value: u32) {
        self.write_physical(paddr, &value.to_le_bytes());
    }

    fn write_physical_u64(&mut self, paddr: u64, value: u64) {
        self.write_physical(paddr, &value.to_le_bytes());
    }
}

/// A flat, allocated block of guest RAM. The reference `MemoryBus` used by
/// every unit test in this workspace and by the router binary for guests
/// that don't need MMIO passthrough.
pub struct DenseMemory {
    bytes: Vec<u8>,
}

impl DenseMemory {
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        Ok(Self {
            bytes: vec![0u8; size],
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn bounds_check(&self, addr: u64, len: usize) -> Result<usize, MemoryError> {
        let addr = usize::try_from(addr).map_err(|_| MemoryError::OutOfBounds {
            addr,
            len,
            size: self.bytes.len(),
        })?;
        if addr.checked_add(len).is_none_or(|end| end > self.bytes.len()) {
            return Err(MemoryError::OutOfBounds {
                addr: addr as u64,
                len,
                size: self.bytes.len(),
            });
        }
        Ok(addr)
    }
}

impl MemoryBus for DenseMemory {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        match self.bounds_check(paddr, buf.len()) {
            Ok(addr) => buf.copy_from_slice(&self.bytes[addr..addr + buf.len()]),
            Err(_) => buf.fill(0),
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        if let Ok(addr) = self.bounds_check(paddr, buf.len()) {
            self.bytes[addr..addr + buf.len()].copy_from_slice(buf);
        }
    }
}

/// A memory-mapped register window. `offset` is relative to the region's
/// mapped base address.
pub trait MmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64;
    fn write(&mut self, offset: u64, size: usize, value: u64);
}

struct MmioRegion {
    base: u64,
    len: u64,
    handler: Box<dyn MmioHandler>,
}

/// Composes a flat RAM backing store with zero or more MMIO windows,
/// dispatching physical reads/writes to whichever region an address falls
/// in. Accesses that don't hit an MMIO window fall through to RAM.
pub struct PhysicalMemoryBus {
    ram: Box<dyn MemoryBus>,
    mmio: BTreeMap<u64, MmioRegion>,
}

impl PhysicalMemoryBus {
    pub fn new(ram: Box<dyn MemoryBus>) -> Self {
        Self {
            ram,
            mmio: BTreeMap::new(),
        }
    }

    pub fn map_mmio(
        &mut self,
        base: u64,
        len: u64,
        handler: Box<dyn MmioHandler>,
    ) -> Result<(), MemoryError> {
        if let Some((_, existing)) = self.mmio.range(..=base).next_back() {
            if base < existing.base + existing.len {
                return Err(MemoryError::OverlappingMmio { base, len });
            }
        }
        if let Some((&next_base, _)) = self.mmio.range(base..).next() {
            if next_base < base + len {
                return Err(MemoryError::OverlappingMmio { base, len });
            }
        }
        self.mmio.insert(base, MmioRegion { base, len, handler });
        Ok(())
    }

    fn mmio_at(&mut self, addr: u64) -> Option<&mut MmioRegion> {
        let (_, region) = self.mmio.range_mut(..=addr).next_back()?;
        if addr >= region.base && addr < region.base + region.len {
            Some(region)
        } else {
            None
        }
    }
}

impl MemoryBus for PhysicalMemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        if let Some(region) = self.mmio_at(paddr) {
            let offset = paddr - region.base;
            let mut remaining = buf.len();
            let mut pos = 0;
            while remaining > 0 {
                let chunk = remaining.min(4);
                let value = region.handler.read(offset + pos as u64, chunk);
                buf[pos..pos + chunk].copy_from_slice(&value.to_le_bytes()[..chunk]);
                pos += chunk;
                remaining -= chunk;
            }
            return;
        }
        self.ram.read_physical(paddr, buf);
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        if let Some(region) = self.mmio_at(paddr) {
            let offset = paddr - region.base;
            let mut pos = 0;
            while pos < buf.len() {
                let chunk = (buf.len() - pos).min(4);
                let mut raw = [0u8; 4];
                raw[..chunk].copy_from_slice(&buf[pos..pos + chunk]);
                let value = u32::from_le_bytes(raw) as u64;
                region.handler.write(offset + pos as u64, chunk, value);
                pos += chunk;
            }
            return;
        }
        self.ram.write_physical(paddr, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingRegister {
        value: u32,
        writes: u32,
    }

    impl MmioHandler for CountingRegister {
        fn read(&mut self, _offset: u64, _size: usize) -> u64 {
            self.value as u64
        }

        fn write(&mut self, _offset: u64, _size: usize, value: u64) {
            self.value = value as u32;
            self.writes += 1;
        }
    }

    #[test]
    fn dense_memory_round_trips_u32() {
        let mut mem = DenseMemory::new(0x1000).unwrap();
        mem.write_physical_u32(0x10, 0xDEAD_BEEF);
        assert_eq!(mem.read_physical_u32(0x10), 0xDEAD_BEEF);
    }

    #[test]
    fn dense_memory_out_of_bounds_reads_as_zero_and_ignores_writes() {
        let mut mem = DenseMemory::new(0x10).unwrap();
        let mut buf = [0xFFu8; 4];
        mem.read_physical(0x100, &mut buf);
        assert_eq!(buf, [0u8; 4]);

        mem.write_physical(0x100, &[1, 2, 3, 4]);
        assert_eq!(mem.read_physical_u32(0), 0);
    }

    #[test]
    fn physical_memory_bus_routes_mmio_and_falls_back_to_ram() {
        let ram = DenseMemory::new(0x1000).unwrap();
        let mut bus = PhysicalMemoryBus::new(Box::new(ram));
        bus.map_mmio(
            0x2000,
            0x10,
            Box::new(CountingRegister {
                value: 0,
                writes: 0,
            }),
        )
        .unwrap();

        bus.write_physical_u32(0x10, 0x1234);
        assert_eq!(bus.read_physical_u32(0x10), 0x1234);

        bus.write_physical_u32(0x2000, 0xAAAA);
        assert_eq!(bus.read_physical_u32(0x2000), 0xAAAA);
    }

    #[test]
    fn overlapping_mmio_regions_are_rejected() {
        let mut bus = PhysicalMemoryBus::new(Box::new(DenseMemory::new(0x10).unwrap()));
        bus.map_mmio(0x1000, 0x100, Box::new(CountingRegister { value: 0, writes: 0 }))
            .unwrap();
        let err = bus
            .map_mmio(0x1080, 0x100, Box::new(CountingRegister { value: 0, writes: 0 }))
            .unwrap_err();
        assert_eq!(
            err,
            MemoryError::OverlappingMmio {
                base: 0x1080,
                len: 0x100
            }
        );
    }
}
