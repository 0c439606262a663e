//! Generic MII-compliant PHY: a 32x32 register file addressed over a
//! bit-banged MDIO serial frame, shared by every profile in this crate
//! (DEC21140/Am79c971/i8255x all expose an MII management interface to a
//! PHY, whether internal or external).

const REG_BMCR: usize = 0;
const REG_BMSR: usize = 1;
const REG_PHYID1: usize = 2;
const REG_PHYID2: usize = 3;

const BMSR_LINK_STATUS: u16 = 1 << 2;
const BMSR_AUTONEG_COMPLETE: u16 = 1 << 5;
const BMSR_AUTONEG_CAPABLE: u16 = 1 << 3;
const BMSR_100BASE_TX_FULL: u16 = 1 << 14;
const BMSR_10BASE_T_FULL: u16 = 1 << 12;

/// A single PHY's 32-entry register file.
pub struct MiiPhy {
    regs: [u16; 32],
}

impl MiiPhy {
    pub fn new(oui_msb: u16, oui_lsb: u16) -> Self {
        let mut regs = [0u16; 32];
        regs[REG_BMCR] = 0;
        regs[REG_BMSR] = BMSR_LINK_STATUS
            | BMSR_AUTONEG_COMPLETE
            | BMSR_AUTONEG_CAPABLE
            | BMSR_100BASE_TX_FULL
            | BMSR_10BASE_T_FULL;
        regs[REG_PHYID1] = oui_msb;
        regs[REG_PHYID2] = oui_lsb;
        Self { regs }
    }

    pub fn read(&self, reg: u8) -> u16 {
        self.regs[(reg & 0x1F) as usize]
    }

    pub fn write(&mut self, reg: u8, value: u16) {
        let reg = (reg & 0x1F) as usize;
        if reg == REG_PHYID1 || reg == REG_PHYID2 {
            return; // read-only identity registers
        }
        self.regs[reg] = value;
    }

    pub fn link_up(&self) -> bool {
        self.regs[REG_BMSR] & BMSR_LINK_STATUS != 0
    }
}

/// Bit-level state of an MDIO frame as it is clocked in/out, matching the
/// IEEE 802.3 clause 22 management frame: preamble, ST, OP, PHYAD, REGAD,
/// TA, DATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameField {
    Preamble,
    Start,
    Opcode,
    PhyAddr,
    RegAddr,
    TurnAround,
    Data,
    Idle,
}

/// Serial bit-shift state machine driving one or more [`MiiPhy`] instances
/// over a shared two-wire MDIO/MDC bus, the way the emulated chips expose
/// PHY access through a single bit-banged MMIO register.
pub struct MiiBus {
    phys: Vec<MiiPhy>,
    field: FrameField,
    bit_count: u32,
    shift_reg: u32,
    is_read: bool,
    target_phy: u8,
    target_reg: u8,
    out_bit: bool,
}

impl MiiBus {
    pub fn new(phys: Vec<MiiPhy>) -> Self {
        Self {
            phys,
            field: FrameField::Idle,
            bit_count: 0,
            shift_reg: 0,
            is_read: false,
            target_phy: 0,
            target_reg: 0,
            out_bit: true,
        }
    }

    pub fn phy(&self, addr: u8) -> Option<&MiiPhy> {
        self.phys.get(addr as usize)
    }

    pub fn phy_mut(&mut self, addr: u8) -> Option<&mut MiiPhy> {
        self.phys.get_mut(addr as usize)
    }

    /// Clocks one MDIO bit on the rising edge of MDC. `mdio_in` is the
    /// value the host drove; the return value is what the bus drives back
    /// (only meaningful during the PHY's turnaround/data-out half-frame).
    pub fn clock_bit(&mut self, mdio_in: bool) -> bool {
        match self.field {
            FrameField::Idle => {
                if mdio_in {
                    self.field = FrameField::Preamble;
                    self.bit_count = 1;
                }
            }
            FrameField::Preamble => {
                if mdio_in {
                    self.bit_count += 1;
                } else {
                    self.field = FrameField::Start;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                }
            }
            FrameField::Start => {
                self.shift(mdio_in);
                self.bit_count += 1;
                if self.bit_count == 2 {
                    self.field = FrameField::Opcode;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                }
            }
            FrameField::Opcode => {
                self.shift(mdio_in);
                self.bit_count += 1;
                if self.bit_count == 2 {
                    self.is_read = self.shift_reg & 0b10 != 0;
                    self.field = FrameField::PhyAddr;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                }
            }
            FrameField::PhyAddr => {
                self.shift(mdio_in);
                self.bit_count += 1;
                if self.bit_count == 5 {
                    self.target_phy = self.shift_reg as u8;
                    self.field = FrameField::RegAddr;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                }
            }
            FrameField::RegAddr => {
                self.shift(mdio_in);
                self.bit_count += 1;
                if self.bit_count == 5 {
                    self.target_reg = self.shift_reg as u8;
                    self.field = FrameField::TurnAround;
                    self.bit_count = 0;
                    self.shift_reg = if self.is_read {
                        self.phy(self.target_phy).map(|p| p.read(self.target_reg)).unwrap_or(0xFFFF) as u32
                    } else {
                        0
                    };
                }
            }
            FrameField::TurnAround => {
                self.bit_count += 1;
                if self.bit_count == 2 {
                    self.field = FrameField::Data;
                    self.bit_count = 0;
                }
            }
            FrameField::Data => {
                if self.is_read {
                    self.out_bit = (self.shift_reg >> (15 - self.bit_count)) & 1 != 0;
                } else {
                    self.shift(mdio_in);
                }
                self.bit_count += 1;
                if self.bit_count == 16 {
                    if !self.is_read {
                        let value = self.shift_reg as u16;
                        let target_reg = self.target_reg;
                        if let Some(phy) = self.phy_mut(self.target_phy) {
                            phy.write(target_reg, value);
                        }
                    }
                    self.field = FrameField::Idle;
                    self.bit_count = 0;
                }
            }
        }
        self.out_bit
    }

    fn shift(&mut self, bit: bool) {
        self.shift_reg = (self.shift_reg << 1) | bit as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_bits(bus: &mut MiiBus, bits: &[bool]) -> Vec<bool> {
        bits.iter().map(|&b| bus.clock_bit(b)).collect()
    }

    fn bits_of(value: u32, count: u32) -> Vec<bool> {
        (0..count).rev().map(|i| (value >> i) & 1 != 0).collect()
    }

    #[test]
    fn read_frame_returns_register_value() {
        let phy = MiiPhy::new(0x0022, 0x1410);
        let mut bus = MiiBus::new(vec![phy]);

        let mut frame = vec![true; 32]; // preamble
        frame.extend(bits_of(0b01, 2)); // ST
        frame.extend(bits_of(0b10, 2)); // OP = read
        frame.extend(bits_of(0, 5)); // PHYAD = 0
        frame.extend(bits_of(REG_PHYID1 as u32, 5)); // REGAD
        frame.extend([false, false]); // TA
        frame.extend(vec![false; 16]); // don't care during read

        let out = clock_bits(&mut bus, &frame);
        let data_out = &out[out.len() - 16..];
        let mut value = 0u32;
        for &bit in data_out {
            value = (value << 1) | bit as u32;
        }
        assert_eq!(value as u16, 0x0022);
    }

    #[test]
    fn write_frame_updates_register() {
        let phy = MiiPhy::new(0, 0);
        let mut bus = MiiBus::new(vec![phy]);

        let mut frame = vec![true; 32];
        frame.extend(bits_of(0b01, 2));
        frame.extend(bits_of(0b01, 2)); // OP = write
        frame.extend(bits_of(0, 5));
        frame.extend(bits_of(REG_BMCR as u32, 5));
        frame.extend([true, false]); // TA (host drives during write)
        frame.extend(bits_of(0xABCD, 16));

        clock_bits(&mut bus, &frame);
        assert_eq!(bus.phy(0).unwrap().read(REG_BMCR as u8), 0xABCD);
    }

    #[test]
    fn link_status_defaults_up() {
        let phy = MiiPhy::new(0, 0);
        assert!(phy.link_up());
    }
}
