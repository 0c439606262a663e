//! CRC-32 (polynomial 0x04C11DB7, reflected form 0xEDB88320) used as the
//! AAL5 trailer checksum. The accumulator is seeded with `0xFFFF_FFFF` by
//! the caller and the one's-complement is applied by the caller at the end
//! (mirrors dynamips' `atm_vsar.c`, which calls the shared `crc32_compute`
//! update routine and inverts the result itself when building the trailer).

const POLY_REFLECTED: u32 = 0xEDB8_8320;

fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLY_REFLECTED
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
}

fn table() -> &'static [u32; 256] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

/// Starting accumulator value for a fresh AAL5 CRC-32 run.
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// Folds `data` into a running CRC-32 accumulator. Call with
/// [`CRC32_INIT`] for the first chunk of a new packet, then one's-complement
/// the final accumulator to get the wire value.
pub fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    let table = table();
    for &byte in data {
        crc = (crc >> 8) ^ table[((crc ^ byte as u32) & 0xFF) as usize];
    }
    crc
}

/// Convenience one-shot CRC-32 over a full buffer, with the conventional
/// one's-complement finalization applied (used for the ISL inner-frame CRC
/// and HDLC-adjacent framing, as opposed to the raw running accumulator
/// AAL5 segmentation needs).
pub fn crc32(data: &[u8]) -> u32 {
    !crc32_update(CRC32_INIT, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_known_vector() {
        // Standard IEEE 802.3 CRC-32 check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_update_is_incremental() {
        let whole = crc32_update(CRC32_INIT, b"hello world");
        let split = crc32_update(crc32_update(CRC32_INIT, b"hello "), b"world");
        assert_eq!(whole, split);
    }
}
