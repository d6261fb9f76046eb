//! Address space layout and identification

/// Total size of the memory array (24-bit addressing)
pub const FLASH_SIZE: usize = 1 << 24;
/// Mask applied to incoming addresses
pub const ADDR_MASK: u32 = (FLASH_SIZE as u32) - 1;
/// Sector size, the unit of the 0xD8 erase and of lock registers
pub const SECTOR_SIZE: usize = 64 * 1024;
/// Subsector size, the unit of the 0x20 erase
pub const SUBSECTOR_SIZE: usize = 4 * 1024;
/// Page size, the unit of programming
pub const PAGE_SIZE: usize = 256;
/// Number of sectors (and lock registers)
pub const NUM_SECTORS: usize = FLASH_SIZE / SECTOR_SIZE;
/// OTP array size including the trailing control byte
pub const OTP_SIZE: usize = 65;
/// Offset of the OTP control byte
pub const OTP_CONTROL: usize = OTP_SIZE - 1;

/// The erased value for flash memory (all bits set)
pub const ERASED: u8 = 0xFF;

/// Length of the read-ID response
pub const JEDEC_ID_LEN: usize = 20;

/// Read-ID response: manufacturer (Micron), memory type, capacity (128 Mbit),
/// extended ID length, then extended device ID and factory data
pub const JEDEC_ID: [u8; JEDEC_ID_LEN] = [
    0x20, 0xBA, 0x18, 0x10, 0x00, 0x00, 0x23, 0x51, 0x17, 0x0E, 0x00, 0x13, 0x00, 0x2B, 0x4D,
    0x36, 0x0F, 0x12, 0x09, 0x14,
];

/// The first four ID bytes as a big-endian word
pub const FLASH_ID: u32 = u32::from_be_bytes([JEDEC_ID[0], JEDEC_ID[1], JEDEC_ID[2], JEDEC_ID[3]]);

/// Base address of the sector containing `addr`
pub const fn sector_base(addr: u32) -> u32 {
    addr & !(SECTOR_SIZE as u32 - 1)
}

/// Index of the sector containing `addr`
pub const fn sector_index(addr: u32) -> usize {
    ((addr & ADDR_MASK) as usize) / SECTOR_SIZE
}

/// Base address of the subsector containing `addr`
pub const fn subsector_base(addr: u32) -> u32 {
    addr & !(SUBSECTOR_SIZE as u32 - 1)
}

/// Base address of the page containing `addr`
pub const fn page_base(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}

/// Check that `len` bytes starting at `addr` fit in the array
pub fn in_bounds(addr: u32, len: usize) -> bool {
    (addr as u64) + (len as u64) <= FLASH_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_is_consistent() {
        assert_eq!(NUM_SECTORS, 256);
        assert_eq!(SECTOR_SIZE / SUBSECTOR_SIZE, 16);
        assert_eq!(SECTOR_SIZE / PAGE_SIZE, 256);
    }

    #[test]
    fn id_word_matches_bytes() {
        assert_eq!(FLASH_ID, 0x20BA_1810);
    }

    #[test]
    fn base_helpers() {
        assert_eq!(sector_base(0x12_3456), 0x12_0000);
        assert_eq!(subsector_base(0x12_3456), 0x12_3000);
        assert_eq!(page_base(0x12_3456), 0x12_3400);
        assert_eq!(sector_index(0xFF_FFFF), 255);
    }

    #[test]
    fn bounds() {
        assert!(in_bounds(0, FLASH_SIZE));
        assert!(in_bounds(0xFF_FF00, 256));
        assert!(!in_bounds(0xFF_FF00, 257));
    }
}
