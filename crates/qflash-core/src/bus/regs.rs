//! Bus register map of the flash controller
//!
//! Addresses are byte addresses; every transaction moves 32-bit words.
//! Words in the memory and OTP windows are big-endian, so the byte at the
//! lowest address is the most significant byte of the word.

use crate::chip::{ConfigRegister, FLASH_SIZE, JEDEC_ID_LEN, NUM_SECTORS, OTP_SIZE};

/// Start of the memory window (flash offset 0)
pub const MEM_BASE: u32 = 0x0000_0000;
/// Control register: erase commands and write enable latch
pub const CTRL: u32 = 0x0100_0000;
/// Status register
pub const STATUS: u32 = 0x0100_0004;
/// Flag status register, writes clear the error flags
pub const FLAGS: u32 = 0x0100_0008;
/// Non-volatile configuration register
pub const NVCONFIG: u32 = 0x0100_000C;
/// Volatile configuration register
pub const VCONFIG: u32 = 0x0100_0010;
/// Enhanced volatile configuration register
pub const EVCONFIG: u32 = 0x0100_0014;
/// Identification bytes (five words through `readi`)
pub const ID: u32 = 0x0100_0018;
/// First lock register, one word per sector
pub const LOCK_BASE: u32 = 0x0120_0000;
/// Start of the OTP window
pub const OTP_BASE: u32 = 0x0140_0000;

/// Control register read: device busy (WIP set)
pub const CTRL_BUSY: u32 = 1 << 31;
/// Control register write: opcode field shift
pub const CTRL_OPCODE_SHIFT: u32 = 24;

/// A decoded bus address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Flash memory at the given offset
    Memory(u32),
    /// Control register
    Ctrl,
    /// Status register
    Status,
    /// Flag status register
    Flags,
    /// One of the configuration registers
    Config(ConfigRegister),
    /// Identification bytes starting at the given offset
    Id(u32),
    /// Lock register of the given sector
    Lock(usize),
    /// OTP array at the given offset
    Otp(u32),
}

/// Encode a control register command
pub const fn ctrl_command(opcode: u8, addr: u32) -> u32 {
    ((opcode as u32) << CTRL_OPCODE_SHIFT) | (addr & crate::chip::ADDR_MASK)
}

/// Split a control register write into opcode and address
pub const fn ctrl_decode(value: u32) -> (u8, u32) {
    (
        (value >> CTRL_OPCODE_SHIFT) as u8,
        value & crate::chip::ADDR_MASK,
    )
}

/// Bus address of a configuration register
pub const fn config(reg: ConfigRegister) -> u32 {
    match reg {
        ConfigRegister::NonVolatile => NVCONFIG,
        ConfigRegister::Volatile => VCONFIG,
        ConfigRegister::EnhancedVolatile => EVCONFIG,
    }
}

/// Bus address of a sector's lock register
pub const fn lock(sector: usize) -> u32 {
    LOCK_BASE + (sector as u32) * 4
}

/// Bus address of an OTP offset
pub const fn otp(offset: u32) -> u32 {
    OTP_BASE + offset
}

/// Decode a bus address, `None` if nothing is mapped there
pub fn decode(addr: u32) -> Option<Register> {
    let id_end = ID + JEDEC_ID_LEN as u32;
    let lock_end = LOCK_BASE + NUM_SECTORS as u32 * 4;
    // OTP words cover the control byte, so the window is rounded up
    let otp_end = OTP_BASE + (OTP_SIZE as u32).next_multiple_of(4);

    match addr {
        a if a < FLASH_SIZE as u32 => Some(Register::Memory(a - MEM_BASE)),
        CTRL => Some(Register::Ctrl),
        STATUS => Some(Register::Status),
        FLAGS => Some(Register::Flags),
        NVCONFIG => Some(Register::Config(ConfigRegister::NonVolatile)),
        VCONFIG => Some(Register::Config(ConfigRegister::Volatile)),
        EVCONFIG => Some(Register::Config(ConfigRegister::EnhancedVolatile)),
        a if (ID..id_end).contains(&a) => Some(Register::Id(a - ID)),
        a if (LOCK_BASE..lock_end).contains(&a) => {
            Some(Register::Lock(((a - LOCK_BASE) / 4) as usize))
        }
        a if (OTP_BASE..otp_end).contains(&a) => Some(Register::Otp(a - OTP_BASE)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::opcodes;

    #[test]
    fn decode_windows() {
        assert_eq!(decode(0x1000), Some(Register::Memory(0x1000)));
        assert_eq!(decode(0x00FF_FFFC), Some(Register::Memory(0xFF_FFFC)));
        assert_eq!(decode(CTRL), Some(Register::Ctrl));
        assert_eq!(
            decode(VCONFIG),
            Some(Register::Config(ConfigRegister::Volatile))
        );
        assert_eq!(decode(ID + 16), Some(Register::Id(16)));
        assert_eq!(decode(ID + 20), None);
        assert_eq!(decode(lock(255)), Some(Register::Lock(255)));
        assert_eq!(decode(lock(256)), None);
        assert_eq!(decode(otp(64)), Some(Register::Otp(64)));
        assert_eq!(decode(otp(68)), None);
        assert_eq!(decode(0x0200_0000), None);
    }

    #[test]
    fn ctrl_round_trip() {
        let v = ctrl_command(opcodes::SE, 0x12_3456);
        assert_eq!(v, 0xD812_3456);
        assert_eq!(ctrl_decode(v), (opcodes::SE, 0x12_3456));
    }
}
