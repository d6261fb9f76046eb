//! Status, flag and configuration register layout

use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        /// Write in progress
        const WIP  = 1 << 0;
        /// Write enable latch
        const WEL  = 1 << 1;
        /// Block protect bit 0
        const BP0  = 1 << 2;
        /// Block protect bit 1
        const BP1  = 1 << 3;
        /// Block protect bit 2
        const BP2  = 1 << 4;
        /// Top/bottom protect
        const TB   = 1 << 5;
        /// Block protect bit 3
        const BP3  = 1 << 6;
        /// Status register write disable
        const SRWD = 1 << 7;

        /// Bits that Write Status may change
        const WRITABLE = 0xFC;
    }
}

bitflags! {
    /// Flag status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        /// Protection error: a write targeted a locked area
        const PROTECTION   = 1 << 1;
        /// Program failure
        const PROGRAM_FAIL = 1 << 4;
        /// Erase failure
        const ERASE_FAIL   = 1 << 5;
        /// Program/erase controller ready
        const READY        = 1 << 7;

        /// Bits cleared by Clear Flag Status
        const ERRORS = Self::PROTECTION.bits() | Self::PROGRAM_FAIL.bits() | Self::ERASE_FAIL.bits();
    }
}

/// One of the three configuration registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigRegister {
    /// Volatile configuration register (8 bit)
    Volatile,
    /// Enhanced volatile configuration register (8 bit)
    EnhancedVolatile,
    /// Non-volatile configuration register (16 bit, LSB first on the wire)
    NonVolatile,
}

impl ConfigRegister {
    /// Register width in bytes
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Volatile | Self::EnhancedVolatile => 1,
            Self::NonVolatile => 2,
        }
    }

    /// Power-on value
    pub const fn default_value(&self) -> u16 {
        match self {
            Self::Volatile => 0xFB,
            Self::EnhancedVolatile => 0xDF,
            Self::NonVolatile => 0x8FFF,
        }
    }

    /// Bits checked on write, and the value they must hold
    ///
    /// The model supports a single dummy-cycle and I/O setup, so the
    /// corresponding fields are fixed.
    pub const fn reserved(&self) -> (u16, u16) {
        match self {
            Self::Volatile => (0xFB, 0xFB),
            Self::EnhancedVolatile => (0xD7, 0xD7),
            Self::NonVolatile => (0xFFC5, 0x8FC5),
        }
    }

    /// Check a value against the register's reserved bits
    pub const fn is_valid(&self, value: u16) -> bool {
        let (care, required) = self.reserved();
        value & care == required && (self.bytes() == 2 || value <= 0xFF)
    }

    /// Read opcode
    pub const fn read_opcode(&self) -> u8 {
        match self {
            Self::Volatile => crate::spi::RDVCR,
            Self::EnhancedVolatile => crate::spi::RDEVCR,
            Self::NonVolatile => crate::spi::RDNVCR,
        }
    }

    /// Write opcode
    pub const fn write_opcode(&self) -> u8 {
        match self {
            Self::Volatile => crate::spi::WRVCR,
            Self::EnhancedVolatile => crate::spi::WREVCR,
            Self::NonVolatile => crate::spi::WRNVCR,
        }
    }
}

impl fmt::Display for ConfigRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volatile => write!(f, "volatile config"),
            Self::EnhancedVolatile => write!(f, "enhanced volatile config"),
            Self::NonVolatile => write!(f, "non-volatile config"),
        }
    }
}
