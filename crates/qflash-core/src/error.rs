//! Error types for qflash-core
//!
//! This module provides no_std compatible error types shared by the device
//! model and the programming driver. They are all `Copy` so they can be
//! latched inside the device and passed around without allocation.

use core::fmt;

use crate::chip::ConfigRegister;

/// A violation of the flash wire protocol, detected by the device model
///
/// These indicate a bug in whatever drives the device (wrong bit counts,
/// commands out of sequence), not a recoverable device condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Chip select rose before a complete opcode byte was received
    TruncatedOpcode {
        /// Number of bits received
        bits: u32,
    },
    /// The opcode is not implemented by the device
    UnknownOpcode {
        /// The offending opcode
        opcode: u8,
    },
    /// A state-changing command was issued while a write was in progress
    Busy {
        /// The offending opcode
        opcode: u8,
    },
    /// Chip select rose before the command's address or argument was complete
    MissingArgument {
        /// Opcode of the aborted command
        opcode: u8,
        /// Number of bits received, including the opcode
        bits: u32,
    },
    /// Chip select rose in the middle of a data byte
    PartialByte {
        /// Opcode of the aborted command
        opcode: u8,
        /// Number of bits received, including the opcode
        bits: u32,
    },
    /// More bytes were clocked in than the command accepts
    TooManyClocks {
        /// Opcode of the command
        opcode: u8,
        /// Number of bits received, including the opcode
        bits: u32,
    },
    /// OTP programming ran past the end of the OTP array
    OtpOverrun {
        /// OTP offset that could not be written
        addr: u32,
    },
    /// A configuration register write carried reserved bits with the wrong value
    InvalidConfig {
        /// Register being written
        register: ConfigRegister,
        /// Rejected value
        value: u16,
    },
}

/// Failure of a single register bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// Nothing is mapped at the address
    Unmapped,
    /// Word access to an address that is not 4-byte aligned
    Misaligned,
    /// The flash device behind the bus reported a protocol violation
    Device(ProtocolViolation),
    /// The transport itself failed (link down, timeout, ...)
    Transport,
}

/// Driver-level error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A register transaction failed
    Bus {
        /// Bus address of the failed transaction
        addr: u32,
        /// What went wrong
        fault: BusFault,
    },
    /// Erase verification failed - flash not erased to 0xFF
    EraseVerify {
        /// Address of the first byte that is not 0xFF
        addr: u32,
        /// The byte value found
        found: u8,
    },
    /// Program verification failed - readback differs from the written data
    ProgramVerify {
        /// Address of the first mismatching byte
        addr: u32,
        /// Value that was written
        expected: u8,
        /// Value read back
        found: u8,
    },
    /// The device refused an erase or program because the target is locked
    Protected {
        /// Target address of the refused operation
        addr: u32,
    },
    /// The device stayed busy longer than the wait policy allows
    Timeout {
        /// Target address of the operation that was waited on
        addr: u32,
    },
    /// Waiting was cancelled by the caller
    Cancelled,
    /// A page program would cross a page boundary
    PageBoundary {
        /// Start address
        addr: u32,
        /// Length in bytes
        len: usize,
    },
    /// The range lies (partly) outside the device
    AddressOutOfBounds {
        /// Start address
        addr: u32,
        /// Length in bytes
        len: usize,
    },
    /// The device identifier is not the expected one
    IdMismatch {
        /// Identifier the caller expected
        expected: u32,
        /// Identifier the device returned
        found: u32,
    },
    /// The OTP array is write protected
    OtpLocked,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedOpcode { bits } => {
                write!(f, "chip select released after {} opcode bits", bits)
            }
            Self::UnknownOpcode { opcode } => write!(f, "unrecognized opcode 0x{:02X}", opcode),
            Self::Busy { opcode } => {
                write!(f, "opcode 0x{:02X} issued while a write is in progress", opcode)
            }
            Self::MissingArgument { opcode, bits } => write!(
                f,
                "opcode 0x{:02X} deselected after {} bits, argument incomplete",
                opcode, bits
            ),
            Self::PartialByte { opcode, bits } => write!(
                f,
                "opcode 0x{:02X} deselected mid-byte after {} bits",
                opcode, bits
            ),
            Self::TooManyClocks { opcode, bits } => {
                write!(f, "too many clocks for opcode 0x{:02X} ({} bits)", opcode, bits)
            }
            Self::OtpOverrun { addr } => write!(f, "OTP program past end of array at {}", addr),
            Self::InvalidConfig { register, value } => {
                write!(f, "invalid {} value 0x{:04X}", register, value)
            }
        }
    }
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmapped => write!(f, "unmapped address"),
            Self::Misaligned => write!(f, "misaligned word access"),
            Self::Device(v) => write!(f, "device protocol violation: {}", v),
            Self::Transport => write!(f, "transport failure"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus { addr, fault } => write!(f, "bus error at 0x{:08X}: {}", addr, fault),
            Self::EraseVerify { addr, found } => write!(
                f,
                "erase verify failed at 0x{:06X}: expected 0xFF, found 0x{:02X}",
                addr, found
            ),
            Self::ProgramVerify {
                addr,
                expected,
                found,
            } => write!(
                f,
                "program verify failed at 0x{:06X}: expected 0x{:02X}, found 0x{:02X}",
                addr, expected, found
            ),
            Self::Protected { addr } => write!(f, "sector containing 0x{:06X} is locked", addr),
            Self::Timeout { addr } => {
                write!(f, "timed out waiting for write at 0x{:06X} to finish", addr)
            }
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::PageBoundary { addr, len } => write!(
                f,
                "{} bytes at 0x{:06X} cross a page boundary",
                len, addr
            ),
            Self::AddressOutOfBounds { addr, len } => {
                write!(f, "{} bytes at 0x{:06X} exceed the flash size", len, addr)
            }
            Self::IdMismatch { expected, found } => write!(
                f,
                "flash ID mismatch: expected 0x{:08X}, found 0x{:08X}",
                expected, found
            ),
            Self::OtpLocked => write!(f, "OTP array is write protected"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ProtocolViolation {}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the driver Error type
pub type Result<T> = core::result::Result<T, Error>;
