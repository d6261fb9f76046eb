//! Flash command opcodes
//!
//! Opcode values of the supported command set. They follow the Micron
//! N25Q family and must be preserved exactly for protocol compatibility.

// ============================================================================
// Write control
// ============================================================================

/// Write Enable - sets WEL, required before any write/erase operation
pub const WREN: u8 = 0x06;
/// Write Disable - clears WEL
pub const WRDI: u8 = 0x04;

// ============================================================================
// Status and flag registers
// ============================================================================

/// Read Status Register
pub const RDSR: u8 = 0x05;
/// Write Status Register
pub const WRSR: u8 = 0x01;
/// Read Flag Status Register
pub const RDFSR: u8 = 0x70;
/// Clear Flag Status Register
pub const CLFSR: u8 = 0x50;

// ============================================================================
// Configuration registers
// ============================================================================

/// Read Volatile Configuration Register
pub const RDVCR: u8 = 0x85;
/// Write Volatile Configuration Register
pub const WRVCR: u8 = 0x81;
/// Read Enhanced Volatile Configuration Register
pub const RDEVCR: u8 = 0x65;
/// Write Enhanced Volatile Configuration Register
pub const WREVCR: u8 = 0x61;
/// Read Non-Volatile Configuration Register
pub const RDNVCR: u8 = 0xB5;
/// Write Non-Volatile Configuration Register
pub const WRNVCR: u8 = 0xB1;

// ============================================================================
// Identification
// ============================================================================

/// Read JEDEC ID
pub const RDID: u8 = 0x9F;
/// Read JEDEC ID (alternate opcode)
pub const RDID_ALT: u8 = 0x9E;

// ============================================================================
// Read commands
// ============================================================================

/// Fast Read (3-byte address, one dummy byte)
pub const FAST_READ: u8 = 0x0B;
/// Quad Read: address, mode byte and data on four lines
pub const QUAD_READ: u8 = 0x6B;

// ============================================================================
// Program and erase
// ============================================================================

/// Page Program (single wire)
pub const PP: u8 = 0x02;
/// Quad Page Program (data phase on four lines)
pub const QPP: u8 = 0x32;
/// Subsector Erase (4 KiB)
pub const SSE: u8 = 0x20;
/// Sector Erase (64 KiB)
pub const SE: u8 = 0xD8;
/// Bulk Erase (entire array)
pub const BE: u8 = 0xC7;

// ============================================================================
// OTP and lock registers
// ============================================================================

/// Program OTP array
pub const POTP: u8 = 0x42;
/// Read OTP array
pub const ROTP: u8 = 0x4B;
/// Write Lock Register
pub const WRLR: u8 = 0xE5;
/// Read Lock Register
pub const RDLR: u8 = 0xE8;

// ============================================================================
// Register bit definitions
// ============================================================================

/// Quad read mode byte: bit set means leave execute-in-place after this read
pub const MODE_XIP_EXIT: u8 = 0x80;

/// Lock register: sector is protected against erase/program
pub const LOCK_WRITE: u8 = 0x01;
/// Lock register: lock-down, the write lock can no longer be cleared
pub const LOCK_DOWN: u8 = 0x02;

/// OTP control byte bit: cleared to write protect the OTP array
pub const OTP_CONTROL_UNLOCKED: u8 = 0x01;

/// Returns true if the opcode needs WEL set before it is accepted
pub const fn needs_write_enable(opcode: u8) -> bool {
    matches!(
        opcode,
        WRSR | PP | SSE | QPP | POTP | WREVCR | WRVCR | WRNVCR | BE | SE | WRLR
    )
}

/// Returns true if the opcode changes device state and so may not be
/// issued while a write is in progress
pub const fn changes_state(opcode: u8) -> bool {
    needs_write_enable(opcode) || matches!(opcode, WREN | WRDI | CLFSR)
}
