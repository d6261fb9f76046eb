//! Command state of the device
//!
//! Every variant carries what the command has captured so far, so a
//! command can never be committed with an address it has not received.

use qflash_core::chip::ConfigRegister;
use qflash_core::spi::IoMode;

/// Current command of the device state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Waiting for an opcode
    #[default]
    Idle,
    /// Command refused or aborted; the rest of the frame is ignored
    Invalid,
    /// A command without arguments (write enable/disable) has executed
    Complete,
    /// Streaming the status register
    ReadStatus,
    /// Streaming the flag status register
    ReadFlags,
    /// Clear flag status, executed on deselect
    ClearFlags,
    /// Write status register
    WriteStatus {
        /// New value, once received
        value: Option<u8>,
    },
    /// Streaming a configuration register
    ReadConfig(ConfigRegister),
    /// Write a configuration register
    WriteConfig {
        /// Target register
        register: ConfigRegister,
        /// New value, once complete
        value: Option<u16>,
    },
    /// Page program, single or quad data
    PageProgram {
        /// Data path width once the address is in
        io: IoMode,
        /// Next byte's address (wraps inside the page), once received
        addr: Option<u32>,
    },
    /// 4 KiB erase
    SubsectorErase {
        /// Target address, once received
        addr: Option<u32>,
    },
    /// 64 KiB erase
    SectorErase {
        /// Target address, once received
        addr: Option<u32>,
    },
    /// Whole array erase
    BulkErase,
    /// Program the OTP array
    ProgramOtp {
        /// Next OTP offset, once received
        addr: Option<u32>,
    },
    /// Read the OTP array
    ReadOtp {
        /// Next OTP offset, once received
        addr: Option<u32>,
    },
    /// Streaming the identification bytes
    ReadId,
    /// Read a sector lock register
    ReadLock {
        /// Sector address, once received
        addr: Option<u32>,
    },
    /// Write a sector lock register
    WriteLock {
        /// Sector address, once received
        addr: Option<u32>,
        /// New lock bits, once received
        value: Option<u8>,
    },
    /// Single-wire fast read
    FastRead {
        /// Next address, once received
        addr: Option<u32>,
    },
    /// Quad read opcode seen, receiving the address
    QuadReadCommand,
    /// Quad read address received
    QuadRead {
        /// Next address
        addr: u32,
        /// Mode byte, once received
        mode: Option<u8>,
    },
    /// Deselected in continuous read mode: the next frame starts at the
    /// address phase of a quad read
    ExecuteInPlace,
}

impl State {
    /// Returns true for commands whose effect is applied on deselect
    pub const fn commits_on_deselect(&self) -> bool {
        matches!(
            self,
            Self::ClearFlags
                | Self::WriteStatus { .. }
                | Self::WriteConfig { .. }
                | Self::PageProgram { .. }
                | Self::SubsectorErase { .. }
                | Self::SectorErase { .. }
                | Self::BulkErase
                | Self::ProgramOtp { .. }
                | Self::WriteLock { .. }
        )
    }
}
