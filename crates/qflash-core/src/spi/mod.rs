//! SPI wire-level definitions
//!
//! This module provides the I/O modes and the opcode table shared by the
//! device model and the controllers that drive it.

mod io_mode;
pub mod opcodes;

pub use io_mode::IoMode;
pub use opcodes::*;
