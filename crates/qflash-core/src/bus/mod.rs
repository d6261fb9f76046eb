//! Register-mapped bus between the host and the flash controller
//!
//! The driver never talks to the flash pins directly. It reads and writes
//! 32-bit words on a bus; the controller behind the bus (FPGA logic, or the
//! simulated controller in `qflash-device`) turns each transaction into a
//! serial flash command.

pub mod regs;
mod traits;

pub use regs::Register;
pub use traits::*;
