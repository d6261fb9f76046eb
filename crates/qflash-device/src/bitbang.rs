//! Bit-banged SPI master helpers for driving a [`FlashDevice`]
//!
//! These functions play the master side of the wire: they toggle chip
//! select and clock one half-period per [`FlashDevice::step`] call, in SPI
//! mode 0. Data is set up with the clock low, the device latches it on the
//! falling edge, and the master samples the device output during the
//! high half of the next cycle.
//!
//! The simulated bus controller is built on these, and tests use them to
//! drive raw command sequences.

use crate::device::{FlashDevice, StepResult};

/// Assert chip select (starts a frame)
pub fn select(dev: &mut FlashDevice) -> StepResult<()> {
    dev.step(false, false, 0).map(|_| ())
}

/// Release chip select (ends and commits the frame)
pub fn deselect(dev: &mut FlashDevice) -> StepResult<()> {
    dev.step(true, false, 0).map(|_| ())
}

/// Let the device run deselected for `ticks` half-periods
pub fn idle(dev: &mut FlashDevice, ticks: u32) -> StepResult<()> {
    for _ in 0..ticks {
        dev.step(true, false, 0)?;
    }
    Ok(())
}

/// One full clock cycle driving `din`; returns what the device drove
fn cycle(dev: &mut FlashDevice, din: u8) -> StepResult<u8> {
    let out = dev.step(false, true, din)?;
    dev.step(false, false, din)?;
    Ok(out)
}

/// Single-wire transfers (DQ0 in, DQ1 out), MSB first
pub mod single {
    use super::*;

    /// Exchange a byte
    pub fn xfer_byte(dev: &mut FlashDevice, byte: u8) -> StepResult<u8> {
        let mut rx = 0u8;
        for i in (0..8).rev() {
            let out = cycle(dev, (byte >> i) & 1)?;
            rx = (rx << 1) | (out & 1);
        }
        Ok(rx)
    }

    /// Write a byte, discarding the output
    pub fn write_byte(dev: &mut FlashDevice, byte: u8) -> StepResult<()> {
        xfer_byte(dev, byte).map(|_| ())
    }

    /// Read a byte while driving zeros
    pub fn read_byte(dev: &mut FlashDevice) -> StepResult<u8> {
        xfer_byte(dev, 0)
    }

    /// Write a 3-byte address, MSB first
    pub fn write_addr(dev: &mut FlashDevice, addr: u32) -> StepResult<()> {
        for shift in [16, 8, 0] {
            write_byte(dev, (addr >> shift) as u8)?;
        }
        Ok(())
    }
}

/// Quad transfers on DQ3..DQ0, high nibble first
pub mod quad {
    use super::*;

    /// Write a byte in two clocks
    pub fn write_byte(dev: &mut FlashDevice, byte: u8) -> StepResult<()> {
        cycle(dev, byte >> 4)?;
        cycle(dev, byte & 0x0F)?;
        Ok(())
    }

    /// Read a byte in two clocks
    pub fn read_byte(dev: &mut FlashDevice) -> StepResult<u8> {
        let hi = cycle(dev, 0)?;
        let lo = cycle(dev, 0)?;
        Ok((hi << 4) | (lo & 0x0F))
    }

    /// Write a 3-byte address in six clocks
    pub fn write_addr(dev: &mut FlashDevice, addr: u32) -> StepResult<()> {
        for shift in [16, 8, 0] {
            write_byte(dev, (addr >> shift) as u8)?;
        }
        Ok(())
    }

    /// Clock `cycles` dummy clocks
    pub fn dummy(dev: &mut FlashDevice, cycles: u32) -> StepResult<()> {
        for _ in 0..cycles {
            cycle(dev, 0)?;
        }
        Ok(())
    }
}

/// Run a complete single-wire command frame
///
/// Sends `opcode`, the optional 3-byte address, `dummy` dummy bytes and
/// `write`, then reads `read.len()` bytes and releases chip select.
pub fn command(
    dev: &mut FlashDevice,
    opcode: u8,
    addr: Option<u32>,
    dummy: usize,
    write: &[u8],
    read: &mut [u8],
) -> StepResult<()> {
    select(dev)?;
    single::write_byte(dev, opcode)?;
    if let Some(addr) = addr {
        single::write_addr(dev, addr)?;
    }
    for _ in 0..dummy {
        single::write_byte(dev, 0)?;
    }
    for &byte in write {
        single::write_byte(dev, byte)?;
    }
    for slot in read.iter_mut() {
        *slot = single::read_byte(dev)?;
    }
    deselect(dev)
}
