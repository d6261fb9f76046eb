//! Simulated flash controller
//!
//! [`SimController`] stands in for the FPGA's QSPI controller: it decodes
//! register bus transactions and turns each one into a serial command frame
//! on a [`FlashDevice`], clocking the pins itself.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, trace};
use qflash_core::bus::regs::{self, Register};
use qflash_core::bus::RegisterBus;
use qflash_core::chip::{ConfigRegister, Status, FLASH_SIZE, JEDEC_ID_LEN, OTP_SIZE, SECTOR_SIZE};
use qflash_core::spi::opcodes;
use qflash_core::{BusFault, Error, ProtocolViolation, Result};

use crate::bitbang::{self, quad, single};
use crate::device::{FlashDevice, StepResult};
use crate::state::State;

/// Dummy clocks between the quad read mode byte and the first data nibble
const QUAD_DUMMY_CLOCKS: u32 = 6;

/// Controller behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Use quad read and quad page program for the memory window
    pub quad: bool,
    /// Keep the device in execute-in-place between quad reads
    pub xip: bool,
    /// Deselected half-periods clocked by each `wait`
    pub idle_ticks: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            quad: true,
            xip: false,
            idle_ticks: 16,
        }
    }
}

/// Register bus backed by a simulated flash device
pub struct SimController {
    device: FlashDevice,
    config: ControllerConfig,
    erases: u32,
    programs: u32,
}

impl SimController {
    /// Put a controller in front of `device`
    pub fn new(device: FlashDevice, config: ControllerConfig) -> Self {
        Self {
            device,
            config,
            erases: 0,
            programs: 0,
        }
    }

    /// Controller with the default configuration
    pub fn with_device(device: FlashDevice) -> Self {
        Self::new(device, ControllerConfig::default())
    }

    /// The simulated device
    pub fn device(&self) -> &FlashDevice {
        &self.device
    }

    /// Mutable access to the simulated device
    pub fn device_mut(&mut self) -> &mut FlashDevice {
        &mut self.device
    }

    /// Take the device back
    pub fn into_device(self) -> FlashDevice {
        self.device
    }

    /// Controller configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Number of erase commands (subsector, sector, bulk) issued so far
    pub fn erase_count(&self) -> u32 {
        self.erases
    }

    /// Number of page program frames issued so far
    pub fn program_count(&self) -> u32 {
        self.programs
    }

    /// Clear a reported protocol violation on the device
    pub fn recover(&mut self) {
        self.device.recover();
    }

    /// Run one transaction, mapping device violations to bus errors
    fn transact<T>(
        &mut self,
        addr: u32,
        f: impl FnOnce(&mut Self) -> StepResult<T>,
    ) -> Result<T> {
        f(self).map_err(|v: ProtocolViolation| Error::Bus {
            addr,
            fault: BusFault::Device(v),
        })
    }

    /// End a continuous read so the next frame starts with an opcode
    fn leave_xip(&mut self) -> StepResult<()> {
        if self.device.state() != State::ExecuteInPlace {
            return Ok(());
        }
        debug!("leaving execute-in-place");
        let dev = &mut self.device;
        bitbang::select(dev)?;
        quad::write_addr(dev, 0)?;
        quad::write_byte(dev, 0xFF)?;
        bitbang::deselect(dev)
    }

    fn command(
        &mut self,
        opcode: u8,
        addr: Option<u32>,
        dummy: usize,
        write: &[u8],
        read: &mut [u8],
    ) -> StepResult<()> {
        self.leave_xip()?;
        bitbang::command(&mut self.device, opcode, addr, dummy, write, read)
    }

    fn read_memory(&mut self, offset: u32, buf: &mut [u8]) -> StepResult<()> {
        if !self.config.quad {
            return self.command(opcodes::FAST_READ, Some(offset), 1, &[], buf);
        }

        let continuous = self.device.state() == State::ExecuteInPlace;
        let mode = if self.config.xip {
            0x00
        } else {
            opcodes::MODE_XIP_EXIT
        };
        let dev = &mut self.device;
        bitbang::select(dev)?;
        if !continuous {
            single::write_byte(dev, opcodes::QUAD_READ)?;
        }
        quad::write_addr(dev, offset)?;
        quad::write_byte(dev, mode)?;
        quad::dummy(dev, QUAD_DUMMY_CLOCKS)?;
        for slot in buf.iter_mut() {
            *slot = quad::read_byte(dev)?;
        }
        bitbang::deselect(dev)
    }

    fn program_memory(&mut self, offset: u32, data: &[u8]) -> StepResult<()> {
        self.programs += 1;
        if !self.config.quad {
            return self.command(opcodes::PP, Some(offset), 0, data, &mut []);
        }

        self.leave_xip()?;
        let dev = &mut self.device;
        bitbang::select(dev)?;
        single::write_byte(dev, opcodes::QPP)?;
        single::write_addr(dev, offset)?;
        for &byte in data {
            quad::write_byte(dev, byte)?;
        }
        bitbang::deselect(dev)
    }

    fn read_config(&mut self, reg: ConfigRegister) -> StepResult<u32> {
        let mut buf = [0u8; 2];
        let len = reg.bytes();
        self.command(reg.read_opcode(), None, 0, &[], &mut buf[..len])?;
        Ok(u16::from_le_bytes(buf) as u32)
    }

    fn read_id(&mut self) -> StepResult<[u8; JEDEC_ID_LEN]> {
        let mut id = [0u8; JEDEC_ID_LEN];
        self.command(opcodes::RDID, None, 0, &[], &mut id)?;
        Ok(id)
    }

    fn read_otp(&mut self, offset: u32, buf: &mut [u8]) -> StepResult<()> {
        self.command(opcodes::ROTP, Some(offset), 1, &[], buf)
    }

    fn ctrl(&mut self, value: u32) -> StepResult<()> {
        let (opcode, addr) = regs::ctrl_decode(value);
        match opcode {
            opcodes::SSE | opcodes::SE => {
                self.erases += 1;
                self.command(opcode, Some(addr), 0, &[], &mut [])
            }
            opcodes::BE => {
                self.erases += 1;
                self.command(opcode, None, 0, &[], &mut [])
            }
            // WREN, WRDI and anything else go out as a bare opcode
            _ => self.command(opcode, None, 0, &[], &mut []),
        }
    }

    fn check_memory(addr: u32, words: usize) -> Result<()> {
        if (addr as u64) + 4 * words as u64 > FLASH_SIZE as u64 {
            return Err(Error::Bus {
                addr,
                fault: BusFault::Unmapped,
            });
        }
        Ok(())
    }
}

fn decode(addr: u32) -> Result<Register> {
    if addr % 4 != 0 {
        return Err(Error::Bus {
            addr,
            fault: BusFault::Misaligned,
        });
    }
    regs::decode(addr).ok_or(Error::Bus {
        addr,
        fault: BusFault::Unmapped,
    })
}

fn pack(bytes: &[u8], words: &mut [u32]) {
    for (word, chunk) in words.iter_mut().zip(bytes.chunks(4)) {
        let mut be = [0u8; 4];
        be[..chunk.len()].copy_from_slice(chunk);
        *word = u32::from_be_bytes(be);
    }
}

fn unpack(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

impl RegisterBus for SimController {
    fn readio(&mut self, addr: u32) -> Result<u32> {
        let reg = decode(addr)?;
        trace!("readio 0x{:08X}", addr);
        match reg {
            Register::Memory(_) | Register::Id(_) | Register::Otp(_) => {
                let mut word = [0u32; 1];
                self.readi(addr, &mut word)?;
                Ok(word[0])
            }
            Register::Ctrl => self.transact(addr, |c| {
                let mut sr = [0u8; 1];
                c.command(opcodes::RDSR, None, 0, &[], &mut sr)?;
                let busy = if Status::from_bits_retain(sr[0]).contains(Status::WIP) {
                    regs::CTRL_BUSY
                } else {
                    0
                };
                Ok(busy | sr[0] as u32)
            }),
            Register::Status => self.transact(addr, |c| {
                let mut sr = [0u8; 1];
                c.command(opcodes::RDSR, None, 0, &[], &mut sr)?;
                Ok(sr[0] as u32)
            }),
            Register::Flags => self.transact(addr, |c| {
                let mut fsr = [0u8; 1];
                c.command(opcodes::RDFSR, None, 0, &[], &mut fsr)?;
                Ok(fsr[0] as u32)
            }),
            Register::Config(reg) => self.transact(addr, |c| c.read_config(reg)),
            Register::Lock(sector) => self.transact(addr, |c| {
                let mut lock = [0u8; 1];
                let target = (sector * SECTOR_SIZE) as u32;
                c.command(opcodes::RDLR, Some(target), 0, &[], &mut lock)?;
                Ok(lock[0] as u32)
            }),
        }
    }

    fn writeio(&mut self, addr: u32, value: u32) -> Result<()> {
        let reg = decode(addr)?;
        trace!("writeio 0x{:08X} <- 0x{:08X}", addr, value);
        match reg {
            Register::Memory(_) | Register::Otp(_) => self.writei(addr, &[value]),
            Register::Ctrl => self.transact(addr, |c| c.ctrl(value)),
            Register::Status => self.transact(addr, |c| {
                c.command(opcodes::WRSR, None, 0, &[value as u8], &mut [])
            }),
            Register::Flags => {
                self.transact(addr, |c| c.command(opcodes::CLFSR, None, 0, &[], &mut []))
            }
            Register::Config(reg) => self.transact(addr, |c| {
                let bytes = (value as u16).to_le_bytes();
                c.command(reg.write_opcode(), None, 0, &bytes[..reg.bytes()], &mut [])
            }),
            Register::Lock(sector) => self.transact(addr, |c| {
                let target = (sector * SECTOR_SIZE) as u32;
                c.command(opcodes::WRLR, Some(target), 0, &[value as u8], &mut [])
            }),
            Register::Id(_) => Err(Error::Bus {
                addr,
                fault: BusFault::Unmapped,
            }),
        }
    }

    fn readi(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let reg = decode(addr)?;
        let mut bytes = vec![0u8; buf.len() * 4];
        match reg {
            Register::Memory(offset) => {
                Self::check_memory(addr, buf.len())?;
                self.transact(addr, |c| c.read_memory(offset, &mut bytes))?;
            }
            Register::Otp(offset) => {
                self.transact(addr, |c| c.read_otp(offset, &mut bytes))?;
            }
            Register::Id(offset) => {
                let id = self.transact(addr, |c| c.read_id())?;
                for (dst, src) in bytes.iter_mut().zip(id.iter().skip(offset as usize)) {
                    *dst = *src;
                }
            }
            _ => {
                for (i, word) in buf.iter_mut().enumerate() {
                    *word = self.readio(addr + 4 * i as u32)?;
                }
                return Ok(());
            }
        }
        pack(&bytes, buf);
        Ok(())
    }

    fn writei(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let reg = decode(addr)?;
        match reg {
            Register::Memory(offset) => {
                Self::check_memory(addr, data.len())?;
                let bytes = unpack(data);
                self.transact(addr, |c| c.program_memory(offset, &bytes))
            }
            Register::Otp(offset) => {
                let mut bytes = unpack(data);
                // The last word only partly covers the control byte
                bytes.truncate(OTP_SIZE.saturating_sub(offset as usize));
                self.transact(addr, |c| {
                    c.command(opcodes::POTP, Some(offset), 0, &bytes, &mut [])
                })
            }
            _ => {
                for (i, &word) in data.iter().enumerate() {
                    self.writeio(addr + 4 * i as u32, word)?;
                }
                Ok(())
            }
        }
    }

    fn wait(&mut self) -> Result<()> {
        let ticks = self.config.idle_ticks;
        self.transact(regs::CTRL, |c| bitbang::idle(&mut c.device, ticks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use qflash_core::chip::{Flags, Timing, FLASH_ID};

    fn controller(config: ControllerConfig) -> SimController {
        let device = FlashDevice::new(DeviceConfig::default().with_timing(Timing::instant()));
        SimController::new(device, config)
    }

    fn wren(c: &mut SimController) {
        c.writeio(regs::CTRL, regs::ctrl_command(opcodes::WREN, 0))
            .unwrap();
    }

    fn settle(c: &mut SimController) {
        while c.readio(regs::CTRL).unwrap() & regs::CTRL_BUSY != 0 {
            c.wait().unwrap();
        }
    }

    #[test]
    fn id_words() {
        let mut c = controller(ControllerConfig::default());
        assert_eq!(c.readio(regs::ID).unwrap(), FLASH_ID);
        let mut words = [0u32; 5];
        c.readi(regs::ID, &mut words).unwrap();
        assert_eq!(words[0], 0x20BA_1810);
        assert_eq!(words[4], 0x0F12_0914);
    }

    #[test]
    fn unmapped_and_misaligned() {
        let mut c = controller(ControllerConfig::default());
        assert_eq!(
            c.readio(0x0300_0000),
            Err(Error::Bus {
                addr: 0x0300_0000,
                fault: BusFault::Unmapped
            })
        );
        assert_eq!(
            c.readio(0x1002),
            Err(Error::Bus {
                addr: 0x1002,
                fault: BusFault::Misaligned
            })
        );
        assert!(c.writeio(regs::ID, 0).is_err());
    }

    #[test]
    fn program_and_read_words_quad() {
        let mut c = controller(ControllerConfig::default());
        wren(&mut c);
        c.writei(0x2000, &[0x1122_3344, 0x5566_7788]).unwrap();
        settle(&mut c);
        assert_eq!(&c.device().memory()[0x2000..0x2004], &[0x11, 0x22, 0x33, 0x44]);
        let mut words = [0u32; 3];
        c.readi(0x2000, &mut words).unwrap();
        assert_eq!(words, [0x1122_3344, 0x5566_7788, 0xFFFF_FFFF]);
        assert_eq!(c.program_count(), 1);
    }

    #[test]
    fn program_and_read_words_single() {
        let mut c = controller(ControllerConfig {
            quad: false,
            ..ControllerConfig::default()
        });
        wren(&mut c);
        c.writeio(0x40, 0xA5A5_0000).unwrap();
        settle(&mut c);
        assert_eq!(c.readio(0x40).unwrap(), 0xA5A5_0000);
    }

    #[test]
    fn continuous_read_between_commands() {
        let mut c = controller(ControllerConfig {
            xip: true,
            ..ControllerConfig::default()
        });
        c.device_mut().load(0x100, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(c.readio(0x100).unwrap(), 0x0102_0304);
        assert_eq!(c.device().state(), State::ExecuteInPlace);
        assert_eq!(c.readio(0x104).unwrap(), 0x0506_0708);
        assert_eq!(c.device().state(), State::ExecuteInPlace);
        // Any other command ends the continuous read first
        assert_eq!(c.readio(regs::STATUS).unwrap(), 0);
        assert_eq!(c.device().state(), State::Idle);
        assert_eq!(c.readio(regs::ID).unwrap(), FLASH_ID);
    }

    #[test]
    fn erase_through_ctrl() {
        let mut c = controller(ControllerConfig::default());
        c.device_mut().load(0x1000, &[0u8; 16]);
        wren(&mut c);
        c.writeio(regs::CTRL, regs::ctrl_command(opcodes::SSE, 0x1000))
            .unwrap();
        settle(&mut c);
        assert!(c.device().memory()[0x1000..0x2000].iter().all(|&b| b == 0xFF));
        assert_eq!(c.erase_count(), 1);
    }

    #[test]
    fn config_registers() {
        let mut c = controller(ControllerConfig::default());
        assert_eq!(c.readio(regs::NVCONFIG).unwrap(), 0x8FFF);
        assert_eq!(c.readio(regs::VCONFIG).unwrap(), 0xFB);
        wren(&mut c);
        c.writeio(regs::NVCONFIG, 0x8FC5).unwrap();
        settle(&mut c);
        assert_eq!(c.readio(regs::NVCONFIG).unwrap(), 0x8FC5);
    }

    #[test]
    fn invalid_config_is_a_device_fault() {
        let mut c = controller(ControllerConfig::default());
        wren(&mut c);
        let err = c.writeio(regs::VCONFIG, 0x00).unwrap_err();
        assert_eq!(
            err,
            Error::Bus {
                addr: regs::VCONFIG,
                fault: BusFault::Device(ProtocolViolation::InvalidConfig {
                    register: ConfigRegister::Volatile,
                    value: 0
                })
            }
        );
        // Halted until recovered
        assert!(c.readio(regs::STATUS).is_err());
        c.recover();
        assert_eq!(c.readio(regs::VCONFIG).unwrap(), 0xFB);
    }

    #[test]
    fn lock_and_flags() {
        let mut c = controller(ControllerConfig::default());
        wren(&mut c);
        c.writeio(regs::lock(3), opcodes::LOCK_WRITE as u32).unwrap();
        settle(&mut c);
        assert_eq!(c.readio(regs::lock(3)).unwrap(), 1);

        wren(&mut c);
        c.writeio(regs::CTRL, regs::ctrl_command(opcodes::SE, 0x3_0000))
            .unwrap();
        let flags = Flags::from_bits_retain(c.readio(regs::FLAGS).unwrap() as u8);
        assert!(flags.contains(Flags::PROTECTION | Flags::ERASE_FAIL));
        c.writeio(regs::FLAGS, 0).unwrap();
        assert_eq!(c.readio(regs::FLAGS).unwrap(), Flags::READY.bits() as u32);
    }

    #[test]
    fn otp_words() {
        let mut c = controller(ControllerConfig::default());
        wren(&mut c);
        c.writei(regs::otp(4), &[0xDEAD_BEEF]).unwrap();
        settle(&mut c);
        assert_eq!(c.readio(regs::otp(4)).unwrap(), 0xDEAD_BEEF);
        assert_eq!(c.readio(regs::otp(0)).unwrap(), 0xFFFF_FFFF);
        // Word 16 covers the control byte and three bytes past the array
        assert_eq!(c.readio(regs::otp(64)).unwrap(), 0xFF00_0000);
    }
}
