//! Cycle-stepped quad SPI NOR flash
//!
//! [`FlashDevice::step`] is called once per clock half-period with the
//! current chip select, clock and data-in lines. The device samples input
//! and advances its state on the falling clock edge, and presents the next
//! output bits right after it, so a SPI mode 0 master samples on the
//! following rising edge.

use alloc::boxed::Box;
use alloc::vec;

use log::{debug, error, trace, warn};
use qflash_core::chip::{
    self, ConfigRegister, Flags, Status, ADDR_MASK, ERASED, FLASH_SIZE, JEDEC_ID, NUM_SECTORS,
    OTP_CONTROL, OTP_SIZE, PAGE_SIZE, SECTOR_SIZE, SUBSECTOR_SIZE,
};
use qflash_core::spi::{opcodes, IoMode};
use qflash_core::ProtocolViolation;

use crate::config::{DeviceConfig, ViolationMode};
use crate::state::State;

/// Result of a device step
pub type StepResult<T> = core::result::Result<T, ProtocolViolation>;

/// Behavioral model of a 128 Mbit quad SPI NOR flash
pub struct FlashDevice {
    config: DeviceConfig,

    mem: Box<[u8]>,
    otp: [u8; OTP_SIZE],
    locks: [u8; NUM_SECTORS],
    page: [u8; PAGE_SIZE],
    otp_stage: [u8; OTP_SIZE],

    status: Status,
    flags: Flags,
    vconfig: u8,
    evconfig: u8,
    nvconfig: u16,

    state: State,
    opcode: u8,
    io: IoMode,
    selected: bool,
    last_sck: bool,
    ireg: u32,
    oreg: u8,
    count: u32,

    busy: u32,
    halted: Option<ProtocolViolation>,
}

impl FlashDevice {
    /// Create an erased, unlocked device
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            mem: vec![ERASED; FLASH_SIZE].into_boxed_slice(),
            otp: [ERASED; OTP_SIZE],
            locks: [0; NUM_SECTORS],
            page: [ERASED; PAGE_SIZE],
            otp_stage: [ERASED; OTP_SIZE],
            status: Status::empty(),
            flags: Flags::empty(),
            vconfig: ConfigRegister::Volatile.default_value() as u8,
            evconfig: ConfigRegister::EnhancedVolatile.default_value() as u8,
            nvconfig: ConfigRegister::NonVolatile.default_value(),
            state: State::Idle,
            opcode: 0,
            io: IoMode::Single,
            selected: false,
            last_sck: false,
            ireg: 0,
            oreg: 0,
            count: 0,
            busy: 0,
            halted: None,
        }
    }

    /// Create a device with the default configuration
    pub fn new_default() -> Self {
        Self::new(DeviceConfig::default())
    }

    /// Bulk-load an image into the memory array, bypassing the protocol
    ///
    /// Data past the end of the array is ignored. Returns the number of
    /// bytes loaded.
    pub fn load(&mut self, offset: usize, image: &[u8]) -> usize {
        if offset >= self.mem.len() {
            return 0;
        }
        let len = core::cmp::min(image.len(), self.mem.len() - offset);
        self.mem[offset..offset + len].copy_from_slice(&image[..len]);
        debug!("loaded {} bytes at 0x{:06X}", len, offset);
        len
    }

    /// The memory array
    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    /// The OTP array, control byte last
    pub fn otp(&self) -> &[u8; OTP_SIZE] {
        &self.otp
    }

    /// Returns true once the OTP control bit has been programmed
    pub fn otp_locked(&self) -> bool {
        self.otp[OTP_CONTROL] & opcodes::OTP_CONTROL_UNLOCKED == 0
    }

    /// Bulk-load the OTP array, control byte included
    pub fn load_otp(&mut self, otp: &[u8; OTP_SIZE]) {
        self.otp = *otp;
        debug!("loaded OTP array, locked: {}", self.otp_locked());
    }

    /// Lock register of a sector
    pub fn lock(&self, sector: usize) -> Option<u8> {
        self.locks.get(sector).copied()
    }

    /// All sector lock registers
    pub fn locks(&self) -> &[u8; NUM_SECTORS] {
        &self.locks
    }

    /// Bulk-load the sector lock registers
    ///
    /// Lock-down forces the lock bit, as a Write-Lock would.
    pub fn load_locks(&mut self, locks: &[u8; NUM_SECTORS]) {
        for (dst, &bits) in self.locks.iter_mut().zip(locks) {
            let bits = bits & (opcodes::LOCK_WRITE | opcodes::LOCK_DOWN);
            *dst = if bits & opcodes::LOCK_DOWN != 0 {
                bits | opcodes::LOCK_WRITE
            } else {
                bits
            };
        }
    }

    /// Status register
    pub fn status(&self) -> Status {
        self.status
    }

    /// Flag status register, including the computed ready bit
    pub fn flags(&self) -> Flags {
        if self.is_busy() {
            self.flags
        } else {
            self.flags | Flags::READY
        }
    }

    /// Value of a configuration register
    pub fn config_register(&self, register: ConfigRegister) -> u16 {
        match register {
            ConfigRegister::Volatile => self.vconfig as u16,
            ConfigRegister::EnhancedVolatile => self.evconfig as u16,
            ConfigRegister::NonVolatile => self.nvconfig,
        }
    }

    /// Current command state
    pub fn state(&self) -> State {
        self.state
    }

    /// Current data path width
    pub fn io_mode(&self) -> IoMode {
        self.io
    }

    /// Returns true while a write cycle is in progress
    pub fn is_busy(&self) -> bool {
        self.status.contains(Status::WIP)
    }

    /// The violation that halted the device, if any
    pub fn halted(&self) -> Option<ProtocolViolation> {
        self.halted
    }

    /// Start a new session after a reported protocol violation
    ///
    /// Memory, OTP, locks and registers are kept; the command state is reset.
    pub fn recover(&mut self) {
        if let Some(v) = self.halted.take() {
            warn!("recovering from protocol violation: {}", v);
        }
        self.state = State::Idle;
        self.reset_frame();
        self.selected = false;
    }

    /// The configuration this device was created with
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Advance by one clock half-period
    ///
    /// `csn` is the active-low chip select and `din` the input lines (DQ0
    /// in single-wire mode, DQ3..DQ0 in quad mode). Returns the output
    /// lines: in single-wire mode the DQ1 level in bit 0, in quad mode
    /// DQ3..DQ0. 0 while deselected.
    pub fn step(&mut self, csn: bool, sck: bool, din: u8) -> StepResult<u8> {
        if let Some(v) = self.halted {
            return Err(v);
        }

        self.tick();

        if csn {
            self.last_sck = sck;
            if self.selected {
                self.selected = false;
                self.deselect()?;
            }
            return Ok(0);
        }

        if !self.selected {
            self.selected = true;
            self.reset_frame();
            self.last_sck = sck;
        }

        let falling = self.last_sck && !sck;
        self.last_sck = sck;
        if falling {
            self.clock(din)?;
        }

        let w = self.io.width();
        Ok((self.oreg >> (8 - w)) & self.io.mask())
    }

    fn tick(&mut self) {
        if self.busy == 0 {
            return;
        }
        self.busy -= 1;
        if self.busy == 0 {
            self.status.remove(Status::WIP | Status::WEL);
            debug!("write cycle complete");
        }
    }

    fn reset_frame(&mut self) {
        self.io = IoMode::Single;
        self.ireg = 0;
        self.oreg = 0;
        self.count = 0;
    }

    fn clock(&mut self, din: u8) -> StepResult<()> {
        if self.state == State::ExecuteInPlace && self.count == 0 {
            // Continuous read: the opcode is implied
            self.opcode = opcodes::QUAD_READ;
            self.state = State::QuadReadCommand;
            self.io = IoMode::Quad;
            self.count = 8;
        }

        let w = self.io.width();
        self.oreg <<= w;
        self.ireg = (self.ireg << w) | (din & self.io.mask()) as u32;
        self.count += w;

        if self.count % 8 != 0 {
            return Ok(());
        }

        self.oreg = 0;
        if self.count == 8 {
            self.dispatch_opcode(self.ireg as u8)
        } else {
            self.dispatch_byte(self.ireg as u8)
        }
    }

    fn dispatch_opcode(&mut self, opcode: u8) -> StepResult<()> {
        self.opcode = opcode;

        if self.is_busy() && opcodes::changes_state(opcode) {
            self.state = State::Invalid;
            return self.violation(ProtocolViolation::Busy { opcode });
        }

        if opcodes::needs_write_enable(opcode) && !self.status.contains(Status::WEL) {
            warn!("opcode 0x{:02X} refused: write enable latch not set", opcode);
            self.state = State::Invalid;
            return Ok(());
        }

        debug!("opcode 0x{:02X}", opcode);
        self.state = match opcode {
            opcodes::WREN => {
                self.status.insert(Status::WEL);
                State::Complete
            }
            opcodes::WRDI => {
                self.status.remove(Status::WEL);
                State::Complete
            }
            opcodes::RDSR => {
                self.oreg = self.status.bits();
                State::ReadStatus
            }
            opcodes::WRSR => State::WriteStatus { value: None },
            opcodes::RDFSR => {
                self.oreg = self.flags().bits();
                State::ReadFlags
            }
            opcodes::CLFSR => State::ClearFlags,
            opcodes::RDVCR => self.read_config(ConfigRegister::Volatile),
            opcodes::RDEVCR => self.read_config(ConfigRegister::EnhancedVolatile),
            opcodes::RDNVCR => self.read_config(ConfigRegister::NonVolatile),
            opcodes::WRVCR => State::WriteConfig {
                register: ConfigRegister::Volatile,
                value: None,
            },
            opcodes::WREVCR => State::WriteConfig {
                register: ConfigRegister::EnhancedVolatile,
                value: None,
            },
            opcodes::WRNVCR => State::WriteConfig {
                register: ConfigRegister::NonVolatile,
                value: None,
            },
            opcodes::RDID | opcodes::RDID_ALT => {
                self.oreg = JEDEC_ID[0];
                State::ReadId
            }
            opcodes::FAST_READ => State::FastRead { addr: None },
            opcodes::QUAD_READ => {
                self.io = IoMode::Quad;
                State::QuadReadCommand
            }
            opcodes::PP => State::PageProgram {
                io: IoMode::Single,
                addr: None,
            },
            opcodes::QPP => State::PageProgram {
                io: IoMode::Quad,
                addr: None,
            },
            opcodes::SSE => State::SubsectorErase { addr: None },
            opcodes::SE => State::SectorErase { addr: None },
            opcodes::BE => {
                if let Some(sector) = self.locks.iter().position(|l| l & opcodes::LOCK_WRITE != 0)
                {
                    self.refuse((sector * SECTOR_SIZE) as u32, Flags::ERASE_FAIL);
                    return Ok(());
                }
                State::BulkErase
            }
            opcodes::POTP => {
                if self.otp_locked() {
                    warn!("OTP program refused: OTP array is locked");
                    self.flags.insert(Flags::PROTECTION | Flags::PROGRAM_FAIL);
                    self.state = State::Invalid;
                    return Ok(());
                }
                State::ProgramOtp { addr: None }
            }
            opcodes::ROTP => State::ReadOtp { addr: None },
            opcodes::RDLR => State::ReadLock { addr: None },
            opcodes::WRLR => State::WriteLock {
                addr: None,
                value: None,
            },
            _ => {
                self.state = State::Invalid;
                return self.violation(ProtocolViolation::UnknownOpcode { opcode });
            }
        };
        Ok(())
    }

    fn read_config(&mut self, register: ConfigRegister) -> State {
        self.oreg = self.config_register(register) as u8;
        State::ReadConfig(register)
    }

    fn dispatch_byte(&mut self, byte: u8) -> StepResult<()> {
        let count = self.count;
        let addr = self.ireg & ADDR_MASK;
        let busy = self.is_busy();

        match self.state {
            State::Invalid => {}
            State::ReadStatus => self.oreg = self.status.bits(),
            State::ReadFlags => self.oreg = self.flags().bits(),
            State::ReadConfig(register) => {
                let index = ((count - 8) / 8) as usize % register.bytes();
                self.oreg = (self.config_register(register) >> (8 * index)) as u8;
            }
            State::ReadId => {
                let index = ((count - 8) / 8) as usize;
                self.oreg = JEDEC_ID.get(index).copied().unwrap_or(0);
            }
            State::WriteStatus { value: None } if count == 16 => {
                self.state = State::WriteStatus { value: Some(byte) };
            }
            State::WriteConfig {
                register,
                value: None,
            } => {
                if count == 8 + 8 * register.bytes() as u32 {
                    // Multi-byte registers are sent LSB first
                    let value = match register.bytes() {
                        1 => byte as u16,
                        _ => u16::from_le_bytes([(self.ireg >> 8) as u8, byte]),
                    };
                    self.state = State::WriteConfig {
                        register,
                        value: Some(value),
                    };
                }
            }
            State::PageProgram { io, addr: None } if count == 32 => {
                if self.sector_locked(addr) {
                    self.refuse(addr, Flags::PROGRAM_FAIL);
                } else {
                    trace!("program page 0x{:06X}", chip::page_base(addr));
                    self.page.fill(ERASED);
                    self.io = io;
                    self.state = State::PageProgram {
                        io,
                        addr: Some(addr),
                    };
                }
            }
            State::PageProgram { io, addr: Some(a) } => {
                trace!("program 0x{:06X} <- 0x{:02X}", a, byte);
                self.page[(a as usize) % PAGE_SIZE] = byte;
                let next = chip::page_base(a) | (a.wrapping_add(1) & (PAGE_SIZE as u32 - 1));
                self.state = State::PageProgram {
                    io,
                    addr: Some(next),
                };
            }
            State::SubsectorErase { addr: None } if count == 32 => {
                if self.sector_locked(addr) {
                    self.refuse(addr, Flags::ERASE_FAIL);
                } else {
                    self.state = State::SubsectorErase { addr: Some(addr) };
                }
            }
            State::SectorErase { addr: None } if count == 32 => {
                if self.sector_locked(addr) {
                    self.refuse(addr, Flags::ERASE_FAIL);
                } else {
                    self.state = State::SectorErase { addr: Some(addr) };
                }
            }
            State::ProgramOtp { addr: None } if count == 32 => {
                self.otp_stage.fill(ERASED);
                self.state = State::ProgramOtp { addr: Some(addr) };
            }
            State::ProgramOtp { addr: Some(a) } => {
                let Some(slot) = self.otp_stage.get_mut(a as usize) else {
                    self.state = State::Invalid;
                    return self.violation(ProtocolViolation::OtpOverrun { addr: a });
                };
                *slot = byte;
                self.state = State::ProgramOtp { addr: Some(a + 1) };
            }
            State::ReadOtp { addr: None } if count == 32 => {
                self.state = State::ReadOtp { addr: Some(addr) };
            }
            State::ReadOtp { addr: Some(a) } => {
                self.oreg = if busy {
                    0
                } else {
                    self.otp.get(a as usize).copied().unwrap_or(0)
                };
                self.state = State::ReadOtp {
                    addr: Some(a.saturating_add(1)),
                };
            }
            State::FastRead { addr: None } if count == 32 => {
                self.state = State::FastRead { addr: Some(addr) };
            }
            State::FastRead { addr: Some(a) } => {
                self.oreg = if busy { 0 } else { self.mem[a as usize] };
                self.state = State::FastRead {
                    addr: Some((a + 1) & ADDR_MASK),
                };
            }
            State::ReadLock { addr: None } if count == 32 => {
                self.oreg = self.locks[chip::sector_index(addr)];
                self.state = State::ReadLock { addr: Some(addr) };
            }
            State::ReadLock { addr: Some(a) } => {
                self.oreg = self.locks[chip::sector_index(a)];
            }
            State::WriteLock {
                addr: None,
                value: None,
            } if count == 32 => {
                self.state = State::WriteLock {
                    addr: Some(addr),
                    value: None,
                };
            }
            State::WriteLock {
                addr: Some(a),
                value: None,
            } => {
                self.state = State::WriteLock {
                    addr: Some(a),
                    value: Some(byte),
                };
            }
            State::QuadReadCommand if count == 32 => {
                self.state = State::QuadRead { addr, mode: None };
            }
            State::QuadRead { addr: a, mode: None } => {
                self.state = State::QuadRead {
                    addr: a,
                    mode: Some(byte),
                };
            }
            State::QuadRead {
                addr: a,
                mode: Some(mode),
            } => {
                // Six dummy clocks follow the mode byte
                if count >= 64 {
                    self.oreg = if busy { 0 } else { self.mem[a as usize] };
                    self.state = State::QuadRead {
                        addr: (a + 1) & ADDR_MASK,
                        mode: Some(mode),
                    };
                }
            }
            // Address bytes still arriving
            State::PageProgram { addr: None, .. }
            | State::SubsectorErase { addr: None }
            | State::SectorErase { addr: None }
            | State::ProgramOtp { addr: None }
            | State::ReadOtp { addr: None }
            | State::FastRead { addr: None }
            | State::ReadLock { addr: None }
            | State::WriteLock { addr: None, .. }
            | State::QuadReadCommand
                if count < 32 => {}
            _ => {
                let opcode = self.opcode;
                self.state = State::Invalid;
                return self.violation(ProtocolViolation::TooManyClocks { opcode, bits: count });
            }
        }
        Ok(())
    }

    fn deselect(&mut self) -> StepResult<()> {
        let bits = self.count;
        let opcode = self.opcode;
        let state = core::mem::take(&mut self.state);
        self.reset_frame();

        if state.commits_on_deselect() && bits % 8 != 0 {
            return self.violation(ProtocolViolation::PartialByte { opcode, bits });
        }

        let timing = self.config.timing;
        match state {
            State::Idle if bits > 0 => {
                return self.violation(ProtocolViolation::TruncatedOpcode { bits });
            }
            State::ExecuteInPlace => self.state = State::ExecuteInPlace,
            State::QuadRead {
                mode: Some(mode), ..
            } if mode & opcodes::MODE_XIP_EXIT == 0 => {
                debug!("entering execute-in-place");
                self.state = State::ExecuteInPlace;
            }
            State::ClearFlags => self.flags.remove(Flags::ERRORS),
            State::WriteStatus { value: Some(v) } => {
                let v = Status::from_bits_retain(v) & Status::WRITABLE;
                self.status = (self.status - Status::WRITABLE) | v;
                debug!("status register <- 0x{:02X}", self.status.bits());
                self.arm(timing.write_status);
            }
            State::WriteConfig {
                register,
                value: Some(v),
            } => {
                if !register.is_valid(v) {
                    return self.violation(ProtocolViolation::InvalidConfig { register, value: v });
                }
                debug!("{} <- 0x{:04X}", register, v);
                match register {
                    ConfigRegister::Volatile => {
                        self.vconfig = v as u8;
                        self.arm(timing.write_vconfig);
                    }
                    ConfigRegister::EnhancedVolatile => {
                        self.evconfig = v as u8;
                        self.arm(timing.write_vconfig);
                    }
                    ConfigRegister::NonVolatile => {
                        self.nvconfig = v;
                        self.arm(timing.write_nvconfig);
                    }
                }
            }
            State::PageProgram { addr: Some(a), .. } => {
                let base = chip::page_base(a) as usize;
                debug!("page program 0x{:06X}", base);
                for (cell, data) in self.mem[base..base + PAGE_SIZE].iter_mut().zip(&self.page) {
                    *cell &= data;
                }
                self.arm(timing.page_program);
            }
            State::SubsectorErase { addr: Some(a) } => {
                let base = chip::subsector_base(a) as usize;
                debug!("subsector erase 0x{:06X}", base);
                self.mem[base..base + SUBSECTOR_SIZE].fill(ERASED);
                self.arm(timing.subsector_erase);
            }
            State::SectorErase { addr: Some(a) } => {
                let base = chip::sector_base(a) as usize;
                debug!("sector erase 0x{:06X}", base);
                self.mem[base..base + SECTOR_SIZE].fill(ERASED);
                self.arm(timing.sector_erase);
            }
            State::BulkErase => {
                debug!("bulk erase");
                self.mem.fill(ERASED);
                self.arm(timing.bulk_erase);
            }
            State::ProgramOtp { addr: Some(_) } => {
                for (cell, data) in self.otp.iter_mut().zip(&self.otp_stage) {
                    *cell &= data;
                }
                if self.otp_locked() {
                    debug!("OTP array locked");
                }
                self.arm(timing.page_program);
            }
            State::WriteLock {
                addr: Some(a),
                value: Some(v),
            } => {
                let sector = chip::sector_index(a);
                let old = self.locks[sector];
                let mut new = v & (opcodes::LOCK_WRITE | opcodes::LOCK_DOWN);
                if old & opcodes::LOCK_DOWN != 0 {
                    new = old;
                } else if new & opcodes::LOCK_DOWN != 0 {
                    new |= opcodes::LOCK_WRITE;
                }
                debug!("sector {} lock 0x{:02X} -> 0x{:02X}", sector, old, new);
                self.locks[sector] = new;
                self.arm(timing.write_status);
            }
            State::WriteStatus { value: None }
            | State::WriteConfig { value: None, .. }
            | State::PageProgram { addr: None, .. }
            | State::SubsectorErase { addr: None }
            | State::SectorErase { addr: None }
            | State::ProgramOtp { addr: None }
            | State::WriteLock { .. } => {
                return self.violation(ProtocolViolation::MissingArgument { opcode, bits });
            }
            _ => {}
        }
        Ok(())
    }

    fn arm(&mut self, ticks: u32) {
        self.status.insert(Status::WIP);
        self.status.remove(Status::WEL);
        self.busy = ticks.max(1);
    }

    fn sector_locked(&self, addr: u32) -> bool {
        self.locks[chip::sector_index(addr)] & opcodes::LOCK_WRITE != 0
    }

    fn refuse(&mut self, addr: u32, fail: Flags) {
        warn!(
            "opcode 0x{:02X} refused: sector {} is locked",
            self.opcode,
            chip::sector_index(addr)
        );
        self.flags.insert(Flags::PROTECTION | fail);
        self.state = State::Invalid;
    }

    fn violation(&mut self, v: ProtocolViolation) -> StepResult<()> {
        error!("flash protocol violation: {}", v);
        match self.config.violation_mode {
            ViolationMode::Abort => panic!("flash protocol violation: {}", v),
            ViolationMode::Report => {
                self.state = State::Invalid;
                self.halted = Some(v);
                Err(v)
            }
        }
    }
}

impl Default for FlashDevice {
    fn default() -> Self {
        Self::new_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitbang::{self, command, quad, single};

    fn device() -> FlashDevice {
        FlashDevice::new(DeviceConfig::default().with_timing(chip::Timing::instant()))
    }

    fn run(dev: &mut FlashDevice, opcode: u8, addr: Option<u32>, write: &[u8]) {
        command(dev, opcode, addr, 0, write, &mut []).unwrap();
    }

    fn settle(dev: &mut FlashDevice) {
        while dev.is_busy() {
            bitbang::idle(dev, 1).unwrap();
        }
    }

    fn read(dev: &mut FlashDevice, addr: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        command(dev, opcodes::FAST_READ, Some(addr), 1, &[], &mut buf).unwrap();
        buf
    }

    fn program(dev: &mut FlashDevice, addr: u32, data: &[u8]) {
        run(dev, opcodes::WREN, None, &[]);
        run(dev, opcodes::PP, Some(addr), data);
        settle(dev);
    }

    #[test]
    fn read_id_from_idle() {
        let mut dev = device();
        for _ in 0..2 {
            let mut id = [0u8; JEDEC_ID.len() + 2];
            command(&mut dev, opcodes::RDID, None, 0, &[], &mut id).unwrap();
            assert_eq!(&id[..JEDEC_ID.len()], &JEDEC_ID);
            assert_eq!(&id[JEDEC_ID.len()..], &[0, 0]);
            assert_eq!(dev.state(), State::Idle);
        }
        let mut id = [0u8; 4];
        command(&mut dev, opcodes::RDID_ALT, None, 0, &[], &mut id).unwrap();
        assert_eq!(u32::from_be_bytes(id), chip::FLASH_ID);
    }

    #[test]
    fn single_wire_output_in_bit_zero() {
        let mut dev = device();
        bitbang::select(&mut dev).unwrap();
        single::write_byte(&mut dev, opcodes::RDID).unwrap();

        // 0x20 then 0xBA, MSB first on DQ1
        let mut bits = Vec::new();
        for _ in 0..16 {
            let out = dev.step(false, true, 0).unwrap();
            assert!(out <= 1);
            bits.push(out);
            dev.step(false, false, 0).unwrap();
        }
        bitbang::deselect(&mut dev).unwrap();

        let word = bits.iter().fold(0u16, |acc, &b| (acc << 1) | b as u16);
        assert_eq!(word, 0x20BA);
    }

    #[test]
    fn program_needs_write_enable() {
        let mut dev = device();
        run(&mut dev, opcodes::PP, Some(0x100), &[0x00, 0x00]);
        assert!(!dev.is_busy());
        assert_eq!(&dev.memory()[0x100..0x102], &[0xFF, 0xFF]);
        assert_eq!(dev.halted(), None);

        run(&mut dev, opcodes::WREN, None, &[]);
        assert!(dev.status().contains(Status::WEL));
        run(&mut dev, opcodes::WRDI, None, &[]);
        run(&mut dev, opcodes::SE, Some(0), &[]);
        assert!(!dev.is_busy());
    }

    #[test]
    fn program_ands_into_memory() {
        let mut dev = device();
        program(&mut dev, 0x200, &[0xF0, 0x3C]);
        program(&mut dev, 0x200, &[0x0F, 0xFF]);
        assert_eq!(read(&mut dev, 0x200, 3), [0x00, 0x3C, 0xFF]);
        assert!(!dev.status().contains(Status::WEL));
    }

    #[test]
    fn program_wraps_within_page() {
        let mut dev = device();
        program(&mut dev, 0x1FE, &[1, 2, 3, 4]);
        assert_eq!(&dev.memory()[0x1FE..0x200], &[1, 2]);
        assert_eq!(&dev.memory()[0x100..0x102], &[3, 4]);
        assert_eq!(dev.memory()[0x200], 0xFF);
    }

    #[test]
    fn erase_restores_ones() {
        let mut dev = device();
        dev.load(0, &[0u8; 2 * SECTOR_SIZE]);

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::SSE, Some(0x1234), &[]);
        settle(&mut dev);
        assert!(dev.memory()[0x1000..0x2000].iter().all(|&b| b == ERASED));
        assert_eq!(dev.memory()[0x0FFF], 0);
        assert_eq!(dev.memory()[0x2000], 0);

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::SE, Some(SECTOR_SIZE as u32 + 5), &[]);
        settle(&mut dev);
        assert!(dev.memory()[SECTOR_SIZE..2 * SECTOR_SIZE]
            .iter()
            .all(|&b| b == ERASED));

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::BE, None, &[]);
        settle(&mut dev);
        assert!(dev.memory().iter().all(|&b| b == ERASED));
    }

    #[test]
    fn write_cycle_timing() {
        let mut dev = FlashDevice::new_default();
        let ticks = dev.config().timing.subsector_erase;
        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::SSE, Some(0), &[]);
        assert!(dev.is_busy());
        assert!(!dev.flags().contains(Flags::READY));

        let mut sr = [0u8; 1];
        command(&mut dev, opcodes::RDSR, None, 0, &[], &mut sr).unwrap();
        assert_eq!(sr[0] & Status::WIP.bits(), Status::WIP.bits());

        bitbang::idle(&mut dev, ticks).unwrap();
        assert!(!dev.is_busy());
        assert!(!dev.status().contains(Status::WEL));
        assert!(dev.flags().contains(Flags::READY));
    }

    #[test]
    fn reads_while_busy_return_zero() {
        let mut dev = FlashDevice::new_default();
        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::PP, Some(0), &[0x12]);
        assert!(dev.is_busy());
        assert_eq!(read(&mut dev, 0, 2), [0, 0]);
        settle(&mut dev);
        assert_eq!(read(&mut dev, 0, 2), [0x12, 0xFF]);
    }

    #[test]
    fn busy_write_is_a_violation() {
        let mut dev = FlashDevice::new_default();
        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::SSE, Some(0), &[]);
        let err = command(&mut dev, opcodes::WREN, None, 0, &[], &mut []).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::Busy {
                opcode: opcodes::WREN
            }
        );
        // Halted until recovered
        assert_eq!(dev.step(true, false, 0), Err(err));
        dev.recover();
        assert_eq!(dev.halted(), None);
        assert!(dev.step(true, false, 0).is_ok());
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let mut dev = device();
        let err = command(&mut dev, 0xAB, None, 0, &[], &mut []).unwrap_err();
        assert_eq!(err, ProtocolViolation::UnknownOpcode { opcode: 0xAB });
        assert_eq!(dev.halted(), Some(err));
    }

    #[test]
    #[should_panic(expected = "flash protocol violation")]
    fn abort_mode_panics() {
        let mut dev = FlashDevice::new(DeviceConfig::strict());
        let _ = command(&mut dev, 0xAB, None, 0, &[], &mut []);
    }

    #[test]
    fn truncated_opcode() {
        let mut dev = device();
        bitbang::select(&mut dev).unwrap();
        for _ in 0..3 {
            dev.step(false, true, 1).unwrap();
            dev.step(false, false, 1).unwrap();
        }
        assert_eq!(
            bitbang::deselect(&mut dev),
            Err(ProtocolViolation::TruncatedOpcode { bits: 3 })
        );
    }

    #[test]
    fn missing_address_and_partial_byte() {
        let mut dev = device();
        run(&mut dev, opcodes::WREN, None, &[]);
        bitbang::select(&mut dev).unwrap();
        single::write_byte(&mut dev, opcodes::SE).unwrap();
        single::write_byte(&mut dev, 0x00).unwrap();
        assert_eq!(
            bitbang::deselect(&mut dev),
            Err(ProtocolViolation::MissingArgument {
                opcode: opcodes::SE,
                bits: 16
            })
        );

        dev.recover();
        dev.load(0, &[0u8; 4]);
        run(&mut dev, opcodes::WREN, None, &[]);
        bitbang::select(&mut dev).unwrap();
        single::write_byte(&mut dev, opcodes::PP).unwrap();
        single::write_addr(&mut dev, 0).unwrap();
        dev.step(false, true, 1).unwrap();
        dev.step(false, false, 1).unwrap();
        assert_eq!(
            bitbang::deselect(&mut dev),
            Err(ProtocolViolation::PartialByte {
                opcode: opcodes::PP,
                bits: 33
            })
        );
        // Nothing committed
        assert_eq!(&dev.memory()[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn too_many_clocks() {
        let mut dev = device();
        let err = command(&mut dev, opcodes::WREN, None, 0, &[0], &mut []).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::TooManyClocks {
                opcode: opcodes::WREN,
                bits: 16
            }
        );
    }

    #[test]
    fn sector_lock_refuses_erase_and_program() {
        let mut dev = device();
        dev.load(SECTOR_SIZE, &[0x55; 4]);
        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::WRLR, Some(SECTOR_SIZE as u32), &[opcodes::LOCK_WRITE]);
        settle(&mut dev);
        assert_eq!(dev.lock(1), Some(opcodes::LOCK_WRITE));

        let mut lock = [0u8; 1];
        command(&mut dev, opcodes::RDLR, Some(SECTOR_SIZE as u32 + 0x80), 0, &[], &mut lock)
            .unwrap();
        assert_eq!(lock[0], opcodes::LOCK_WRITE);

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::SE, Some(SECTOR_SIZE as u32), &[]);
        assert!(!dev.is_busy());
        assert!(dev.flags().contains(Flags::PROTECTION | Flags::ERASE_FAIL));
        assert_eq!(dev.memory()[SECTOR_SIZE], 0x55);

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::PP, Some(SECTOR_SIZE as u32), &[0x00]);
        assert!(dev.flags().contains(Flags::PROGRAM_FAIL));
        assert_eq!(dev.memory()[SECTOR_SIZE], 0x55);

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::BE, None, &[]);
        assert_eq!(dev.memory()[SECTOR_SIZE], 0x55);

        run(&mut dev, opcodes::CLFSR, None, &[]);
        assert_eq!(dev.flags(), Flags::READY);

        // Other sectors are unaffected
        program(&mut dev, 0, &[0x42]);
        assert_eq!(dev.memory()[0], 0x42);
    }

    #[test]
    fn lock_down_is_sticky() {
        let mut dev = device();
        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::WRLR, Some(0), &[opcodes::LOCK_DOWN]);
        settle(&mut dev);
        assert_eq!(dev.lock(0), Some(opcodes::LOCK_WRITE | opcodes::LOCK_DOWN));

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::WRLR, Some(0), &[0]);
        settle(&mut dev);
        assert_eq!(dev.lock(0), Some(opcodes::LOCK_WRITE | opcodes::LOCK_DOWN));
    }

    #[test]
    fn loaded_locks_and_otp_take_effect() {
        let mut dev = device();
        let mut locks = [0u8; NUM_SECTORS];
        locks[0] = opcodes::LOCK_DOWN;
        locks[1] = 0xFC;
        dev.load_locks(&locks);
        assert_eq!(dev.lock(0), Some(opcodes::LOCK_WRITE | opcodes::LOCK_DOWN));
        assert_eq!(dev.lock(1), Some(0));
        assert_eq!(dev.locks()[..2], [opcodes::LOCK_WRITE | opcodes::LOCK_DOWN, 0]);

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::SE, Some(0), &[]);
        assert!(!dev.is_busy());
        assert!(dev.flags().contains(Flags::PROTECTION));

        let mut otp = [ERASED; OTP_SIZE];
        otp[7] = 0x5A;
        otp[OTP_CONTROL] = 0xFE;
        dev.load_otp(&otp);
        assert!(dev.otp_locked());
        assert_eq!(dev.otp()[7], 0x5A);
    }

    #[test]
    fn write_commands_refused_without_write_enable() {
        let mut dev = device();
        let data = [0x12u8; 16];
        dev.load(0, &data);

        let frames: [(u8, Option<u32>, &[u8]); 4] = [
            (opcodes::SE, Some(0), &[]),
            (opcodes::SSE, Some(0), &[]),
            (opcodes::BE, None, &[]),
            (opcodes::PP, Some(0), &[0x00, 0x00]),
        ];
        for (opcode, addr, payload) in frames {
            bitbang::select(&mut dev).unwrap();
            single::write_byte(&mut dev, opcode).unwrap();
            assert_eq!(dev.state(), State::Invalid);
            if let Some(addr) = addr {
                single::write_addr(&mut dev, addr).unwrap();
            }
            for &b in payload {
                single::write_byte(&mut dev, b).unwrap();
            }
            assert_eq!(dev.state(), State::Invalid);
            bitbang::deselect(&mut dev).unwrap();
            bitbang::idle(&mut dev, 10).unwrap();

            assert!(!dev.is_busy());
            assert_eq!(&dev.memory()[..16], &data);
        }
        assert_eq!(dev.halted(), None);
    }

    #[test]
    fn otp_lock_blocks_programming() {
        let mut dev = device();
        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::POTP, Some(7), &[0x5A]);
        settle(&mut dev);

        // Clear the control bit to lock the array
        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::POTP, Some(OTP_CONTROL as u32), &[0xFE]);
        settle(&mut dev);
        assert!(dev.otp_locked());

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::POTP, Some(7), &[0x00]);
        assert!(!dev.is_busy());
        assert!(dev.flags().contains(Flags::PROTECTION | Flags::PROGRAM_FAIL));

        let mut otp = [0u8; 2];
        command(&mut dev, opcodes::ROTP, Some(7), 1, &[], &mut otp).unwrap();
        assert_eq!(otp, [0x5A, 0xFF]);
        assert_eq!(dev.otp()[7], 0x5A);
    }

    #[test]
    fn otp_overrun() {
        let mut dev = device();
        run(&mut dev, opcodes::WREN, None, &[]);
        let err =
            command(&mut dev, opcodes::POTP, Some(OTP_CONTROL as u32), 0, &[0xFF, 0xFF], &mut [])
                .unwrap_err();
        assert_eq!(err, ProtocolViolation::OtpOverrun { addr: OTP_SIZE as u32 });
    }

    #[test]
    fn config_registers() {
        let mut dev = device();
        let mut nv = [0u8; 4];
        command(&mut dev, opcodes::RDNVCR, None, 0, &[], &mut nv).unwrap();
        assert_eq!(nv, [0xFF, 0x8F, 0xFF, 0x8F]);

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::WRNVCR, None, &[0xC5, 0x8F]);
        settle(&mut dev);
        assert_eq!(dev.config_register(ConfigRegister::NonVolatile), 0x8FC5);

        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::WREVCR, None, &[0xD7]);
        settle(&mut dev);
        let mut ev = [0u8; 1];
        command(&mut dev, opcodes::RDEVCR, None, 0, &[], &mut ev).unwrap();
        assert_eq!(ev[0], 0xD7);

        run(&mut dev, opcodes::WREN, None, &[]);
        let err = command(&mut dev, opcodes::WRVCR, None, 0, &[0x00], &mut []).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::InvalidConfig {
                register: ConfigRegister::Volatile,
                value: 0
            }
        );
        assert_eq!(dev.config_register(ConfigRegister::Volatile), 0xFB);
    }

    #[test]
    fn write_status_keeps_wip_and_wel_bits() {
        let mut dev = device();
        run(&mut dev, opcodes::WREN, None, &[]);
        run(&mut dev, opcodes::WRSR, None, &[0xFF]);
        settle(&mut dev);
        assert_eq!(dev.status(), Status::WRITABLE);
    }

    #[test]
    fn quad_program_and_read() {
        let mut dev = device();
        run(&mut dev, opcodes::WREN, None, &[]);
        bitbang::select(&mut dev).unwrap();
        single::write_byte(&mut dev, opcodes::QPP).unwrap();
        single::write_addr(&mut dev, 0x300).unwrap();
        assert_eq!(dev.io_mode(), IoMode::Quad);
        for b in [0xDE, 0xAD, 0xBE, 0xEF] {
            quad::write_byte(&mut dev, b).unwrap();
        }
        bitbang::deselect(&mut dev).unwrap();
        settle(&mut dev);
        assert_eq!(&dev.memory()[0x300..0x304], &[0xDE, 0xAD, 0xBE, 0xEF]);

        bitbang::select(&mut dev).unwrap();
        single::write_byte(&mut dev, opcodes::QUAD_READ).unwrap();
        quad::write_addr(&mut dev, 0x301).unwrap();
        quad::write_byte(&mut dev, opcodes::MODE_XIP_EXIT).unwrap();
        quad::dummy(&mut dev, 6).unwrap();
        let got: Vec<u8> = (0..3).map(|_| quad::read_byte(&mut dev).unwrap()).collect();
        bitbang::deselect(&mut dev).unwrap();
        assert_eq!(got, [0xAD, 0xBE, 0xEF]);
        assert_eq!(dev.state(), State::Idle);
    }

    #[test]
    fn execute_in_place_skips_opcode() {
        let mut dev = device();
        dev.load(0x10, &[0x11, 0x22]);
        dev.load(0x80, &[0x33]);

        bitbang::select(&mut dev).unwrap();
        single::write_byte(&mut dev, opcodes::QUAD_READ).unwrap();
        quad::write_addr(&mut dev, 0x10).unwrap();
        quad::write_byte(&mut dev, 0x00).unwrap();
        quad::dummy(&mut dev, 6).unwrap();
        assert_eq!(quad::read_byte(&mut dev).unwrap(), 0x11);
        bitbang::deselect(&mut dev).unwrap();
        assert_eq!(dev.state(), State::ExecuteInPlace);

        // Next frame starts at the address phase
        bitbang::select(&mut dev).unwrap();
        quad::write_addr(&mut dev, 0x80).unwrap();
        quad::write_byte(&mut dev, opcodes::MODE_XIP_EXIT).unwrap();
        quad::dummy(&mut dev, 6).unwrap();
        assert_eq!(quad::read_byte(&mut dev).unwrap(), 0x33);
        bitbang::deselect(&mut dev).unwrap();
        assert_eq!(dev.state(), State::Idle);
    }

    #[test]
    fn fast_read_wraps_at_end_of_array() {
        let mut dev = device();
        dev.load(FLASH_SIZE - 1, &[0x01]);
        dev.load(0, &[0x02]);
        assert_eq!(read(&mut dev, ADDR_MASK, 2), [0x01, 0x02]);
    }

    #[test]
    fn load_clips_to_array() {
        let mut dev = device();
        assert_eq!(dev.load(FLASH_SIZE - 2, &[0, 0, 0, 0]), 2);
        assert_eq!(dev.load(FLASH_SIZE, &[0]), 0);
    }
}
