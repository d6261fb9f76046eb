//! Flash programming driver

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info, warn};
use maybe_async::maybe_async;
use qflash_core::bus::{regs, RegisterBus};
use qflash_core::chip::{
    self, ConfigRegister, Flags, Status, ERASED, FLASH_SIZE, JEDEC_ID_LEN, NUM_SECTORS,
    OTP_CONTROL, OTP_SIZE, SECTOR_SIZE, SUBSECTOR_SIZE,
};
use qflash_core::spi::opcodes;
use qflash_core::{Error, Result};

use crate::config::DriverConfig;
use crate::plan::{self, need_erase, need_write, Span};
use crate::progress::{NoProgress, SectorAction, WriteEvent, WriteProgress, WriteReport};

/// Bytes moved per block read
const READ_CHUNK_SIZE: usize = 4096;

/// Running totals of the work done by a driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Erase commands issued (any size)
    pub erases: usize,
    /// Page programs issued
    pub page_programs: usize,
    /// Bytes read from the memory window
    pub bytes_read: usize,
    /// Busy polls of the control register
    pub polls: u64,
}

/// Erase/program/verify driver over a register bus
pub struct FlashDriver<B> {
    bus: B,
    config: DriverConfig,
    stats: DriverStats,
}

fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut be = [ERASED; 4];
            be[..c.len()].copy_from_slice(c);
            u32::from_be_bytes(be)
        })
        .collect()
}

fn bytes_from_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// Word-aligned window `[start, end)` covering `len` bytes at `addr`
fn word_window(addr: u32, len: usize) -> (u32, u32) {
    let start = addr & !3;
    let end = (addr + len as u32 + 3) & !3;
    (start, end)
}

fn check_bounds(addr: u32, len: usize) -> Result<()> {
    if chip::in_bounds(addr, len) {
        Ok(())
    } else {
        Err(Error::AddressOutOfBounds { addr, len })
    }
}

fn first_mismatch(addr: u32, expected: &[u8], found: &[u8]) -> Option<Error> {
    expected
        .iter()
        .zip(found)
        .position(|(e, f)| e != f)
        .map(|i| Error::ProgramVerify {
            addr: addr + i as u32,
            expected: expected[i],
            found: found[i],
        })
}

impl<B> FlashDriver<B> {
    /// Create a driver on top of `bus`
    pub fn new(bus: B, config: DriverConfig) -> Self {
        Self {
            bus,
            config,
            stats: DriverStats::default(),
        }
    }

    /// Driver with the default configuration
    pub fn with_defaults(bus: B) -> Self {
        Self::new(bus, DriverConfig::default())
    }

    /// The underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable access to the underlying bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Release the bus
    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Driver configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Mutable driver configuration
    pub fn config_mut(&mut self) -> &mut DriverConfig {
        &mut self.config
    }

    /// Work done so far
    pub fn stats(&self) -> DriverStats {
        self.stats
    }
}

#[maybe_async]
impl<B: RegisterBus> FlashDriver<B> {
    // ========================================================================
    // Identification and registers
    // ========================================================================

    /// First four identification bytes as a big-endian word
    pub async fn flashid(&mut self) -> Result<u32> {
        self.bus.readio(regs::ID).await
    }

    /// All identification bytes
    pub async fn read_id(&mut self) -> Result<[u8; JEDEC_ID_LEN]> {
        let mut words = [0u32; JEDEC_ID_LEN / 4];
        self.bus.readi(regs::ID, &mut words).await?;
        let mut id = [0u8; JEDEC_ID_LEN];
        for (dst, src) in id.chunks_mut(4).zip(words) {
            dst.copy_from_slice(&src.to_be_bytes());
        }
        Ok(id)
    }

    /// Check the identifier against the configured one
    pub async fn check_id(&mut self) -> Result<()> {
        let found = self.flashid().await?;
        let expected = self.config.expected_id;
        if found != expected {
            return Err(Error::IdMismatch { expected, found });
        }
        debug!("flash ID 0x{:08X}", found);
        Ok(())
    }

    /// Read the status register
    pub async fn read_status(&mut self) -> Result<Status> {
        let value = self.bus.readio(regs::STATUS).await?;
        Ok(Status::from_bits_retain(value as u8))
    }

    /// Write the status register (block protect bits)
    pub async fn write_status(&mut self, status: Status) -> Result<()> {
        self.write_enable().await?;
        self.bus
            .writeio(regs::STATUS, status.bits() as u32)
            .await?;
        self.wait_ready(regs::STATUS).await
    }

    /// Read the flag status register
    pub async fn read_flags(&mut self) -> Result<Flags> {
        let value = self.bus.readio(regs::FLAGS).await?;
        Ok(Flags::from_bits_retain(value as u8))
    }

    /// Clear the latched error flags
    pub async fn clear_flags(&mut self) -> Result<()> {
        self.bus.writeio(regs::FLAGS, 0).await
    }

    /// Read a configuration register
    pub async fn read_config(&mut self, reg: ConfigRegister) -> Result<u16> {
        let value = self.bus.readio(regs::config(reg)).await?;
        Ok(value as u16)
    }

    /// Write a configuration register and wait for it to take effect
    pub async fn write_config(&mut self, reg: ConfigRegister, value: u16) -> Result<()> {
        debug!("{} <- 0x{:04X}", reg, value);
        self.write_enable().await?;
        self.bus.writeio(regs::config(reg), value as u32).await?;
        self.wait_ready(regs::config(reg)).await
    }

    // ========================================================================
    // Sector locks
    // ========================================================================

    /// Lock register of a sector
    pub async fn sector_lock(&mut self, sector: usize) -> Result<u8> {
        Self::check_sector(sector)?;
        let value = self.bus.readio(regs::lock(sector)).await?;
        Ok(value as u8)
    }

    /// Write a sector's lock register
    ///
    /// Once lock-down is set the device ignores further changes.
    pub async fn set_sector_lock(&mut self, sector: usize, bits: u8) -> Result<()> {
        Self::check_sector(sector)?;
        debug!("sector {} lock <- 0x{:02X}", sector, bits);
        self.write_enable().await?;
        self.bus.writeio(regs::lock(sector), bits as u32).await?;
        self.wait_ready((sector * SECTOR_SIZE) as u32).await
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Read `buf.len()` bytes starting at `addr`
    pub async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        check_bounds(addr, buf.len())?;

        let (start, end) = word_window(addr, buf.len());
        let stop = addr + buf.len() as u32;
        let mut pos = start;
        while pos < end {
            let n = core::cmp::min(READ_CHUNK_SIZE as u32, end - pos);
            let mut words = vec![0u32; (n / 4) as usize];
            self.bus.readi(regs::MEM_BASE + pos, &mut words).await?;
            let bytes = bytes_from_words(&words);

            let lo = core::cmp::max(pos, addr);
            let hi = core::cmp::min(pos + n, stop);
            buf[(lo - addr) as usize..(hi - addr) as usize]
                .copy_from_slice(&bytes[(lo - pos) as usize..(hi - pos) as usize]);
            pos += n;
        }
        self.stats.bytes_read += buf.len();
        Ok(())
    }

    /// Compare flash contents with `data`
    pub async fn verify(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut found = vec![0u8; data.len()];
        self.read(addr, &mut found).await?;
        match first_mismatch(addr, data, &found) {
            Some(err) => {
                warn!("{}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    // ========================================================================
    // Erasing
    // ========================================================================

    /// Erase the 64 KiB sector containing `addr`
    pub async fn erase_sector(&mut self, addr: u32) -> Result<()> {
        check_bounds(addr, 1)?;
        let base = chip::sector_base(addr);
        info!("Erasing sector at 0x{:06X}", base);
        self.erase(opcodes::SE, base, SECTOR_SIZE).await
    }

    /// Erase the 4 KiB subsector containing `addr`
    pub async fn erase_subsector(&mut self, addr: u32) -> Result<()> {
        check_bounds(addr, 1)?;
        let base = chip::subsector_base(addr);
        info!("Erasing subsector at 0x{:06X}", base);
        self.erase(opcodes::SSE, base, SUBSECTOR_SIZE).await
    }

    /// Erase the whole array
    ///
    /// Refused by the device when any sector is locked.
    pub async fn bulk_erase(&mut self) -> Result<()> {
        info!("Erasing entire flash");
        self.erase(opcodes::BE, 0, FLASH_SIZE).await
    }

    async fn erase(&mut self, opcode: u8, base: u32, size: usize) -> Result<()> {
        self.write_enable().await?;
        self.bus
            .writeio(regs::CTRL, regs::ctrl_command(opcode, base))
            .await?;
        self.stats.erases += 1;
        self.wait_ready(base).await?;
        self.check_refused(base).await?;
        if self.config.verify {
            self.verify_erased(base, size).await?;
        }
        Ok(())
    }

    async fn verify_erased(&mut self, base: u32, size: usize) -> Result<()> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut offset = 0;
        while offset < size {
            let n = core::cmp::min(READ_CHUNK_SIZE, size - offset);
            let addr = base + offset as u32;
            self.read(addr, &mut buf[..n]).await?;
            if let Some(i) = buf[..n].iter().position(|&b| b != ERASED) {
                let err = Error::EraseVerify {
                    addr: addr + i as u32,
                    found: buf[i],
                };
                warn!("{}", err);
                return Err(err);
            }
            offset += n;
        }
        Ok(())
    }

    // ========================================================================
    // Programming
    // ========================================================================

    /// Program up to one page
    ///
    /// `data` must not cross a page boundary. Data that is all 0xFF is
    /// skipped since programming it cannot change the array.
    pub async fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.program_page(addr, data).await.map(|_| ())
    }

    /// Program one page; returns whether a program was issued
    async fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<bool> {
        if data.is_empty() {
            return Ok(false);
        }
        check_bounds(addr, data.len())?;
        if chip::page_base(addr) != chip::page_base(addr + data.len() as u32 - 1) {
            return Err(Error::PageBoundary {
                addr,
                len: data.len(),
            });
        }
        if plan::is_erased(data) {
            debug!("skipping erased page data at 0x{:06X}", addr);
            return Ok(false);
        }

        // Pad to whole words; 0xFF leaves the array untouched
        let (start, end) = word_window(addr, data.len());
        let mut image = vec![ERASED; (end - start) as usize];
        let at = (addr - start) as usize;
        image[at..at + data.len()].copy_from_slice(data);

        debug!("programming {} bytes at 0x{:06X}", data.len(), addr);
        self.write_enable().await?;
        self.bus
            .writei(regs::MEM_BASE + start, &words_from_bytes(&image))
            .await?;
        self.stats.page_programs += 1;
        self.wait_ready(addr).await?;
        self.check_refused(addr).await?;

        if self.config.verify {
            self.verify(addr, data).await?;
        }
        Ok(true)
    }

    /// Write `data` at `addr`, erasing only where needed
    pub async fn write(&mut self, addr: u32, data: &[u8]) -> Result<WriteReport> {
        self.write_with_progress(addr, data, &mut NoProgress).await
    }

    /// [`Self::write`] with progress reporting
    ///
    /// 1. Read the current contents of the target range
    /// 2. Per sector, keep it, program the changed pages in place, or erase
    ///    it when some bit has to go from 0 to 1
    /// 3. Erase, saving the rest of the sector first if `preserve` is set
    /// 4. Program the non-blank pages of erased sectors and the changed
    ///    pages everywhere else
    pub async fn write_with_progress<P: WriteProgress>(
        &mut self,
        addr: u32,
        data: &[u8],
        progress: &mut P,
    ) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        if data.is_empty() {
            progress.complete(&report);
            return Ok(report);
        }
        check_bounds(addr, data.len())?;
        let polls = self.stats.polls;

        let mut current = vec![0u8; data.len()];
        let mut done = 0;
        for span in plan::sectors(addr, data.len()) {
            self.read(span.addr, &mut current[span.range.clone()]).await?;
            done += span.range.len();
            progress.event(WriteEvent::Compare {
                done,
                len: data.len(),
            });
        }

        report.sectors_touched = plan::sectors(addr, data.len()).count();
        report.bytes_changed = current.iter().zip(data).filter(|(c, d)| c != d).count();
        if report.bytes_changed == 0 {
            debug!("0x{:06X}+{}: already up to date", addr, data.len());
            report.pages_skipped = plan::pages(addr, data.len()).count();
            progress.complete(&report);
            return Ok(report);
        }

        let pages: Vec<Span> = plan::pages(addr, data.len()).collect();
        let mut erase_plan: Vec<Span> = Vec::new();
        let mut in_place: Vec<Span> = Vec::new();
        for span in plan::sectors(addr, data.len()) {
            let sector = chip::sector_index(span.addr);
            let action = if need_erase(&current[span.range.clone()], &data[span.range.clone()]) {
                erase_plan.push(span);
                SectorAction::Erase
            } else {
                let mut count = 0;
                for page in pages.iter().filter(|p| chip::sector_index(p.addr) == sector) {
                    if need_write(&current[page.range.clone()], &data[page.range.clone()]) {
                        in_place.push(page.clone());
                        count += 1;
                    } else {
                        report.pages_skipped += 1;
                    }
                }
                if count == 0 {
                    SectorAction::Keep
                } else {
                    SectorAction::Program { pages: count }
                }
            };
            debug!("sector {}: {:?}", sector, action);
            progress.event(WriteEvent::Planned { sector, action });
        }

        // Full sector contents to program back after each erase
        let mut images: Vec<(u32, Vec<u8>)> = Vec::with_capacity(erase_plan.len());
        for span in &erase_plan {
            let base = chip::sector_base(span.addr);
            let mut image = vec![ERASED; SECTOR_SIZE];
            if self.config.preserve {
                self.read(base, &mut image).await?;
            }
            let at = plan::sector_offset(span.addr);
            let end = at + span.range.len();
            report.bytes_preserved += image[..at]
                .iter()
                .chain(&image[end..])
                .filter(|&&b| b != ERASED)
                .count();
            image[at..end].copy_from_slice(&data[span.range.clone()]);

            self.erase_sector(base).await?;
            images.push((base, image));
            report.sectors_erased += 1;
            progress.event(WriteEvent::Erased {
                sector: chip::sector_index(base),
                index: report.sectors_erased,
                count: erase_plan.len(),
            });
        }

        let mut jobs: Vec<(u32, &[u8])> = Vec::new();
        for (base, image) in &images {
            for page in plan::pages(*base, SECTOR_SIZE) {
                let chunk = &image[page.range];
                if plan::is_erased(chunk) {
                    report.pages_skipped += 1;
                } else {
                    jobs.push((page.addr, chunk));
                }
            }
        }
        for page in &in_place {
            jobs.push((page.addr, &data[page.range.clone()]));
        }

        let count = jobs.len();
        for (i, (page_addr, chunk)) in jobs.into_iter().enumerate() {
            if self.program_page(page_addr, chunk).await? {
                report.pages_programmed += 1;
            } else {
                report.pages_skipped += 1;
            }
            progress.event(WriteEvent::Programmed {
                addr: page_addr,
                index: i + 1,
                count,
            });
        }

        report.polls = self.stats.polls - polls;
        info!(
            "Wrote {} bytes at 0x{:06X}: {} of {} sectors erased, {} pages programmed, {} skipped",
            data.len(),
            addr,
            report.sectors_erased,
            report.sectors_touched,
            report.pages_programmed,
            report.pages_skipped
        );
        progress.complete(&report);
        Ok(report)
    }

    // ========================================================================
    // OTP
    // ========================================================================

    /// Read the OTP array (64 data bytes plus the control byte)
    pub async fn otp_read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        Self::check_otp(offset, buf.len())?;
        let (start, end) = word_window(offset, buf.len());
        let mut words = vec![0u32; ((end - start) / 4) as usize];
        self.bus.readi(regs::otp(start), &mut words).await?;
        let bytes = bytes_from_words(&words);
        let at = (offset - start) as usize;
        buf.copy_from_slice(&bytes[at..at + buf.len()]);
        Ok(())
    }

    /// Returns true once the OTP array is write protected
    pub async fn otp_locked(&mut self) -> Result<bool> {
        let mut control = [0u8; 1];
        self.otp_read(OTP_CONTROL as u32, &mut control).await?;
        Ok(control[0] & opcodes::OTP_CONTROL_UNLOCKED == 0)
    }

    /// Program OTP bytes
    ///
    /// Bits can only be cleared, and never again once the array is locked.
    pub async fn otp_program(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        Self::check_otp(offset, data.len())?;
        if self.otp_locked().await? {
            return Err(Error::OtpLocked);
        }

        let (start, end) = word_window(offset, data.len());
        let mut image = vec![ERASED; (end - start) as usize];
        let at = (offset - start) as usize;
        image[at..at + data.len()].copy_from_slice(data);

        debug!("programming {} OTP bytes at {}", data.len(), offset);
        self.write_enable().await?;
        self.bus
            .writei(regs::otp(start), &words_from_bytes(&image))
            .await?;
        self.wait_ready(regs::otp(offset)).await?;
        if self.read_flags().await?.contains(Flags::PROTECTION) {
            self.clear_flags().await?;
            return Err(Error::OtpLocked);
        }

        if self.config.verify {
            let mut found = vec![0u8; data.len()];
            self.otp_read(offset, &mut found).await?;
            if let Some(err) = first_mismatch(offset, data, &found) {
                warn!("OTP {}", err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Permanently write protect the OTP array
    pub async fn otp_lock(&mut self) -> Result<()> {
        if self.otp_locked().await? {
            return Ok(());
        }
        info!("Locking OTP array");
        let control = ERASED & !opcodes::OTP_CONTROL_UNLOCKED;
        self.otp_program(OTP_CONTROL as u32, &[control]).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn write_enable(&mut self) -> Result<()> {
        self.bus
            .writeio(regs::CTRL, regs::ctrl_command(opcodes::WREN, 0))
            .await
    }

    /// Poll until the device is idle, within the configured bounds
    async fn wait_ready(&mut self, addr: u32) -> Result<()> {
        let mut polls = 0u32;
        loop {
            if self.config.wait.cancelled() {
                warn!("wait for 0x{:06X} cancelled", addr);
                return Err(Error::Cancelled);
            }
            let ctrl = self.bus.readio(regs::CTRL).await?;
            self.stats.polls += 1;
            if ctrl & regs::CTRL_BUSY == 0 {
                return Ok(());
            }
            polls += 1;
            if self.config.wait.max_polls.is_some_and(|max| polls >= max) {
                warn!("device still busy after {} polls", polls);
                return Err(Error::Timeout { addr });
            }
            self.bus.wait().await?;
        }
    }

    /// Turn a latched protection error into `Error::Protected`
    async fn check_refused(&mut self, addr: u32) -> Result<()> {
        let flags = self.read_flags().await?;
        if flags.contains(Flags::PROTECTION) {
            warn!("write at 0x{:06X} refused, sector is locked", addr);
            self.clear_flags().await?;
            return Err(Error::Protected { addr });
        }
        Ok(())
    }

    fn check_sector(sector: usize) -> Result<()> {
        if sector < NUM_SECTORS {
            Ok(())
        } else {
            Err(Error::AddressOutOfBounds {
                addr: (sector * SECTOR_SIZE) as u32,
                len: SECTOR_SIZE,
            })
        }
    }

    fn check_otp(offset: u32, len: usize) -> Result<()> {
        if offset as usize + len <= OTP_SIZE {
            Ok(())
        } else {
            Err(Error::AddressOutOfBounds { addr: offset, len })
        }
    }
}
