//! Command implementations

mod erase;
mod id;
mod lock;
mod otp;
mod read;
mod verify;
mod write;

pub use erase::run_erase;
pub use id::run_id;
pub use lock::run_lock;
pub use otp::{run_otp_lock, run_otp_program, run_otp_read};
pub use read::run_read;
pub use verify::run_verify;
pub use write::run_write;

use crate::error::{CliError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use qflash_core::chip::FLASH_SIZE;
use qflash_device::SimController;
use qflash_driver::FlashDriver;
use std::path::Path;

/// Driver over the simulated device
pub type Flash = FlashDriver<SimController>;

/// Chunk size for reads and verification
const CHUNK_SIZE: usize = 4096;

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Check that `len` bytes at `start` fit the device
pub(crate) fn check_range(start: u32, len: usize) -> Result<()> {
    if (start as usize).saturating_add(len) > FLASH_SIZE {
        return Err(CliError::InvalidArgument(format!(
            "range 0x{:06X}+0x{:X} exceeds the flash size ({} bytes)",
            start, len, FLASH_SIZE
        )));
    }
    Ok(())
}

pub(crate) fn byte_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Print the driver's and the controller's counters at debug level
pub(crate) fn log_stats(flash: &Flash) {
    let stats = flash.stats();
    log::debug!(
        "{} erases, {} page programs, {} bytes read, {} busy polls",
        stats.erases,
        stats.page_programs,
        stats.bytes_read,
        stats.polls
    );
    log::debug!(
        "controller issued {} erase and {} program frames",
        flash.bus().erase_count(),
        flash.bus().program_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_checks() {
        assert!(check_range(0, FLASH_SIZE).is_ok());
        assert!(check_range(1, FLASH_SIZE).is_err());
        assert!(check_range(u32::MAX, 1).is_err());
    }
}
