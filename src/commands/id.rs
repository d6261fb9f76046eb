//! Identification command implementation

use super::Flash;
use crate::error::Result;
use qflash_core::chip::{ConfigRegister, FLASH_SIZE, NUM_SECTORS, PAGE_SIZE, SECTOR_SIZE};

/// Run the id command
pub fn run_id(flash: &mut Flash) -> Result<()> {
    let id = flash.read_id()?;
    let hex: Vec<String> = id.iter().map(|b| format!("{:02X}", b)).collect();

    println!("Flash Chip Information");
    println!("======================");
    println!();
    println!("JEDEC ID:        {}", hex.join(" "));
    println!("Flash ID:        0x{:08X}", flash.flashid()?);
    println!(
        "Size:            {} bytes ({} MiB)",
        FLASH_SIZE,
        FLASH_SIZE / (1024 * 1024)
    );
    println!(
        "Sectors:         {} x {} KiB",
        NUM_SECTORS,
        SECTOR_SIZE / 1024
    );
    println!("Page size:       {} bytes", PAGE_SIZE);
    println!();

    let status = flash.read_status()?;
    let flags = flash.read_flags()?;
    println!("Status:          0x{:02X} {:?}", status.bits(), status);
    println!("Flags:           0x{:02X} {:?}", flags.bits(), flags);
    for reg in [
        ConfigRegister::Volatile,
        ConfigRegister::EnhancedVolatile,
        ConfigRegister::NonVolatile,
    ] {
        let value = flash.read_config(reg)?;
        println!("{:<16} 0x{:04X}", format!("{}:", reg), value);
    }
    println!(
        "OTP:             {}",
        if flash.otp_locked()? { "locked" } else { "unlocked" }
    );

    flash.check_id()?;
    Ok(())
}
