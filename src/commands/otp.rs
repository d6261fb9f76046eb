//! OTP command implementation

use super::Flash;
use crate::error::Result;
use qflash_core::chip::OTP_SIZE;

/// Dump the OTP array
pub fn run_otp_read(flash: &mut Flash) -> Result<()> {
    let mut otp = [0u8; OTP_SIZE];
    flash.otp_read(0, &mut otp)?;

    for (i, row) in otp.chunks(16).enumerate() {
        let hex: Vec<String> = row.iter().map(|b| format!("{:02X}", b)).collect();
        println!("{:02X}: {}", i * 16, hex.join(" "));
    }
    println!(
        "OTP is {}",
        if flash.otp_locked()? { "locked" } else { "unlocked" }
    );
    Ok(())
}

/// Program bytes into the OTP array
pub fn run_otp_program(flash: &mut Flash, offset: u32, data: &[u8]) -> Result<()> {
    flash.otp_program(offset, data)?;
    println!("Programmed {} OTP bytes at offset {}", data.len(), offset);
    Ok(())
}

/// Lock the OTP array
pub fn run_otp_lock(flash: &mut Flash) -> Result<()> {
    flash.otp_lock()?;
    println!("OTP is locked");
    Ok(())
}
