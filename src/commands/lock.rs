//! Sector lock command implementation

use super::Flash;
use crate::error::Result;

fn describe(bits: u8) -> &'static str {
    match bits & 0x03 {
        0 => "unlocked",
        1 => "locked",
        _ => "locked down",
    }
}

/// Run the lock command
pub fn run_lock(flash: &mut Flash, sector: usize, set: Option<u8>) -> Result<()> {
    if let Some(bits) = set {
        flash.set_sector_lock(sector, bits)?;
        let now = flash.sector_lock(sector)?;
        if now != bits {
            log::warn!(
                "Sector {} lock register is 0x{:02X}, not 0x{:02X}",
                sector,
                now,
                bits
            );
        }
    }

    let bits = flash.sector_lock(sector)?;
    println!("Sector {}: 0x{:02X} ({})", sector, bits, describe(bits));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_names() {
        assert_eq!(describe(0x00), "unlocked");
        assert_eq!(describe(0x01), "locked");
        assert_eq!(describe(0x03), "locked down");
    }
}
