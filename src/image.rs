//! Flash image files
//!
//! The memory array is kept raw in the image file. OTP contents and sector
//! lock registers go to `<image>.state.toml` next to it, so OTP programming
//! and lock-down stay in effect across runs.

use crate::commands::{read_file, write_file, Flash};
use crate::config::Config;
use crate::error::{CliError, Result};
use qflash_core::chip::{NUM_SECTORS, OTP_SIZE};
use qflash_device::{FlashDevice, SimController};
use qflash_driver::FlashDriver;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Non-volatile device state besides the memory array
#[derive(Debug, Serialize, Deserialize)]
struct DeviceState {
    /// OTP array, control byte last
    otp: Vec<u8>,
    /// One lock register per sector
    locks: Vec<u8>,
}

impl DeviceState {
    fn capture(device: &FlashDevice) -> Self {
        Self {
            otp: device.otp().to_vec(),
            locks: device.locks().to_vec(),
        }
    }

    fn restore(&self, device: &mut FlashDevice, path: &Path) -> Result<()> {
        let invalid = |what: &str, len: usize, want: usize| CliError::State {
            path: path.to_path_buf(),
            reason: format!("{} has {} bytes, expected {}", what, len, want),
        };
        let otp: &[u8; OTP_SIZE] = self
            .otp
            .as_slice()
            .try_into()
            .map_err(|_| invalid("otp", self.otp.len(), OTP_SIZE))?;
        let locks: &[u8; NUM_SECTORS] = self
            .locks
            .as_slice()
            .try_into()
            .map_err(|_| invalid("locks", self.locks.len(), NUM_SECTORS))?;
        device.load_otp(otp);
        device.load_locks(locks);
        Ok(())
    }
}

/// Path of the state file belonging to an image
pub fn state_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_owned();
    name.push(".state.toml");
    PathBuf::from(name)
}

fn load_state(device: &mut FlashDevice, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let state: DeviceState = toml::from_str(&content).map_err(|e| CliError::State {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    state.restore(device, path)?;
    log::info!("Loaded OTP and lock registers from {}", path.display());
    Ok(())
}

/// Build the simulated flash, preloading the image and its state file
pub fn open_flash(config: &Config, image: Option<&Path>) -> Result<Flash> {
    let mut device = FlashDevice::new(config.device_config());

    if let Some(path) = image {
        if path.exists() {
            let data = read_file(path)?;
            let loaded = device.load(0, &data);
            if loaded < data.len() {
                log::warn!(
                    "{} is {} bytes, only the first {} fit the device",
                    path.display(),
                    data.len(),
                    loaded
                );
            }
            log::info!("Loaded {} bytes from {}", loaded, path.display());
        } else {
            log::info!(
                "{} does not exist, starting from an erased device",
                path.display()
            );
        }

        let state = state_path(path);
        if state.exists() {
            load_state(&mut device, &state)?;
        }
    }

    let bus = SimController::new(device, config.controller_config());
    Ok(FlashDriver::new(bus, config.driver_config()))
}

/// Write the memory array to the image and OTP and locks to its state file
pub fn save_image(flash: Flash, path: &Path) -> Result<()> {
    let device = flash.into_inner().into_device();
    write_file(path, device.memory())?;
    log::info!("Saved {} bytes to {}", device.memory().len(), path.display());

    let state = state_path(path);
    let content = toml::to_string(&DeviceState::capture(&device))?;
    write_file(&state, content.as_bytes())?;
    log::debug!("Saved OTP and lock registers to {}", state.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflash_core::spi::opcodes;
    use qflash_core::Error;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qflash_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn instant() -> Config {
        Config::from_toml("[device.timing]\ninstant = true\n").unwrap()
    }

    #[test]
    fn state_file_name() {
        assert_eq!(
            state_path(Path::new("/tmp/flash.bin")),
            PathBuf::from("/tmp/flash.bin.state.toml")
        );
    }

    #[test]
    fn otp_and_locks_survive_reopen() {
        let dir = scratch_dir("reopen");
        let image = dir.join("flash.bin");
        let config = instant();

        let mut flash = open_flash(&config, Some(&image)).unwrap();
        flash.otp_program(7, &[0x5A]).unwrap();
        flash.set_sector_lock(3, opcodes::LOCK_DOWN).unwrap();
        flash.write(0x100, &[1, 2, 3]).unwrap();
        save_image(flash, &image).unwrap();
        assert!(state_path(&image).exists());

        let mut flash = open_flash(&config, Some(&image)).unwrap();
        let mut otp = [0u8; 8];
        flash.otp_read(0, &mut otp).unwrap();
        assert_eq!(otp[7], 0x5A);
        assert_eq!(otp[0], 0xFF);
        assert_eq!(
            flash.sector_lock(3).unwrap(),
            opcodes::LOCK_WRITE | opcodes::LOCK_DOWN
        );
        let mut data = [0u8; 3];
        flash.read(0x100, &mut data).unwrap();
        assert_eq!(data, [1, 2, 3]);

        flash.otp_lock().unwrap();
        save_image(flash, &image).unwrap();

        let mut flash = open_flash(&config, Some(&image)).unwrap();
        assert!(flash.otp_locked().unwrap());
        assert_eq!(flash.otp_program(0, &[0x00]), Err(Error::OtpLocked));
        assert_eq!(
            flash.erase_sector(0x3_0000),
            Err(Error::Protected { addr: 0x3_0000 })
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_state_file() {
        let dir = scratch_dir("malformed");
        let image = dir.join("flash.bin");
        std::fs::write(state_path(&image), "otp = [1, 2]\nlocks = []\n").unwrap();

        match open_flash(&instant(), Some(&image)) {
            Err(CliError::State { reason, .. }) => assert!(reason.contains("otp")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("short OTP array accepted"),
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
