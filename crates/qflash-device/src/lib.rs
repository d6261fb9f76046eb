//! qflash-device - Cycle-stepped quad SPI NOR flash model
//!
//! [`FlashDevice`] models a 128 Mbit quad SPI NOR flash at pin level: it is
//! advanced one clock half-period at a time and implements the command set,
//! write timing, sector locks and OTP array of the real part.
//!
//! [`SimController`] puts a register bus in front of the model so the
//! programming driver can run against it unchanged.
//!
//! # Example
//!
//! ```ignore
//! use qflash_device::{FlashDevice, SimController};
//! use qflash_core::bus::{regs, RegisterBus};
//!
//! let mut bus = SimController::with_device(FlashDevice::new_default());
//! assert_eq!(bus.readio(regs::ID)?, 0x20BA_1810);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

pub mod bitbang;
mod config;
mod controller;
mod device;
mod state;

pub use config::{DeviceConfig, ViolationMode};
pub use controller::{ControllerConfig, SimController};
pub use device::{FlashDevice, StepResult};
pub use state::State;
