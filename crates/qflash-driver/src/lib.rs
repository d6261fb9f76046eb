//! qflash-driver - Programming driver for the quad SPI NOR flash
//!
//! [`FlashDriver`] erases, programs and verifies the flash through any
//! [`qflash_core::bus::RegisterBus`]. Writes are minimised: a sector is only
//! erased when the new contents need a 0 bit turned back into a 1, and only
//! pages whose contents change are programmed.
//!
//! Like `qflash-core`, the driver is written once with `maybe_async` and
//! compiled blocking under the `is_sync` feature (the default) or async
//! without it.
//!
//! # Example
//!
//! ```ignore
//! use qflash_driver::{DriverConfig, FlashDriver};
//!
//! let mut flash = FlashDriver::new(bus, DriverConfig::default());
//! flash.check_id()?;
//! let report = flash.write(0x1000, &image)?;
//! log::info!("{} of {} sectors erased", report.sectors_erased, report.sectors_touched);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(async_fn_in_trait)]

extern crate alloc;

mod config;
mod driver;
pub mod plan;
mod progress;

pub use config::{DriverConfig, WaitPolicy};
pub use driver::{DriverStats, FlashDriver};
pub use progress::{NoProgress, SectorAction, WriteEvent, WriteProgress, WriteReport};
