//! qflash-core - Shared definitions for the quad SPI NOR flash subsystem
//!
//! Both ends of the flash wire protocol build on this crate: the
//! cycle-stepped device model (`qflash-device`) and the host programming
//! driver (`qflash-driver`). It holds the opcode table, the device geometry
//! and timing, the register-mapped bus abstraction and the error types.
//!
//! The crate is `no_std`; the `std` feature only adds `std::error::Error`
//! implementations.
//!
//! # Example
//!
//! ```ignore
//! use qflash_core::bus::{regs, RegisterBus};
//!
//! fn device_id<B: RegisterBus>(bus: &mut B) -> qflash_core::Result<u32> {
//!     bus.readio(regs::ID)
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Allow async fn in traits - we use maybe-async for dual sync/async support
#![allow(async_fn_in_trait)]

pub mod bus;
pub mod chip;
pub mod error;
pub mod spi;

pub use error::{BusFault, Error, ProtocolViolation, Result};
