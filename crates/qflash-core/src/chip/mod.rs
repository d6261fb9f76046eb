//! Flash device description
//!
//! Geometry, identification, timing and register layout of the emulated
//! 128 Mbit quad SPI NOR flash.

mod geometry;
mod registers;
mod timing;

pub use geometry::*;
pub use registers::{ConfigRegister, Flags, Status};
pub use timing::Timing;
