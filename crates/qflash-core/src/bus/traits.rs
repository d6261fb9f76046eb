//! Register bus trait definition
//!
//! The trait uses `maybe_async` to support both sync and async modes:
//! - With the `is_sync` feature, it is blocking (host tools, simulation)
//! - Without it, it is async (for WASM or embedded executors)

use crate::error::Result;
use maybe_async::maybe_async;

/// Register read/write access to the flash controller
///
/// This is the whole interface the driver needs from a transport. Every
/// failure is reported as [`crate::Error::Bus`] carrying the address of the
/// failing transaction.
///
/// ## Example: a transport over some link
///
/// ```ignore
/// impl RegisterBus for UartBridge {
///     fn readio(&mut self, addr: u32) -> Result<u32> {
///         self.request(Op::Read, addr, 1)
///             .map(|words| words[0])
///             .map_err(|_| Error::Bus { addr, fault: BusFault::Transport })
///     }
///     // ...
/// }
/// ```
#[maybe_async(AFIT)]
pub trait RegisterBus {
    /// Read one word
    async fn readio(&mut self, addr: u32) -> Result<u32>;

    /// Write one word
    async fn writeio(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Read consecutive words starting at `addr`
    async fn readi(&mut self, addr: u32, buf: &mut [u32]) -> Result<()>;

    /// Write consecutive words starting at `addr`
    ///
    /// A block write to the memory window is a single page program and must
    /// stay within one page.
    async fn writei(&mut self, addr: u32, data: &[u32]) -> Result<()>;

    /// Block until the controller has made progress (interrupt, delay, or
    /// simulated clock cycles)
    async fn wait(&mut self) -> Result<()>;
}
