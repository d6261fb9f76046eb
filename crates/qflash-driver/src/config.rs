//! Driver configuration

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use qflash_core::chip::FLASH_ID;

/// Default bound on busy polls per operation
///
/// Generous enough for a bulk erase with the default device timing.
pub const DEFAULT_MAX_POLLS: u32 = 1_000_000;

/// How long to wait for a write cycle to finish
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Give up with a timeout after this many busy polls (`None`: never)
    pub max_polls: Option<u32>,
    /// Set to abort a pending wait with `Error::Cancelled`
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_polls: Some(DEFAULT_MAX_POLLS),
            cancel: None,
        }
    }
}

impl WaitPolicy {
    /// Wait without any bound
    pub fn unbounded() -> Self {
        Self {
            max_polls: None,
            cancel: None,
        }
    }

    /// Returns true once the cancel flag has been raised
    pub fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Options for a [`crate::FlashDriver`]
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Read back and compare after every erase and program
    pub verify: bool,
    /// Keep data in an erased sector that lies outside the written range
    pub preserve: bool,
    /// Busy polling bounds
    pub wait: WaitPolicy,
    /// Identifier `check_id` expects
    pub expected_id: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            verify: true,
            preserve: true,
            wait: WaitPolicy::default(),
            expected_id: FLASH_ID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let policy = WaitPolicy {
            cancel: Some(flag.clone()),
            ..WaitPolicy::default()
        };
        assert!(!policy.cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(policy.cancelled());
        assert!(!WaitPolicy::unbounded().cancelled());
    }
}
