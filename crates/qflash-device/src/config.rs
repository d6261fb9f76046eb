//! Device model configuration

use qflash_core::chip::Timing;

/// How the model reacts to a protocol violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViolationMode {
    /// Return the violation from `step` and halt until `recover`
    #[default]
    Report,
    /// Panic, stopping the simulation on the spot
    Abort,
}

/// Configuration for a [`crate::FlashDevice`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceConfig {
    /// Write cycle durations
    pub timing: Timing,
    /// Reaction to protocol violations
    pub violation_mode: ViolationMode,
}

impl DeviceConfig {
    /// Configuration that panics on the first protocol violation
    pub fn strict() -> Self {
        Self {
            violation_mode: ViolationMode::Abort,
            ..Self::default()
        }
    }

    /// Replace the timing
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}
