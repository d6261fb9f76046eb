//! Write cycle durations
//!
//! All durations are counted in device step calls (clock half-periods).
//! Only their relative size matters: the model does not try to match real
//! wall-clock timing, and the values are scaled down so erases finish in a
//! reasonable number of simulated cycles.
//!
//! Three scales are used. Each is 10x the one below it, where the real part
//! spans 1000x, so millisecond and second figures of the datasheet shrink
//! by 100x and 10000x relative to the fast scale.

/// Steps per unit on the fast scale (datasheet microseconds)
const FAST: u32 = 20;
/// Steps per unit on the medium scale (datasheet milliseconds)
const MEDIUM: u32 = FAST * 10;
/// Steps per unit on the slow scale (datasheet seconds)
const SLOW: u32 = MEDIUM * 10;

/// Countdown lengths armed by write-type commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Page program and OTP program
    pub page_program: u32,
    /// 4 KiB subsector erase
    pub subsector_erase: u32,
    /// 64 KiB sector erase
    pub sector_erase: u32,
    /// Whole array erase
    pub bulk_erase: u32,
    /// Status register and lock register writes
    pub write_status: u32,
    /// Non-volatile configuration register write
    pub write_nvconfig: u32,
    /// Volatile and enhanced volatile configuration register writes
    pub write_vconfig: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            page_program: 12 * FAST,
            subsector_erase: 5 * MEDIUM,
            sector_erase: 15 * MEDIUM,
            bulk_erase: 32 * SLOW,
            write_status: 50 * FAST,
            write_nvconfig: 200 * MEDIUM,
            write_vconfig: 8,
        }
    }
}

impl Timing {
    /// Timing where every write completes on the next step
    pub const fn instant() -> Self {
        Self {
            page_program: 1,
            subsector_erase: 1,
            sector_erase: 1,
            bulk_erase: 1,
            write_status: 1,
            write_nvconfig: 1,
            write_vconfig: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ordering() {
        let t = Timing::default();
        assert_eq!(t.page_program, 240);
        assert_eq!(t.sector_erase, 3000);
        assert_eq!(t.bulk_erase, 64_000);
        assert_eq!(t.write_nvconfig, 40_000);
        assert!(t.page_program < t.subsector_erase);
        assert!(t.subsector_erase < t.sector_erase);
        assert!(t.sector_erase < t.bulk_erase);
    }
}
