//! Write planning events and the write report
//!
//! A write first compares the target range with the flash, then decides per
//! sector whether the existing bits can be reused, and finally erases and
//! programs. Each step is reported as a [`WriteEvent`].

/// What a write does to one sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorAction {
    /// Contents already match
    Keep,
    /// New data only clears bits; the changed pages are programmed in place
    Program {
        /// Pages to program
        pages: usize,
    },
    /// Some bit has to go from 0 to 1, so the sector is erased first
    Erase,
}

/// A step of [`crate::FlashDriver::write_with_progress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEvent {
    /// Current contents read back for comparison
    Compare {
        /// Bytes read so far
        done: usize,
        /// Length of the target range
        len: usize,
    },
    /// A sector's action has been decided
    Planned {
        /// Sector index
        sector: usize,
        /// Chosen action
        action: SectorAction,
    },
    /// A sector erase completed
    Erased {
        /// Sector index
        sector: usize,
        /// 1-based position among this write's erases
        index: usize,
        /// Number of erases planned
        count: usize,
    },
    /// A page program completed
    Programmed {
        /// Page address
        addr: u32,
        /// 1-based position among this write's page programs
        index: usize,
        /// Number of page programs planned
        count: usize,
    },
}

/// Outcome of a write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Bytes in the range that differed before the write
    pub bytes_changed: usize,
    /// Sectors the range overlaps
    pub sectors_touched: usize,
    /// Sectors erased
    pub sectors_erased: usize,
    /// Page programs issued
    pub pages_programmed: usize,
    /// Pages in the range that were already correct, plus pages of erased
    /// sectors that stay blank
    pub pages_skipped: usize,
    /// Bytes outside the range restored after an erase
    pub bytes_preserved: usize,
    /// Busy polls spent waiting for write cycles
    pub polls: u64,
}

impl WriteReport {
    /// Returns true if the flash was erased or programmed
    pub fn modified(&self) -> bool {
        self.sectors_erased > 0 || self.pages_programmed > 0
    }

    /// Sectors whose existing contents were reused without an erase
    pub fn sectors_reused(&self) -> usize {
        self.sectors_touched - self.sectors_erased
    }
}

/// Receiver of write events
pub trait WriteProgress {
    /// Called for every step of the write
    fn event(&mut self, event: WriteEvent);

    /// Called once the write has finished successfully
    fn complete(&mut self, _report: &WriteReport) {}
}

/// Discards all events
pub struct NoProgress;

impl WriteProgress for NoProgress {
    fn event(&mut self, _event: WriteEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts() {
        let report = WriteReport {
            sectors_touched: 3,
            sectors_erased: 1,
            ..WriteReport::default()
        };
        assert!(report.modified());
        assert_eq!(report.sectors_reused(), 2);

        let idle = WriteReport {
            sectors_touched: 2,
            pages_skipped: 8,
            ..WriteReport::default()
        };
        assert!(!idle.modified());
        assert_eq!(idle.sectors_reused(), 2);
    }
}
