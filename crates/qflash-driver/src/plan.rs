//! Erase and program planning
//!
//! Flash programming can only clear bits. These helpers compare current and
//! desired contents to decide whether a sector must be erased and which
//! pages actually need programming.

use core::ops::Range;

use qflash_core::chip::{self, ERASED, PAGE_SIZE, SECTOR_SIZE};

/// Determine if an erase is required to go from `have` to `want`
///
/// Programming ANDs the new data into the array, so the transition is only
/// possible without an erase when no bit has to go from 0 back to 1.
pub fn need_erase(have: &[u8], want: &[u8]) -> bool {
    debug_assert_eq!(have.len(), want.len());
    have.iter().zip(want).any(|(h, w)| h & w != *w)
}

/// Returns true if any byte differs
#[inline]
pub fn need_write(have: &[u8], want: &[u8]) -> bool {
    have != want
}

/// Returns true if programming `data` would leave the array unchanged
#[inline]
pub fn is_erased(data: &[u8]) -> bool {
    data.iter().all(|&b| b == ERASED)
}

/// Part of a flash range that falls into one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Flash address of the first byte
    pub addr: u32,
    /// Indices into the caller's buffer
    pub range: Range<usize>,
}

/// Split `len` bytes at `addr` into pieces that do not cross a `block`
/// boundary
pub fn split(addr: u32, len: usize, block: usize) -> impl Iterator<Item = Span> {
    let mut offset = 0usize;
    core::iter::from_fn(move || {
        if offset >= len {
            return None;
        }
        let start = addr as usize + offset;
        let room = block - start % block;
        let n = core::cmp::min(room, len - offset);
        let span = Span {
            addr: start as u32,
            range: offset..offset + n,
        };
        offset += n;
        Some(span)
    })
}

/// Split a range at page boundaries
pub fn pages(addr: u32, len: usize) -> impl Iterator<Item = Span> {
    split(addr, len, PAGE_SIZE)
}

/// Split a range at sector boundaries
pub fn sectors(addr: u32, len: usize) -> impl Iterator<Item = Span> {
    split(addr, len, SECTOR_SIZE)
}

/// Offset of `addr` inside its sector
pub fn sector_offset(addr: u32) -> usize {
    (addr - chip::sector_base(addr)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn erase_only_for_zero_to_one() {
        assert!(!need_erase(&[0xFF, 0xFF], &[0x12, 0x34]));
        assert!(!need_erase(&[0xF0], &[0x00]));
        assert!(!need_erase(&[0x11], &[0x11]));
        assert!(need_erase(&[0x00], &[0x01]));
        assert!(need_erase(&[0xFF, 0x0F], &[0xFF, 0xF0]));
    }

    #[test]
    fn write_only_on_change() {
        assert!(!need_write(&[1, 2, 3], &[1, 2, 3]));
        assert!(need_write(&[1, 2, 3], &[1, 2, 4]));
        assert!(is_erased(&[0xFF; 16]));
        assert!(!is_erased(&[0xFF, 0xFE]));
    }

    #[test]
    fn page_spans() {
        let spans: Vec<Span> = pages(0x1F0, 0x120).collect();
        assert_eq!(
            spans,
            [
                Span {
                    addr: 0x1F0,
                    range: 0..0x10
                },
                Span {
                    addr: 0x200,
                    range: 0x10..0x110
                },
                Span {
                    addr: 0x300,
                    range: 0x110..0x120
                },
            ]
        );
        assert_eq!(pages(0x100, 0).count(), 0);
    }

    #[test]
    fn sector_spans() {
        let spans: Vec<Span> = sectors(0xFFF0, 0x20).collect();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].addr, 0x1_0000);
        assert_eq!(sector_offset(0x1_0010), 0x10);
    }
}
