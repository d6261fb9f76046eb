//! Read command implementation

use super::{byte_bar, check_range, log_stats, write_file, Flash, CHUNK_SIZE};
use crate::error::Result;
use qflash_core::chip::FLASH_SIZE;
use std::path::Path;

/// Run the read command
pub fn run_read(flash: &mut Flash, output: &Path, start: u32, length: Option<u32>) -> Result<()> {
    let len = match length {
        Some(len) => len as usize,
        None => FLASH_SIZE.saturating_sub(start as usize),
    };
    check_range(start, len)?;

    let data = read_with_progress(flash, start, len)?;
    write_file(output, &data)?;
    log_stats(flash);

    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

/// Read a range with a progress bar
pub(crate) fn read_with_progress(flash: &mut Flash, start: u32, len: usize) -> Result<Vec<u8>> {
    let mut data = vec![0u8; len];
    let pb = byte_bar(len);

    let mut offset = 0usize;
    for chunk in data.chunks_mut(CHUNK_SIZE) {
        flash.read(start + offset as u32, chunk)?;
        offset += chunk.len();
        pb.set_position(offset as u64);
    }

    pb.finish_with_message("Read complete");
    Ok(data)
}
