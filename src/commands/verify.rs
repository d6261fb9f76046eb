//! Verify command implementation

use super::{byte_bar, check_range, log_stats, read_file, Flash, CHUNK_SIZE};
use crate::error::Result;
use std::path::Path;

/// Run the verify command
pub fn run_verify(flash: &mut Flash, input: &Path, start: u32) -> Result<()> {
    let expected = read_file(input)?;
    println!("Read {} bytes from {:?}", expected.len(), input);
    check_range(start, expected.len())?;

    let pb = byte_bar(expected.len());
    let mut offset = 0usize;
    for chunk in expected.chunks(CHUNK_SIZE) {
        if let Err(e) = flash.verify(start + offset as u32, chunk) {
            pb.abandon_with_message("Verification failed");
            return Err(e.into());
        }
        offset += chunk.len();
        pb.set_position(offset as u64);
    }
    pb.finish_with_message("Verification passed");
    log_stats(flash);

    println!("Verification passed");
    Ok(())
}
