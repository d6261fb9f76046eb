//! Erase command implementation

use super::{check_range, log_stats, Flash};
use crate::error::Result;
use indicatif::{ProgressBar, ProgressStyle};
use qflash_core::chip::{SECTOR_SIZE, SUBSECTOR_SIZE};
use qflash_driver::plan;
use std::time::Duration;

/// Run the erase command
///
/// Without a range the whole array is erased with a single bulk erase.
pub fn run_erase(flash: &mut Flash, range: Option<(u32, u32)>, subsector: bool) -> Result<()> {
    let Some((start, length)) = range else {
        let pb = spinner("Erasing entire flash...".to_string());
        let result = flash.bulk_erase();
        pb.finish_and_clear();
        result?;
        log_stats(flash);
        println!("Erase complete");
        return Ok(());
    };

    check_range(start, length as usize)?;
    let block = if subsector { SUBSECTOR_SIZE } else { SECTOR_SIZE };
    let blocks: Vec<u32> = plan::split(start, length as usize, block)
        .map(|span| span.addr)
        .collect();

    let pb = spinner(format!(
        "Erasing {} blocks of {} KiB...",
        blocks.len(),
        block / 1024
    ));
    for (i, addr) in blocks.iter().enumerate() {
        let result = if subsector {
            flash.erase_subsector(*addr)
        } else {
            flash.erase_sector(*addr)
        };
        if let Err(e) = result {
            pb.abandon_with_message(format!("Erase failed at 0x{:06X}", addr));
            return Err(e.into());
        }
        pb.set_message(format!("Erased {} blocks...", i + 1));
    }
    pb.finish_with_message("Erase complete");
    log_stats(flash);

    println!("Erased {} blocks", blocks.len());
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
