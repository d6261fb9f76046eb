//! Write command implementation

use super::{check_range, log_stats, read_file, Flash};
use crate::error::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use qflash_driver::{SectorAction, WriteEvent, WriteProgress, WriteReport};
use std::path::Path;

const COMPARE_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} compared";
const ERASE_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.yellow/red}] {pos}/{len} sectors erased {msg}";
const PROGRAM_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages programmed {msg}";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Compare,
    Erase,
    Program,
}

/// Shows each write phase as its own bar and prints the sector plan
struct WriteMonitor {
    multi: MultiProgress,
    bar: Option<(Phase, ProgressBar)>,
    kept: usize,
    in_place: usize,
    in_place_pages: usize,
    erased: usize,
    plan_shown: bool,
}

impl WriteMonitor {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bar: None,
            kept: 0,
            in_place: 0,
            in_place_pages: 0,
            erased: 0,
            plan_shown: false,
        }
    }

    /// Switch to `phase`, replacing the bar of the previous one
    fn enter(&mut self, phase: Phase, len: usize) {
        if matches!(&self.bar, Some((current, _)) if *current == phase) {
            return;
        }
        if let Some((_, pb)) = self.bar.take() {
            pb.finish();
        }
        let template = match phase {
            Phase::Compare => COMPARE_TEMPLATE,
            Phase::Erase => ERASE_TEMPLATE,
            Phase::Program => PROGRAM_TEMPLATE,
        };
        let pb = self.multi.add(ProgressBar::new(len as u64));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.bar = Some((phase, pb));
    }

    fn update(&self, pos: usize, message: Option<String>) {
        if let Some((_, pb)) = &self.bar {
            pb.set_position(pos as u64);
            if let Some(message) = message {
                pb.set_message(message);
            }
        }
    }

    fn show_plan(&mut self) {
        if self.plan_shown {
            return;
        }
        self.plan_shown = true;
        let _ = self.multi.println(format!(
            "Plan: {} sectors unchanged, {} programmed in place ({} pages), {} erased",
            self.kept, self.in_place, self.in_place_pages, self.erased
        ));
    }

    fn abandon(&mut self) {
        if let Some((_, pb)) = self.bar.take() {
            pb.abandon_with_message("failed");
        }
    }
}

impl WriteProgress for WriteMonitor {
    fn event(&mut self, event: WriteEvent) {
        match event {
            WriteEvent::Compare { done, len } => {
                self.enter(Phase::Compare, len);
                self.update(done, None);
            }
            WriteEvent::Planned { action, .. } => match action {
                SectorAction::Keep => self.kept += 1,
                SectorAction::Program { pages } => {
                    self.in_place += 1;
                    self.in_place_pages += pages;
                }
                SectorAction::Erase => self.erased += 1,
            },
            WriteEvent::Erased {
                sector,
                index,
                count,
            } => {
                self.show_plan();
                self.enter(Phase::Erase, count);
                self.update(index, Some(format!("(sector {})", sector)));
            }
            WriteEvent::Programmed { addr, index, count } => {
                self.show_plan();
                self.enter(Phase::Program, count);
                self.update(index, Some(format!("(0x{:06X})", addr)));
            }
        }
    }

    fn complete(&mut self, report: &WriteReport) {
        if let Some((_, pb)) = self.bar.take() {
            pb.finish_with_message("done");
        }

        if !report.modified() {
            println!("Flash already contains the desired data - no changes needed");
            return;
        }
        println!(
            "{} bytes changed: {} of {} sectors erased, {} reused",
            report.bytes_changed,
            report.sectors_erased,
            report.sectors_touched,
            report.sectors_reused()
        );
        println!(
            "{} pages programmed, {} skipped, {} bytes preserved, {} busy polls",
            report.pages_programmed, report.pages_skipped, report.bytes_preserved, report.polls
        );
    }
}

/// Run the write command
///
/// Returns true when the flash contents changed.
pub fn run_write(
    flash: &mut Flash,
    input: &Path,
    start: u32,
    verify: bool,
    preserve: bool,
) -> Result<bool> {
    let data = read_file(input)?;
    println!("Read {} bytes from {:?}", data.len(), input);
    check_range(start, data.len())?;

    let config = flash.config_mut();
    config.verify &= verify;
    config.preserve &= preserve;

    let mut monitor = WriteMonitor::new();
    let report = match flash.write_with_progress(start, &data, &mut monitor) {
        Ok(report) => report,
        Err(e) => {
            monitor.abandon();
            return Err(e.into());
        }
    };
    log_stats(flash);

    if flash.config().verify {
        println!("Verification passed");
    }
    Ok(report.modified())
}
