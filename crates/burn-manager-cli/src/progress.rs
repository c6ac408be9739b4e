use burn_manager_core::{ProgressReporter, ResultCode};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Spinner while folders are walked, bar while checksums are computed.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICKS));
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn checksum_bar() -> ProgressBar {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.cyan} Checksums [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
        ) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICKS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_operation_start(&self, name: &str) {
        match name {
            "checksum" => self.set_bar(Self::checksum_bar()),
            _ => self.set_bar(Self::spinner("Scanning folders...")),
        }
    }

    fn on_operation_finish(&self, name: &str, code: ResultCode) {
        self.finish_bar();
        let mark = if code.is_success() {
            "✓".green()
        } else {
            "!".yellow()
        };
        eprintln!("  {} {} {}", mark, name, code);
    }

    fn on_ingest_progress(&self, files_found: usize, current_dir: &str) {
        self.with_bar(|pb| pb.set_message(format!("{} files found, in {}", files_found, current_dir)));
    }

    fn on_checksum_progress(&self, files_done: usize, files_queued: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(files_queued as u64) {
                pb.set_length(files_queued as u64);
            }
            pb.set_position(files_done as u64);
        });
    }
}
