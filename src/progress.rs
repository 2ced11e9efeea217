use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::copier::TransferOutcome;

const MIB: f64 = 1024.0 * 1024.0;

/// Totals for a whole run, merged from every [`TransferOutcome`] at the
/// join barrier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopySummary {
    pub objects: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks never started because the run was cancelled.
    pub skipped: usize,
    pub bytes_transferred: i64,
    pub elapsed: Duration,
}

impl CopySummary {
    pub fn new(objects: usize) -> Self {
        Self {
            objects,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &TransferOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
            self.bytes_transferred += outcome.bytes_transferred;
        } else {
            self.failed += 1;
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Average rate in MiB per second over the whole run.
    pub fn throughput_mib_s(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / MIB / seconds
    }
}

/// Byte progress shown during verbose runs. Hidden otherwise.
#[derive(Clone)]
pub struct CopyProgress {
    bar: ProgressBar,
}

impl CopyProgress {
    pub fn new(total_bytes: i64, visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(total_bytes.max(0) as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {binary_bytes_per_sec} ETA: {eta} {msg}",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar }
    }

    /// Print above the bar without tearing it.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.bar.is_hidden() {
            println!("{}", line.as_ref());
        } else {
            self.bar.println(line);
        }
    }

    pub fn object_done(&self, outcome: &TransferOutcome, finished: usize, total: usize) {
        self.bar.inc(outcome.task.expected_size.max(0) as u64);
        self.bar.set_message(format!("{}/{} objects", finished, total));
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}
