//! Progress bar and summary reporting for CLI downloads.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::{
    DownloadJob, DownloadProgress, FailedRange, JobReport, ProgressSnapshot, SessionStats,
    format_bytes, format_duration, format_speed,
};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates a progress bar for a single file download.
pub fn make_progress_bar(size: u64, name: &str) -> ProgressBar {
    let bar = ProgressBar::new(size);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) - {msg}",
        )
        .expect("progress template is valid")
        .progress_chars("━━╌"),
    );
    bar.set_message(name.to_string());
    bar
}

/// One progress bar per running job, driven by aggregator snapshots.
pub struct BarProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BarProgress {
    /// Creates bars drawn on stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Removes every bar from the terminal.
    pub fn clear(&self) {
        self.multi.clear().ok();
    }

    fn bar(&self, name: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.get(name).cloned()
    }

    fn take_bar(&self, name: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(name)
    }
}

impl DownloadProgress for BarProgress {
    fn on_job_start(&self, job: &DownloadJob) {
        let name = job.name();
        let bar = self.multi.add(make_progress_bar(job.total_size(), &name));
        bar.enable_steady_tick(Duration::from_millis(250));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(name, bar);
        }
    }

    fn on_progress(&self, name: &str, snapshot: &ProgressSnapshot) {
        if let Some(bar) = self.bar(name) {
            bar.set_position(snapshot.downloaded);
            let speed = format_speed(snapshot.speed()).unwrap_or_default();
            bar.set_message(format!("{name} @ {speed}"));
        }
    }

    fn on_sub_block_failed(&self, name: &str, failure: &FailedRange) {
        self.multi
            .println(format!(
                "  {name}: gave up on bytes {}-{} after {} attempts ({})",
                failure.start, failure.end, failure.attempts, failure.error
            ))
            .ok();
    }

    fn on_job_complete(&self, name: &str, report: &JobReport) {
        if let Some(bar) = self.take_bar(name) {
            bar.finish_and_clear();
        }
        let status = if report.is_complete() {
            String::new()
        } else {
            format!(", {} failed range(s)", report.failed.len())
        };
        self.multi
            .println(format!(
                "  {name} - {} in {} ({}/s avg, {}/s peak{status})",
                format_bytes(report.total_size),
                format_duration(report.elapsed),
                format_bytes(report.average_speed()),
                format_bytes(report.peak_speed),
            ))
            .ok();
    }

    fn on_error(&self, name: &str, error: &str) {
        if let Some(bar) = self.take_bar(name) {
            bar.abandon();
        }
        self.multi.println(format!("  {name}: {error}")).ok();
    }
}

/// Prints a summary of download statistics.
pub fn print_summary(stats: &SessionStats) {
    let finished = stats.files_completed + stats.files_incomplete;
    if finished == 0 && stats.files_failed == 0 && stats.files_cancelled == 0 {
        return;
    }

    println!("\n{SEPARATOR}");
    println!("Download Summary");
    println!("{SEPARATOR}");

    if finished > 0 {
        println!("  Files downloaded:  {}", stats.files_completed);
        println!("  Total size:        {}", format_bytes(stats.total_bytes));
        println!("  Transferred:       {}", format_bytes(stats.transferred_bytes));
        println!("  Total time:        {}", format_duration(stats.elapsed));
        println!(
            "  Average speed:     {}/s",
            format_bytes(stats.average_speed())
        );
        println!("  Peak speed:        {}/s", format_bytes(stats.peak_speed));
    }

    if stats.files_incomplete > 0 {
        println!(
            "  Incomplete files:  {} (some ranges failed, see log)",
            stats.files_incomplete
        );
    }
    if stats.files_failed > 0 {
        println!("  Failed files:      {}", stats.files_failed);
    }
    if stats.files_cancelled > 0 {
        println!("  Cancelled files:   {}", stats.files_cancelled);
    }

    println!("{SEPARATOR}");
}
