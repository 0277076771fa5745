//! Transfer progress on stderr
//!
//! One spinner line for the current phase or path, above a file bar and a
//! byte bar. Engines share the reporter by reference across rayon workers;
//! indicatif bars are internally synchronized.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const FILES_TEMPLATE: &str = "{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%)";
const BYTES_TEMPLATE: &str =
    "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})";

/// Widest path shown on the status line, in characters
const PATH_WIDTH: usize = 60;

/// Spinner plus file and byte bars for backup and restore
pub struct ProgressReporter {
    status: ProgressBar,
    files: ProgressBar,
    bytes: ProgressBar,
}

impl ProgressReporter {
    /// Draw to stderr
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Track progress without drawing anything
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        status.enable_steady_tick(Duration::from_millis(120));

        let files = multi.add(bar(FILES_TEMPLATE, "Files"));
        let bytes = multi.add(bar(BYTES_TEMPLATE, "Data "));

        Self { status, files, bytes }
    }

    /// Set the number of manifest paths the run will handle
    pub fn set_total_files(&self, total: u64) {
        self.files.set_length(total);
    }

    /// Set the number of content bytes the run will move
    pub fn set_total_bytes(&self, total: u64) {
        self.bytes.set_length(total);
    }

    pub fn increment_files(&self, count: u64) {
        self.files.inc(count);
    }

    pub fn increment_bytes(&self, bytes: u64) {
        self.bytes.inc(bytes);
    }

    /// Show the current phase
    pub fn set_status(&self, msg: &str) {
        self.status.set_message(msg.to_string());
    }

    /// Show the path being transferred, keeping its tail when it is long
    pub fn set_current_file(&self, path: &str) {
        self.status.set_message(shorten_path(path, PATH_WIDTH));
    }

    pub fn finish_success(&self, message: &str) {
        self.status.finish_with_message(format!("✓ {}", message));
        self.files.finish();
        self.bytes.finish();
    }

    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        self.files.abandon();
        self.bytes.abandon();
    }
}

fn bar(template: &str, prefix: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_prefix(prefix);
    bar
}

/// Keep the last `width - 3` characters behind an ellipsis
fn shorten_path(path: &str, width: usize) -> String {
    let chars = path.chars().count();
    if chars <= width {
        return path.to_string();
    }
    let tail: String = path.chars().skip(chars - (width - 3)).collect();
    format!("...{}", tail)
}
