//! Terminal UI for the non-streaming CLI workflow, rendered via
//! `indicatif` progress bars.
//!
//! Two bars are stacked vertically:
//! - Stage bar — tracks how many pipeline stages have completed
//! - Status spinner — live message for the stage in flight

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct PipelineUi {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    status_bar: ProgressBar,
}

impl PipelineUi {
    /// Create the UI with `total_stages` steps on the stage bar.
    pub fn new(total_stages: u64) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let stage_bar = multi.add(ProgressBar::new(total_stages));
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stages");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("Status");
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            stage_bar,
            status_bar,
        }
    }

    /// Print a line above the bars, falling back to `eprintln!` if the
    /// rich UI is unavailable.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// A new stage has started: advance the stage bar past the previous
    /// one and show the new status message.
    pub fn start_stage(&self, message: &str) {
        if self.stage_bar.position() < self.stage_bar.length().unwrap_or(0) {
            self.stage_bar.inc(1);
        }
        self.status_bar.set_message(message.to_string());
    }

    pub fn heartbeat(&self) {
        self.status_bar.tick();
    }

    pub fn finish(&self, message: &str) {
        self.stage_bar
            .finish_with_message(style("done").green().to_string());
        self.status_bar.finish_with_message(message.to_string());
    }

    pub fn fail(&self, message: &str) {
        self.stage_bar.abandon();
        self.status_bar
            .finish_with_message(style(message).red().to_string());
    }
}
