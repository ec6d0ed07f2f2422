use crate::storage::UpsertResult;
use crate::ui::theme;
use crate::ui::Icons;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

/// Record-count progress bar for `ingest`; hidden when stdout is not a terminal
pub struct IngestProgress {
    bar: ProgressBar,
}

impl IngestProgress {
    pub fn new(total_records: usize) -> Self {
        let bar = if console::Term::stdout().is_term() {
            ProgressBar::new(total_records as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} records {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    pub fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    /// Advance by one applied batch
    pub fn inc_batch(&self, records: usize) {
        self.bar.inc(records as u64);
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }

    pub fn finish_with_summary(&self, duration: Duration, records: usize, result: &UpsertResult) {
        self.bar.finish_and_clear();
        println!(
            "{} {}",
            Icons::CHECK.style(theme().success.clone()),
            format!("Complete in {}", HumanDuration(duration)).style(theme().success.clone())
        );
        println!(
            "  {} {}  {} {}  {} {}",
            Icons::FILE.style(theme().info.clone()),
            records,
            Icons::NEW.style(theme().info.clone()),
            result.inserted,
            Icons::MOD.style(theme().info.clone()),
            result.updated
        );
    }
}
