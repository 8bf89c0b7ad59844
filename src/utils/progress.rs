use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Terminal progress indicator. Hidden when stderr is not a terminal so
/// piped output stays clean.
pub struct Progress {
    bar: Option<ProgressBar>,
}

fn interactive() -> bool {
    std::io::stderr().is_terminal()
}

impl Progress {
    #[must_use]
    pub fn spinner(message: &str) -> Self {
        if !interactive() {
            return Self { bar: None };
        }
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        Self { bar: Some(bar) }
    }

    /// Percentage bar for long polls.
    #[must_use]
    pub fn percent(message: &str) -> Self {
        if !interactive() {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(100);
        bar.enable_steady_tick(Duration::from_millis(250));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {wide_bar:.cyan/blue} {pos:>3}% {elapsed} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(message.to_string());
        Self { bar: Some(bar) }
    }

    pub fn set_message(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.to_string());
        }
    }

    pub fn set_percent(&self, percent: u8) {
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(percent.min(100)));
        }
    }

    pub fn finish_ok(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }

    pub fn finish_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn finish_err(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.abandon_with_message(message.to_string());
        }
    }
}
