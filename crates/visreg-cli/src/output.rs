//! Terminal output for the visreg commands.
//!
//! Human-readable lines go to stderr so stdout stays clean for `--format json`.
//! Each line starts with a status tag: a coloured glyph on a terminal, or a
//! fixed four-letter word (`PASS`, `FAIL`, `WARN`, `INFO`) when colour is off,
//! which keeps the text greppable in CI logs.

use console::{style, StyledObject, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;

/// Where command results are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Status lines on stderr
    #[default]
    Text,
    /// One JSON document on stdout
    Json,
}

/// Kind of status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pass,
    Fail,
    Warn,
    Info,
}

impl Status {
    const fn word(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Warn => "WARN",
            Self::Info => "INFO",
        }
    }

    fn glyph(self) -> StyledObject<&'static str> {
        match self {
            Self::Pass => style("✓").green(),
            Self::Fail => style("✗").red(),
            Self::Warn => style("⚠").yellow(),
            Self::Info => style("ℹ").blue(),
        }
        .bold()
    }

    /// Failures are shown even when quiet
    const fn shown_when_quiet(self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Writes status lines and the verification progress bar
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    bar: Option<ProgressBar>,
    color: bool,
    quiet: bool,
}

impl ProgressReporter {
    /// Reporter on stderr. `quiet` suppresses everything but failures.
    #[must_use]
    pub fn new(color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            bar: None,
            color,
            quiet,
        }
    }

    /// Show a bar over `total` snapshots; no-op when quiet or empty
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet || total == 0 {
            return;
        }
        let bar = ProgressBar::new(total).with_message(message.to_string());
        if let Ok(bar_style) = ProgressStyle::with_template("{spinner} {pos}/{len} {wide_msg}") {
            bar.set_style(bar_style);
        }
        self.bar = Some(bar);
    }

    /// Advance the bar
    pub fn increment(&self, delta: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(delta);
        }
    }

    /// Name the snapshot being processed
    pub fn set_message(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.to_string());
        }
    }

    /// Remove the bar from the terminal
    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    /// `PASS` line
    pub fn success(&self, message: &str) {
        self.status(Status::Pass, message);
    }

    /// `FAIL` line, printed even when quiet
    pub fn failure(&self, message: &str) {
        self.status(Status::Fail, message);
    }

    /// `WARN` line
    pub fn warning(&self, message: &str) {
        self.status(Status::Warn, message);
    }

    /// `INFO` line
    pub fn info(&self, message: &str) {
        self.status(Status::Info, message);
    }

    /// Blank line then a section title
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }
        let title = if self.color {
            style(title).bold().underlined().to_string()
        } else {
            format!("== {title}")
        };
        self.write("");
        self.write(&title);
    }

    /// Closing line of `visreg verify`, printed when quiet only if something failed
    pub fn summary(&self, passed: usize, failed: usize, errors: usize, duration: Duration) {
        let clean = failed == 0 && errors == 0;
        if self.quiet && clean {
            return;
        }
        let verdict = match (clean, self.color) {
            (true, true) => style("PASSED").green().bold().to_string(),
            (false, true) => style("FAILED").red().bold().to_string(),
            (true, false) => "PASSED".to_string(),
            (false, false) => "FAILED".to_string(),
        };
        self.write("");
        self.write(&format!(
            "{verdict} {}",
            summary_counts(passed, failed, errors, duration)
        ));
    }

    fn status(&self, status: Status, message: &str) {
        if self.quiet && !status.shown_when_quiet() {
            return;
        }
        let tag = if self.color {
            status.glyph().to_string()
        } else {
            status.word().to_string()
        };
        self.write(&format!("{tag} {message}"));
    }

    fn write(&self, line: &str) {
        let print = || {
            let _ = self.term.write_line(line);
        };
        match &self.bar {
            Some(bar) => bar.suspend(print),
            None => print(),
        }
    }
}

fn summary_counts(passed: usize, failed: usize, errors: usize, duration: Duration) -> String {
    format!(
        "{} snapshots in {:.2}s: {passed} passed, {failed} failed, {errors} errors",
        passed + failed + errors,
        duration.as_secs_f64()
    )
}

/// Write `value` to stdout as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_status_words() {
        let words: Vec<_> = [Status::Pass, Status::Fail, Status::Warn, Status::Info]
            .into_iter()
            .map(Status::word)
            .collect();
        assert_eq!(words, ["PASS", "FAIL", "WARN", "INFO"]);
    }

    #[test]
    fn test_only_failures_survive_quiet() {
        assert!(Status::Fail.shown_when_quiet());
        assert!(!Status::Pass.shown_when_quiet());
        assert!(!Status::Warn.shown_when_quiet());
    }

    #[test]
    fn test_summary_counts() {
        assert_eq!(
            summary_counts(8, 1, 1, Duration::from_millis(1500)),
            "10 snapshots in 1.50s: 8 passed, 1 failed, 1 errors"
        );
    }

    #[test]
    fn test_bar_lifecycle() {
        let mut reporter = ProgressReporter::new(false, false);
        reporter.start_progress(2, "verifying");
        assert!(reporter.bar.is_some());
        reporter.set_message("chromium/home/hero");
        reporter.success("chromium/home/hero");
        reporter.increment(1);
        reporter.finish();
        assert!(reporter.bar.is_none());
    }

    #[test]
    fn test_no_bar_when_quiet_or_empty() {
        let mut quiet = ProgressReporter::new(true, true);
        quiet.start_progress(3, "verifying");
        assert!(quiet.bar.is_none());
        quiet.failure("chromium/home/hero: 4 pixels differ");
        quiet.summary(0, 1, 0, Duration::ZERO);

        let mut empty = ProgressReporter::new(false, false);
        empty.start_progress(0, "verifying");
        assert!(empty.bar.is_none());
        empty.header("Baselines");
    }
}
