//! Terminal status output: an animated spinner line on a TTY, plain lines on
//! change otherwise.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    fn spinner(&self, template: &str) -> Option<ProgressBar> {
        if !self.pretty() {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        Some(spinner)
    }

    /// A long-lived line showing the loop status and latest summary.
    pub fn status_line(&self) -> StatusLine {
        StatusLine {
            spinner: self.spinner("{spinner} {msg}"),
            last: None,
        }
    }

    /// A timed step of a one-shot command.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.spinner("{spinner} {msg}");
        match &spinner {
            Some(spinner) => spinner.set_message(format!("{name}…")),
            None => eprintln!("==> {}", name),
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }
}

pub struct StatusLine {
    spinner: Option<ProgressBar>,
    last: Option<String>,
}

impl StatusLine {
    /// Show `status | summary`. Plain output only prints when it changes.
    pub fn update(&mut self, status: &str, summary: &str) {
        let line = compose(status, summary);
        if self.last.as_deref() == Some(line.as_str()) {
            return;
        }
        match &self.spinner {
            Some(spinner) => spinner.set_message(line.clone()),
            None => eprintln!("{line}"),
        }
        self.last = Some(line);
    }

    pub fn finish(self, message: &str) {
        match self.spinner {
            Some(spinner) => spinner.finish_with_message(message.to_string()),
            None => eprintln!("{message}"),
        }
    }
}

fn compose(status: &str, summary: &str) -> String {
    if summary.is_empty() {
        status.to_string()
    } else {
        format!("{status} | {summary}")
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_never_spins() {
        assert!(!Ui::new(UiMode::Plain, true).pretty());
        assert!(!Ui::new(UiMode::Pretty, false).pretty());
        assert!(Ui::new(UiMode::Auto, true).pretty());
    }

    #[test]
    fn status_and_summary_join() {
        assert_eq!(compose("Camera ready", ""), "Camera ready");
        assert_eq!(
            compose("Detected 1 objects", "Detected 1 objects: 1 cup"),
            "Detected 1 objects | Detected 1 objects: 1 cup"
        );
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
