use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Stderr progress for the command line tools. Stdout stays reserved for
/// results so it can be piped.
#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    fn pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    fn spinner(&self, message: String) -> Option<ProgressBar> {
        if !self.pretty() {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message);
        Some(spinner)
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.spinner(format!("{name}…"));
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// Running frame/event counter for a replay.
    pub fn frames(&self, source: &str) -> FrameProgress {
        let spinner = self.spinner(format!("{source}: starting"));
        if spinner.is_none() {
            eprintln!("==> Process {}", source);
        }
        FrameProgress {
            source: source.to_string(),
            start: Instant::now(),
            spinner,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct FrameProgress {
    source: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl FrameProgress {
    pub fn update(&self, frames: u64, events: u64) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "{}: {} frame(s), {} event(s)",
                self.source, frames, events
            ));
        }
    }

    pub fn finish(self, frames: u64, events: u64) {
        let message = format!(
            "✔ {}: {} frame(s), {} event(s) ({})",
            self.source,
            frames,
            events,
            format_duration(self.start.elapsed())
        );
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
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
