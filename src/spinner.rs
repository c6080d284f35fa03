//! Progress indicator for `appbuilder run`
//!
//! Ticks on stderr between sending the run request and the first answer
//! fragment, then clears itself so streamed text starts on a clean line.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(80);

pub struct AnswerSpinner {
    bar: Option<ProgressBar>,
}

impl AnswerSpinner {
    /// Start ticking right away while the run is pending
    pub fn waiting(msg: &str) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("  {spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
        bar.set_style(style);
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(TICK);
        Self { bar: Some(bar) }
    }

    /// The first answer arrived (or the run ended). No-op after the first call.
    pub fn answered(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Drop for AnswerSpinner {
    fn drop(&mut self) {
        self.answered();
    }
}
