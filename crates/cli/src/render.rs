//! Terminal rendering of a progress segment.
//!
//! A background task polls the segment at a fixed interval and draws one bar
//! per task. The caller stops the poller, drains the segment and hands the
//! final records back for the last frame.

use extractor::progress::{Sampler, TaskView};
use extractor::{ProgressStore, Records, TaskState};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

const BAR_STYLE: &str = "{prefix:.bold} {bar:30.cyan/blue} {percent:>3}% {pos}/{len} {wide_msg}";

const BAR_CHARS: &str = "█▓▒░  ";

/// Status glyph for a task state.
pub fn glyph(state: TaskState) -> &'static str {
    match state {
        TaskState::Running => "⌛",
        TaskState::Success => "✅",
        TaskState::Warning => "⚠️",
        TaskState::Failed => "❌",
    }
}

/// One bar per task, fed from store snapshots.
pub struct Renderer {
    bars: MultiProgress,
    rows: HashMap<String, ProgressBar>,
    sampler: Sampler,
    style: ProgressStyle,
}

impl Renderer {
    pub fn new() -> Self {
        let style = match ProgressStyle::with_template(BAR_STYLE) {
            Ok(style) => style.progress_chars(BAR_CHARS),
            Err(_) => ProgressStyle::default_bar(),
        };
        Self {
            bars: MultiProgress::new(),
            rows: HashMap::new(),
            sampler: Sampler::new(),
            style,
        }
    }

    /// Redraw from a fresh snapshot.
    pub fn draw(&mut self, records: &Records) {
        for view in self.sampler.sample(records, Instant::now()) {
            let bar = self.rows.entry(view.name.clone()).or_insert_with(|| {
                let bar = self
                    .bars
                    .add(ProgressBar::new(view.record.total).with_style(self.style.clone()));
                bar.set_prefix(format!("{} {}", glyph(view.record.state), view.name));
                bar
            });
            bar.set_length(view.record.total);
            bar.set_position(view.record.completed);
            bar.set_prefix(format!("{} {}", glyph(view.record.state), view.name));
            bar.set_message(rate_message(&view));
        }
    }

    /// Draw the final records and leave the bars on screen.
    pub fn finish(mut self, records: &Records) {
        self.draw(records);
        for bar in self.rows.values() {
            bar.finish();
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

fn rate_message(view: &TaskView) -> String {
    match view.record.state {
        TaskState::Running => match view.eta {
            Some(eta) => format!("{:.1}/s ETA {}s", view.throughput, eta.as_secs()),
            None => String::new(),
        },
        TaskState::Success => "done".to_string(),
        TaskState::Warning => format!(
            "{} entries missing",
            view.record.total.saturating_sub(view.record.completed)
        ),
        TaskState::Failed => "failed".to_string(),
    }
}

/// Background poller of one segment.
pub struct RenderHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Renderer>,
}

/// Start drawing `store` every `every`.
pub fn spawn(store: Arc<ProgressStore>, every: Duration) -> RenderHandle {
    let (stop, mut stopped) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut renderer = Renderer::new();
        let mut ticks = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticks.tick() => match store.snapshot() {
                    Ok(records) => renderer.draw(&records),
                    Err(e) => debug!(error = %e, "skipping progress frame"),
                },
            }
        }
        renderer
    });
    RenderHandle { stop, task }
}

impl RenderHandle {
    /// Stop polling and release the segment handle.
    pub async fn stop(self) -> Renderer {
        let _ = self.stop.send(());
        match self.task.await {
            Ok(renderer) => renderer,
            Err(e) => {
                debug!(error = %e, "renderer task ended abnormally");
                Renderer::new()
            }
        }
    }
}
