//! Progress UI (byte bar) for download runs.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use repofetch_core::ProgressEvent;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Spawns the progress UI when requested.
///
/// Returns the sender to hand to the download and the UI task handle. The
/// task ends once every sender clone is dropped.
pub(crate) fn spawn_progress_ui(
    enabled: bool,
) -> (
    Option<UnboundedSender<ProgressEvent>>,
    Option<tokio::task::JoinHandle<()>>,
) {
    if !enabled {
        return (None, None);
    }
    let (tx, rx) = unbounded_channel();
    let handle = tokio::spawn(run_bar(rx));
    (Some(tx), Some(handle))
}

async fn run_bar(mut rx: UnboundedReceiver<ProgressEvent>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let mut totals = ByteTotals::default();
    while let Some(event) = rx.recv().await {
        totals.apply(&event);
        bar.set_length(totals.expected());
        bar.set_position(totals.downloaded());
        bar.set_message(event.path);
    }

    bar.finish_and_clear();
}

/// Latest byte counts per file.
#[derive(Debug, Default)]
struct ByteTotals {
    files: HashMap<String, (u64, Option<u64>)>,
}

impl ByteTotals {
    fn apply(&mut self, event: &ProgressEvent) {
        self.files
            .insert(event.path.clone(), (event.downloaded, event.total));
    }

    fn downloaded(&self) -> u64 {
        self.files.values().map(|(done, _)| *done).sum()
    }

    /// Known totals plus bytes seen for files of unknown size.
    fn expected(&self) -> u64 {
        self.files
            .values()
            .map(|(done, total)| total.unwrap_or(*done).max(*done))
            .sum()
    }
}
