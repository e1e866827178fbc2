//! Progress bar for backup operations using indicatif.
//!
//! The backup runs on a worker thread and reports through an mpsc
//! channel; the calling thread drains the channel into the bar.

use std::io::IsTerminal;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use fullbackup_core::{BackupEvent, BackupPhase};
use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}";
const COUNTER_TEMPLATE: &str = "{spinner:.green} {msg} {pos} frames";

/// Progress display for one export, import or verification.
pub struct BackupProgress {
    bar: ProgressBar,
}

impl BackupProgress {
    /// Create a display; hidden when `visible` is false or stderr is not a terminal.
    pub fn new(message: &str, visible: bool) -> Self {
        let bar = if visible && std::io::stderr().is_terminal() {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(style(COUNTER_TEMPLATE));
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn update(&self, event: BackupEvent) {
        if event.phase == BackupPhase::Finished {
            self.bar.finish_and_clear();
            return;
        }
        if event.estimated_total > 0 && self.bar.length() != Some(event.estimated_total) {
            self.bar.set_style(style(BAR_TEMPLATE));
            self.bar.set_length(event.estimated_total);
        }
        self.bar.set_position(event.count);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Run `work` on a worker thread, showing its progress events until it returns.
pub fn run_with_progress<T, F>(message: &str, visible: bool, work: F) -> anyhow::Result<T>
where
    F: FnOnce(Sender<BackupEvent>) -> T + Send,
    T: Send,
{
    let progress = BackupProgress::new(message, visible);
    let (tx, rx) = mpsc::channel();

    let result = thread::scope(|scope| {
        let worker = scope.spawn(move || work(tx));
        // Ends once the worker drops its sender.
        for event in rx {
            progress.update(event);
        }
        worker.join()
    });
    progress.finish();

    result.map_err(|_| anyhow::anyhow!("{} failed: worker thread panicked", message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fullbackup_core::ProgressListener;

    #[test]
    fn test_worker_result_is_returned() {
        let value = run_with_progress("Testing", false, |tx| {
            tx.on_event(BackupEvent::new(BackupPhase::Exporting, 1, 2));
            tx.on_event(BackupEvent::new(BackupPhase::Finished, 2, 2));
            42
        })
        .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_worker_panic_becomes_error() {
        let result: anyhow::Result<()> = run_with_progress("Testing", false, |_tx| {
            panic!("boom");
        });
        assert!(result.unwrap_err().to_string().contains("panicked"));
    }

    #[test]
    fn test_bar_takes_length_from_estimate() {
        let progress = BackupProgress::new("Exporting", false);
        progress.update(BackupEvent::new(BackupPhase::Exporting, 3, 10));
        assert_eq!(progress.bar.length(), Some(10));
        assert_eq!(progress.bar.position(), 3);
    }
}
