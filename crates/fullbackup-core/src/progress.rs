//! Progress reporting and cancellation for long-running backup operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::error::{BackupError, Result};

/// Which stage of a backup operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupPhase {
    Exporting,
    Verifying,
    Importing,
    Finished,
}

/// A progress update.
///
/// `estimated_total` is zero when no estimate is available, as during import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupEvent {
    pub phase: BackupPhase,
    pub count: u64,
    pub estimated_total: u64,
}

impl BackupEvent {
    pub fn new(phase: BackupPhase, count: u64, estimated_total: u64) -> Self {
        Self {
            phase,
            count,
            estimated_total,
        }
    }

    /// Percentage complete.
    ///
    /// The estimate is only a hint, so this stays below 100 until the
    /// operation reports [`BackupPhase::Finished`].
    pub fn completion_percent(&self) -> f64 {
        if self.phase == BackupPhase::Finished {
            return 100.0;
        }
        if self.estimated_total == 0 {
            return 0.0;
        }
        let percent = 100.0 * self.count as f64 / self.estimated_total as f64;
        percent.min(99.9)
    }
}

/// Receives progress events from an export, import or verification.
pub trait ProgressListener {
    fn on_event(&self, event: BackupEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(BackupEvent),
{
    fn on_event(&self, event: BackupEvent) {
        self(event)
    }
}

/// Forwards events to another thread; a hung-up receiver is ignored.
impl ProgressListener for Sender<BackupEvent> {
    fn on_event(&self, event: BackupEvent) {
        let _ = self.send(event);
    }
}

/// Listener that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_event(&self, _event: BackupEvent) {}
}

/// Polled between units of work; returning `true` stops the operation.
pub trait CancellationSignal {
    fn is_cancelled(&self) -> bool;
}

impl<F> CancellationSignal for F
where
    F: Fn() -> bool,
{
    fn is_cancelled(&self) -> bool {
        self()
    }
}

impl CancellationSignal for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

impl CancellationSignal for Arc<AtomicBool> {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Signal that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationSignal for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

pub(crate) fn check_cancelled(signal: &dyn CancellationSignal) -> Result<()> {
    if signal.is_cancelled() {
        return Err(BackupError::Cancelled);
    }
    Ok(())
}
