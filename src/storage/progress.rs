//! Progress reporting for long scans (opening a dataset, finishing).

/// Receives progress of a long-running operation.
pub trait ProgressReporter: Send + Sync {
    /// A new operation with `total` steps has started
    fn start(&self, operation: &str, total: usize);

    /// `done` of the announced steps are complete
    fn tick(&self, done: usize);

    /// The operation is over
    fn finish(&self) {}
}

/// Reports through the `log` facade at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn start(&self, operation: &str, total: usize) {
        log::debug!("{} ({} steps)", operation, total);
    }

    fn tick(&self, done: usize) {
        log::debug!("  step {}", done);
    }
}

/// Discards all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&self, _operation: &str, _total: usize) {}

    fn tick(&self, _done: usize) {}
}
