//! Progress reporting and cooperative cancellation.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// One-way progress notification consumed by the host UI or CLI.
///
/// Implementations must never block: the pipeline calls this between tiles
/// and expects it to return immediately.
pub trait ProgressSink: Send + Sync {
    /// Report that `completed` of `total` tiles have been processed.
    fn on_progress(&self, completed: usize, total: usize);
}

/// Sink that discards all progress events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Terminal progress bar sink.
#[derive(Debug)]
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    /// Create a bar for the given tile count.
    pub fn new(total_tiles: usize) -> Self {
        let bar = ProgressBar::new(total_tiles as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tiles ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░ "),
        );
        Self { bar }
    }

    /// Finish the bar with a message.
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl ProgressSink for ProgressBarSink {
    fn on_progress(&self, completed: usize, _total: usize) {
        self.bar.set_position(completed as u64);
    }
}

/// Shared cancellation flag checked between tiles.
///
/// Cancellation is cooperative: in-flight tile work finishes, no new tile
/// is started afterwards.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel this token on Ctrl+C. Installation failure is logged, not
    /// fatal.
    pub fn install_ctrlc_handler(&self) {
        let flag = Arc::clone(&self.cancelled);
        if let Err(e) = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_null_progress_is_send_sync() {
        fn assert_sink<T: ProgressSink>() {}
        assert_sink::<NullProgress>();
        assert_sink::<ProgressBarSink>();
    }
}
