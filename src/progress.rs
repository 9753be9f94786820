//! Progress reporting and cooperative cancellation.
//!
//! Every long-running step reports `(current, total, message)` to a
//! [`ProgressSink`]. The sink's return value doubles as the cancellation
//! signal: `false` means "stop". Steps check the signal after every report,
//! so cancellation latency is bounded by the reporting granularity.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// Callback interface for progress updates.
///
/// Returns `true` to continue, `false` to request cancellation.
pub trait ProgressSink: Send + Sync {
    fn report(&self, current: u64, total: u64, message: &str) -> bool;
}

/// Marker error raised when a sink requests cancellation.
///
/// Carried inside `anyhow::Error` and recovered with `downcast_ref` at the
/// data-type boundary, so a user-requested stop is never conflated with a
/// failure.
#[derive(Debug)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Report progress and translate a cancellation request into an error.
pub fn report(sink: &dyn ProgressSink, current: u64, total: u64, message: &str) -> Result<()> {
    if sink.report(current, total, message) {
        Ok(())
    } else {
        Err(Cancelled.into())
    }
}

/// True if `err` is a cancellation request rather than a failure.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}

/// Sink that swallows all reports. Used by scheduled runs and tests.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _current: u64, _total: u64, _message: &str) -> bool {
        true
    }
}

/// Rescales one data type's `[0, total]` range into its slice of the
/// overall `[0, 100]` run, based on how many types were selected.
pub struct ScaledSink<'a> {
    inner: &'a dyn ProgressSink,
    index: u64,
    count: u64,
}

impl<'a> ScaledSink<'a> {
    pub fn new(inner: &'a dyn ProgressSink, index: usize, count: usize) -> Self {
        Self {
            inner,
            index: index as u64,
            count: (count as u64).max(1),
        }
    }
}

impl ProgressSink for ScaledSink<'_> {
    fn report(&self, current: u64, total: u64, message: &str) -> bool {
        let span = 100 / self.count;
        let within = current.min(total) * span / total.max(1);
        self.inner.report(self.index * span + within, 100, message)
    }
}

/// Terminal progress bar sink for interactive runs.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for BarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarSink {
    fn report(&self, current: u64, total: u64, message: &str) -> bool {
        self.bar.set_length(total);
        self.bar.set_position(current);
        self.bar.set_message(message.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Recording {
        last: AtomicU64,
    }

    impl ProgressSink for Recording {
        fn report(&self, current: u64, _total: u64, _message: &str) -> bool {
            self.last.store(current, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn scaled_sink_maps_type_range_into_overall_slice() {
        let rec = Recording { last: AtomicU64::new(0) };

        // Second of three types: slice is [33, 66].
        let scaled = ScaledSink::new(&rec, 1, 3);
        scaled.report(0, 100, "start");
        assert_eq!(rec.last.load(Ordering::SeqCst), 33);
        scaled.report(50, 100, "half");
        assert_eq!(rec.last.load(Ordering::SeqCst), 49);
        scaled.report(100, 100, "done");
        assert_eq!(rec.last.load(Ordering::SeqCst), 66);
    }

    #[test]
    fn cancellation_is_distinguishable() {
        struct Refusing;
        impl ProgressSink for Refusing {
            fn report(&self, _c: u64, _t: u64, _m: &str) -> bool {
                false
            }
        }

        let err = report(&Refusing, 1, 10, "step").unwrap_err();
        assert!(is_cancelled(&err));
        assert!(!is_cancelled(&anyhow::anyhow!("ordinary failure")));
    }
}
