//! Timing helpers for emulator hot paths.
//!
//! ```rust
//! use simt_tracing::performance::{record_cta_completion, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("emulate_cta", Some(100));
//! // ... run the CTA ...
//! drop(span); // logged only if it took at least 100µs
//!
//! record_cta_completion("tf-gen6", 42, 3);
//! ```

use std::time::Instant;
use tracing::Level;

/// RAII guard that times its own lifetime and logs the duration on drop.
///
/// When a threshold is set, durations below it are not logged.
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Start a debug-level span.
    pub fn new(span_name: &str, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, span_name, threshold_us)
    }

    /// Start a span at an explicit level.
    pub fn with_level(level: Level, span_name: &str, threshold_us: Option<u64>) -> Self {
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %span_name),
            Level::DEBUG => tracing::debug_span!("perf", name = %span_name),
            Level::INFO => tracing::info_span!("perf", name = %span_name),
            Level::WARN => tracing::warn_span!("perf", name = %span_name),
            Level::ERROR => tracing::error_span!("perf", name = %span_name),
        };

        Self::from_span(span, threshold_us)
    }

    /// Time an already-built span, keeping it open until the guard drops.
    pub fn from_span(span: tracing::Span, threshold_us: Option<u64>) -> Self {
        Self {
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Microseconds since the span started.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter the underlying span.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Emit the standard event for a CTA that ran to completion.
pub fn record_cta_completion(mechanism: &str, dynamic_instructions: u64, max_stack_depth: usize) {
    tracing::debug!(
        event = "cta_complete",
        mechanism,
        dynamic_instructions,
        max_stack_depth,
    );
}

/// Emit the standard event for a divergent branch.
pub fn record_divergence(mechanism: &str, pc: usize, taken: usize, fallthrough: usize) {
    tracing::debug!(event = "divergence", mechanism, pc, taken, fallthrough);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn span_measures_elapsed_time() {
        let span = PerformanceSpan::new("sleepy", None);
        thread::sleep(Duration::from_millis(2));
        assert!(span.elapsed_us() >= 2_000);
    }

    #[test]
    fn span_at_every_level() {
        for level in [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR] {
            let span = PerformanceSpan::with_level(level, "leveled", Some(u64::MAX));
            let _entered = span.enter();
        }
    }

    #[test]
    fn record_helpers_do_not_panic() {
        record_cta_completion("ipdom", 10, 2);
        record_divergence("barrier", 4, 2, 2);
    }
}
