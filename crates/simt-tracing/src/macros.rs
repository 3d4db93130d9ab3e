//! Instrumentation macros.

/// Create a [`crate::performance::PerformanceSpan`], optionally recording fields.
///
/// ```rust
/// use simt_tracing::perf_span;
///
/// {
///     let _span = perf_span!("eval_bra", pc = 7, lanes = 32);
///     // ... branch evaluation ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        $crate::performance::PerformanceSpan::from_span(
            tracing::debug_span!("perf", name = $name, $($field = $value),+),
            None,
        )
    }};
}

/// Emit a debug-level event named `$name` with the given metrics.
///
/// ```rust
/// use simt_tracing::perf_event;
///
/// perf_event!("barrier_release", pc = 12, lanes = 64);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        tracing::debug!(
            event = $name,
            $($field = $value),+
        );
    };
}

/// Run a block and return `(result, elapsed_microseconds)`.
///
/// ```rust
/// use simt_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn perf_span_with_and_without_fields() {
        let _a = perf_span!("plain");
        let _b = perf_span!("fields", pc = 3, lanes = 8);
    }

    #[test]
    fn field_span_stays_open_with_its_guard() {
        let subscriber = crate::build_subscriber(&crate::TracingConfig::for_tests()).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let guard = perf_span!("fields", pc = 3, lanes = 8);
            let span = guard.span();
            assert!(!span.is_disabled());
            let fields = span.metadata().unwrap().fields();
            for name in ["name", "pc", "lanes"] {
                assert!(fields.field(name).is_some(), "missing field {name}");
            }

            let _entered = guard.enter();
            assert_eq!(tracing::Span::current().id(), span.id());
        });
    }

    #[test]
    fn perf_event_accepts_mixed_fields() {
        perf_event!("merge", pc = 8, mechanism = "ipdom");
    }

    #[test]
    fn timed_block_returns_value() {
        let (result, _duration_us) = timed_block!("answer", { 6 * 7 });
        assert_eq!(result, 42);
    }
}
