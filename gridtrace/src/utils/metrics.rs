#[cfg(feature = "metrics")]
use std::time::Instant;

/// Measures how long given closure takes and, when the `metrics` feature is
/// enabled, logs the duration.
#[cfg(feature = "metrics")]
pub fn measure<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let tt = Instant::now();
    let result = f();

    log::info!(
        "metric: {label} took {}",
        humantime::format_duration(tt.elapsed())
    );

    result
}

#[cfg(not(feature = "metrics"))]
pub fn measure<T>(_: &str, f: impl FnOnce() -> T) -> T {
    f()
}
