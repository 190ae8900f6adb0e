//! Timing samples around refresh stages.
//!
//! Disabled by default; when enabled each sampled stage logs its duration.
//! Toggle with [`set_profiling_enabled`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Global flag to enable/disable stage timing.
static PROFILING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Refresh passes seen since the last reset.
static PASS_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How often to log pass summaries (every N passes).
const SUMMARY_LOG_INTERVAL: u64 = 300; // ~5 seconds at 60fps

/// Check if profiling is currently enabled.
pub fn is_profiling_enabled() -> bool {
    PROFILING_ENABLED.load(Ordering::Relaxed)
}

/// Enable or disable stage timing.
pub fn set_profiling_enabled(enabled: bool) {
    PROFILING_ENABLED.store(enabled, Ordering::Relaxed);
    if enabled {
        log::info!("Refresh profiling ENABLED");
    } else {
        log::info!("Refresh profiling DISABLED");
    }
}

/// Count a refresh pass and return true if its summary should be logged.
pub fn should_log_summary() -> bool {
    if !is_profiling_enabled() {
        return false;
    }
    let pass = PASS_COUNTER.fetch_add(1, Ordering::Relaxed);
    pass % SUMMARY_LOG_INTERVAL == 0
}

/// Execute a closure, logging its duration when profiling is enabled.
pub fn timed<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    if is_profiling_enabled() {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        log::info!("[PERF] {}: {:.3}ms", label, elapsed.as_secs_f64() * 1000.0);
        result
    } else {
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_returns_value() {
        assert_eq!(timed("noop", || 42), 42);
    }

    #[test]
    fn test_summary_disabled_by_default() {
        assert!(!is_profiling_enabled());
        assert!(!should_log_summary());
    }
}
