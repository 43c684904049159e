//! Process-wide fan-factor configuration.
//!
//! Mirrors the one-shot `Once`-guarded initialization the rest of this
//! corpus uses for process-wide parameters: a default is always available,
//! `init` lets a host process override it exactly once before the first
//! tree is built.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

const DEFAULT_FAN_FACTOR: usize = 32;

static INIT: Once = Once::new();
static FAN_FACTOR: AtomicUsize = AtomicUsize::new(DEFAULT_FAN_FACTOR);

/// Sets the process-wide fan factor `F`. Must be a power of two. Only the
/// first call takes effect; later calls are no-ops, matching the
/// call-once-at-startup contract of the rest of this crate's configuration
/// surface.
///
/// # Panics
/// Panics if `fan_factor` is zero or not a power of two — an invalid
/// configuration is a programmer error caught at startup, not a runtime
/// `Result`.
pub fn init(fan_factor: usize) {
    assert!(
        fan_factor > 0 && fan_factor.is_power_of_two(),
        "fan factor must be a positive power of two, got {fan_factor}"
    );
    INIT.call_once(|| {
        FAN_FACTOR.store(fan_factor, Ordering::Relaxed);
    });
}

/// Returns the current fan factor, defaulting to 32 if `init` was never
/// called.
pub fn fan_factor() -> usize {
    FAN_FACTOR.load(Ordering::Relaxed)
}

/// `log2(F)`, used to size the path stack / recursion bound.
pub fn fan_shift() -> u32 {
    fan_factor().trailing_zeros()
}

/// Upper bound on tree depth for the current fan factor: `ceil(31 / (s-1))`
/// where `F = 2^s`. Guards the cursor's and builder's fixed path-stack
/// capacity.
pub fn max_depth() -> usize {
    let s = fan_shift();
    assert!(s >= 2, "fan factor must be at least 4 to bound tree depth");
    ((31 + (s - 2)) / (s - 1)) as usize
}
