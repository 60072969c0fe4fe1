//! One-shot, environment-injected defaults.
//!
//! Each value is read and validated on first use; an unparsable or invalid
//! value logs a warning and falls back to the built-in default. Per-instance
//! overrides live on [`EndpointBuilder`](crate::EndpointBuilder).

use std::{fmt, str::FromStr, sync::LazyLock, time::Duration};

use tracing::warn;

use crate::pipeline::tx::UNLIMITED;

/// Upper bound on a single send ring's capacity (`PENSTOCK_MAX_RING_CAPACITY`).
pub(crate) static MAX_RING_CAPACITY: LazyLock<usize> = LazyLock::new(|| {
    let capacity = parse_env("PENSTOCK_MAX_RING_CAPACITY", 32 * 1024);
    round_ring_capacity("PENSTOCK_MAX_RING_CAPACITY", capacity)
});

/// Byte cap on outstanding send data (`PENSTOCK_MAX_PENDING_BYTES`);
/// unlimited by default, which disables accounting.
pub(crate) static MAX_PENDING_BYTES: LazyLock<i64> =
    LazyLock::new(|| parse_env("PENSTOCK_MAX_PENDING_BYTES", UNLIMITED));

/// Throttle for publishing the written-byte counter
/// (`PENSTOCK_PUBLISH_INTERVAL_MS`).
pub(crate) static PUBLISH_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(parse_env("PENSTOCK_PUBLISH_INTERVAL_MS", 30_000)));

/// Rounds a ring-capacity bound up to a power of two, warning when the
/// requested value changes.
pub(crate) fn round_ring_capacity(what: &str, capacity: usize) -> usize {
    if capacity == 0 {
        let default = 32 * 1024;
        warn!(what, default, "capacity must be positive, using default");
        return default;
    }
    if capacity.is_power_of_two() {
        return capacity;
    }
    let rounded = capacity.next_power_of_two();
    warn!(what, capacity, rounded, "capacity is not a power of 2, rounding up");
    rounded
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + fmt::Display,
{
    let Ok(value) = std::env::var(key) else {
        return default;
    };
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(key, %value, %default, "could not be parsed, using default");
            default
        }
    }
}
