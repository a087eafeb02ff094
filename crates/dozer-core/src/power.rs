//! Power-management boundary.

use embassy_time::Duration;

/// Hands the node over to its low-power state at the end of a wake cycle.
///
/// On hardware this is deep sleep followed by a reset, so the future never
/// completes and nothing held in RAM survives. Host implementations return so
/// the next wake can be simulated.
pub trait PowerControl {
    fn sleep_for(&mut self, duration: Duration) -> impl Future<Output = ()>;
}
