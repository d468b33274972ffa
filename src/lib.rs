//! Stream-to-system clock reconciliation.
//!
//! [`Clock`] answers, for an incoming stream timestamp, the question "at what
//! system time should this sample become visible?" while absorbing network
//! jitter, bounded clock drift, rate changes, and pause/resume. It is the
//! thing a demuxer feeds (`update`) and a decoder/output stage queries
//! (`convert_ts`, `get_wakeup`) to keep presentation in sync with the host's
//! monotonic clock.

mod average;
mod clock;
mod config;
mod error;
mod latency;
mod ring;
mod stats;
mod time;

pub use clock::{Clock, ClockPosition, ConvertedTs};
pub use config::ClockConfig;
pub use error::{ClockError, ClockResult};
pub use stats::ClockStats;
pub use time::{MonotonicClock, SystemMonotonicClock};

// ============================================================================
// Boundary constants
// ============================================================================

/// Tick rate shared by the stream and system domains (microseconds).
pub const CLOCK_FREQ: i64 = 1_000_000;
/// Rate units corresponding to 1.0x playback.
pub const RATE_DEFAULT: i64 = 1_000;
/// Discontinuity threshold, in stream-domain ticks.
pub const CR_MAX_GAP: i64 = 60 * CLOCK_FREQ;
/// Initial reference offset applied after a discontinuity reset.
pub const CR_MEAN_PTS_GAP: i64 = 300_000;
/// Buffering accrual rate, numerator of 256.
pub const BUFFERING_RATE: i64 = 48;
/// Ceiling on `buffering_duration`, in microseconds.
pub const BUFFERING_TARGET: i64 = 100_000;
/// Seed value for the decoder-latency estimator, in microseconds.
pub const INIT_DECODER_LATENCY: i64 = 1_000_000;
/// Number of lateness samples kept for the jitter median.
pub const INPUT_CLOCK_LATE_COUNT: usize = 3;
/// Capacity of the stream-point ring.
pub const BUFFERED_PTS_COUNT: usize = 100;
/// Consecutive-lateness threshold that forces a reset.
pub const CONTINUOUS_LATE_LIMIT: u32 = 132;
/// Window size for the drift estimator.
pub const DRIFT_WINDOW: i64 = 300;
/// Window size for the decoder-latency estimator.
pub const LATENCY_WINDOW: i64 = 180;
/// Threshold, in microseconds, at which a returned timestamp counts as late.
pub const CONTINUOUS_LATE_THRESHOLD_US: i64 = 16_000;
/// Sentinel for an unset/invalid timestamp.
pub const INVALID_TS: i64 = i64::MIN;

/// True if `ts` is not the [`INVALID_TS`] sentinel.
#[inline]
pub fn ts_valid(ts: i64) -> bool {
    ts != INVALID_TS
}
