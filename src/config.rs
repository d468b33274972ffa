//! Construction-time configuration for a [`crate::Clock`].

use crate::RATE_DEFAULT;

/// Default IIR divider for the drift estimator, absent any `set_jitter` call.
/// Not specified by name in the boundary constants; chosen low enough that
/// the drift correction converges quickly during the first couple of seconds
/// of playback and documented here since `set_jitter` is the only way to
/// change it afterwards.
const DEFAULT_CR_AVERAGE: i64 = 40;

/// Knobs a caller can set at construction time. There is no file- or
/// environment-based configuration surface; this struct is it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// Initial playback rate, in units of [`RATE_DEFAULT`].
    pub rate: i64,
    /// Initial output delay, in microseconds.
    pub pts_delay: i64,
    /// Initial drift-estimator IIR divider (clamped to `>= 10` on use).
    pub cr_average: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            rate: RATE_DEFAULT,
            pts_delay: 0,
            cr_average: DEFAULT_CR_AVERAGE,
        }
    }
}
