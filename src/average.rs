//! Windowed drift estimator.

use crate::DRIFT_WINDOW;

/// Integer square root, truncating. `variance` is always `>= 0` by
/// construction (it is a sum of squares divided by a positive count), so the
/// input is never negative in practice; a negative value still returns `0`
/// rather than panicking.
fn isqrt(n: i64) -> i64 {
    if n <= 0 {
        return 0;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Fixed-capacity running statistic over `(system_to_stream − stream)`
/// residuals: a first-order IIR filter plus a windowed mean/variance plus a
/// weighted-maximum jitter bound.
#[derive(Debug, Clone, Copy)]
pub struct Average {
    // IIR filter state.
    value: i64,
    residue: i64,
    divider: i64,

    // Windowed mean/variance state.
    means: i64,
    residue_means: i64,
    variance: i64,
    residue_variance: i64,

    // Weighted-maximum jitter bound.
    max_offset: i64,

    count: i64,
    start_count: i64,
}

impl Average {
    /// `divider` is the IIR window; it is distinct from the fixed windowed
    /// mean/variance window ([`DRIFT_WINDOW`]).
    pub fn new(divider: i64) -> Self {
        Average {
            value: 0,
            residue: 0,
            divider: divider.max(1),
            means: 0,
            residue_means: 0,
            variance: 0,
            residue_variance: 0,
            max_offset: 0,
            count: 0,
            start_count: 0,
        }
    }

    /// Clears all accumulated state; keeps the configured divider.
    pub fn reset(&mut self) {
        let divider = self.divider;
        *self = Average::new(divider);
    }

    /// Feeds one residual sample through the IIR filter, the windowed
    /// mean/variance, and the jitter-bound tracker.
    pub fn update(&mut self, sample: i64) {
        // 1. IIR filter.
        let f0 = self.divider.saturating_sub(1).min(self.count);
        let f1 = self.divider - f0;
        let new_value = (f0 * self.value + f1 * sample + self.residue) / self.divider;
        self.residue = f0 * self.value + f1 * sample + self.residue - new_value * self.divider;
        self.value = new_value;

        // 2. Windowed mean/variance.
        let index = self.count % DRIFT_WINDOW;
        let last_variance = if index == 0 {
            let lv = self.variance / 2;
            self.means = 0;
            self.residue_means = 0;
            self.variance = 0;
            self.residue_variance = 0;
            lv
        } else {
            0
        };

        let means_num = self.means * index + sample + self.residue_means;
        let new_means = means_num / (index + 1);
        self.residue_means = means_num - new_means * (index + 1);

        let delta = sample - self.means;
        let variance_num =
            self.variance * index + delta * delta + self.residue_variance + last_variance;
        let new_variance = variance_num / (index + 1);
        self.residue_variance = variance_num - new_variance * (index + 1);

        self.means = new_means;
        self.variance = new_variance;

        // 3. Jitter bound.
        let off = (sample - self.means).abs();
        if off > self.max_offset {
            self.max_offset = (3 * off + self.max_offset) / 4;
            self.start_count = self.count;
        } else if self.count - self.start_count >= 2 {
            self.max_offset = isqrt(self.variance);
            self.start_count = self.count;
        }

        // 4. Count.
        self.count += 1;
    }

    /// Returns the windowed mean — the value conversion actually uses.
    pub fn get(&self) -> i64 {
        self.means
    }

    /// Current jitter bound (`maxOffset`), used as the network-jitter term.
    pub fn max_offset(&self) -> i64 {
        self.max_offset
    }

    /// Current IIR divider.
    pub fn divider(&self) -> i64 {
        self.divider
    }

    /// Rescales the IIR accumulator to a new divider, preserving
    /// `value * divider + residue`.
    pub fn rescale(&mut self, new_divider: i64) {
        let new_divider = new_divider.max(1);
        let total = self.value * self.divider + self.residue;
        self.value = total / new_divider;
        self.residue = total - self.value * new_divider;
        self.divider = new_divider;
    }
}
