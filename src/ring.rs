//! `ClockPoint` and the fixed-capacity stream-point ring.

use crate::{ts_valid, BUFFERED_PTS_COUNT, INVALID_TS};

/// A (stream, system) timestamp pair, both in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPoint {
    pub i_stream: i64,
    pub i_system: i64,
}

impl ClockPoint {
    pub const INVALID: ClockPoint = ClockPoint { i_stream: INVALID_TS, i_system: INVALID_TS };

    pub fn new(i_stream: i64, i_system: i64) -> Self {
        ClockPoint { i_stream, i_system }
    }

    pub fn is_valid(&self) -> bool {
        ts_valid(self.i_stream) && ts_valid(self.i_system)
    }
}

impl Default for ClockPoint {
    fn default() -> Self {
        ClockPoint::INVALID
    }
}

/// Fixed-size ring of the most recently observed points, searched backward
/// to back-solve an arrival system time for a past stream timestamp.
#[derive(Debug, Clone)]
pub struct PointRing {
    points: [ClockPoint; BUFFERED_PTS_COUNT],
    /// Index one past the most recently written point.
    next: usize,
    len: usize,
}

impl PointRing {
    pub fn new() -> Self {
        PointRing {
            points: [ClockPoint::INVALID; BUFFERED_PTS_COUNT],
            next: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, point: ClockPoint) {
        self.points[self.next] = point;
        self.next = (self.next + 1) % BUFFERED_PTS_COUNT;
        self.len = (self.len + 1).min(BUFFERED_PTS_COUNT);
    }

    /// Searches backward from the newest entry for an exact `stream` match;
    /// failing that, returns the newest entry with `i_stream <= stream`.
    /// Returns `None` if the ring is empty or every entry is newer than
    /// `stream`.
    pub fn find(&self, stream: i64) -> Option<ClockPoint> {
        let mut best: Option<ClockPoint> = None;
        for back in 0..self.len {
            let idx = (self.next + BUFFERED_PTS_COUNT - 1 - back) % BUFFERED_PTS_COUNT;
            let point = self.points[idx];
            if point.i_stream == stream {
                return Some(point);
            }
            if point.i_stream <= stream {
                // Entries are appended in non-decreasing stream order, so the
                // first one found walking backward with i_stream <= stream is
                // the greatest such entry.
                best = Some(point);
                break;
            }
        }
        best
    }
}

impl Default for PointRing {
    fn default() -> Self {
        Self::new()
    }
}
