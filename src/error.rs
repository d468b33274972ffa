//! Error type for the clock's fallible public operations.

use thiserror::Error;

/// Failure outcome of a clock operation. There is no other error variant at
/// the boundary: every other public method succeeds unconditionally.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// No reference point has been established yet (no `update` has landed,
    /// or a reset cleared it).
    #[error("clock has no reference point yet")]
    NoReference,
    /// `convert_ts` produced a timestamp further out than the caller's bound.
    #[error("converted timestamp {ts0_us}us is beyond the requested bound (now={now_us}us)")]
    OutOfBound { ts0_us: i64, now_us: i64 },
}

pub type ClockResult<T> = Result<T, ClockError>;
