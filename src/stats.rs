//! Host-facing snapshot of clock state, for display/diagnostics.

/// A point-in-time copy of the clock's externally interesting state.
/// Cheap to construct; intended for periodic display, not hot-path use.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockStats {
    pub has_reference: bool,
    pub ref_stream: i64,
    pub ref_system: i64,
    pub last_stream: i64,
    pub last_system: i64,
    pub rate: i64,
    pub buffering_duration_us: i64,
    pub network_jitter_us: i64,
    pub decoder_latency_us: i64,
    pub continuous_late_count: u32,
    pub paused: bool,
}

impl ClockStats {
    /// One-line summary, e.g. for a status bar.
    pub fn format_display(&self) -> String {
        if !self.has_reference {
            return "clock: no reference".to_string();
        }
        format!(
            "clock: rate={:.3}x buffering={}us jitter={}us latency={}us{}",
            self.rate as f64 / crate::RATE_DEFAULT as f64,
            self.buffering_duration_us,
            self.network_jitter_us,
            self.decoder_latency_us,
            if self.paused { " [paused]" } else { "" },
        )
    }

    /// Multi-line diagnostic dump.
    pub fn format_detailed(&self) -> String {
        if !self.has_reference {
            return "Clock: no reference point established".to_string();
        }
        format!(
            "Clock status:\n\
             Reference: stream={} system={}\n\
             Last: stream={} system={}\n\
             Rate: {:.3}x\n\
             Buffering duration: {}us\n\
             Network jitter: {}us\n\
             Decoder latency: {}us\n\
             Continuous late count: {}\n\
             Paused: {}",
            self.ref_stream,
            self.ref_system,
            self.last_stream,
            self.last_system,
            self.rate as f64 / crate::RATE_DEFAULT as f64,
            self.buffering_duration_us,
            self.network_jitter_us,
            self.decoder_latency_us,
            self.continuous_late_count,
            self.paused,
        )
    }
}
