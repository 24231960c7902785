//! Completion accounting for one page load

use std::time::Instant;

/// Outcome counters for one page load's sub-resource fetches
#[derive(Debug, Clone)]
pub struct PageStats {
    /// Number of successful completions
    pub ok: usize,

    /// Number of failed completions
    pub ko: usize,

    /// When the page load started
    pub started_at: Instant,
}

impl PageStats {
    /// Start counting now
    pub fn new() -> Self {
        Self {
            ok: 0,
            ko: 0,
            started_at: Instant::now(),
        }
    }

    /// Record a successful completion
    pub fn record_ok(&mut self) {
        self.ok += 1;
    }

    /// Record a failed completion
    pub fn record_ko(&mut self) {
        self.ko += 1;
    }

    /// Total completions observed
    pub fn total(&self) -> usize {
        self.ok + self.ko
    }

    /// Milliseconds elapsed since the page load started
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

impl Default for PageStats {
    fn default() -> Self {
        Self::new()
    }
}
