//! Cycle timing context.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Timing context for one decision cycle.
///
/// Entries are suppressed inside the final suppression window so a
/// position is never opened moments before the cycle would re-evaluate
/// it.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    start_mono: Instant,
    duration: Duration,
    suppression_window: Duration,
}

impl CycleContext {
    pub fn new(cycle_id: u64, duration: Duration, suppression_window: Duration) -> Self {
        Self {
            cycle_id,
            started_at: Utc::now(),
            start_mono: Instant::now(),
            duration,
            suppression_window,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_mono.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed())
    }

    /// True once the cycle has entered its final suppression window.
    pub fn entries_suppressed(&self) -> bool {
        self.remaining() <= self.suppression_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_allowed_early_suppressed_late() {
        let ctx = CycleContext::new(1, Duration::from_secs(300), Duration::from_secs(60));
        assert!(!ctx.entries_suppressed());
        assert!(ctx.remaining() > Duration::from_secs(200));

        let short = CycleContext::new(2, Duration::from_millis(10), Duration::from_millis(10));
        // Suppression window covers the whole cycle.
        assert!(short.entries_suppressed());
    }
}
