use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Trigger statistics for a run, with all-time totals and a sliding window
/// rate for progress reporting.
#[derive(Debug)]
pub struct TriggerCounter {
    /// All-time payload bytes
    pub total_size: u64,
    /// All-time number of events
    pub n_events: u64,
    pub first_timestamp_ns: Option<u64>,
    pub last_timestamp_ns: Option<u64>,

    window: Duration,
    recent: VecDeque<Instant>,
}

impl Default for TriggerCounter {
    fn default() -> Self {
        TriggerCounter {
            total_size: 0,
            n_events: 0,
            first_timestamp_ns: None,
            last_timestamp_ns: None,
            window: Duration::from_secs(10),
            recent: VecDeque::new(),
        }
    }
}

impl TriggerCounter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            ..Default::default()
        }
    }

    /// Record one persisted event of `size` bytes triggered at `timestamp_ns`.
    pub fn increment(&mut self, size: u64, timestamp_ns: u64) {
        let now = Instant::now();

        self.total_size += size;
        self.n_events += 1;
        self.first_timestamp_ns.get_or_insert(timestamp_ns);
        self.last_timestamp_ns = Some(timestamp_ns);

        self.recent.push_back(now);
        while let Some(&ts) = self.recent.front() {
            if now.duration_since(ts) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Triggers per second over the sliding window.
    pub fn recent_rate(&self) -> f64 {
        self.recent.len() as f64 / self.window.as_secs_f64().max(1e-6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_counter_has_no_timestamps() {
        let counter = TriggerCounter::new();
        assert_eq!(counter.first_timestamp_ns, None);
        assert_eq!(counter.recent_rate(), 0.0);
    }

    #[test]
    fn tracks_first_and_last_trigger() {
        let mut counter = TriggerCounter::new();
        counter.increment(512, 1_000_000_000);
        counter.increment(512, 2_000_000_000);
        counter.increment(512, 3_500_000_000);
        assert_eq!(counter.first_timestamp_ns, Some(1_000_000_000));
        assert_eq!(counter.last_timestamp_ns, Some(3_500_000_000));
        assert_eq!(counter.total_size, 1536);
        assert_eq!(counter.n_events, 3);
    }

    #[test]
    fn window_rate_counts_recent_triggers() {
        let mut counter = TriggerCounter::with_window(Duration::from_secs(2));
        counter.increment(4, 1);
        assert_eq!(counter.recent_rate(), 0.5);
    }
}
