//! Per-unit statistics and the response-time buffer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const RESPONSE_TIME_CAPACITY: usize = 100;
const MIN_SAMPLES_FOR_AVERAGE: usize = 3;

/// Accumulates for the life of the instance; mutated only on the executor's
/// single worker, so no locking is required under the concurrency-1
/// discipline that serializes every wire request through one queue.
#[derive(Debug, Default)]
pub struct UnitStats {
    pub requests_count: u64,
    pub errors_count: u64,
    pub timeouts_count: u32,
    pub timed_out_at: Option<Instant>,
    response_times: VecDeque<Duration>,
}

impl UnitStats {
    /// Recorded on every response, success or failure.
    pub fn record(&mut self, outcome: &ResponseOutcome) {
        self.requests_count += 1;
        match outcome {
            ResponseOutcome::Success(duration) => {
                self.timeouts_count = 0;
                self.timed_out_at = None;
                self.push_response_time(*duration);
            }
            ResponseOutcome::Error(duration) => {
                self.errors_count += 1;
                self.timeouts_count = 0;
                self.timed_out_at = None;
                self.push_response_time(*duration);
            }
            ResponseOutcome::Timeout => {
                self.errors_count += 1;
                self.timeouts_count += 1;
                self.timed_out_at = Some(Instant::now());
                // Timeout responses are excluded from the response-time buffer.
            }
        }
    }

    fn push_response_time(&mut self, duration: Duration) {
        if self.response_times.len() == RESPONSE_TIME_CAPACITY {
            self.response_times.pop_front();
        }
        self.response_times.push_back(duration);
    }

    /// `None` until more than 3 samples are present.
    pub fn average_response_time(&self) -> Option<Duration> {
        if self.response_times.len() <= MIN_SAMPLES_FOR_AVERAGE {
            return None;
        }
        let total: Duration = self.response_times.iter().sum();
        Some(total / self.response_times.len() as u32)
    }

    /// Per-unit backoff predicate for LOW-priority requests: a unit with
    /// more than two consecutive timeouts is skipped until three timeout
    /// windows have elapsed since the most recent one.
    pub fn is_in_backoff(&self, timeout: Duration) -> bool {
        if self.timeouts_count <= 2 {
            return false;
        }
        match self.timed_out_at {
            Some(at) => at.elapsed() < timeout * 3,
            None => false,
        }
    }
}

/// What `record` needs to know about one completed response.
pub enum ResponseOutcome {
    Success(Duration),
    Error(Duration),
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_requires_more_than_three_samples() {
        let mut stats = UnitStats::default();
        for _ in 0..3 {
            stats.record(&ResponseOutcome::Success(Duration::from_millis(10)));
        }
        assert!(stats.average_response_time().is_none());
        stats.record(&ResponseOutcome::Success(Duration::from_millis(10)));
        assert!(stats.average_response_time().is_some());
    }

    #[test]
    fn backoff_triggers_after_three_consecutive_timeouts() {
        let mut stats = UnitStats::default();
        stats.record(&ResponseOutcome::Timeout);
        stats.record(&ResponseOutcome::Timeout);
        assert!(!stats.is_in_backoff(Duration::from_secs(1)), "two timeouts must not yet trigger backoff");
        stats.record(&ResponseOutcome::Timeout);
        assert!(stats.is_in_backoff(Duration::from_secs(1)));
    }

    #[test]
    fn non_timeout_response_resets_timeouts_count() {
        let mut stats = UnitStats::default();
        stats.record(&ResponseOutcome::Timeout);
        stats.record(&ResponseOutcome::Timeout);
        stats.record(&ResponseOutcome::Timeout);
        assert!(stats.is_in_backoff(Duration::from_secs(1)));
        stats.record(&ResponseOutcome::Success(Duration::from_millis(5)));
        assert_eq!(stats.timeouts_count, 0);
        assert!(!stats.is_in_backoff(Duration::from_secs(1)));
    }

    #[test]
    fn non_timeout_response_clears_the_timed_out_marker() {
        let mut stats = UnitStats::default();
        stats.record(&ResponseOutcome::Timeout);
        assert!(stats.timed_out_at.is_some());
        stats.record(&ResponseOutcome::Error(Duration::from_millis(5)));
        assert!(stats.timed_out_at.is_none());
    }

    #[test]
    fn timeout_responses_excluded_from_response_time_buffer() {
        let mut stats = UnitStats::default();
        stats.record(&ResponseOutcome::Timeout);
        assert_eq!(stats.response_times.len(), 0);
    }
}
