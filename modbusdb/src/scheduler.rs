//! Divisor-aligned periodic polling.
//!
//! A round of `interval` seconds is subdivided into `round_size` equal
//! ticks. Every divisor `d` of `round_size` maps to its mirror divisor
//! (the divisor list reversed at the same position); on each tick, every
//! divisor whose tick condition holds contributes the datamap's watched
//! keys at its mirror frequency. This gives each declared `freq` an exact
//! subset of ticks at which its keys are refreshed, without maintaining a
//! per-entry timer for every polling frequency in use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::datamap::{Datamap, Method};
use crate::events::{Event, EventBus};
use crate::executor::Executor;
use crate::key::RegisterKey;
use crate::transaction::Priority;

const MIN_INTERVAL_SECS: u64 = 60;
const MAX_INTERVAL_SECS: u64 = 3600;
const MIN_ROUND_SIZE: u32 = 12;
const MAX_ROUND_SIZE: u32 = 36;
const MIN_TICK_SLEEP: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub round_size: u32,
    /// Per-transaction timeout applied to each watched read this tick
    /// dispatches — the instance's configured timeout, not the round length.
    pub timeout: Duration,
}

impl SchedulerConfig {
    pub fn new(interval_secs: u64, round_size: u32, timeout: Duration) -> Self {
        let interval_secs = interval_secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS);
        let round_size = round_size.clamp(MIN_ROUND_SIZE, MAX_ROUND_SIZE);
        SchedulerConfig { interval: Duration::from_secs(interval_secs), round_size, timeout }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis((self.interval.as_secs() / self.round_size as u64) * 1000)
    }
}

/// Divisors of `n`, ascending, including 1 and `n`.
pub fn divisors(n: u32) -> Vec<u32> {
    (1..=n).filter(|d| n % d == 0).collect()
}

/// Maps each divisor of `round_size` to the divisor at the mirrored position
/// in the ascending divisor list.
pub fn divisor_map(round_size: u32) -> HashMap<u32, u32> {
    let ds = divisors(round_size);
    let reversed: Vec<u32> = ds.iter().rev().copied().collect();
    ds.into_iter().zip(reversed).collect()
}

/// A snapshot of the scheduler's position in its current round, for
/// diagnostics and tests; not required for correct dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
    pub round: u32,
    pub tick: u32,
    pub running: bool,
}

pub struct Scheduler {
    datamap: Arc<Datamap>,
    executor: Executor,
    events: EventBus,
    config: SchedulerConfig,
    divisor_map: HashMap<u32, u32>,
    round: AtomicU32,
    tick: AtomicU32,
    destroyed: Arc<AtomicBool>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(datamap: Arc<Datamap>, executor: Executor, events: EventBus, config: SchedulerConfig) -> Self {
        let divisor_map = divisor_map(config.round_size);
        Scheduler {
            datamap,
            executor,
            events,
            config,
            divisor_map,
            round: AtomicU32::new(0),
            tick: AtomicU32::new(0),
            destroyed: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
        }
    }

    /// Spawns the recurring tick loop; returns its handle so callers may
    /// await clean shutdown after `destroy`.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        self.started.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                if self.destroyed.load(Ordering::SeqCst) {
                    return;
                }
                self.run_tick().await;
            }
        })
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState {
            round: self.round.load(Ordering::SeqCst),
            tick: self.tick.load(Ordering::SeqCst),
            running: self.started.load(Ordering::SeqCst) && !self.destroyed.load(Ordering::SeqCst),
        }
    }

    async fn run_tick(&self) {
        let started = Instant::now();
        let t = self.tick.load(Ordering::SeqCst);

        self.events.emit(Event::Tick { round: self.round.load(Ordering::SeqCst), tick: t });

        let mut keys: Vec<u32> = Vec::new();
        for (&d, &mirror) in &self.divisor_map {
            if (t + 1) % d == 0 {
                keys.extend(self.datamap.watched_keys(mirror));
            }
        }
        keys.sort();
        keys.dedup();

        if !keys.is_empty() {
            let register_keys: Vec<RegisterKey> = keys
                .into_iter()
                .filter_map(|k| crate::key::parse_register_key(k).ok().and_then(|(u, s, a, b)| crate::key::create_register_key(u, s as u8, a, b).ok()))
                .collect();

            match self.datamap.select_all(Method::Read, &register_keys) {
                Ok(selects) => {
                    tracing::trace!(tick = t, count = selects.len(), "dispatching watched selects");
                    for select in selects {
                        let executor = self.executor.clone();
                        let timeout = self.config.timeout;
                        tokio::spawn(async move {
                            let _ = executor.request(select, None, Priority::Low, timeout).await;
                        });
                    }
                }
                Err(err) => tracing::debug!(tick = t, %err, "skipping tick, planner rejected watched keys"),
            }
        }

        self.advance_tick();

        let elapsed = started.elapsed();
        let tick_interval = self.config.tick_interval();
        let sleep_for = tick_interval.saturating_sub(elapsed).max(MIN_TICK_SLEEP);
        tokio::time::sleep(sleep_for).await;
    }

    fn advance_tick(&self) {
        let next = self.tick.fetch_add(1, Ordering::SeqCst) + 1;
        if next >= self.config.round_size {
            self.tick.store(0, Ordering::SeqCst);
            self.round.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisors_of_twelve() {
        assert_eq!(divisors(12), vec![1, 2, 3, 4, 6, 12]);
    }

    #[test]
    fn divisor_map_mirrors_positions() {
        let map = divisor_map(12);
        // divisors: [1,2,3,4,6,12] reversed -> [12,6,4,3,2,1]
        assert_eq!(map[&1], 12);
        assert_eq!(map[&2], 6);
        assert_eq!(map[&3], 4);
        assert_eq!(map[&4], 3);
        assert_eq!(map[&6], 2);
        assert_eq!(map[&12], 1);
    }

    #[test]
    fn freq_six_polls_six_times_per_round_of_twelve() {
        let config = SchedulerConfig::new(60, 12, Duration::from_secs(5));
        let map = divisor_map(config.round_size);
        // freq=6 is watched via divisor d where divisor_map[d] == 6, i.e. d=2.
        let d = *map.iter().find(|(_, &v)| v == 6).unwrap().0;
        let hits = (0..config.round_size).filter(|&t| (t + 1) % d == 0).count();
        assert_eq!(hits, 6);
    }

    #[test]
    fn clamps_interval_and_round_size() {
        let config = SchedulerConfig::new(10, 1000, Duration::from_secs(5));
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.round_size, 36);
    }
}
