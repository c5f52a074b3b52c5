//! Adaptive concurrency limit
//!
//! Workers take a permit before each remote call. When distinct actions keep
//! getting throttled within a window, the live limit drops toward a floor;
//! after a cooldown and a streak of clean calls it climbs back one step at a
//! time. The pool itself stays at its configured size: extra workers simply
//! wait for a permit.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Thresholds for concurrency adaptation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Lowest live limit
    pub floor: usize,
    /// Distinct throttled actions within `window` that trigger a downgrade
    pub throttle_threshold: usize,
    /// Sliding window for counting throttles
    pub window: Duration,
    /// Minimum time between limit changes before scaling up
    pub cooldown: Duration,
    /// Consecutive clean calls required to scale up
    pub recovery_successes: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            floor: 1,
            throttle_threshold: 3,
            window: Duration::from_secs(30),
            cooldown: Duration::from_secs(30),
            recovery_successes: 20,
        }
    }
}

#[derive(Debug)]
struct GovernorState {
    limit: usize,
    active: usize,
    throttles: VecDeque<(Instant, usize)>,
    clean_streak: usize,
    last_change: Instant,
}

/// Live concurrency limit shared by all workers
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    ceiling: usize,
    config: AdaptiveConfig,
    state: Mutex<GovernorState>,
    available: Condvar,
}

impl ConcurrencyGovernor {
    /// Create a governor starting at `ceiling` permits
    pub fn new(ceiling: usize, config: AdaptiveConfig) -> Self {
        let ceiling = ceiling.max(1);
        let config = AdaptiveConfig {
            floor: config.floor.clamp(1, ceiling),
            throttle_threshold: config.throttle_threshold.max(1),
            ..config
        };
        Self {
            ceiling,
            config,
            state: Mutex::new(GovernorState {
                limit: ceiling,
                active: 0,
                throttles: VecDeque::new(),
                clean_streak: 0,
                last_change: Instant::now(),
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GovernorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current live limit
    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    /// Block until a permit is available under the live limit
    pub fn acquire(&self) -> Permit<'_> {
        let mut state = self.lock();
        while state.active >= state.limit {
            state = match self.available.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        state.active += 1;
        Permit { governor: self }
    }

    fn release(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    /// Record a throttling response for an action.
    ///
    /// Returns the previous and new limit when this lowered it.
    pub fn record_throttle(&self, action_id: usize) -> Option<(usize, usize)> {
        self.record_throttle_at(action_id, Instant::now())
    }

    fn record_throttle_at(&self, action_id: usize, now: Instant) -> Option<(usize, usize)> {
        let mut state = self.lock();
        state.clean_streak = 0;
        state.throttles.push_back((now, action_id));
        while let Some((at, _)) = state.throttles.front() {
            if now.saturating_duration_since(*at) > self.config.window {
                state.throttles.pop_front();
            } else {
                break;
            }
        }

        let distinct: BTreeSet<usize> = state.throttles.iter().map(|(_, id)| *id).collect();
        if distinct.len() < self.config.throttle_threshold || state.limit <= self.config.floor {
            return None;
        }

        let previous = state.limit;
        state.limit = (state.limit / 2).max(self.config.floor);
        state.throttles.clear();
        state.last_change = now;
        log::warn!(
            "Sustained throttling across {} actions, lowering concurrency {} -> {}",
            distinct.len(),
            previous,
            state.limit
        );
        Some((previous, state.limit))
    }

    /// Record a call that completed without throttling.
    ///
    /// Returns the previous and new limit when this raised it.
    pub fn record_success(&self) -> Option<(usize, usize)> {
        self.record_success_at(Instant::now())
    }

    fn record_success_at(&self, now: Instant) -> Option<(usize, usize)> {
        let mut state = self.lock();
        state.clean_streak += 1;
        if state.limit >= self.ceiling
            || state.clean_streak < self.config.recovery_successes
            || now.saturating_duration_since(state.last_change) < self.config.cooldown
        {
            return None;
        }

        let previous = state.limit;
        state.limit += 1;
        state.clean_streak = 0;
        state.last_change = now;
        let current = state.limit;
        log::info!("Throttling subsided, raising concurrency to {current}");
        drop(state);
        self.available.notify_all();
        Some((previous, current))
    }
}

/// A held slot under the live limit, released on drop
#[derive(Debug)]
pub struct Permit<'a> {
    governor: &'a ConcurrencyGovernor,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.governor.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            floor: 1,
            throttle_threshold: 3,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
            recovery_successes: 4,
        }
    }

    #[test]
    fn test_same_action_throttles_do_not_downgrade() {
        let governor = ConcurrencyGovernor::new(8, config());
        let now = Instant::now();
        for _ in 0..10 {
            governor.record_throttle_at(7, now);
        }
        assert_eq!(governor.limit(), 8);
    }

    #[test]
    fn test_distinct_throttles_downgrade_toward_floor() {
        let governor = ConcurrencyGovernor::new(8, config());
        let now = Instant::now();

        assert_eq!(governor.record_throttle_at(0, now), None);
        assert_eq!(governor.record_throttle_at(1, now), None);
        assert_eq!(governor.record_throttle_at(2, now), Some((8, 4)));
        assert_eq!(governor.limit(), 4);

        for round in 1..=5 {
            for id in 0..3 {
                governor.record_throttle_at(id + round * 10, now);
            }
        }
        assert_eq!(governor.limit(), 1);
    }

    #[test]
    fn test_throttles_outside_window_are_forgotten() {
        let governor = ConcurrencyGovernor::new(8, config());
        let start = Instant::now();
        governor.record_throttle_at(1, start);
        governor.record_throttle_at(2, start);
        governor.record_throttle_at(3, start + Duration::from_secs(11));
        assert_eq!(governor.limit(), 8);
    }

    #[test]
    fn test_recovery_needs_cooldown_and_streak() {
        let governor = ConcurrencyGovernor::new(4, config());
        let start = Instant::now();
        for id in 0..3 {
            governor.record_throttle_at(id, start);
        }
        assert_eq!(governor.limit(), 2);

        // Streak complete but still cooling down
        for _ in 0..4 {
            governor.record_success_at(start + Duration::from_secs(1));
        }
        assert_eq!(governor.limit(), 2);

        let later = start + Duration::from_secs(6);
        for _ in 0..4 {
            governor.record_success_at(later);
        }
        assert_eq!(governor.limit(), 3);

        // A throttle resets the streak
        governor.record_throttle_at(99, later);
        for _ in 0..3 {
            governor.record_success_at(later + Duration::from_secs(10));
        }
        assert_eq!(governor.limit(), 3);
    }

    #[test]
    fn test_limit_never_exceeds_ceiling() {
        let governor = ConcurrencyGovernor::new(2, config());
        let later = Instant::now() + Duration::from_secs(60);
        for _ in 0..20 {
            governor.record_success_at(later);
        }
        assert_eq!(governor.limit(), 2);
    }

    #[test]
    fn test_permits_bound_active_workers() {
        let governor = Arc::new(ConcurrencyGovernor::new(2, config()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let governor = Arc::clone(&governor);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _permit = governor.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
