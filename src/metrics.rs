//! Run performance metrics
//!
//! Phase timings come from a [`PhaseClock`] lapped by the `process` command.
//! Directory call statistics and concurrency changes are collected by
//! [`Instrumented`], a progress callback that wraps the visible one.

use reconcile::{ActionKind, CallRecord, ExecutionResult, ProgressCallback};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Stages of a `process` run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Load,
    Validate,
    Connect,
    Fetch,
    Plan,
    Execute,
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Validate => "validate",
            Self::Connect => "connect",
            Self::Fetch => "fetch",
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Times consecutive phases
#[derive(Debug)]
pub struct PhaseClock {
    mark: Instant,
    phases: Vec<(Phase, Duration)>,
}

impl PhaseClock {
    pub fn start() -> Self {
        Self {
            mark: Instant::now(),
            phases: Vec::new(),
        }
    }

    /// Record the time since the previous lap as `phase`
    pub fn lap(&mut self, phase: Phase) {
        let now = Instant::now();
        self.phases.push((phase, now.duration_since(self.mark)));
        self.mark = now;
    }

    /// Restart from now without recording, e.g. after waiting for the operator
    pub fn skip(&mut self) {
        self.mark = Instant::now();
    }

    pub fn phases(&self) -> &[(Phase, Duration)] {
        &self.phases
    }
}

/// Call counts for one action kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallTally {
    pub calls: usize,
    pub failed: usize,
    pub throttled: usize,
    /// Calls beyond the first attempt of an action
    pub retries: usize,
    pub time: Duration,
}

impl CallTally {
    fn add(&mut self, call: &CallRecord) {
        self.calls += 1;
        self.time += call.elapsed;
        if !call.is_success() {
            self.failed += 1;
        }
        if call.is_throttled() {
            self.throttled += 1;
        }
        if call.attempt > 1 {
            self.retries += 1;
        }
    }

    fn merge(&mut self, other: &Self) {
        self.calls += other.calls;
        self.failed += other.failed;
        self.throttled += other.throttled;
        self.retries += other.retries;
        self.time += other.time;
    }

    pub fn succeeded(&self) -> usize {
        self.calls - self.failed
    }

    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            return 100.0;
        }
        self.succeeded() as f64 / self.calls as f64 * 100.0
    }

    pub fn average(&self) -> Duration {
        u32::try_from(self.calls)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| self.time / n)
    }
}

#[derive(Debug, Default)]
struct Collected {
    by_kind: BTreeMap<ActionKind, CallTally>,
    slowest: Duration,
    changes: Vec<(usize, usize)>,
}

/// Progress callback that records call statistics before forwarding
pub struct Instrumented<'a> {
    inner: &'a dyn ProgressCallback,
    collected: Mutex<Collected>,
}

impl<'a> Instrumented<'a> {
    pub fn new(inner: &'a dyn ProgressCallback) -> Self {
        Self {
            inner,
            collected: Mutex::new(Collected::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collected> {
        match self.collected.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of everything recorded so far
    pub fn calls(&self) -> CallMetrics {
        let collected = self.lock();
        let mut total = CallTally::default();
        for tally in collected.by_kind.values() {
            total.merge(tally);
        }
        CallMetrics {
            total,
            by_kind: collected.by_kind.clone(),
            slowest: collected.slowest,
            concurrency_changes: collected.changes.clone(),
        }
    }
}

impl ProgressCallback for Instrumented<'_> {
    fn on_start(&self, units: usize, actions: usize) {
        self.inner.on_start(units, actions);
    }

    fn on_action_complete(&self, result: &ExecutionResult) {
        self.inner.on_action_complete(result);
    }

    fn on_unit_complete(&self, employee_id: &str) {
        self.inner.on_unit_complete(employee_id);
    }

    fn on_finish(&self) {
        self.inner.on_finish();
    }

    fn on_call(&self, call: &CallRecord) {
        let mut collected = self.lock();
        collected.by_kind.entry(call.kind).or_default().add(call);
        collected.slowest = collected.slowest.max(call.elapsed);
        drop(collected);
        self.inner.on_call(call);
    }

    fn on_concurrency_change(&self, previous: usize, current: usize) {
        self.lock().changes.push((previous, current));
        self.inner.on_concurrency_change(previous, current);
    }
}

/// Directory calls made while executing a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMetrics {
    pub total: CallTally,
    pub by_kind: BTreeMap<ActionKind, CallTally>,
    pub slowest: Duration,
    /// `(previous, current)` live concurrency limits, in order
    pub concurrency_changes: Vec<(usize, usize)>,
}

impl CallMetrics {
    pub fn downgrades(&self) -> usize {
        self.concurrency_changes
            .iter()
            .filter(|(previous, current)| current < previous)
            .count()
    }

    pub fn upgrades(&self) -> usize {
        self.concurrency_changes.len() - self.downgrades()
    }

    /// Live limit at the end of the run
    pub fn final_limit(&self, workers: usize) -> usize {
        self.concurrency_changes
            .last()
            .map_or(workers, |(_, current)| *current)
    }

    /// Lowest live limit during the run
    pub fn lowest_limit(&self, workers: usize) -> usize {
        self.concurrency_changes
            .iter()
            .map(|(_, current)| *current)
            .fold(workers, usize::min)
    }
}

/// Everything the execution record's performance section shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceReport {
    pub phases: Vec<(Phase, Duration)>,
    pub calls: CallMetrics,
    /// Users whose unit ran
    pub users: usize,
    pub workers: usize,
}

impl PerformanceReport {
    pub fn new(clock: &PhaseClock, calls: CallMetrics, users: usize, workers: usize) -> Self {
        Self {
            phases: clock.phases().to_vec(),
            calls,
            users,
            workers,
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<Duration> {
        self.phases
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, d)| *d)
            .reduce(|a, b| a + b)
    }

    /// Users processed per second of execution
    pub fn users_per_second(&self) -> f64 {
        match self.phase(Phase::Execute) {
            Some(d) if !d.is_zero() => self.users as f64 / d.as_secs_f64(),
            _ => 0.0,
        }
    }

    /// One-line summary for the log
    pub fn summary_line(&self) -> String {
        format!(
            "{} directory calls ({} failed, {} throttled, {} retries), avg {} ms, {:.1} users/s, {} concurrency downgrades",
            self.calls.total.calls,
            self.calls.total.failed,
            self.calls.total.throttled,
            self.calls.total.retries,
            self.calls.total.average().as_millis(),
            self.users_per_second(),
            self.calls.downgrades()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{ErrorCategory, NoProgress};

    fn call(kind: ActionKind, attempt: u32, millis: u64, error: Option<ErrorCategory>) -> CallRecord {
        CallRecord {
            kind,
            attempt,
            elapsed: Duration::from_millis(millis),
            error,
            throttled: false,
        }
    }

    #[test]
    fn test_phase_clock_laps() {
        let mut clock = PhaseClock::start();
        clock.lap(Phase::Load);
        clock.skip();
        clock.lap(Phase::Execute);
        clock.lap(Phase::Execute);

        let phases: Vec<Phase> = clock.phases().iter().map(|(p, _)| *p).collect();
        assert_eq!(phases, vec![Phase::Load, Phase::Execute, Phase::Execute]);

        let report = PerformanceReport::new(&clock, CallMetrics::default(), 0, 1);
        assert!(report.phase(Phase::Execute).is_some());
        assert_eq!(report.phase(Phase::Verify), None);
    }

    #[test]
    fn test_instrumented_tallies_calls() {
        let progress = Instrumented::new(&NoProgress);
        progress.on_call(&call(ActionKind::CreateUser, 1, 40, Some(ErrorCategory::Transient)));
        progress.on_call(&CallRecord {
            throttled: true,
            ..call(ActionKind::CreateUser, 2, 10, Some(ErrorCategory::Transient))
        });
        progress.on_call(&call(ActionKind::CreateUser, 3, 30, None));
        progress.on_call(&call(ActionKind::AddMembership, 1, 20, None));
        progress.on_concurrency_change(5, 2);
        progress.on_concurrency_change(2, 3);

        let calls = progress.calls();

        assert_eq!(calls.total.calls, 4);
        assert_eq!(calls.total.failed, 2);
        assert_eq!(calls.total.throttled, 1);
        assert_eq!(calls.total.retries, 2);
        assert_eq!(calls.total.average(), Duration::from_millis(25));
        assert_eq!(calls.slowest, Duration::from_millis(40));
        assert_eq!(calls.by_kind[&ActionKind::CreateUser].calls, 3);
        assert_eq!(calls.by_kind[&ActionKind::AddMembership].success_rate(), 100.0);
        assert_eq!(calls.downgrades(), 1);
        assert_eq!(calls.upgrades(), 1);
        assert_eq!(calls.final_limit(5), 3);
        assert_eq!(calls.lowest_limit(5), 2);
    }

    #[test]
    fn test_users_per_second() {
        let report = PerformanceReport {
            phases: vec![
                (Phase::Fetch, Duration::from_secs(1)),
                (Phase::Execute, Duration::from_secs(4)),
            ],
            users: 10,
            workers: 5,
            ..PerformanceReport::default()
        };
        assert!((report.users_per_second() - 2.5).abs() < f64::EPSILON);
        assert!(report.summary_line().contains("2.5 users/s"));

        let idle = PerformanceReport::default();
        assert!(idle.users_per_second().abs() < f64::EPSILON);
        assert_eq!(idle.calls.final_limit(4), 4);
    }
}
