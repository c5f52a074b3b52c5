//! Execution engine - runs plans with bounded parallelism and retries
//!
//! Each user's unit runs sequentially on one worker so per-user ordering
//! holds; units run in parallel on a rayon pool. Remote calls take a permit
//! from the adaptive [`ConcurrencyGovernor`], and every resolved action is
//! appended to a single mutex-guarded result sink.

use crate::context::{CallRecord, Directory, ProgressCallback};
use crate::error::{Error, Result};
use crate::merge;
use crate::planner::{ExecutionPlan, PlanUnit};
use crate::retry::{self, LogCallback};
use crate::throttle::{AdaptiveConfig, ConcurrencyGovernor};
use crate::types::{
    Action, ActionKind, AttributeChange, AttributeWrite, ExecuteOptions, ExecutionResult, Outcome,
};
use chrono::Utc;
use rayon::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Reason recorded for every action of a dry run
pub const DRY_RUN: &str = "dry-run";
/// Reason recorded for actions refused after an earlier failure in the unit
pub const DEPENDENCY_FAILED: &str = "dependency failed";

type ResultSink = Arc<Mutex<Vec<(usize, ExecutionResult)>>>;

/// Execute a plan against a directory
///
/// # Arguments
/// * `plan` - The plan to run
/// * `directory` - Directory receiving the mutations
/// * `opts` - Dry run, concurrency, deletion confirmation and retry settings
/// * `progress` - Progress callback, invoked from worker threads
///
/// # Returns
/// One result per planned action, in plan order. Fails before dispatching
/// anything when the plan deletes users without a deletion confirmation.
pub fn execute(
    plan: &ExecutionPlan,
    directory: &dyn Directory,
    opts: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) -> Result<Vec<ExecutionResult>> {
    let deletions = plan.count(ActionKind::DeleteUser);
    if deletions > 0 && !opts.dry_run && opts.deletion.is_none() {
        return Err(Error::DeletionNotConfirmed { count: deletions });
    }

    progress.on_start(plan.units().len(), plan.action_count());

    let results = if opts.dry_run {
        dry_run(plan, progress)
    } else {
        execute_parallel(plan, directory, opts, progress)?
    };

    progress.on_finish();
    Ok(results)
}

/// Resolve every action as skipped without touching the directory
fn dry_run(plan: &ExecutionPlan, progress: &dyn ProgressCallback) -> Vec<ExecutionResult> {
    let mut results = Vec::with_capacity(plan.action_count());
    for unit in plan.units() {
        for action in unit.actions() {
            let result = resolved(action, skipped(DRY_RUN), 0);
            progress.on_action_complete(&result);
            results.push(result);
        }
        progress.on_unit_complete(unit.employee_id());
    }
    results
}

/// Run units in parallel using rayon
fn execute_parallel(
    plan: &ExecutionPlan,
    directory: &dyn Directory,
    opts: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) -> Result<Vec<ExecutionResult>> {
    let workers = opts.concurrency();
    let governor = ConcurrencyGovernor::new(
        workers,
        AdaptiveConfig {
            floor: opts.adaptive.floor.min(workers),
            ..opts.adaptive.clone()
        },
    );

    let mut offsets = Vec::with_capacity(plan.units().len());
    let mut next = 0;
    for unit in plan.units() {
        offsets.push(next);
        next += unit.actions().len();
    }

    let results: ResultSink = Arc::new(Mutex::new(Vec::with_capacity(next)));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::Other(format!("Failed to create thread pool: {e}")))?;

    let worker = UnitRunner {
        directory,
        opts,
        governor: &governor,
        progress,
        sink: &results,
    };

    pool.install(|| {
        plan.units()
            .par_iter()
            .zip(offsets.par_iter())
            .for_each(|(unit, offset)| worker.run(unit, *offset));
    });

    let mut collected = into_results(results)?;
    collected.sort_by_key(|(index, _)| *index);
    Ok(collected.into_iter().map(|(_, result)| result).collect())
}

struct UnitRunner<'a> {
    directory: &'a dyn Directory,
    opts: &'a ExecuteOptions,
    governor: &'a ConcurrencyGovernor,
    progress: &'a dyn ProgressCallback,
    sink: &'a ResultSink,
}

impl UnitRunner<'_> {
    /// Run one user's actions in order, short-circuiting on failed dependencies
    fn run(&self, unit: &PlanUnit, offset: usize) {
        let mut user_id = unit
            .actions()
            .first()
            .and_then(|a| a.key().user_id.clone());
        let mut dependency_failed = false;
        let mut delete_blocked = false;

        for (position, action) in unit.actions().iter().enumerate() {
            let index = offset + position;
            let blocked = dependency_failed
                || (delete_blocked && action.kind() == ActionKind::DeleteUser);

            let result = if blocked {
                log::info!("Skipping {action}: {DEPENDENCY_FAILED}");
                resolved(action, skipped(DEPENDENCY_FAILED), 0)
            } else {
                let (outcome, attempts, created) = self.run_action(action, user_id.as_deref(), index);
                if created.is_some() {
                    user_id = created;
                }
                resolved(action, outcome, attempts)
            };

            if result.outcome.is_failed() {
                match action.kind() {
                    ActionKind::CreateUser => dependency_failed = true,
                    ActionKind::RemoveMembership => delete_blocked = true,
                    _ => {}
                }
            }

            self.progress.on_action_complete(&result);
            push_result(self.sink, index, result);
        }

        self.progress.on_unit_complete(unit.employee_id());
    }

    /// Run one action with retries; returns the outcome, attempts and any created user id
    fn run_action(
        &self,
        action: &Action,
        user_id: Option<&str>,
        index: usize,
    ) -> (Outcome, u32, Option<String>) {
        let writes: Vec<AttributeWrite> = match action {
            Action::UpdateAttributes { changes, .. } => {
                changes.iter().map(AttributeChange::to_write).collect()
            }
            _ => Vec::new(),
        };
        if let Err(e) = merge::check_writes(&writes) {
            return (failed(action, &e), 0, None);
        }

        let needs_id = !matches!(action, Action::CreateUser { .. });
        let target = match (needs_id, user_id) {
            (true, None) => {
                let e = Error::Other(format!(
                    "no directory id known for {}",
                    action.key().username
                ));
                return (failed(action, &e), 0, None);
            }
            (_, id) => id.unwrap_or_default(),
        };

        let label = action.describe();
        let callback = LogCallback { operation: &label };
        let outcome = retry::with_retry(&self.opts.retry, &callback, |attempt| {
            let permit = self.governor.acquire();
            let started = Instant::now();
            let response = self.dispatch(action, target, &writes);
            let elapsed = started.elapsed();
            drop(permit);

            let throttled = matches!(&response, Err(e) if e.is_throttling());
            let change = match &response {
                Ok(_) => self.governor.record_success(),
                Err(_) if throttled => self.governor.record_throttle(index),
                Err(_) => None,
            };
            if let Some((previous, current)) = change {
                self.progress.on_concurrency_change(previous, current);
            }
            self.progress.on_call(&CallRecord {
                kind: action.kind(),
                attempt,
                elapsed,
                error: response.as_ref().err().map(Error::category),
                throttled,
            });
            response
        });

        let attempts = outcome.attempts;
        let result = match (action, outcome.result) {
            (Action::CreateUser { key, .. }, Err(conflict @ Error::Conflict { .. }))
                if attempts > 1 =>
            {
                self.adopt_created(&key.username, conflict)
            }
            (_, result) => result,
        };

        match result {
            Ok(created) => (Outcome::Succeeded, attempts, created),
            Err(e) => (failed(action, &e), attempts, None),
        }
    }

    /// A retried create that conflicts may have landed on an earlier attempt
    /// whose response was lost; adopt the user if it now exists
    fn adopt_created(&self, username: &str, conflict: Error) -> Result<Option<String>> {
        match self.directory.find_user_id(username) {
            Ok(Some(user_id)) => {
                log::info!("{username} exists after a retried create, continuing with {user_id}");
                Ok(Some(user_id))
            }
            Ok(None) => Err(conflict),
            Err(e) => {
                log::warn!("Could not look up {username} after a conflicting create: {e}");
                Err(conflict)
            }
        }
    }

    /// Issue the single remote call for an action
    fn dispatch(
        &self,
        action: &Action,
        user_id: &str,
        writes: &[AttributeWrite],
    ) -> Result<Option<String>> {
        let directory = self.directory;
        match action {
            Action::CreateUser { key, profile } => {
                directory.create_user(&key.username, profile).map(Some)
            }
            Action::UpdateAttributes { .. } => directory.update_user(user_id, writes).map(|()| None),
            Action::DeleteUser { .. } => directory.delete_user(user_id).map(|()| None),
            Action::AddMembership { group_id, .. } => {
                directory.add_membership(user_id, group_id).map(|()| None)
            }
            Action::RemoveMembership { group_id, .. } => {
                directory.remove_membership(user_id, group_id).map(|()| None)
            }
        }
    }
}

fn resolved(action: &Action, outcome: Outcome, attempts: u32) -> ExecutionResult {
    ExecutionResult {
        action: action.clone(),
        outcome,
        attempts,
        timestamp: Utc::now(),
    }
}

fn skipped(reason: &str) -> Outcome {
    Outcome::Skipped {
        reason: reason.to_string(),
    }
}

fn failed(action: &Action, error: &Error) -> Outcome {
    log::error!("{} failed: {}", action.describe(), error);
    Outcome::Failed {
        reason: error.to_string(),
        category: error.category(),
    }
}

fn push_result(results: &ResultSink, index: usize, result: ExecutionResult) {
    match results.lock() {
        Ok(mut locked) => locked.push((index, result)),
        Err(poisoned) => poisoned.into_inner().push((index, result)),
    }
}

fn into_results(results: ResultSink) -> Result<Vec<(usize, ExecutionResult)>> {
    let mutex = Arc::try_unwrap(results).map_err(|_| {
        Error::Other("Failed to collect execution results: shared result state".to_string())
    })?;

    match mutex.into_inner() {
        Ok(collected) => Ok(collected),
        Err(poisoned) => Ok(poisoned.into_inner()),
    }
}
