//! Progress display for plan execution.
//!
//! [`BarProgress`] drives an indicatif bar from the engine's worker threads;
//! [`LogProgress`] logs per-user completion when the bar is disabled.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{ExecutionResult, Outcome, ProgressCallback};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Progress bar counting resolved actions
pub struct BarProgress {
    bar: ProgressBar,
    tick: Duration,
}

impl BarProgress {
    pub fn new(tick: Duration) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            tick,
        }
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&self, units: usize, actions: usize) {
        self.bar.set_length(actions as u64);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_message(format!("{units} users"));
        self.bar.enable_steady_tick(self.tick);
    }

    fn on_action_complete(&self, result: &ExecutionResult) {
        if let Outcome::Failed { reason, .. } = &result.outcome {
            self.bar.suspend(|| {
                println!("  {} {} ({})", "✗".red(), result.action, reason);
            });
        }
        self.bar.inc(1);
    }

    fn on_unit_complete(&self, employee_id: &str) {
        self.bar.set_message(employee_id.to_string());
    }

    fn on_concurrency_change(&self, previous: usize, current: usize) {
        if current < previous {
            self.bar.suspend(|| {
                println!(
                    "  {} throttled, concurrency {previous} -> {current}",
                    "!".yellow()
                );
            });
        }
    }

    fn on_finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Log-only progress for `--no-progress` runs
#[derive(Default)]
pub struct LogProgress {
    total: AtomicUsize,
    done: AtomicUsize,
}

impl ProgressCallback for LogProgress {
    fn on_start(&self, units: usize, actions: usize) {
        self.total.store(units, Ordering::Relaxed);
        log::info!("Executing {actions} actions for {units} users");
    }

    fn on_action_complete(&self, _result: &ExecutionResult) {}

    fn on_unit_complete(&self, employee_id: &str) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!(
            "[{done}/{}] {employee_id} done",
            self.total.load(Ordering::Relaxed)
        );
    }

    fn on_concurrency_change(&self, previous: usize, current: usize) {
        log::info!("Concurrency {previous} -> {current}");
    }

    fn on_finish(&self) {
        log::info!("Execution finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reconcile::{Action, UserKey};

    fn result(outcome: Outcome) -> ExecutionResult {
        ExecutionResult {
            action: Action::DeleteUser {
                key: UserKey {
                    employee_id: "E1".to_string(),
                    username: "E1@corp-saml.com".to_string(),
                    user_id: Some("u-1".to_string()),
                },
            },
            outcome,
            attempts: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_bar_counts_actions() {
        let progress = BarProgress::new(Duration::from_millis(100));
        progress.bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        progress.on_start(1, 2);
        progress.bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());

        progress.on_action_complete(&result(Outcome::Succeeded));
        progress.on_action_complete(&result(Outcome::Skipped {
            reason: "dry-run".to_string(),
        }));
        progress.on_unit_complete("E1");

        assert_eq!(progress.bar.position(), 2);
        assert_eq!(progress.bar.length(), Some(2));
        progress.on_finish();
        assert!(progress.bar.is_finished());
    }

    #[test]
    fn test_log_progress_counts_units() {
        let progress = LogProgress::default();
        progress.on_start(2, 4);
        progress.on_unit_complete("E1");
        progress.on_unit_complete("E2");
        assert_eq!(progress.done.load(Ordering::Relaxed), 2);
        progress.on_finish();
    }
}
