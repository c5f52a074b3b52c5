//! `process`: reconcile the directory with a roster file
//!
//! load → validate → connect → fetch → plan → confirm → execute → verify →
//! report. Anything that goes wrong before execution aborts with exit code 2
//! and no changes made.

use anyhow::{Context as _, Result};
use chrono::Local;
use colored::Colorize;
use dialoguer::Input;
use identitystore::IdentityStoreClient;
use reconcile::{
    ActionKind, ActualStateSource, DeletionConfirmation, ExecuteOptions, ExecuteSummary,
    ExecutionPlan, Mode, ProgressCallback, Reconciler, ReconcilerConfig, DELETE_TOKEN,
};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use crate::Context;
use crate::cli::ProcessArgs;
use crate::config::Config;
use crate::directory::IdentityCenterDirectory;
use crate::loader;
use crate::metrics::{Instrumented, PerformanceReport, Phase, PhaseClock};
use crate::progress::{BarProgress, LogProgress};
use crate::report::{self, RunRecord};
use crate::ui;
use crate::validate;

/// Token an operator types to start a sync run
pub const SYNC_TOKEN: &str = "SYNC";
/// Token an operator types to start an attribute upgrade run
pub const UPGRADE_TOKEN: &str = "UPGRADE";

const STEPS: usize = 6;
/// Planned actions listed without `-v`
const MAX_LISTED_ACTIONS: usize = 50;

pub fn run(ctx: &Context, config: &Config, args: &ProcessArgs) -> Result<ExitCode> {
    let started_at = Local::now();
    let clock = Instant::now();
    let mut phases = PhaseClock::start();
    let mode = args.mode();

    let problems = config.validate();
    if !problems.is_empty() {
        ui::error("Invalid configuration:");
        for problem in &problems {
            ui::dim(problem);
        }
        return Ok(ExitCode::from(2));
    }

    ui::header(&format!(
        "rostersync: {mode}{}",
        if args.dry_run { " (dry run)" } else { "" }
    ));

    // 1. Load
    ui::step(1, STEPS, &format!("Loading {}", args.file.display()));
    let roster = loader::load(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    ui::kv("Rows", &roster.rows.len().to_string());
    ui::kv("Encoding", roster.encoding);
    phases.lap(Phase::Load);

    // 2. Validate
    ui::step(2, STEPS, "Validating roster");
    let validation = validate::validate(&roster.rows, &config.validation);
    let mut warnings: Vec<String> = roster
        .skipped
        .iter()
        .map(|s| format!("row {}: skipped, {}", s.row, s.reason))
        .collect();
    warnings.extend(validation.warnings.iter().map(ToString::to_string));
    for warning in &warnings {
        ui::warn(warning);
    }
    if !validation.is_valid() {
        ui::error(&format!(
            "{} validation errors, nothing was changed:",
            validation.errors.len()
        ));
        for issue in &validation.errors {
            ui::dim(&issue.to_string());
        }
        return Ok(ExitCode::from(2));
    }
    ui::success(&format!("{} users valid", validation.users.len()));
    phases.lap(Phase::Validate);

    // 3. Connect
    ui::step(3, STEPS, "Connecting to IAM Identity Center");
    let client = IdentityStoreClient::connect(&config.client_settings())
        .context("Failed to connect to IAM Identity Center")?;
    let directory = IdentityCenterDirectory::new(client, &config.group_names())?;
    ui::kv("Identity store", directory.client().identity_store_id());
    phases.lap(Phase::Connect);

    // 4. Plan
    ui::step(4, STEPS, "Fetching directory state and planning");
    let actual = directory
        .fetch_users()
        .context("Failed to fetch directory users")?;
    phases.lap(Phase::Fetch);
    let reconciler = Reconciler::new(ReconcilerConfig {
        template: config.username_template()?,
        groups: directory.groups().clone(),
        format: config.attribute_format(),
    });
    let reconciliation = reconciler.reconcile(&validation.users, &actual, mode)?;
    if !reconciliation.rejected.is_empty() {
        ui::error("Some users could not be planned, nothing was changed:");
        for rejection in &reconciliation.rejected {
            ui::dim(&rejection.reason);
        }
        return Ok(ExitCode::from(2));
    }
    let plan = reconciliation.plan;
    let listed = if ctx.verbose > 0 {
        usize::MAX
    } else {
        MAX_LISTED_ACTIONS
    };
    print_plan(&plan, actual.len(), listed);
    phases.lap(Phase::Plan);

    // 5. Confirm and execute
    ui::step(5, STEPS, "Executing");
    let workers = config.workers(args.max_workers);
    if let Some(requested) = args.max_workers
        && requested != workers
    {
        ui::warn(&format!("--max-workers {requested} clamped to {workers}"));
    }

    let deletion = if plan.is_empty() || args.dry_run {
        None
    } else {
        match confirm(mode, &plan)? {
            Some(deletion) => deletion,
            None => {
                ui::warn("Cancelled, nothing was changed");
                return Ok(ExitCode::SUCCESS);
            }
        }
    };
    phases.skip();

    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        concurrency: workers,
        deletion,
        retry: config.retry_policy(),
        adaptive: config.adaptive(),
    };
    let bar;
    let log_progress;
    let progress: &dyn ProgressCallback = if args.no_progress || ctx.quiet {
        log_progress = LogProgress::default();
        &log_progress
    } else {
        bar = BarProgress::new(Duration::from_millis(
            config.performance.progress_update_interval.max(1),
        ));
        &bar
    };
    let instrumented = Instrumented::new(progress);
    let results = reconcile::execute(&plan, &directory, &opts, &instrumented)?;
    phases.lap(Phase::Execute);
    let summary = ExecuteSummary::from_results(&results);
    print_summary(&summary, clock.elapsed());
    let calls = instrumented.calls();

    // 6. Verify and report
    ui::step(6, STEPS, "Verifying and writing reports");
    let verification = if args.dry_run || plan.is_empty() {
        None
    } else {
        match reconcile::verify(&validation.users, &plan, &results, &directory, &reconciler) {
            Ok(report) => {
                print_verification(&report);
                Some(report)
            }
            Err(e) => {
                ui::warn(&format!("Verification failed: {e}"));
                None
            }
        }
    };
    phases.lap(Phase::Verify);

    let performance = PerformanceReport::new(&phases, calls, plan.units().len(), workers);
    log::info!("Performance: {}", performance.summary_line());
    if ctx.verbose > 0 && !args.dry_run {
        print_performance(&performance);
    }

    let record = RunRecord {
        mode,
        dry_run: args.dry_run,
        source: args.file.display().to_string(),
        started_at,
        duration: clock.elapsed(),
        workers,
        plan,
        results,
        rejected: reconciliation.rejected,
        warnings,
        verification,
        performance,
    };
    match report::write_reports(&record, &config.reports_dir(), config.report_timeout()) {
        Ok(written) => {
            if written.simplified {
                ui::warn("Full reports could not be generated; wrote a simplified summary");
            }
            for path in &written.paths {
                ui::kv("Report", &path.display().to_string());
            }
        }
        Err(e) => ui::warn(&format!("Could not write reports: {e:#}")),
    }

    Ok(exit_code(&summary))
}

/// 1 when any action failed, 0 otherwise
pub fn exit_code(summary: &ExecuteSummary) -> ExitCode {
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

/// Token that starts a run in `mode`, if the mode asks for one
pub const fn start_token(mode: Mode) -> Option<&'static str> {
    match mode {
        Mode::Sync => Some(SYNC_TOKEN),
        Mode::Upgrade => Some(UPGRADE_TOKEN),
        Mode::CreateOnly | Mode::Remove => None,
    }
}

/// Ask for the tokens the run needs.
///
/// Returns `None` when the operator declines, otherwise the deletion
/// confirmation (present only if `DELETE` was typed for a plan that deletes).
fn confirm(mode: Mode, plan: &ExecutionPlan) -> Result<Option<Option<DeletionConfirmation>>> {
    if let Some(token) = start_token(mode) {
        println!();
        ui::warn(&format!(
            "This will apply {} changes to the directory",
            plan.action_count()
        ));
        if !token_matches(&prompt_token(token)?, token) {
            return Ok(None);
        }
    }

    if !plan.has_deletions() {
        return Ok(Some(None));
    }

    println!();
    ui::warn(&format!(
        "{} users will be {}",
        plan.count(ActionKind::DeleteUser),
        "permanently deleted".red().bold()
    ));
    Ok(DeletionConfirmation::from_token(&prompt_token(DELETE_TOKEN)?).map(Some))
}

fn prompt_token(token: &str) -> Result<String> {
    Input::<String>::new()
        .with_prompt(format!("Type {token} to continue"))
        .allow_empty(true)
        .interact_text()
        .context("Failed to read confirmation")
}

fn token_matches(input: &str, token: &str) -> bool {
    input.trim() == token
}

// ============================================================================
// Output
// ============================================================================

fn print_plan(plan: &ExecutionPlan, existing: usize, listed: usize) {
    ui::kv("Directory users", &existing.to_string());
    if plan.is_empty() {
        ui::success("Directory already matches the roster");
        return;
    }

    ui::section("Plan");
    for kind in ActionKind::ALL {
        let count = plan.count(kind);
        if count > 0 {
            ui::kv(kind.name(), &count.to_string());
        }
    }
    println!();
    for action in plan.actions().take(listed) {
        ui::dim(&action.describe());
    }
    if plan.action_count() > listed {
        ui::dim(&format!("... and {} more (-v lists all)", plan.action_count() - listed));
    }
}

fn print_summary(summary: &ExecuteSummary, elapsed: Duration) {
    ui::section("Summary");
    ui::kv("Succeeded", &summary.succeeded.to_string());
    ui::kv("Failed", &summary.failed.to_string());
    ui::kv("Skipped", &summary.skipped.to_string());
    ui::kv("Success rate", &ui::percent(summary.success_rate()));
    ui::kv("Elapsed", &ui::format_duration(elapsed));

    if summary.is_success() {
        ui::success("All actions succeeded");
    } else {
        ui::error(&format!("{} actions failed", summary.failed));
    }
}

fn print_performance(performance: &PerformanceReport) {
    let calls = &performance.calls;
    ui::kv("Directory calls", &calls.total.calls.to_string());
    ui::kv("Throttled", &calls.total.throttled.to_string());
    ui::kv("Retries", &calls.total.retries.to_string());
    ui::kv(
        "Concurrency",
        &format!(
            "{} -> {} (lowest {})",
            performance.workers,
            calls.final_limit(performance.workers),
            calls.lowest_limit(performance.workers)
        ),
    );
}

fn print_verification(report: &reconcile::VerificationReport) {
    ui::kv("Consistent", &report.consistent().to_string());
    ui::kv("Drifted", &report.drifted().to_string());
    ui::kv("Missing", &report.missing().to_string());
    if report.is_consistent() {
        ui::success("Directory matches the roster");
    } else {
        ui::warn(&format!(
            "Consistency {}; see the verification report",
            ui::percent(report.consistency_rate())
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reconcile::{Action, ErrorCategory, ExecutionResult, Outcome, UserKey};

    fn result(outcome: Outcome) -> ExecutionResult {
        ExecutionResult {
            action: Action::DeleteUser {
                key: UserKey {
                    employee_id: "E1".to_string(),
                    username: "E1@haier-saml.com".to_string(),
                    user_id: Some("u-1".to_string()),
                },
            },
            outcome,
            attempts: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_exit_code_reflects_failures() {
        let ok = ExecuteSummary::from_results(&[
            result(Outcome::Succeeded),
            result(Outcome::Skipped {
                reason: reconcile::DRY_RUN.to_string(),
            }),
        ]);
        assert_eq!(exit_code(&ok), ExitCode::SUCCESS);

        let failed = ExecuteSummary::from_results(&[
            result(Outcome::Succeeded),
            result(Outcome::Failed {
                reason: "denied".to_string(),
                category: ErrorCategory::Permission,
            }),
        ]);
        assert_eq!(exit_code(&failed), ExitCode::from(1));
    }

    #[test]
    fn test_token_matching() {
        assert!(token_matches(" SYNC\n", SYNC_TOKEN));
        assert!(!token_matches("sync", SYNC_TOKEN));
        assert!(!token_matches("", DELETE_TOKEN));
    }

    #[test]
    fn test_start_token_per_mode() {
        assert_eq!(start_token(Mode::Sync), Some(SYNC_TOKEN));
        assert_eq!(start_token(Mode::Upgrade), Some(UPGRADE_TOKEN));
        assert_eq!(start_token(Mode::CreateOnly), None);
        assert_eq!(start_token(Mode::Remove), None);
    }
}
