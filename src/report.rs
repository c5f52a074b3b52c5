//! Run reports
//!
//! After a run the following files are written to the reports directory:
//!
//! - `{sync,update,delete}_report_<ts>.md`: what was planned and how it went
//! - `execution_record_<ts>.md`: every resolved action with per-kind stats
//!   and run performance
//! - `verification_report_<ts>.md`: drift found after the run (when verified)
//! - `failed_users_<ts>.csv`: failed actions with a suggested fix
//!
//! Rendering runs on a separate thread bounded by the report timeout; when it
//! times out or fails, a simplified summary is written instead.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use reconcile::{
    Action, ActionKind, ErrorCategory, ExecuteSummary, ExecutionPlan, ExecutionResult, Mode,
    Outcome, Rejection, Verdict, VerificationReport,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::metrics::PerformanceReport;
use crate::ui;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Longest failure reason shown in markdown tables
const MAX_REASON_CHARS: usize = 120;

/// Everything known about a finished run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub mode: Mode,
    pub dry_run: bool,
    /// Roster file the run was driven by
    pub source: String,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub workers: usize,
    pub plan: ExecutionPlan,
    pub results: Vec<ExecutionResult>,
    pub rejected: Vec<Rejection>,
    pub warnings: Vec<String>,
    pub verification: Option<VerificationReport>,
    pub performance: PerformanceReport,
}

impl RunRecord {
    pub fn summary(&self) -> ExecuteSummary {
        ExecuteSummary::from_results(&self.results)
    }

    fn stamp(&self) -> String {
        self.started_at.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Report name prefix for a mode
pub fn report_prefix(mode: Mode) -> &'static str {
    match mode {
        Mode::Sync => "sync_report",
        Mode::CreateOnly => "update_report",
        Mode::Remove => "delete_report",
        Mode::Upgrade => "upgrade_report",
    }
}

/// Files produced by [`write_reports`]
#[derive(Debug, Clone, Default)]
pub struct WrittenReports {
    pub paths: Vec<PathBuf>,
    /// Full rendering failed or timed out and only a summary was written
    pub simplified: bool,
}

/// Write every report, falling back to a simplified one after `timeout`
pub fn write_reports(record: &RunRecord, dir: &Path, timeout: Duration) -> Result<WrittenReports> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Could not create report directory {}", dir.display()))?;

    let (tx, rx) = mpsc::channel();
    let owned = record.clone();
    let target = dir.to_path_buf();
    thread::spawn(move || {
        // The receiver is gone after a timeout
        let _ = tx.send(write_full(&owned, &target));
    });

    let failure = match rx.recv_timeout(timeout) {
        Ok(Ok(paths)) => {
            return Ok(WrittenReports {
                paths,
                simplified: false,
            });
        }
        Ok(Err(e)) => format!("{e:#}"),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            format!("timed out after {}", ui::format_duration(timeout))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => "report thread panicked".to_string(),
    };

    log::warn!("Report generation failed ({failure}); writing simplified report");
    let path = write_simplified(record, dir)?;
    Ok(WrittenReports {
        paths: vec![path],
        simplified: true,
    })
}

fn write_full(record: &RunRecord, dir: &Path) -> Result<Vec<PathBuf>> {
    let stamp = record.stamp();
    let mut paths = Vec::new();

    let run_path = dir.join(format!("{}_{stamp}.md", report_prefix(record.mode)));
    write_file(&run_path, &render_run_report(record))?;
    paths.push(run_path);

    let record_path = dir.join(format!("execution_record_{stamp}.md"));
    write_file(&record_path, &render_execution_record(record))?;
    paths.push(record_path);

    if let Some(verification) = &record.verification {
        let path = dir.join(format!("verification_report_{stamp}.md"));
        write_file(&path, &render_verification(verification))?;
        paths.push(path);
    }

    if record.results.iter().any(|r| r.outcome.is_failed()) {
        let path = dir.join(format!("failed_users_{stamp}.csv"));
        write_failed_csv(&record.results, &path)?;
        paths.push(path);
    }

    for path in &paths {
        log::info!("Wrote {}", path.display());
    }
    Ok(paths)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Could not write {}", path.display()))
}

/// Minimal summary written when full rendering is not possible
pub fn write_simplified(record: &RunRecord, dir: &Path) -> Result<PathBuf> {
    let summary = record.summary();
    let mut out = String::new();
    let _ = writeln!(out, "# {} (simplified)\n", title(record.mode));
    let _ = writeln!(out, "- Started: {}", record.started_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "- Source file: {}", record.source);
    let _ = writeln!(out, "- Planned actions: {}", record.plan.action_count());
    let _ = writeln!(out, "- Succeeded: {}", summary.succeeded);
    let _ = writeln!(out, "- Failed: {}", summary.failed);
    let _ = writeln!(out, "- Skipped: {}", summary.skipped);
    let _ = writeln!(out, "- Success rate: {}", ui::percent(summary.success_rate()));

    let path = dir.join(format!(
        "{}_{}_simplified.md",
        report_prefix(record.mode),
        record.stamp()
    ));
    write_file(&path, &out)?;
    Ok(path)
}

// ============================================================================
// Markdown
// ============================================================================

fn title(mode: Mode) -> &'static str {
    match mode {
        Mode::Sync => "User Sync Report",
        Mode::CreateOnly => "User Update Report",
        Mode::Remove => "User Deletion Report",
        Mode::Upgrade => "User Attribute Upgrade Report",
    }
}

/// Escape table cell content
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Succeeded => "succeeded".to_string(),
        Outcome::Failed { reason, .. } => {
            format!("failed: {}", ui::truncate(reason, MAX_REASON_CHARS))
        }
        Outcome::Skipped { reason } => format!("skipped ({reason})"),
    }
}

/// Run overview: plan, rejections, warnings and per-action results
pub fn render_run_report(record: &RunRecord) -> String {
    let summary = record.summary();
    let mut out = String::new();

    let _ = writeln!(out, "# {}\n", title(record.mode));
    let _ = writeln!(out, "- Started: {}", record.started_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "- Duration: {}", ui::format_duration(record.duration));
    let _ = writeln!(out, "- Source file: {}", record.source);
    let _ = writeln!(out, "- Mode: {}", record.mode);
    let _ = writeln!(out, "- Dry run: {}", if record.dry_run { "yes" } else { "no" });
    let _ = writeln!(out, "- Workers: {}", record.workers);

    let _ = writeln!(out, "\n## Plan\n");
    let _ = writeln!(out, "| Action | Planned |");
    let _ = writeln!(out, "|--------|---------|");
    for kind in ActionKind::ALL {
        let _ = writeln!(out, "| {kind} | {} |", record.plan.count(kind));
    }
    let _ = writeln!(
        out,
        "\n{} actions for {} users.",
        record.plan.action_count(),
        record.plan.units().len()
    );

    let _ = writeln!(out, "\n## Results\n");
    let _ = writeln!(out, "- Succeeded: {}", summary.succeeded);
    let _ = writeln!(out, "- Failed: {}", summary.failed);
    let _ = writeln!(out, "- Skipped: {}", summary.skipped);
    let _ = writeln!(out, "- Success rate: {}", ui::percent(summary.success_rate()));

    if !record.rejected.is_empty() {
        let _ = writeln!(out, "\n## Rejected Rows\n");
        for rejection in &record.rejected {
            let row = rejection.row.map_or_else(|| "-".to_string(), |r| r.to_string());
            let _ = writeln!(out, "- row {row}: {}", rejection.reason);
        }
    }

    if !record.warnings.is_empty() {
        let _ = writeln!(out, "\n## Warnings\n");
        for warning in &record.warnings {
            let _ = writeln!(out, "- {warning}");
        }
    }

    if !record.results.is_empty() {
        let _ = writeln!(out, "\n## Actions\n");
        let _ = writeln!(out, "| Employee ID | Action | Result |");
        let _ = writeln!(out, "|-------------|--------|--------|");
        for result in &record.results {
            let _ = writeln!(
                out,
                "| {} | {} | {} |",
                cell(&result.action.key().employee_id),
                cell(&result.action.describe()),
                cell(&outcome_label(&result.outcome))
            );
        }
    }

    out
}

/// Successful and failed actions with per-kind statistics
pub fn render_execution_record(record: &RunRecord) -> String {
    let summary = record.summary();
    let mut out = String::new();

    let _ = writeln!(out, "# Execution Record\n");
    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "- Total actions: {}", summary.total());
    let _ = writeln!(out, "- Succeeded: {}", summary.succeeded);
    let _ = writeln!(out, "- Failed: {}", summary.failed);
    let _ = writeln!(out, "- Skipped: {}", summary.skipped);
    let _ = writeln!(out, "- Success rate: {}", ui::percent(summary.success_rate()));

    let succeeded: Vec<&ExecutionResult> = record
        .results
        .iter()
        .filter(|r| r.outcome.is_success())
        .collect();
    if !succeeded.is_empty() {
        let _ = writeln!(out, "\n## Successful Actions\n");
        let _ = writeln!(out, "| Username | Operation | Message | Time |");
        let _ = writeln!(out, "|----------|-----------|---------|------|");
        for result in succeeded {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                cell(&result.action.key().username),
                result.action.kind(),
                cell(&result.action.describe()),
                result.timestamp.with_timezone(&Local).format("%H:%M:%S")
            );
        }
    }

    let failed: Vec<&ExecutionResult> = record
        .results
        .iter()
        .filter(|r| r.outcome.is_failed())
        .collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "\n## Failed Actions\n");
        let _ = writeln!(out, "| Username | Operation | Error | Attempts | Time |");
        let _ = writeln!(out, "|----------|-----------|-------|----------|------|");
        for result in failed {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(&result.action.key().username),
                result.action.kind(),
                cell(&outcome_label(&result.outcome)),
                result.attempts,
                result.timestamp.with_timezone(&Local).format("%H:%M:%S")
            );
        }
    }

    if !summary.by_kind.is_empty() {
        let _ = writeln!(out, "\n## By Operation\n");
        let _ = writeln!(out, "| Operation | Succeeded | Failed | Skipped | Total | Success Rate |");
        let _ = writeln!(out, "|-----------|-----------|--------|---------|-------|--------------|");
        for (kind, tally) in &summary.by_kind {
            let attempted = tally.succeeded + tally.failed;
            #[allow(clippy::cast_precision_loss)]
            let rate = if attempted == 0 {
                100.0
            } else {
                tally.succeeded as f64 / attempted as f64 * 100.0
            };
            let _ = writeln!(
                out,
                "| {kind} | {} | {} | {} | {} | {} |",
                tally.succeeded,
                tally.failed,
                tally.skipped,
                tally.total(),
                ui::percent(rate)
            );
        }
    }

    render_performance(&mut out, &record.performance);
    out
}

fn render_performance(out: &mut String, performance: &PerformanceReport) {
    let calls = &performance.calls;
    let _ = writeln!(out, "\n## Performance\n");
    let _ = writeln!(out, "- Directory calls: {}", calls.total.calls);
    let _ = writeln!(
        out,
        "- Call success rate: {}",
        ui::percent(calls.total.success_rate())
    );
    let _ = writeln!(out, "- Throttled calls: {}", calls.total.throttled);
    let _ = writeln!(out, "- Retries: {}", calls.total.retries);
    let _ = writeln!(
        out,
        "- Average response time: {} ms",
        calls.total.average().as_millis()
    );
    let _ = writeln!(out, "- Slowest call: {} ms", calls.slowest.as_millis());
    let _ = writeln!(out, "- Users per second: {:.2}", performance.users_per_second());
    let _ = writeln!(
        out,
        "- Concurrency: {} workers, lowest {}, final {} ({} downgrades, {} upgrades)",
        performance.workers,
        calls.lowest_limit(performance.workers),
        calls.final_limit(performance.workers),
        calls.downgrades(),
        calls.upgrades()
    );

    if !performance.phases.is_empty() {
        let _ = writeln!(out, "\n| Phase | Duration |");
        let _ = writeln!(out, "|-------|----------|");
        for (phase, duration) in &performance.phases {
            let _ = writeln!(out, "| {phase} | {} |", ui::format_duration(*duration));
        }
    }

    if !calls.by_kind.is_empty() {
        let _ = writeln!(out, "\n| Operation | Calls | Failed | Throttled | Retries | Avg (ms) |");
        let _ = writeln!(out, "|-----------|-------|--------|-----------|---------|----------|");
        for (kind, tally) in &calls.by_kind {
            let _ = writeln!(
                out,
                "| {kind} | {} | {} | {} | {} | {} |",
                tally.calls,
                tally.failed,
                tally.throttled,
                tally.retries,
                tally.average().as_millis()
            );
        }
    }
}

pub fn render_verification(report: &VerificationReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Verification Report\n");
    let _ = writeln!(
        out,
        "- Verified at: {}",
        report.verified_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "- Users checked: {}", report.entries.len());
    let _ = writeln!(out, "- Consistent: {}", report.consistent());
    let _ = writeln!(out, "- Drifted: {}", report.drifted());
    let _ = writeln!(out, "- Missing: {}", report.missing());
    let _ = writeln!(out, "- Consistency rate: {}", ui::percent(report.consistency_rate()));

    let problems: Vec<_> = report
        .entries
        .iter()
        .filter(|e| e.verdict != Verdict::Consistent)
        .collect();
    if !problems.is_empty() {
        let _ = writeln!(out, "\n## Inconsistent Users\n");
        let _ = writeln!(out, "| Employee ID | Username | Status | Details | Explained |");
        let _ = writeln!(out, "|-------------|----------|--------|---------|-----------|");
        for entry in problems {
            let details = match &entry.verdict {
                Verdict::Drifted { fields } => fields.join(", "),
                _ => String::new(),
            };
            let explained = if entry.failed_actions > 0 {
                format!("yes ({} failed actions)", entry.failed_actions)
            } else {
                "no".to_string()
            };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(&entry.employee_id),
                cell(&entry.username),
                entry.verdict.label(),
                cell(&details),
                explained
            );
        }
    }

    if !report.lingering_deletions.is_empty() {
        let _ = writeln!(out, "\n## Users Still Present After Deletion\n");
        for username in &report.lingering_deletions {
            let _ = writeln!(out, "- {username}");
        }
    }

    out
}

// ============================================================================
// CSV
// ============================================================================

/// One row of the failed-users CSV
#[derive(Debug, Serialize)]
struct FailedRow<'a> {
    username: &'a str,
    operation: &'static str,
    error_code: &'static str,
    failure_reason: &'a str,
    attempts: u32,
    timestamp: String,
    suggested_action: &'static str,
}

fn failed_row(result: &ExecutionResult) -> Option<FailedRow<'_>> {
    let Outcome::Failed { reason, category } = &result.outcome else {
        return None;
    };
    Some(FailedRow {
        username: &result.action.key().username,
        operation: result.action.kind().name(),
        error_code: category.code(),
        failure_reason: reason,
        attempts: result.attempts,
        timestamp: result
            .timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        suggested_action: suggested_action(&result.action, *category),
    })
}

/// Fix suggestion for a failed action
fn suggested_action(action: &Action, category: ErrorCategory) -> &'static str {
    match (action, category) {
        (Action::CreateUser { .. }, ErrorCategory::Conflict) => {
            "A user with this username or email already exists; check for duplicates in the directory"
        }
        (Action::AddMembership { .. } | Action::RemoveMembership { .. }, ErrorCategory::NotFound) => {
            "Check that the configured group exists and the user was created"
        }
        _ => category.advice(),
    }
}

/// Write failed actions to a CSV file
pub fn write_failed_csv(results: &[ExecutionResult], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Could not create {}", path.display()))?;
    for row in results.iter().filter_map(failed_row) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CallMetrics, CallTally, Phase};
    use chrono::Utc;
    use reconcile::{Profile, UserKey, VerificationEntry};
    use std::collections::BTreeMap;

    fn key(id: &str) -> UserKey {
        UserKey {
            employee_id: id.to_string(),
            username: format!("{id}@haier-saml.com"),
            user_id: None,
        }
    }

    fn create(id: &str) -> Action {
        Action::CreateUser {
            key: key(id),
            profile: Profile {
                display_name: format!("{id}_Name"),
                given_name: id.to_string(),
                family_name: "Name".to_string(),
                email: format!("{id}@haier.com"),
            },
        }
    }

    fn result(action: Action, outcome: Outcome, attempts: u32) -> ExecutionResult {
        ExecutionResult {
            action,
            outcome,
            attempts,
            timestamp: Utc::now(),
        }
    }

    fn record() -> RunRecord {
        let actions = vec![
            create("E001"),
            create("E002"),
            Action::AddMembership {
                key: key("E001"),
                group_id: "g-kiro".to_string(),
            },
        ];
        let mut builder = ExecutionPlan::builder();
        for action in &actions {
            builder.push(action.clone()).unwrap();
        }
        RunRecord {
            mode: Mode::Sync,
            dry_run: false,
            source: "users.csv".to_string(),
            started_at: Local::now(),
            duration: Duration::from_secs(3),
            workers: 5,
            plan: builder.build(),
            results: vec![
                result(actions[0].clone(), Outcome::Succeeded, 1),
                result(
                    actions[1].clone(),
                    Outcome::Failed {
                        reason: "conflict: user | exists".to_string(),
                        category: ErrorCategory::Conflict,
                    },
                    1,
                ),
                result(actions[2].clone(), Outcome::Succeeded, 2),
            ],
            rejected: vec![Rejection {
                employee_id: String::new(),
                row: Some(7),
                reason: "employee id is empty".to_string(),
            }],
            warnings: vec!["row 3: duplicate email".to_string()],
            verification: None,
            performance: performance(),
        }
    }

    fn performance() -> PerformanceReport {
        let tally = |calls, failed, millis| CallTally {
            calls,
            failed,
            throttled: failed,
            retries: failed,
            time: Duration::from_millis(millis),
        };
        let mut by_kind = BTreeMap::new();
        by_kind.insert(ActionKind::CreateUser, tally(3, 1, 300));
        by_kind.insert(ActionKind::AddMembership, tally(1, 0, 50));
        PerformanceReport {
            phases: vec![
                (Phase::Fetch, Duration::from_millis(800)),
                (Phase::Execute, Duration::from_secs(2)),
            ],
            calls: CallMetrics {
                total: tally(4, 1, 350),
                by_kind,
                slowest: Duration::from_millis(180),
                concurrency_changes: vec![(5, 2)],
            },
            users: 2,
            workers: 5,
        }
    }

    #[test]
    fn test_report_prefix_per_mode() {
        assert_eq!(report_prefix(Mode::Sync), "sync_report");
        assert_eq!(report_prefix(Mode::CreateOnly), "update_report");
        assert_eq!(report_prefix(Mode::Remove), "delete_report");
        assert_eq!(report_prefix(Mode::Upgrade), "upgrade_report");
    }

    #[test]
    fn test_run_report_content() {
        let report = render_run_report(&record());

        assert!(report.starts_with("# User Sync Report"));
        assert!(report.contains("| CreateUser | 2 |"));
        assert!(report.contains("| DeleteUser | 0 |"));
        assert!(report.contains("- Failed: 1"));
        assert!(report.contains("- row 7: employee id is empty"));
        assert!(report.contains("- row 3: duplicate email"));
        assert!(report.contains("user \\| exists"));
    }

    #[test]
    fn test_execution_record_stats() {
        let report = render_execution_record(&record());

        assert!(report.contains("- Total actions: 3"));
        assert!(report.contains("- Success rate: 66.7%"));
        assert!(report.contains("## Successful Actions"));
        assert!(report.contains("## Failed Actions"));
        assert!(report.contains("| CreateUser | 1 | 1 | 0 | 2 | 50.0% |"));
        assert!(report.contains("| AddMembership | 1 | 0 | 0 | 1 | 100.0% |"));
    }

    #[test]
    fn test_execution_record_performance() {
        let report = render_execution_record(&record());

        assert!(report.contains("## Performance"));
        assert!(report.contains("- Directory calls: 4"));
        assert!(report.contains("- Average response time: 87 ms"));
        assert!(report.contains("- Users per second: 1.00"));
        assert!(report.contains("- Concurrency: 5 workers, lowest 2, final 2 (1 downgrades, 0 upgrades)"));
        assert!(report.contains("| execute |"));
        assert!(report.contains("| CreateUser | 3 | 1 | 1 | 1 | 100 |"));
    }

    #[test]
    fn test_verification_report_lists_problems() {
        let report = VerificationReport {
            entries: vec![
                VerificationEntry {
                    employee_id: "E001".to_string(),
                    username: "E001@haier-saml.com".to_string(),
                    verdict: Verdict::Consistent,
                    failed_actions: 0,
                },
                VerificationEntry {
                    employee_id: "E002".to_string(),
                    username: "E002@haier-saml.com".to_string(),
                    verdict: Verdict::Missing,
                    failed_actions: 1,
                },
                VerificationEntry {
                    employee_id: "E003".to_string(),
                    username: "E003@haier-saml.com".to_string(),
                    verdict: Verdict::Drifted {
                        fields: vec!["displayName".to_string()],
                    },
                    failed_actions: 0,
                },
            ],
            lingering_deletions: vec!["E009@haier-saml.com".to_string()],
            verified_at: Utc::now(),
        };

        let text = render_verification(&report);

        assert!(text.contains("- Consistent: 1"));
        assert!(!text.contains("| E001 |"));
        assert!(text.contains("| E002 | E002@haier-saml.com | missing |  | yes (1 failed actions) |"));
        assert!(text.contains("| E003 | E003@haier-saml.com | drifted | displayName | no |"));
        assert!(text.contains("- E009@haier-saml.com"));
    }

    #[test]
    fn test_failed_csv_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.csv");

        write_failed_csv(&record().results, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            [
                "username",
                "operation",
                "error_code",
                "failure_reason",
                "attempts",
                "timestamp",
                "suggested_action"
            ]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "E002@haier-saml.com");
        assert_eq!(&rows[0][1], "CreateUser");
        assert_eq!(&rows[0][2], "CONFLICT");
        assert!(rows[0][6].contains("already exists"));
    }

    #[test]
    fn test_write_reports_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = record();
        record.verification = Some(VerificationReport {
            entries: Vec::new(),
            lingering_deletions: Vec::new(),
            verified_at: Utc::now(),
        });
        let stamp = record.stamp();

        let written = write_reports(&record, dir.path(), Duration::from_secs(30)).unwrap();

        assert!(!written.simplified);
        let names: Vec<String> = written
            .paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                format!("sync_report_{stamp}.md"),
                format!("execution_record_{stamp}.md"),
                format!("verification_report_{stamp}.md"),
                format!("failed_users_{stamp}.csv"),
            ]
        );
        assert!(written.paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_simplified_report() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_simplified(&record(), dir.path()).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("# User Sync Report (simplified)"));
        assert!(content.contains("- Failed: 1"));
    }
}
