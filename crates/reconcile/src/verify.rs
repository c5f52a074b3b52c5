//! Post-execution verification
//!
//! Re-fetches the directory after a run and compares every desired user with
//! what it should now look like. Read-only.

use crate::context::ActualStateSource;
use crate::error::Result;
use crate::planner::{ExecutionPlan, Reconciler};
use crate::types::{
    ActionKind, ActualUser, AttributeField, DesiredUser, ExecutionResult, Service,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Verification outcome for one desired user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Consistent,
    /// Present but differing in the listed fields
    Drifted { fields: Vec<String> },
    /// Not found in the directory
    Missing,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Consistent => "consistent",
            Self::Drifted { .. } => "drifted",
            Self::Missing => "missing",
        }
    }
}

/// One desired user's verification result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationEntry {
    pub employee_id: String,
    pub username: String,
    pub verdict: Verdict,
    /// Failed actions for this user in the run; non-zero explains the drift
    pub failed_actions: usize,
}

/// Drift between expected and achieved state after a run
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub entries: Vec<VerificationEntry>,
    /// Usernames planned for deletion that are still present
    pub lingering_deletions: Vec<String>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    fn count(&self, label: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.verdict.label() == label)
            .count()
    }

    pub fn consistent(&self) -> usize {
        self.count("consistent")
    }

    pub fn drifted(&self) -> usize {
        self.count("drifted")
    }

    pub fn missing(&self) -> usize {
        self.count("missing")
    }

    /// Share of desired users found consistent, in percent
    pub fn consistency_rate(&self) -> f64 {
        if self.entries.is_empty() {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.consistent() as f64 / self.entries.len() as f64 * 100.0;
        rate
    }

    /// No drift, nothing missing and no lingering deletions
    pub fn is_consistent(&self) -> bool {
        self.consistent() == self.entries.len() && self.lingering_deletions.is_empty()
    }
}

/// Compare desired state with a fresh snapshot of the directory
pub fn verify(
    desired: &[DesiredUser],
    plan: &ExecutionPlan,
    results: &[ExecutionResult],
    source: &dyn ActualStateSource,
    reconciler: &Reconciler,
) -> Result<VerificationReport> {
    let actual = source.fetch_users()?;
    let managed = reconciler.index_managed(&actual);

    let mut failures: HashMap<String, usize> = HashMap::new();
    for result in results.iter().filter(|r| r.outcome.is_failed()) {
        *failures
            .entry(result.action.key().employee_id.to_lowercase())
            .or_default() += 1;
    }

    let entries = desired
        .iter()
        .filter(|user| !user.employee_id.trim().is_empty())
        .map(|user| {
            let folded = user.employee_id.to_lowercase();
            let verdict = match managed.get(&folded) {
                None => Verdict::Missing,
                Some((_, found)) => match drift(reconciler, user, found) {
                    fields if fields.is_empty() => Verdict::Consistent,
                    fields => Verdict::Drifted { fields },
                },
            };
            VerificationEntry {
                employee_id: user.employee_id.clone(),
                username: reconciler.template().render(&user.employee_id),
                verdict,
                failed_actions: failures.get(&folded).copied().unwrap_or(0),
            }
        })
        .collect();

    let lingering_deletions = plan
        .actions()
        .filter(|a| a.kind() == ActionKind::DeleteUser)
        .map(|a| a.key().username.as_str())
        .filter(|username| {
            actual
                .iter()
                .any(|u| u.username.eq_ignore_ascii_case(username))
        })
        .map(str::to_string)
        .collect();

    let report = VerificationReport {
        entries,
        lingering_deletions,
        verified_at: Utc::now(),
    };
    log::info!(
        "Verification: {} consistent, {} drifted, {} missing",
        report.consistent(),
        report.drifted(),
        report.missing()
    );
    Ok(report)
}

/// Fields where the directory differs from what the user should look like
fn drift(reconciler: &Reconciler, user: &DesiredUser, found: &ActualUser) -> Vec<String> {
    let profile = reconciler.expected_profile(user);
    let mut fields: Vec<String> = AttributeField::ALL
        .iter()
        .filter(|field| !field.values_match(found.attribute(**field), profile.attribute(**field)))
        .map(ToString::to_string)
        .collect();

    for service in [Service::Kiro, Service::Qdev] {
        let group_id = reconciler.groups().id(service);
        let member = found.group_memberships.contains(group_id);
        if member != user.subscription.includes(service) {
            fields.push(format!("{}_membership", service.name().to_lowercase()));
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Directory, NoProgress};
    use crate::error::Error;
    use crate::executor::execute;
    use crate::naming::UsernameTemplate;
    use crate::planner::{AttributeFormat, ReconcilerConfig, ServiceGroups};
    use crate::retry::RetryPolicy;
    use crate::testing::InMemoryDirectory;
    use crate::types::{DeletionConfirmation, ExecuteOptions, Mode, Subscription};

    fn reconciler() -> Reconciler {
        Reconciler::new(ReconcilerConfig {
            template: UsernameTemplate::parse("{employee_id}@corp-saml.com").unwrap(),
            groups: ServiceGroups {
                kiro: "g-kiro".to_string(),
                qdev: "g-qdev".to_string(),
            },
            format: AttributeFormat::Modern,
        })
    }

    fn opts() -> ExecuteOptions {
        ExecuteOptions {
            deletion: DeletionConfirmation::from_token("DELETE"),
            retry: RetryPolicy::no_retry(),
            ..ExecuteOptions::default()
        }
    }

    fn run(
        desired: &[DesiredUser],
        directory: &InMemoryDirectory,
        mode: Mode,
    ) -> (ExecutionPlan, Vec<ExecutionResult>) {
        let r = reconciler();
        let actual = directory.users();
        let plan = r.reconcile(desired, &actual, mode).unwrap().plan;
        let results = execute(&plan, directory, &opts(), &NoProgress).unwrap();
        (plan, results)
    }

    #[test]
    fn test_created_user_is_consistent() {
        let directory = InMemoryDirectory::new();
        let desired = vec![DesiredUser::new("E1", "Alice", "a@x.com", Subscription::KiroOnly)];
        let (plan, results) = run(&desired, &directory, Mode::Sync);

        let report = verify(&desired, &plan, &results, &directory, &reconciler()).unwrap();

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].verdict, Verdict::Consistent);
        assert_eq!(report.entries[0].failed_actions, 0);
        assert!(report.is_consistent());
        assert!((report.consistency_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_membership_shows_as_explained_drift() {
        let directory = InMemoryDirectory::new();
        directory.fail_always(
            ActionKind::AddMembership,
            "E1@corp-saml.com",
            Error::Permission {
                message: "denied".to_string(),
            },
        );
        let desired = vec![DesiredUser::new("E1", "Alice", "a@x.com", Subscription::QdevOnly)];
        let (plan, results) = run(&desired, &directory, Mode::Sync);

        let report = verify(&desired, &plan, &results, &directory, &reconciler()).unwrap();

        assert_eq!(
            report.entries[0].verdict,
            Verdict::Drifted {
                fields: vec!["qdev_membership".to_string()]
            }
        );
        assert_eq!(report.entries[0].failed_actions, 1);
        assert!(!report.is_consistent());
    }

    #[test]
    fn test_missing_user_after_failed_create() {
        let directory = InMemoryDirectory::new();
        directory.fail_always(
            ActionKind::CreateUser,
            "E1@corp-saml.com",
            Error::InvalidRequest {
                message: "bad email".to_string(),
            },
        );
        let desired = vec![
            DesiredUser::new("E1", "Alice", "a@x.com", Subscription::None),
            DesiredUser::new("E2", "Bob", "b@x.com", Subscription::None),
        ];
        let (plan, results) = run(&desired, &directory, Mode::Sync);

        let report = verify(&desired, &plan, &results, &directory, &reconciler()).unwrap();

        assert_eq!(report.missing(), 1);
        assert_eq!(report.consistent(), 1);
        assert!((report.consistency_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_drift_outside_the_run_is_unexplained() {
        let directory = InMemoryDirectory::new();
        let desired = vec![DesiredUser::new("E1", "Alice", "a@x.com", Subscription::None)];
        let (plan, results) = run(&desired, &directory, Mode::Sync);

        // Someone edits the user between execution and verification
        let user = directory.user_by_name("E1@corp-saml.com").unwrap();
        directory
            .update_user(
                &user.user_id,
                &[crate::types::AttributeWrite {
                    path: "displayName".to_string(),
                    value: crate::types::AttributeValue::Text("Changed".to_string()),
                }],
            )
            .unwrap();

        let report = verify(&desired, &plan, &results, &directory, &reconciler()).unwrap();

        assert_eq!(
            report.entries[0].verdict,
            Verdict::Drifted {
                fields: vec!["display_name".to_string()]
            }
        );
        assert_eq!(report.entries[0].failed_actions, 0);
    }

    #[test]
    fn test_lingering_deletion_is_reported() {
        let directory = InMemoryDirectory::with_users(vec![ActualUser {
            user_id: "id-9".to_string(),
            username: "E9@corp-saml.com".to_string(),
            ..ActualUser::default()
        }]);
        directory.fail_always(
            ActionKind::DeleteUser,
            "E9@corp-saml.com",
            Error::Permission {
                message: "denied".to_string(),
            },
        );
        let (plan, results) = run(&[], &directory, Mode::Remove);

        let report = verify(&[], &plan, &results, &directory, &reconciler()).unwrap();

        assert!(report.entries.is_empty());
        assert_eq!(report.lingering_deletions, vec!["E9@corp-saml.com".to_string()]);
        assert!(!report.is_consistent());
    }
}
