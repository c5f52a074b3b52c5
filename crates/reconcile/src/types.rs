//! Core types for roster reconciliation

use crate::error::ErrorCategory;
use crate::merge::{self, MultiValue, PartialChange};
use crate::retry::RetryPolicy;
use crate::throttle::AdaptiveConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Subscriptions
// ============================================================================

/// A subscribable service, backed by one directory group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Service {
    Kiro,
    Qdev,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Kiro => "KIRO",
            Self::Qdev => "QDEV",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Services a user is subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Subscription {
    /// Not subscribed to anything
    #[default]
    None,
    KiroOnly,
    QdevOnly,
    Both,
}

impl Subscription {
    /// Services implied by this subscription
    pub fn services(&self) -> &'static [Service] {
        match self {
            Self::None => &[],
            Self::KiroOnly => &[Service::Kiro],
            Self::QdevOnly => &[Service::Qdev],
            Self::Both => &[Service::Kiro, Service::Qdev],
        }
    }

    /// Whether the subscription includes a service
    pub fn includes(&self, service: Service) -> bool {
        self.services().contains(&service)
    }

    /// Canonical label as written in roster files
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "取消订阅/不订阅",
            Self::KiroOnly => "KIRO订阅",
            Self::QdevOnly => "QDEV订阅",
            Self::Both => "全部订阅",
        }
    }

    /// Parse a roster label, accepting common aliases (case-insensitive)
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        let lower = label.to_lowercase();
        match lower.as_str() {
            "kiro订阅" | "kiro" | "kiro_only" | "kiroonly" => Some(Self::KiroOnly),
            "qdev订阅" | "qdev" | "qdev_only" | "qdevonly" => Some(Self::QdevOnly),
            "全部订阅" | "全部" | "全订阅" | "both" | "all" => Some(Self::Both),
            "取消订阅/不订阅" | "取消订阅" | "取消" | "不订阅" | "无" | "none" => {
                Some(Self::None)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Desired and actual state
// ============================================================================

/// A user as the roster says they should be
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredUser {
    pub employee_id: String,
    pub display_name: String,
    pub email: String,
    pub subscription: Subscription,
    /// 1-based source row, for error reporting
    pub row: Option<usize>,
}

impl DesiredUser {
    pub fn new(
        employee_id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
        subscription: Subscription,
    ) -> Self {
        Self {
            employee_id: employee_id.into(),
            display_name: display_name.into(),
            email: email.into(),
            subscription,
            row: None,
        }
    }

    /// Attach the source row number
    #[must_use]
    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

/// An entry of a multi-value attribute (email, phone number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiValueEntry {
    pub value: String,
    pub kind: Option<String>,
    pub primary: bool,
}

impl MultiValueEntry {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: None,
            primary: false,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

/// A postal address entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Address {
    pub street_address: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub formatted: Option<String>,
    pub kind: Option<String>,
    pub primary: bool,
}

/// A user as it currently exists in the directory
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActualUser {
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub emails: Vec<MultiValueEntry>,
    pub phone_numbers: Vec<MultiValueEntry>,
    pub addresses: Vec<Address>,
    /// Group ids the user belongs to
    pub group_memberships: BTreeSet<String>,
}

impl ActualUser {
    /// Primary email, falling back to the first listed one
    pub fn primary_email(&self) -> Option<&str> {
        self.emails
            .iter()
            .find(|e| e.primary)
            .or_else(|| self.emails.first())
            .map(|e| e.value.as_str())
    }

    /// Current value of a profile attribute
    pub fn attribute(&self, field: AttributeField) -> Option<&str> {
        match field {
            AttributeField::DisplayName => self.display_name.as_deref(),
            AttributeField::GivenName => self.given_name.as_deref(),
            AttributeField::FamilyName => self.family_name.as_deref(),
            AttributeField::PrimaryEmail => self.primary_email(),
        }
    }
}

/// Profile attributes the reconciler manages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
}

impl Profile {
    pub fn attribute(&self, field: AttributeField) -> &str {
        match field {
            AttributeField::DisplayName => &self.display_name,
            AttributeField::GivenName => &self.given_name,
            AttributeField::FamilyName => &self.family_name,
            AttributeField::PrimaryEmail => &self.email,
        }
    }

    /// The email entry written for this profile
    pub fn email_entry(&self) -> MultiValueEntry {
        MultiValueEntry::new(&self.email)
            .with_kind("work")
            .as_primary()
    }
}

/// A managed profile attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeField {
    DisplayName,
    GivenName,
    FamilyName,
    PrimaryEmail,
}

impl AttributeField {
    pub const ALL: [Self; 4] = [
        Self::DisplayName,
        Self::GivenName,
        Self::FamilyName,
        Self::PrimaryEmail,
    ];

    /// Directory attribute path written for this field
    pub fn path(&self) -> &'static str {
        match self {
            Self::DisplayName => "displayName",
            Self::GivenName => "name.givenName",
            Self::FamilyName => "name.familyName",
            Self::PrimaryEmail => "emails",
        }
    }

    /// Whether the field lives in a whole-array attribute
    pub fn is_multi_value(&self) -> bool {
        merge::MULTI_VALUE_PATHS.contains(&self.path())
    }

    /// Comparison used for drift detection
    pub fn values_match(&self, actual: Option<&str>, expected: &str) -> bool {
        match (self, actual) {
            (_, None) => false,
            (Self::PrimaryEmail, Some(actual)) => actual.eq_ignore_ascii_case(expected),
            (_, Some(actual)) => actual == expected,
        }
    }
}

impl fmt::Display for AttributeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DisplayName => "display_name",
            Self::GivenName => "given_name",
            Self::FamilyName => "family_name",
            Self::PrimaryEmail => "email",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Identifies the user an action applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserKey {
    pub employee_id: String,
    pub username: String,
    /// Directory id, absent until the user is created
    pub user_id: Option<String>,
}

/// Value written to a directory attribute path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    Entries(Vec<MultiValueEntry>),
}

/// A single attribute write sent to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeWrite {
    pub path: String,
    pub value: AttributeValue,
}

/// One attribute difference to correct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeChange {
    /// Scalar attribute replaced directly
    Scalar {
        field: AttributeField,
        from: Option<String>,
        to: String,
    },
    /// Primary email replaced inside the user's email array
    Email {
        /// Email array as fetched
        existing: Vec<MultiValueEntry>,
        change: PartialChange<MultiValueEntry>,
    },
}

impl AttributeChange {
    pub fn field(&self) -> AttributeField {
        match self {
            Self::Scalar { field, .. } => *field,
            Self::Email { .. } => AttributeField::PrimaryEmail,
        }
    }

    /// Build the directory write, merging multi-value changes into the full array
    pub fn to_write(&self) -> AttributeWrite {
        match self {
            Self::Scalar { field, to, .. } => AttributeWrite {
                path: field.path().to_string(),
                value: AttributeValue::Text(to.clone()),
            },
            Self::Email { existing, change } => AttributeWrite {
                path: AttributeField::PrimaryEmail.path().to_string(),
                value: AttributeValue::Entries(merge::merge(existing, change)),
            },
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Scalar { field, from, to } => {
                format!("{field}: {} -> {to}", from.as_deref().unwrap_or("<unset>"))
            }
            Self::Email { existing, change } => {
                let from = existing
                    .iter()
                    .find(|e| e.primary)
                    .map_or("<unset>", MultiValue::identity);
                let to = change
                    .replacement
                    .as_ref()
                    .map_or("<removed>", MultiValue::identity);
                format!("email: {from} -> {to}")
            }
        }
    }
}

/// Kind of a planned action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    CreateUser,
    UpdateAttributes,
    AddMembership,
    RemoveMembership,
    DeleteUser,
}

impl ActionKind {
    /// Every kind, in dependency order
    pub const ALL: [Self; 5] = [
        Self::CreateUser,
        Self::UpdateAttributes,
        Self::AddMembership,
        Self::RemoveMembership,
        Self::DeleteUser,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateUser => "CreateUser",
            Self::UpdateAttributes => "UpdateAttributes",
            Self::AddMembership => "AddMembership",
            Self::RemoveMembership => "RemoveMembership",
            Self::DeleteUser => "DeleteUser",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single mutation against the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    CreateUser {
        key: UserKey,
        profile: Profile,
    },
    UpdateAttributes {
        key: UserKey,
        changes: Vec<AttributeChange>,
    },
    DeleteUser {
        key: UserKey,
    },
    AddMembership {
        key: UserKey,
        group_id: String,
    },
    RemoveMembership {
        key: UserKey,
        group_id: String,
    },
}

impl Action {
    pub fn key(&self) -> &UserKey {
        match self {
            Self::CreateUser { key, .. }
            | Self::UpdateAttributes { key, .. }
            | Self::DeleteUser { key }
            | Self::AddMembership { key, .. }
            | Self::RemoveMembership { key, .. } => key,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::CreateUser { .. } => ActionKind::CreateUser,
            Self::UpdateAttributes { .. } => ActionKind::UpdateAttributes,
            Self::DeleteUser { .. } => ActionKind::DeleteUser,
            Self::AddMembership { .. } => ActionKind::AddMembership,
            Self::RemoveMembership { .. } => ActionKind::RemoveMembership,
        }
    }

    /// One-line human description
    pub fn describe(&self) -> String {
        let username = &self.key().username;
        match self {
            Self::CreateUser { profile, .. } => {
                format!("create {username} ({})", profile.display_name)
            }
            Self::UpdateAttributes { changes, .. } => {
                let fields: Vec<String> = changes.iter().map(AttributeChange::describe).collect();
                format!("update {username}: {}", fields.join(", "))
            }
            Self::DeleteUser { .. } => format!("delete {username}"),
            Self::AddMembership { group_id, .. } => format!("add {username} to {group_id}"),
            Self::RemoveMembership { group_id, .. } => {
                format!("remove {username} from {group_id}")
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    Failed {
        reason: String,
        category: ErrorCategory,
    },
    Skipped {
        reason: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// The resolution of one planned action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action: Action,
    pub outcome: Outcome,
    /// Remote calls made for this action (0 when skipped)
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Succeeded/failed/skipped tally for one action kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub by_kind: BTreeMap<ActionKind, Tally>,
}

impl ExecuteSummary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.add_result(result);
        }
        summary
    }

    /// Total number of actions resolved
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Share of attempted (non-skipped) actions that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let attempted = self.succeeded + self.failed;
        if attempted == 0 {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.succeeded as f64 / attempted as f64 * 100.0;
        rate
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ExecutionResult) {
        let tally = self.by_kind.entry(result.action.kind()).or_default();
        match result.outcome {
            Outcome::Succeeded => {
                self.succeeded += 1;
                tally.succeeded += 1;
            }
            Outcome::Failed { .. } => {
                self.failed += 1;
                tally.failed += 1;
            }
            Outcome::Skipped { .. } => {
                self.skipped += 1;
                tally.skipped += 1;
            }
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Token an operator must type to allow deletions
pub const DELETE_TOKEN: &str = "DELETE";

/// Proof that an operator confirmed deletion
///
/// Can only be constructed from the literal `DELETE` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionConfirmation {
    _private: (),
}

impl DeletionConfirmation {
    /// Accept the confirmation token; anything but `DELETE` is refused
    pub fn from_token(token: &str) -> Option<Self> {
        (token.trim() == DELETE_TOKEN).then_some(Self { _private: () })
    }
}

/// Lower bound on worker count
pub const MIN_CONCURRENCY: usize = 1;
/// Upper bound on worker count
pub const MAX_CONCURRENCY: usize = 10;
/// Default worker count
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, just resolve every action as skipped
    pub dry_run: bool,
    /// Requested worker count (clamped to [1, 10])
    pub concurrency: usize,
    /// Present when the operator confirmed deletions
    pub deletion: Option<DeletionConfirmation>,
    pub retry: RetryPolicy,
    pub adaptive: AdaptiveConfig,
}

impl ExecuteOptions {
    /// Worker count clamped to the supported range
    pub fn concurrency(&self) -> usize {
        self.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            concurrency: DEFAULT_CONCURRENCY,
            deletion: None,
            retry: RetryPolicy::default(),
            adaptive: AdaptiveConfig::default(),
        }
    }
}

/// Which parts of the diff a run acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Create, update and delete
    Sync,
    /// Only create missing users
    #[default]
    CreateOnly,
    /// Only delete users absent from the roster
    Remove,
    /// Only rewrite attributes of existing users to the current format
    Upgrade,
}

impl Mode {
    pub const ALL: [Self; 4] = [Self::Sync, Self::CreateOnly, Self::Remove, Self::Upgrade];

    pub fn creates(&self) -> bool {
        matches!(self, Self::Sync | Self::CreateOnly)
    }

    pub fn updates(&self) -> bool {
        matches!(self, Self::Sync | Self::Upgrade)
    }

    /// Whether existing users' service group memberships are reconciled
    pub fn manages_memberships(&self) -> bool {
        matches!(self, Self::Sync)
    }

    pub fn deletes(&self) -> bool {
        matches!(self, Self::Sync | Self::Remove)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::CreateOnly => "create",
            Self::Remove => "remove",
            Self::Upgrade => "upgrade",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::EntryTarget;

    #[test]
    fn test_subscription_services() {
        assert!(Subscription::None.services().is_empty());
        assert_eq!(Subscription::KiroOnly.services(), &[Service::Kiro]);
        assert!(Subscription::Both.includes(Service::Qdev));
        assert!(!Subscription::QdevOnly.includes(Service::Kiro));
    }

    #[test]
    fn test_subscription_labels_and_aliases() {
        for sub in [
            Subscription::None,
            Subscription::KiroOnly,
            Subscription::QdevOnly,
            Subscription::Both,
        ] {
            assert_eq!(Subscription::from_label(sub.label()), Some(sub));
        }
        assert_eq!(Subscription::from_label("kiro订阅"), Some(Subscription::KiroOnly));
        assert_eq!(Subscription::from_label(" QDEV "), Some(Subscription::QdevOnly));
        assert_eq!(Subscription::from_label("全订阅"), Some(Subscription::Both));
        assert_eq!(Subscription::from_label("无"), Some(Subscription::None));
        assert_eq!(Subscription::from_label("premium"), None);
    }

    #[test]
    fn test_primary_email_fallback() {
        let mut user = ActualUser {
            emails: vec![MultiValueEntry::new("first@x.com")],
            ..ActualUser::default()
        };
        assert_eq!(user.primary_email(), Some("first@x.com"));

        user.emails.push(MultiValueEntry::new("main@x.com").as_primary());
        assert_eq!(user.primary_email(), Some("main@x.com"));
    }

    #[test]
    fn test_email_change_writes_full_array() {
        let home = MultiValueEntry::new("home@y.com").with_kind("home");
        let change = AttributeChange::Email {
            existing: vec![
                MultiValueEntry::new("old@x.com").with_kind("work").as_primary(),
                home.clone(),
            ],
            change: PartialChange::replace(
                EntryTarget::Primary,
                MultiValueEntry::new("new@x.com").with_kind("work").as_primary(),
            ),
        };

        let write = change.to_write();
        assert_eq!(write.path, "emails");
        match write.value {
            AttributeValue::Entries(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].value, "new@x.com");
                assert_eq!(entries[1], home);
            }
            AttributeValue::Text(_) => panic!("expected array payload"),
        }
    }

    #[test]
    fn test_summary_tallies_by_kind() {
        let key = UserKey {
            employee_id: "E1".to_string(),
            username: "E1@corp".to_string(),
            user_id: None,
        };
        let result = |action: Action, outcome: Outcome| ExecutionResult {
            action,
            outcome,
            attempts: 1,
            timestamp: Utc::now(),
        };
        let results = vec![
            result(Action::DeleteUser { key: key.clone() }, Outcome::Succeeded),
            result(
                Action::AddMembership {
                    key: key.clone(),
                    group_id: "g".to_string(),
                },
                Outcome::Failed {
                    reason: "denied".to_string(),
                    category: ErrorCategory::Permission,
                },
            ),
            result(
                Action::AddMembership {
                    key,
                    group_id: "g2".to_string(),
                },
                Outcome::Skipped {
                    reason: "dry-run".to_string(),
                },
            ),
        ];

        let summary = ExecuteSummary::from_results(&results);
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());
        assert!((summary.success_rate() - 50.0).abs() < f64::EPSILON);
        assert_eq!(summary.by_kind[&ActionKind::AddMembership].total(), 2);
        assert_eq!(summary.by_kind[&ActionKind::DeleteUser].succeeded, 1);
    }

    #[test]
    fn test_deletion_confirmation_requires_exact_token() {
        assert!(DeletionConfirmation::from_token("DELETE").is_some());
        assert!(DeletionConfirmation::from_token(" DELETE\n").is_some());
        assert!(DeletionConfirmation::from_token("delete").is_none());
        assert!(DeletionConfirmation::from_token("yes").is_none());
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let mut opts = ExecuteOptions {
            concurrency: 0,
            ..ExecuteOptions::default()
        };
        assert_eq!(opts.concurrency(), 1);
        opts.concurrency = 50;
        assert_eq!(opts.concurrency(), 10);
    }

    #[test]
    fn test_mode_steps() {
        assert!(Mode::Sync.creates() && Mode::Sync.updates() && Mode::Sync.deletes());
        assert!(Mode::CreateOnly.creates() && !Mode::CreateOnly.deletes());
        assert!(Mode::Remove.deletes() && !Mode::Remove.creates() && !Mode::Remove.updates());
        assert!(Mode::Upgrade.updates() && !Mode::Upgrade.creates() && !Mode::Upgrade.deletes());
        assert!(!Mode::Upgrade.manages_memberships());
    }
}
