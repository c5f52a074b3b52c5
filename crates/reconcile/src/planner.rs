//! Reconciler and execution plans
//!
//! The reconciler diffs the desired roster against the managed subset of the
//! directory and emits an [`ExecutionPlan`]: one unit of ordered actions per
//! user. Plans are only constructed through [`PlanBuilder`], which enforces
//! the ordering and non-contradiction invariants.

use crate::error::{PlanError, ValidationError};
use crate::merge::{EntryTarget, PartialChange};
use crate::naming::UsernameTemplate;
use crate::types::{
    Action, ActionKind, ActualUser, AttributeChange, AttributeField, DesiredUser, Mode, Profile,
    Service, Subscription, UserKey,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// Configuration
// ============================================================================

/// Directory group ids backing each service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroups {
    pub kiro: String,
    pub qdev: String,
}

impl ServiceGroups {
    pub fn id(&self, service: Service) -> &str {
        match service {
            Service::Kiro => &self.kiro,
            Service::Qdev => &self.qdev,
        }
    }

    /// Whether a group id is one of the service groups
    pub fn contains(&self, group_id: &str) -> bool {
        self.kiro == group_id || self.qdev == group_id
    }

    /// Group ids implied by a subscription
    pub fn for_subscription(&self, subscription: Subscription) -> BTreeSet<String> {
        subscription
            .services()
            .iter()
            .map(|s| self.id(*s).to_string())
            .collect()
    }
}

/// How profile attributes are derived from roster rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttributeFormat {
    /// Display name `{employee_id}_{name}`, given name = employee id, family name = name
    #[default]
    Modern,
    /// Display name `{name} {name}`, given and family name = name
    Legacy,
}

/// Immutable reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub template: UsernameTemplate,
    pub groups: ServiceGroups,
    pub format: AttributeFormat,
}

// ============================================================================
// Plans
// ============================================================================

/// The ordered actions for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanUnit {
    employee_id: String,
    actions: Vec<Action>,
}

impl PlanUnit {
    pub fn employee_id(&self) -> &str {
        &self.employee_id
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

/// An immutable, validated execution plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    units: Vec<PlanUnit>,
}

impl ExecutionPlan {
    /// Start building a plan
    pub fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    pub fn units(&self) -> &[PlanUnit] {
        &self.units
    }

    /// All actions in plan order
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.units.iter().flat_map(|u| u.actions.iter())
    }

    /// Total number of actions
    pub fn action_count(&self) -> usize {
        self.units.iter().map(|u| u.actions.len()).sum()
    }

    /// Number of actions of a kind
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions().filter(|a| a.kind() == kind).count()
    }

    pub fn has_deletions(&self) -> bool {
        self.count(ActionKind::DeleteUser) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The unit for a user, if any
    pub fn unit(&self, employee_id: &str) -> Option<&PlanUnit> {
        self.units.iter().find(|u| u.employee_id == employee_id)
    }
}

/// Builder enforcing plan invariants as actions are pushed
///
/// - at most one `CreateUser`/`DeleteUser` per user
/// - `CreateUser` is the first action of its unit
/// - `DeleteUser` is the last action of its unit, preceded only by membership removals
/// - no repeated or opposing membership actions for the same group
#[derive(Debug, Default)]
pub struct PlanBuilder {
    units: BTreeMap<String, Vec<Action>>,
}

impl PlanBuilder {
    /// Append an action to its user's unit
    pub fn push(&mut self, action: Action) -> Result<&mut Self, PlanError> {
        let employee_id = action.key().employee_id.clone();
        let unit = self.units.entry(employee_id.clone()).or_default();
        let misordered = |reason: &str| PlanError::Misordered {
            employee_id: employee_id.clone(),
            reason: reason.to_string(),
        };

        if unit.iter().any(|a| a.kind() == ActionKind::DeleteUser) {
            return Err(if action.kind() == ActionKind::DeleteUser {
                PlanError::DuplicateLifecycle {
                    employee_id: employee_id.clone(),
                }
            } else {
                misordered("no action may follow DeleteUser")
            });
        }

        match &action {
            Action::CreateUser { .. } => {
                if unit.iter().any(|a| a.kind() == ActionKind::CreateUser) {
                    return Err(PlanError::DuplicateLifecycle { employee_id });
                }
                if !unit.is_empty() {
                    return Err(misordered("CreateUser must come first"));
                }
            }
            Action::DeleteUser { .. } => {
                if unit.iter().any(|a| a.kind() == ActionKind::CreateUser) {
                    return Err(PlanError::DuplicateLifecycle { employee_id });
                }
                if unit.iter().any(|a| a.kind() != ActionKind::RemoveMembership) {
                    return Err(misordered(
                        "DeleteUser may only follow membership removals",
                    ));
                }
            }
            Action::AddMembership { group_id, .. } | Action::RemoveMembership { group_id, .. } => {
                let repeated = unit.iter().any(|a| match a {
                    Action::AddMembership { group_id: g, .. }
                    | Action::RemoveMembership { group_id: g, .. } => g == group_id,
                    _ => false,
                });
                if repeated {
                    return Err(PlanError::ContradictoryMembership {
                        employee_id,
                        group_id: group_id.clone(),
                    });
                }
            }
            Action::UpdateAttributes { .. } => {
                if unit.iter().any(|a| a.kind() == ActionKind::UpdateAttributes) {
                    return Err(misordered("only one UpdateAttributes per user"));
                }
            }
        }

        unit.push(action);
        Ok(self)
    }

    /// Finish the plan; units are ordered by employee id
    pub fn build(self) -> ExecutionPlan {
        ExecutionPlan {
            units: self
                .units
                .into_iter()
                .filter(|(_, actions)| !actions.is_empty())
                .map(|(employee_id, actions)| PlanUnit {
                    employee_id,
                    actions,
                })
                .collect(),
        }
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// A desired user left out of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub employee_id: String,
    pub row: Option<usize>,
    pub reason: String,
}

/// Plan plus the desired users that could not be planned
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub plan: ExecutionPlan,
    pub rejected: Vec<Rejection>,
}

/// Computes plans from desired and actual state
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    pub fn template(&self) -> &UsernameTemplate {
        &self.config.template
    }

    pub fn groups(&self) -> &ServiceGroups {
        &self.config.groups
    }

    /// Profile attributes a desired user should end up with
    pub fn expected_profile(&self, user: &DesiredUser) -> Profile {
        match self.config.format {
            AttributeFormat::Modern => Profile {
                display_name: format!("{}_{}", user.employee_id, user.display_name),
                given_name: user.employee_id.clone(),
                family_name: user.display_name.clone(),
                email: user.email.clone(),
            },
            AttributeFormat::Legacy => Profile {
                display_name: format!("{} {}", user.display_name, user.display_name),
                given_name: user.display_name.clone(),
                family_name: user.display_name.clone(),
                email: user.email.clone(),
            },
        }
    }

    /// Service group ids a desired user should belong to
    pub fn expected_groups(&self, user: &DesiredUser) -> BTreeSet<String> {
        self.config.groups.for_subscription(user.subscription)
    }

    /// Index managed directory users by case-folded employee id
    pub fn index_managed<'a>(&self, actual: &'a [ActualUser]) -> HashMap<String, (&'a str, &'a ActualUser)> {
        let mut index = HashMap::new();
        for user in actual {
            let Some(employee_id) = self.config.template.extract(&user.username) else {
                continue;
            };
            let folded = employee_id.to_lowercase();
            if index.contains_key(&folded) {
                log::warn!(
                    "Multiple directory users map to employee id '{employee_id}', keeping the first"
                );
                continue;
            }
            index.insert(folded, (employee_id, user));
        }
        index
    }

    /// Diff desired against actual and build the plan for `mode`
    pub fn reconcile(
        &self,
        desired: &[DesiredUser],
        actual: &[ActualUser],
        mode: Mode,
    ) -> Result<Reconciliation, ValidationError> {
        check_duplicates(desired)?;

        let mut rejected = Vec::new();
        let mut wanted: HashMap<String, &DesiredUser> = HashMap::new();
        for user in desired {
            if user.employee_id.trim().is_empty() {
                rejected.push(Rejection {
                    employee_id: String::new(),
                    row: user.row,
                    reason: ValidationError::UnresolvableEmployeeId {
                        row: user.row.unwrap_or(0),
                    }
                    .to_string(),
                });
                continue;
            }
            wanted.insert(user.employee_id.to_lowercase(), user);
        }

        let managed = self.index_managed(actual);
        let mut builder = ExecutionPlan::builder();

        for (folded, user) in &wanted {
            match managed.get(folded) {
                None if mode.creates() => self.plan_create(&mut builder, user)?,
                Some((_, existing)) if mode.updates() => {
                    self.plan_update(&mut builder, user, existing, mode)?;
                }
                _ => {}
            }
        }

        if mode.deletes() {
            for (folded, (employee_id, existing)) in &managed {
                if !wanted.contains_key(folded) {
                    plan_delete(&mut builder, employee_id, existing)?;
                }
            }
        }

        let plan = builder.build();
        log::debug!(
            "Planned {} action(s) across {} user(s) in {} mode",
            plan.action_count(),
            plan.units().len(),
            mode
        );
        Ok(Reconciliation { plan, rejected })
    }

    fn key_for(&self, user: &DesiredUser, user_id: Option<&str>) -> UserKey {
        UserKey {
            employee_id: user.employee_id.clone(),
            username: self.config.template.render(&user.employee_id),
            user_id: user_id.map(str::to_string),
        }
    }

    fn plan_create(&self, builder: &mut PlanBuilder, user: &DesiredUser) -> Result<(), PlanError> {
        let key = self.key_for(user, None);
        builder.push(Action::CreateUser {
            key: key.clone(),
            profile: self.expected_profile(user),
        })?;
        for group_id in self.expected_groups(user) {
            builder.push(Action::AddMembership {
                key: key.clone(),
                group_id,
            })?;
        }
        Ok(())
    }

    fn plan_update(
        &self,
        builder: &mut PlanBuilder,
        user: &DesiredUser,
        existing: &ActualUser,
        mode: Mode,
    ) -> Result<(), PlanError> {
        let key = UserKey {
            user_id: Some(existing.user_id.clone()),
            username: existing.username.clone(),
            ..self.key_for(user, None)
        };

        let changes = attribute_changes(&self.expected_profile(user), existing);
        if !changes.is_empty() {
            builder.push(Action::UpdateAttributes {
                key: key.clone(),
                changes,
            })?;
        }

        if !mode.manages_memberships() {
            return Ok(());
        }

        let expected = self.expected_groups(user);
        for group_id in [&self.config.groups.kiro, &self.config.groups.qdev] {
            let member = existing.group_memberships.contains(group_id);
            let wanted = expected.contains(group_id);
            let action = match (member, wanted) {
                (false, true) => Action::AddMembership {
                    key: key.clone(),
                    group_id: group_id.clone(),
                },
                (true, false) => Action::RemoveMembership {
                    key: key.clone(),
                    group_id: group_id.clone(),
                },
                _ => continue,
            };
            builder.push(action)?;
        }
        Ok(())
    }
}

fn plan_delete(
    builder: &mut PlanBuilder,
    employee_id: &str,
    existing: &ActualUser,
) -> Result<(), PlanError> {
    let key = UserKey {
        employee_id: employee_id.to_string(),
        username: existing.username.clone(),
        user_id: Some(existing.user_id.clone()),
    };
    for group_id in &existing.group_memberships {
        builder.push(Action::RemoveMembership {
            key: key.clone(),
            group_id: group_id.clone(),
        })?;
    }
    builder.push(Action::DeleteUser { key })?;
    Ok(())
}

/// Profile fields that differ from the directory
pub fn attribute_changes(expected: &Profile, existing: &ActualUser) -> Vec<AttributeChange> {
    let mut changes = Vec::new();
    for field in AttributeField::ALL {
        let current = existing.attribute(field);
        let target = expected.attribute(field);
        if field.values_match(current, target) {
            continue;
        }
        if field.is_multi_value() {
            changes.push(AttributeChange::Email {
                existing: existing.emails.clone(),
                change: PartialChange::replace(EntryTarget::Primary, expected.email_entry()),
            });
        } else {
            changes.push(AttributeChange::Scalar {
                field,
                from: current.map(str::to_string),
                to: target.to_string(),
            });
        }
    }
    changes
}

/// Reject rosters where two rows share an employee id (case-insensitive)
fn check_duplicates(desired: &[DesiredUser]) -> Result<(), ValidationError> {
    let mut seen: BTreeMap<String, (String, Vec<usize>)> = BTreeMap::new();
    for user in desired {
        if user.employee_id.trim().is_empty() {
            continue;
        }
        let entry = seen
            .entry(user.employee_id.to_lowercase())
            .or_insert_with(|| (user.employee_id.clone(), Vec::new()));
        entry.1.push(user.row.unwrap_or(0));
    }

    match seen.into_values().find(|(_, rows)| rows.len() > 1) {
        Some((employee_id, rows)) => Err(ValidationError::DuplicateEmployeeId { employee_id, rows }),
        None => Ok(()),
    }
}
