//! Identity Center adapter
//!
//! Implements the engine's [`Directory`] and [`ActualStateSource`] traits on
//! top of the identity store client, translating between wire entities and
//! the engine's user model.

use anyhow::{Context, Result};
use identitystore::{
    AttributeOperation, ContactValue, ErrorCategory as ApiCategory, GroupMembership,
    IdentityStoreClient, NewUser, User,
};
use reconcile::{
    ActualStateSource, ActualUser, Address, AttributeValue, AttributeWrite, Directory,
    MultiValueEntry, Profile, ServiceGroups, ValidationError,
};
use std::collections::{BTreeSet, HashMap};

/// Directory backed by an IAM Identity Center identity store
pub struct IdentityCenterDirectory {
    client: IdentityStoreClient,
    /// Resolved group ids
    groups: ServiceGroups,
}

impl IdentityCenterDirectory {
    /// Wrap a connected client, resolving the service groups by display name
    pub fn new(client: IdentityStoreClient, group_names: &ServiceGroups) -> Result<Self> {
        let groups = resolve_groups(&client, group_names)?;
        Ok(Self { client, groups })
    }

    pub fn client(&self) -> &IdentityStoreClient {
        &self.client
    }

    /// Service group ids
    pub fn groups(&self) -> &ServiceGroups {
        &self.groups
    }
}

/// Look up both service groups; a missing group is fatal
pub fn resolve_groups(client: &IdentityStoreClient, names: &ServiceGroups) -> Result<ServiceGroups> {
    let resolve = |name: &str| -> Result<String> {
        let id = client
            .find_group_id(name)
            .with_context(|| format!("Failed to look up group '{name}'"))?
            .ok_or_else(|| ValidationError::GroupNotFound {
                group: name.to_string(),
            })?;
        log::info!("Group '{name}' -> {id}");
        Ok(id)
    };
    Ok(ServiceGroups {
        kiro: resolve(&names.kiro)?,
        qdev: resolve(&names.qdev)?,
    })
}

impl Directory for IdentityCenterDirectory {
    fn create_user(&self, username: &str, profile: &Profile) -> reconcile::Result<String> {
        self.client
            .create_user(&new_user(username, profile))
            .map_err(to_engine_error)
    }

    fn update_user(&self, user_id: &str, writes: &[AttributeWrite]) -> reconcile::Result<()> {
        let operations = to_operations(writes)?;
        self.client
            .update_user(user_id, &operations)
            .map_err(to_engine_error)
    }

    fn delete_user(&self, user_id: &str) -> reconcile::Result<()> {
        self.client.delete_user(user_id).map_err(to_engine_error)
    }

    fn add_membership(&self, user_id: &str, group_id: &str) -> reconcile::Result<()> {
        self.client
            .create_group_membership(group_id, user_id)
            .map(|membership_id| log::debug!("Created membership {membership_id}"))
            .map_err(to_engine_error)
    }

    /// Removing a membership that is already gone succeeds
    fn remove_membership(&self, user_id: &str, group_id: &str) -> reconcile::Result<()> {
        let Some(membership_id) = self
            .client
            .get_group_membership_id(group_id, user_id)
            .map_err(to_engine_error)?
        else {
            log::debug!("User {user_id} is not a member of {group_id}, nothing to remove");
            return Ok(());
        };
        self.client
            .delete_group_membership(&membership_id)
            .map_err(to_engine_error)
    }

    fn find_user_id(&self, username: &str) -> reconcile::Result<Option<String>> {
        self.client.find_user_id(username).map_err(to_engine_error)
    }
}

impl ActualStateSource for IdentityCenterDirectory {
    /// One call per page of users and groups plus one per group's memberships
    fn fetch_users(&self) -> reconcile::Result<Vec<ActualUser>> {
        let users = self.client.list_users().map_err(to_engine_error)?;
        let groups = self.client.list_groups().map_err(to_engine_error)?;
        log::info!("Fetched {} users and {} groups", users.len(), groups.len());

        let mut memberships = Vec::new();
        for group in &groups {
            memberships.extend(
                self.client
                    .list_group_memberships(&group.group_id)
                    .map_err(to_engine_error)?,
            );
        }
        log::debug!("Fetched {} group memberships", memberships.len());

        Ok(assemble(users, &memberships))
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Join users with their memberships
pub fn assemble(users: Vec<User>, memberships: &[GroupMembership]) -> Vec<ActualUser> {
    let mut by_user: HashMap<&str, BTreeSet<String>> = HashMap::new();
    for membership in memberships {
        if let Some(user_id) = &membership.user_id {
            by_user
                .entry(user_id.as_str())
                .or_default()
                .insert(membership.group_id.clone());
        }
    }

    users
        .into_iter()
        .map(|user| {
            let group_memberships = by_user.remove(user.user_id.as_str()).unwrap_or_default();
            ActualUser {
                group_memberships,
                ..to_actual_user(user)
            }
        })
        .collect()
}

fn to_entry(value: ContactValue) -> MultiValueEntry {
    MultiValueEntry {
        value: value.value,
        kind: value.kind,
        primary: value.primary,
    }
}

fn to_contact(entry: &MultiValueEntry) -> ContactValue {
    ContactValue {
        value: entry.value.clone(),
        kind: entry.kind.clone(),
        primary: entry.primary,
    }
}

fn to_actual_user(user: User) -> ActualUser {
    ActualUser {
        user_id: user.user_id,
        username: user.user_name,
        display_name: user.display_name,
        given_name: user.given_name,
        family_name: user.family_name,
        emails: user.emails.into_iter().map(to_entry).collect(),
        phone_numbers: user.phone_numbers.into_iter().map(to_entry).collect(),
        addresses: user
            .addresses
            .into_iter()
            .map(|a| Address {
                street_address: a.street_address,
                locality: a.locality,
                region: a.region,
                postal_code: a.postal_code,
                country: a.country,
                formatted: a.formatted,
                kind: a.kind,
                primary: a.primary,
            })
            .collect(),
        group_memberships: BTreeSet::new(),
    }
}

fn new_user(username: &str, profile: &Profile) -> NewUser {
    NewUser {
        user_name: username.to_string(),
        display_name: profile.display_name.clone(),
        given_name: profile.given_name.clone(),
        family_name: profile.family_name.clone(),
        emails: vec![to_contact(&profile.email_entry())],
    }
}

/// Attribute writes as `UpdateUser` operations; arrays are sent whole
pub fn to_operations(writes: &[AttributeWrite]) -> reconcile::Result<Vec<AttributeOperation>> {
    writes
        .iter()
        .map(|write| {
            let value = match &write.value {
                AttributeValue::Text(text) => serde_json::Value::String(text.clone()),
                AttributeValue::Entries(entries) => {
                    let contacts: Vec<ContactValue> = entries.iter().map(to_contact).collect();
                    serde_json::to_value(contacts).map_err(|e| reconcile::Error::InvalidRequest {
                        message: format!("cannot encode {}: {e}", write.path),
                    })?
                }
            };
            Ok(AttributeOperation::new(&write.path, value))
        })
        .collect()
}

/// Classify a client error for the engine's retry and reporting logic
pub fn to_engine_error(err: identitystore::Error) -> reconcile::Error {
    let message = err.to_string();
    match err.category() {
        ApiCategory::Throttling => reconcile::Error::Throttled { message },
        ApiCategory::Transient => match err {
            identitystore::Error::Timeout { operation } => reconcile::Error::Timeout { operation },
            _ => reconcile::Error::Network { message },
        },
        ApiCategory::Permission | ApiCategory::Credentials => {
            reconcile::Error::Permission { message }
        }
        ApiCategory::NotFound => reconcile::Error::NotFound { resource: message },
        ApiCategory::Conflict => reconcile::Error::Conflict { message },
        ApiCategory::Validation => reconcile::Error::InvalidRequest { message },
        ApiCategory::Quota | ApiCategory::Other => reconcile::Error::Other(message),
    }
}
