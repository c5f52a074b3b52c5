//! In-memory directory double for engine and verifier tests

use crate::context::{ActualStateSource, Directory};
use crate::error::{Error, Result};
use crate::merge;
use crate::types::{ActionKind, ActualUser, AttributeValue, AttributeWrite, Profile};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Script {
    errors: VecDeque<Error>,
    repeat: Option<Error>,
    /// Returned after the call has taken effect, like a lost response
    lost: VecDeque<Error>,
}

#[derive(Default)]
struct State {
    users: BTreeMap<String, ActualUser>,
    next_id: usize,
    scripts: HashMap<(ActionKind, String), Script>,
    calls: Vec<(ActionKind, String)>,
}

/// Directory held in memory, with scriptable per-user failures
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<State>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<ActualUser>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.insert(user);
        }
        directory
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, user: ActualUser) {
        self.lock().users.insert(user.user_id.clone(), user);
    }

    /// Fail the next calls of `kind` for `username` with these errors, in order
    pub fn fail_next(&self, kind: ActionKind, username: &str, errors: Vec<Error>) {
        let mut state = self.lock();
        let script = state.scripts.entry((kind, username.to_string())).or_default();
        script.errors.extend(errors);
    }

    /// Apply the next calls of `kind` for `username` but report these errors
    pub fn lose_responses(&self, kind: ActionKind, username: &str, errors: Vec<Error>) {
        let mut state = self.lock();
        let script = state.scripts.entry((kind, username.to_string())).or_default();
        script.lost.extend(errors);
    }

    /// Fail every call of `kind` for `username`
    pub fn fail_always(&self, kind: ActionKind, username: &str, error: Error) {
        let mut state = self.lock();
        let script = state.scripts.entry((kind, username.to_string())).or_default();
        script.repeat = Some(error);
    }

    pub fn users(&self) -> Vec<ActualUser> {
        self.lock().users.values().cloned().collect()
    }

    pub fn user_by_name(&self, username: &str) -> Option<ActualUser> {
        self.lock()
            .users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned()
    }

    /// Total remote calls received
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Calls received for one operation and user
    pub fn calls_for(&self, kind: ActionKind, username: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(k, u)| *k == kind && u == username)
            .count()
    }

    /// Record a call and return its scripted failure, if any
    fn enter(state: &mut State, kind: ActionKind, username: &str) -> Result<()> {
        state.calls.push((kind, username.to_string()));
        let Some(script) = state.scripts.get_mut(&(kind, username.to_string())) else {
            return Ok(());
        };
        if let Some(error) = script.errors.pop_front() {
            return Err(error);
        }
        match &script.repeat {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Scripted error for a call that already took effect
    fn lost_response(state: &mut State, kind: ActionKind, username: &str) -> Result<()> {
        match state
            .scripts
            .get_mut(&(kind, username.to_string()))
            .and_then(|script| script.lost.pop_front())
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn username_of(state: &State, user_id: &str) -> Result<String> {
        state
            .users
            .get(user_id)
            .map(|u| u.username.clone())
            .ok_or_else(|| Error::NotFound {
                resource: format!("user {user_id}"),
            })
    }

    fn user_mut<'a>(state: &'a mut State, user_id: &str) -> Result<&'a mut ActualUser> {
        state.users.get_mut(user_id).ok_or_else(|| Error::NotFound {
            resource: format!("user {user_id}"),
        })
    }
}

impl Directory for InMemoryDirectory {
    fn create_user(&self, username: &str, profile: &Profile) -> Result<String> {
        let mut state = self.lock();
        Self::enter(&mut state, ActionKind::CreateUser, username)?;
        if state
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username))
        {
            return Err(Error::Conflict {
                message: format!("user {username} already exists"),
            });
        }
        state.next_id += 1;
        let user_id = format!("mem-{}", state.next_id);
        state.users.insert(
            user_id.clone(),
            ActualUser {
                user_id: user_id.clone(),
                username: username.to_string(),
                display_name: Some(profile.display_name.clone()),
                given_name: Some(profile.given_name.clone()),
                family_name: Some(profile.family_name.clone()),
                emails: vec![profile.email_entry()],
                ..ActualUser::default()
            },
        );
        Self::lost_response(&mut state, ActionKind::CreateUser, username)?;
        Ok(user_id)
    }

    fn update_user(&self, user_id: &str, writes: &[AttributeWrite]) -> Result<()> {
        let mut state = self.lock();
        let username = Self::username_of(&state, user_id)?;
        Self::enter(&mut state, ActionKind::UpdateAttributes, &username)?;
        merge::check_writes(writes)?;
        let user = Self::user_mut(&mut state, user_id)?;
        for write in writes {
            match (write.path.as_str(), &write.value) {
                ("displayName", AttributeValue::Text(v)) => user.display_name = Some(v.clone()),
                ("name.givenName", AttributeValue::Text(v)) => user.given_name = Some(v.clone()),
                ("name.familyName", AttributeValue::Text(v)) => user.family_name = Some(v.clone()),
                ("emails", AttributeValue::Entries(v)) => user.emails.clone_from(v),
                ("phoneNumbers", AttributeValue::Entries(v)) => user.phone_numbers.clone_from(v),
                (path, _) => {
                    return Err(Error::InvalidRequest {
                        message: format!("unsupported attribute path {path}"),
                    });
                }
            }
        }
        Ok(())
    }

    fn delete_user(&self, user_id: &str) -> Result<()> {
        let mut state = self.lock();
        let username = Self::username_of(&state, user_id)?;
        Self::enter(&mut state, ActionKind::DeleteUser, &username)?;
        state.users.remove(user_id);
        Ok(())
    }

    fn add_membership(&self, user_id: &str, group_id: &str) -> Result<()> {
        let mut state = self.lock();
        let username = Self::username_of(&state, user_id)?;
        Self::enter(&mut state, ActionKind::AddMembership, &username)?;
        let user = Self::user_mut(&mut state, user_id)?;
        if !user.group_memberships.insert(group_id.to_string()) {
            return Err(Error::Conflict {
                message: format!("{username} is already a member of {group_id}"),
            });
        }
        Ok(())
    }

    fn remove_membership(&self, user_id: &str, group_id: &str) -> Result<()> {
        let mut state = self.lock();
        let username = Self::username_of(&state, user_id)?;
        Self::enter(&mut state, ActionKind::RemoveMembership, &username)?;
        let user = Self::user_mut(&mut state, user_id)?;
        if !user.group_memberships.remove(group_id) {
            return Err(Error::NotFound {
                resource: format!("membership of {username} in {group_id}"),
            });
        }
        Ok(())
    }

    fn find_user_id(&self, username: &str) -> Result<Option<String>> {
        Ok(self.user_by_name(username).map(|u| u.user_id))
    }
}

impl ActualStateSource for InMemoryDirectory {
    fn fetch_users(&self) -> Result<Vec<ActualUser>> {
        Ok(self.users())
    }
}
