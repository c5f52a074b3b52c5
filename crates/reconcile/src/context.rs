//! Directory and progress traits
//!
//! These traits allow the reconcile crate to be used without depending on a
//! specific directory client or terminal UI.

use crate::error::{ErrorCategory, Result};
use crate::types::{ActionKind, ActualUser, AttributeWrite, ExecutionResult, Profile};
use std::time::Duration;

/// Mutations the execution engine performs against the identity directory
///
/// Implementations are shared across worker threads. Each call is a single
/// remote operation; retries are handled by the engine.
pub trait Directory: Send + Sync {
    /// Create a user and return its directory id
    fn create_user(&self, username: &str, profile: &Profile) -> Result<String>;

    /// Apply attribute writes to a user
    fn update_user(&self, user_id: &str, writes: &[AttributeWrite]) -> Result<()>;

    /// Delete a user
    fn delete_user(&self, user_id: &str) -> Result<()>;

    /// Add a user to a group
    fn add_membership(&self, user_id: &str, group_id: &str) -> Result<()>;

    /// Remove a user from a group
    fn remove_membership(&self, user_id: &str, group_id: &str) -> Result<()>;

    /// Directory id of a user by username, `None` when absent
    fn find_user_id(&self, username: &str) -> Result<Option<String>>;
}

/// Source of the directory's current users and memberships
pub trait ActualStateSource {
    /// Fetch every user with its group memberships
    fn fetch_users(&self) -> Result<Vec<ActualUser>>;
}

/// Progress callback for execution
///
/// Called from worker threads, so implementations must be thread-safe.
pub trait ProgressCallback: Sync {
    /// Called once before any action runs
    fn on_start(&self, units: usize, actions: usize);

    /// Called when an action resolves
    fn on_action_complete(&self, result: &ExecutionResult);

    /// Called when every action of a user's unit has resolved
    fn on_unit_complete(&self, employee_id: &str);

    /// Called once after all units complete
    fn on_finish(&self);

    /// Called after every remote call, including retried attempts
    fn on_call(&self, _call: &CallRecord) {}

    /// Called when throttling lowers (or recovery raises) the live concurrency
    fn on_concurrency_change(&self, _previous: usize, _current: usize) {}
}

/// One remote call made by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub kind: ActionKind,
    /// 1 for the first try of an action
    pub attempt: u32,
    pub elapsed: Duration,
    /// Category of the error, `None` when the call succeeded
    pub error: Option<ErrorCategory>,
    /// The directory asked us to slow down
    pub throttled: bool,
}

impl CallRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&self, _units: usize, _actions: usize) {}
    fn on_action_complete(&self, _result: &ExecutionResult) {}
    fn on_unit_complete(&self, _employee_id: &str) {}
    fn on_finish(&self) {}
}
