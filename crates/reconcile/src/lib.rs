//! # Reconcile
//!
//! Roster reconciliation against an identity directory.
//!
//! This crate compares a desired roster of users and service subscriptions
//! with the directory's actual users and group memberships, plans the
//! minimal set of mutations, executes them with bounded concurrency and
//! retries, and verifies the result.
//!
//! ## Core Concepts
//!
//! - **DesiredUser / ActualUser**: the two sides of the comparison
//! - **Reconciler**: diffs both sides into an [`ExecutionPlan`] of per-user units
//! - **Executor**: runs the plan on a worker pool with retry, backoff and
//!   adaptive concurrency
//! - **Merge**: builds whole-array payloads for multi-value attributes
//! - **Verify**: re-fetches state and reports drift
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{
//!     execute, verify, AttributeFormat, ExecuteOptions, Mode, NoProgress, Reconciler,
//!     ReconcilerConfig, ServiceGroups, UsernameTemplate,
//! };
//!
//! let reconciler = Reconciler::new(ReconcilerConfig {
//!     template: UsernameTemplate::parse("{employee_id}@corp-saml.com")?,
//!     groups: ServiceGroups { kiro: kiro_id, qdev: qdev_id },
//!     format: AttributeFormat::Modern,
//! });
//!
//! let actual = directory.fetch_users()?;
//! let reconciliation = reconciler.reconcile(&desired, &actual, Mode::Sync)?;
//! let results = execute(&reconciliation.plan, &directory, &ExecuteOptions::default(), &NoProgress)?;
//! let report = verify(&desired, &reconciliation.plan, &results, &directory, &reconciler)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`Directory`]: performs mutations against the remote directory
//! - [`ActualStateSource`]: lists users with their memberships
//! - [`ProgressCallback`]: receives progress updates from worker threads
//!
//! This keeps the engine free of any particular HTTP client or terminal UI.

pub mod context;
pub mod error;
pub mod executor;
pub mod merge;
pub mod naming;
pub mod planner;
pub mod retry;
pub mod throttle;
pub mod types;
pub mod verify;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{ActualStateSource, CallRecord, Directory, NoProgress, ProgressCallback};
pub use error::{Error, ErrorCategory, PlanError, Result, ValidationError};
pub use executor::{execute, DEPENDENCY_FAILED, DRY_RUN};
pub use merge::{merge, EntryTarget, MultiValue, PartialChange};
pub use naming::UsernameTemplate;
pub use planner::{
    AttributeFormat, ExecutionPlan, PlanBuilder, PlanUnit, Reconciler, ReconcilerConfig,
    Reconciliation, Rejection, ServiceGroups,
};
pub use retry::{with_retry, RetryCallback, RetryPolicy};
pub use throttle::{AdaptiveConfig, ConcurrencyGovernor};
pub use types::{
    Action, ActionKind, ActualUser, Address, AttributeChange, AttributeField, AttributeValue,
    AttributeWrite, DeletionConfirmation, DesiredUser, ExecuteOptions, ExecuteSummary,
    ExecutionResult, Mode, MultiValueEntry, Outcome, Profile, Service, Subscription, Tally,
    UserKey, DELETE_TOKEN, MAX_CONCURRENCY, MIN_CONCURRENCY,
};
pub use verify::{verify, Verdict, VerificationEntry, VerificationReport};
