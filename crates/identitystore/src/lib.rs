//! # Identitystore
//!
//! Blocking client for the AWS IAM Identity Center identity store.
//!
//! Covers what roster synchronization needs: listing users, groups and group
//! memberships; creating, updating and deleting users; adding and removing
//! memberships. Calls go through the official AWS SDK crates.
//!
//! ## Credentials
//!
//! [`IdentityStoreClient::connect`] loads the shared AWS config for the
//! configured profile and region with `aws-config`, so environment
//! variables, profiles, SSO sessions and credential processes all work.
//!
//! ## Errors
//!
//! Service errors keep their AWS error code and are grouped into an
//! [`ErrorCategory`] so callers can tell throttling from permanent failures.

pub mod client;
pub mod error;
pub mod types;

#[cfg(any(test, feature = "test-server"))]
pub mod testing;

pub use client::{
    paginate, select_identity_store, ClientSettings, IdentityStoreClient,
    DEFAULT_TIMEOUT,
};
pub use error::{Error, ErrorCategory, Result};
pub use types::{
    Address, AttributeOperation, ContactValue, Group, GroupMembership, Instance, NewUser, User,
};
