//! Identity Store API client.
//!
//! Wraps the AWS SDK clients behind a blocking API. The client owns a small
//! tokio runtime and drives every SDK future to completion with `block_on`,
//! so callers on plain threads (or a rayon pool) never see async code.
//!
//! SDK retries are disabled: callers own the retry policy and need to see
//! every throttling response.
//!
//! # Example
//!
//! ```no_run
//! use identitystore::{ClientSettings, IdentityStoreClient};
//!
//! let client = IdentityStoreClient::connect(&ClientSettings::new("default", "us-east-1", "")).unwrap();
//! let users = client.list_users().unwrap();
//! println!("Found {} users", users.len());
//! ```

use crate::error::{Error, ErrorCategory, Result};
use crate::types::{
    Address, AttributeOperation, ContactValue, Group, GroupMembership, Instance, NewUser, User,
};
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_identitystore::config::{Credentials, Region};
use aws_sdk_identitystore::types as sdk;
use aws_smithy_types::{Document, Number};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime threads; requests are driven by the callers' threads
const RUNTIME_THREADS: usize = 2;

/// Settings for connecting to a directory
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Named profile from the shared AWS config; empty uses the default chain
    pub profile: String,
    pub region: String,
    /// Identity store id (`d-...`) or Identity Center instance id; empty
    /// selects the first instance
    pub instance_id: String,
    /// Bound on every request attempt
    pub timeout: Duration,
}

impl ClientSettings {
    pub fn new(
        profile: impl Into<String>,
        region: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            profile: profile.into(),
            region: region.into(),
            instance_id: instance_id.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(RUNTIME_THREADS)
        .thread_name("identitystore")
        .enable_all()
        .build()
        .map_err(|e| Error::Other(format!("failed to start the SDK runtime: {e}")))
}

fn timeout_config(timeout: Duration) -> TimeoutConfig {
    TimeoutConfig::builder()
        .operation_attempt_timeout(timeout)
        .build()
}

/// Collect every page of a paginated listing.
///
/// `fetch` receives the previous page's token and returns one page plus the
/// next token.
pub fn paginate<T, F>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<&str>) -> Result<(Vec<T>, Option<String>)>,
{
    let mut items = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let (page, next) = fetch(token.as_deref())?;
        items.extend(page);
        match next.filter(|t| !t.is_empty()) {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(Error::InvalidResponse(format!(
                    "pagination token repeated: {next}"
                )));
            }
            Some(next) => token = Some(next),
            None => return Ok(items),
        }
    }
}

/// Choose the identity store for a configured id.
///
/// A `d-` prefixed value is already an identity store id. Otherwise the
/// instance whose ARN ends with the configured id wins, falling back to the
/// first instance.
pub fn select_identity_store(configured: &str, instances: &[Instance]) -> Result<String> {
    let configured = configured.trim();
    if configured.starts_with("d-") {
        return Ok(configured.to_string());
    }
    if !configured.is_empty()
        && let Some(instance) = instances
            .iter()
            .find(|i| i.instance_arn.ends_with(configured))
    {
        return Ok(instance.identity_store_id.clone());
    }
    if !configured.is_empty() {
        log::warn!("Instance '{configured}' not found, using the first available instance");
    }
    instances
        .first()
        .map(|i| i.identity_store_id.clone())
        .ok_or_else(|| Error::Other("no IAM Identity Center instance found".to_string()))
}

/// Client for one identity store
pub struct IdentityStoreClient {
    runtime: Runtime,
    client: aws_sdk_identitystore::Client,
    identity_store_id: String,
}

impl IdentityStoreClient {
    /// Load the AWS config for the profile and region, resolve the identity
    /// store id, then connect.
    pub fn connect(settings: &ClientSettings) -> Result<Self> {
        let runtime = runtime()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeout_config(settings.timeout));
        if !settings.profile.trim().is_empty() {
            loader = loader.profile_name(settings.profile.trim());
        }
        let sdk_config = runtime.block_on(loader.load());

        let identity_store_id = if settings.instance_id.trim().starts_with("d-") {
            settings.instance_id.trim().to_string()
        } else {
            let admin = aws_sdk_ssoadmin::Client::new(&sdk_config);
            let instances = list_instances(&runtime, &admin)?;
            select_identity_store(&settings.instance_id, &instances)?
        };
        log::info!(
            "Using identity store {identity_store_id} (profile '{}', region {})",
            settings.profile,
            settings.region
        );

        Ok(Self {
            runtime,
            client: aws_sdk_identitystore::Client::new(&sdk_config),
            identity_store_id,
        })
    }

    /// Client for a known store at a custom endpoint with static test
    /// credentials.
    pub fn with_endpoint(
        url: &str,
        identity_store_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let config = aws_sdk_identitystore::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "static"))
            .endpoint_url(url)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeout_config(timeout))
            .build();
        Ok(Self {
            runtime: runtime()?,
            client: aws_sdk_identitystore::Client::from_conf(config),
            identity_store_id: identity_store_id.into(),
        })
    }

    pub fn identity_store_id(&self) -> &str {
        &self.identity_store_id
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        paginate(|token| {
            let page = self
                .block_on(
                    self.client
                        .list_users()
                        .identity_store_id(&self.identity_store_id)
                        .set_next_token(token.map(str::to_string))
                        .send(),
                )
                .map_err(|e| Error::from_sdk("ListUsers", e))?;
            Ok((
                page.users().iter().map(user_from_sdk).collect(),
                page.next_token().map(str::to_string),
            ))
        })
    }

    pub fn list_groups(&self) -> Result<Vec<Group>> {
        paginate(|token| {
            let page = self
                .block_on(
                    self.client
                        .list_groups()
                        .identity_store_id(&self.identity_store_id)
                        .set_next_token(token.map(str::to_string))
                        .send(),
                )
                .map_err(|e| Error::from_sdk("ListGroups", e))?;
            Ok((
                page.groups()
                    .iter()
                    .map(|g| Group {
                        group_id: g.group_id().to_string(),
                        display_name: g.display_name().map(str::to_string),
                    })
                    .collect(),
                page.next_token().map(str::to_string),
            ))
        })
    }

    /// Look up a group by display name; `None` when no such group exists.
    pub fn find_group_id(&self, display_name: &str) -> Result<Option<String>> {
        let result = self
            .block_on(
                self.client
                    .get_group_id()
                    .identity_store_id(&self.identity_store_id)
                    .alternate_identifier(unique_attribute("displayName", display_name)?)
                    .send(),
            )
            .map_err(|e| Error::from_sdk("GetGroupId", e));
        not_found_as_none(result.map(|output| output.group_id().to_string()))
    }

    /// Look up a user by username; `None` when no such user exists.
    pub fn find_user_id(&self, user_name: &str) -> Result<Option<String>> {
        let result = self
            .block_on(
                self.client
                    .get_user_id()
                    .identity_store_id(&self.identity_store_id)
                    .alternate_identifier(unique_attribute("userName", user_name)?)
                    .send(),
            )
            .map_err(|e| Error::from_sdk("GetUserId", e));
        not_found_as_none(result.map(|output| output.user_id().to_string()))
    }

    pub fn list_group_memberships(&self, group_id: &str) -> Result<Vec<GroupMembership>> {
        paginate(|token| {
            let page = self
                .block_on(
                    self.client
                        .list_group_memberships()
                        .identity_store_id(&self.identity_store_id)
                        .group_id(group_id)
                        .set_next_token(token.map(str::to_string))
                        .send(),
                )
                .map_err(|e| Error::from_sdk("ListGroupMemberships", e))?;
            Ok((
                page.group_memberships()
                    .iter()
                    .map(|m| GroupMembership {
                        membership_id: m.membership_id().unwrap_or_default().to_string(),
                        group_id: m.group_id().unwrap_or(group_id).to_string(),
                        user_id: m
                            .member_id()
                            .and_then(|member| member.as_user_id().ok())
                            .cloned(),
                    })
                    .collect(),
                page.next_token().map(str::to_string),
            ))
        })
    }

    /// Create a user and return its id.
    pub fn create_user(&self, user: &NewUser) -> Result<String> {
        let name = sdk::Name::builder()
            .given_name(&user.given_name)
            .family_name(&user.family_name)
            .build();
        let emails = user
            .emails
            .iter()
            .map(|email| {
                sdk::Email::builder()
                    .value(&email.value)
                    .set_type(email.kind.clone())
                    .primary(email.primary)
                    .build()
            })
            .collect();

        let output = self
            .block_on(
                self.client
                    .create_user()
                    .identity_store_id(&self.identity_store_id)
                    .user_name(&user.user_name)
                    .display_name(&user.display_name)
                    .name(name)
                    .set_emails(Some(emails))
                    .send(),
            )
            .map_err(|e| Error::from_sdk("CreateUser", e))?;
        Ok(output.user_id().to_string())
    }

    pub fn update_user(&self, user_id: &str, operations: &[AttributeOperation]) -> Result<()> {
        let operations = operations
            .iter()
            .map(|op| {
                sdk::AttributeOperation::builder()
                    .attribute_path(&op.attribute_path)
                    .attribute_value(to_document(&op.attribute_value))
                    .build()
                    .map_err(|e| Error::Other(format!("invalid attribute operation: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        self.block_on(
            self.client
                .update_user()
                .identity_store_id(&self.identity_store_id)
                .user_id(user_id)
                .set_operations(Some(operations))
                .send(),
        )
        .map_err(|e| Error::from_sdk("UpdateUser", e))?;
        Ok(())
    }

    pub fn delete_user(&self, user_id: &str) -> Result<()> {
        self.block_on(
            self.client
                .delete_user()
                .identity_store_id(&self.identity_store_id)
                .user_id(user_id)
                .send(),
        )
        .map_err(|e| Error::from_sdk("DeleteUser", e))?;
        Ok(())
    }

    /// Add a user to a group and return the membership id.
    pub fn create_group_membership(&self, group_id: &str, user_id: &str) -> Result<String> {
        let output = self
            .block_on(
                self.client
                    .create_group_membership()
                    .identity_store_id(&self.identity_store_id)
                    .group_id(group_id)
                    .member_id(sdk::MemberId::UserId(user_id.to_string()))
                    .send(),
            )
            .map_err(|e| Error::from_sdk("CreateGroupMembership", e))?;
        Ok(output.membership_id().to_string())
    }

    /// Membership id of a user in a group; `None` when not a member.
    pub fn get_group_membership_id(&self, group_id: &str, user_id: &str) -> Result<Option<String>> {
        let result = self
            .block_on(
                self.client
                    .get_group_membership_id()
                    .identity_store_id(&self.identity_store_id)
                    .group_id(group_id)
                    .member_id(sdk::MemberId::UserId(user_id.to_string()))
                    .send(),
            )
            .map_err(|e| Error::from_sdk("GetGroupMembershipId", e));
        not_found_as_none(result.map(|output| output.membership_id().to_string()))
    }

    pub fn delete_group_membership(&self, membership_id: &str) -> Result<()> {
        self.block_on(
            self.client
                .delete_group_membership()
                .identity_store_id(&self.identity_store_id)
                .membership_id(membership_id)
                .send(),
        )
        .map_err(|e| Error::from_sdk("DeleteGroupMembership", e))?;
        Ok(())
    }
}

fn list_instances(runtime: &Runtime, admin: &aws_sdk_ssoadmin::Client) -> Result<Vec<Instance>> {
    paginate(|token| {
        let page = runtime
            .block_on(
                admin
                    .list_instances()
                    .set_next_token(token.map(str::to_string))
                    .send(),
            )
            .map_err(|e| Error::from_sdk("ListInstances", e))?;
        Ok((
            page.instances()
                .iter()
                .filter_map(|i| {
                    Some(Instance {
                        instance_arn: i.instance_arn()?.to_string(),
                        identity_store_id: i.identity_store_id()?.to_string(),
                    })
                })
                .collect(),
            page.next_token().map(str::to_string),
        ))
    })
}

fn not_found_as_none(result: Result<String>) -> Result<Option<String>> {
    match result {
        Ok(id) => Ok(Some(id)),
        Err(e) if e.category() == ErrorCategory::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn unique_attribute(path: &str, value: &str) -> Result<sdk::AlternateIdentifier> {
    let attribute = sdk::UniqueAttribute::builder()
        .attribute_path(path)
        .attribute_value(Document::String(value.to_string()))
        .build()
        .map_err(|e| Error::Other(format!("invalid {path} lookup: {e}")))?;
    Ok(sdk::AlternateIdentifier::UniqueAttribute(attribute))
}

// =============================================================================
// Conversions
// =============================================================================

fn user_from_sdk(user: &sdk::User) -> User {
    let name = user.name();
    User {
        user_id: user.user_id().to_string(),
        user_name: user.user_name().unwrap_or_default().to_string(),
        display_name: user.display_name().map(str::to_string),
        given_name: name.and_then(sdk::Name::given_name).map(str::to_string),
        family_name: name.and_then(sdk::Name::family_name).map(str::to_string),
        emails: user
            .emails()
            .iter()
            .map(|e| contact(e.value(), e.r#type(), e.primary()))
            .collect(),
        phone_numbers: user
            .phone_numbers()
            .iter()
            .map(|p| contact(p.value(), p.r#type(), p.primary()))
            .collect(),
        addresses: user
            .addresses()
            .iter()
            .map(|a| Address {
                street_address: a.street_address().map(str::to_string),
                locality: a.locality().map(str::to_string),
                region: a.region().map(str::to_string),
                postal_code: a.postal_code().map(str::to_string),
                country: a.country().map(str::to_string),
                formatted: a.formatted().map(str::to_string),
                kind: a.r#type().map(str::to_string),
                primary: a.primary(),
            })
            .collect(),
    }
}

fn contact(value: Option<&str>, kind: Option<&str>, primary: bool) -> ContactValue {
    ContactValue {
        value: value.unwrap_or_default().to_string(),
        kind: kind.map(str::to_string),
        primary,
    }
}

/// JSON attribute value as an SDK document
fn to_document(value: &serde_json::Value) -> Document {
    match value {
        serde_json::Value::Null => Document::Null,
        serde_json::Value::Bool(b) => Document::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(Number::PosInt)
            .or_else(|| n.as_i64().map(Number::NegInt))
            .or_else(|| n.as_f64().map(Number::Float))
            .map_or(Document::Null, Document::Number),
        serde_json::Value::String(s) => Document::String(s.clone()),
        serde_json::Value::Array(items) => Document::Array(items.iter().map(to_document).collect()),
        serde_json::Value::Object(map) => Document::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), to_document(value)))
                .collect(),
        ),
    }
}
