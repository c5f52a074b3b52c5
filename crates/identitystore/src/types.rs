//! Directory entities, decoupled from the SDK's generated types.

use serde::{Deserialize, Serialize};

/// A directory user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub user_name: String,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub emails: Vec<ContactValue>,
    pub phone_numbers: Vec<ContactValue>,
    pub addresses: Vec<Address>,
}

/// One entry of a multi-value contact attribute (email or phone number)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContactValue {
    pub value: String,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

/// A postal address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

/// A directory group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_id: String,
    pub display_name: Option<String>,
}

/// A user's membership in a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub membership_id: String,
    pub group_id: String,
    /// Member user id; `None` for non-user members
    pub user_id: Option<String>,
}

/// An Identity Center instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub instance_arn: String,
    pub identity_store_id: String,
}

/// Payload for creating a user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub user_name: String,
    pub display_name: String,
    pub given_name: String,
    pub family_name: String,
    pub emails: Vec<ContactValue>,
}

/// One attribute write of an `UpdateUser` call.
///
/// Multi-value attributes (`emails`, `phoneNumbers`, `addresses`) take the
/// complete array as value, sent as a document.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeOperation {
    pub attribute_path: String,
    pub attribute_value: serde_json::Value,
}

impl AttributeOperation {
    pub fn new(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            attribute_path: path.into(),
            attribute_value: value,
        }
    }
}
