//! Multi-value attribute merging
//!
//! The directory models emails, phone numbers and addresses as whole-array
//! attributes: a write must carry the complete array, and indexed element
//! paths such as `emails[0].value` are rejected. This module turns a change
//! to one entry into the full replacement array, keeping every other entry
//! exactly as it was.

use crate::error::{Error, Result};
use crate::types::{Address, AttributeValue, AttributeWrite, MultiValueEntry};
use serde::{Deserialize, Serialize};

/// Attribute paths the directory only accepts as whole arrays.
pub const MULTI_VALUE_PATHS: [&str; 3] = ["emails", "phoneNumbers", "addresses"];

/// An entry of a whole-array attribute
pub trait MultiValue: Clone {
    /// Value identifying the entry (address, number, formatted text)
    fn identity(&self) -> &str;

    /// Entry type such as "work" or "home"
    fn kind(&self) -> Option<&str>;

    /// Whether the entry is flagged primary
    fn is_primary(&self) -> bool;
}

impl MultiValue for MultiValueEntry {
    fn identity(&self) -> &str {
        &self.value
    }

    fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    fn is_primary(&self) -> bool {
        self.primary
    }
}

impl MultiValue for Address {
    fn identity(&self) -> &str {
        self.formatted
            .as_deref()
            .or(self.street_address.as_deref())
            .unwrap_or("")
    }

    fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    fn is_primary(&self) -> bool {
        self.primary
    }
}

/// Which existing entry a change applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryTarget {
    /// The entry flagged primary
    Primary,
    /// The first entry of the given type
    Kind(String),
    /// The entry whose value matches (case-insensitive)
    Identity(String),
}

impl EntryTarget {
    fn matches<E: MultiValue>(&self, entry: &E) -> bool {
        match self {
            Self::Primary => entry.is_primary(),
            Self::Kind(kind) => entry.kind() == Some(kind.as_str()),
            Self::Identity(value) => entry.identity().eq_ignore_ascii_case(value),
        }
    }
}

/// A change to a single entry of a whole-array attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialChange<E> {
    /// Entry the change applies to
    pub target: EntryTarget,
    /// New entry, or `None` to remove the targeted entry
    pub replacement: Option<E>,
}

impl<E> PartialChange<E> {
    /// Replace the targeted entry (or append if nothing matches)
    pub fn replace(target: EntryTarget, entry: E) -> Self {
        Self {
            target,
            replacement: Some(entry),
        }
    }

    /// Remove the targeted entry
    pub fn remove(target: EntryTarget) -> Self {
        Self {
            target,
            replacement: None,
        }
    }
}

/// Compute the full array to write for a change to one entry.
///
/// The targeted entry is replaced in place (or removed); when nothing
/// matches, the replacement is appended. Every other entry is carried over
/// unmodified and in its original order, even when it holds the same value
/// as the replacement. Target it with [`EntryTarget::Identity`] to rewrite
/// that entry instead.
pub fn merge<E: MultiValue>(existing: &[E], change: &PartialChange<E>) -> Vec<E> {
    let position = existing.iter().position(|e| change.target.matches(e));

    let mut merged: Vec<E> = existing
        .iter()
        .enumerate()
        .filter(|(i, _)| change.replacement.is_some() || Some(*i) != position)
        .map(|(i, e)| match (&change.replacement, Some(i) == position) {
            (Some(replacement), true) => replacement.clone(),
            _ => e.clone(),
        })
        .collect();

    if let (Some(replacement), None) = (&change.replacement, position) {
        merged.push(replacement.clone());
    }
    merged
}

/// Check attribute writes against the directory's whole-array rules.
///
/// Rejects indexed element paths and scalar values sent to multi-value paths,
/// which the directory would otherwise refuse after a round trip.
pub fn check_writes(writes: &[AttributeWrite]) -> Result<()> {
    for write in writes {
        let base = write.path.split(['[', '.']).next().unwrap_or_default();
        if !MULTI_VALUE_PATHS.contains(&base) {
            continue;
        }
        if write.path.contains('[') {
            return Err(Error::InvalidRequest {
                message: format!(
                    "multi-value attribute '{base}' cannot be written by index: {}",
                    write.path
                ),
            });
        }
        if write.path != base {
            return Err(Error::InvalidRequest {
                message: format!(
                    "multi-value attribute '{base}' must be written as a whole array: {}",
                    write.path
                ),
            });
        }
        if matches!(write.value, AttributeValue::Text(_)) {
            return Err(Error::InvalidRequest {
                message: format!("value for multi-value attribute '{base}' must be an array"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work_email(value: &str) -> MultiValueEntry {
        MultiValueEntry::new(value).with_kind("work").as_primary()
    }

    #[test]
    fn test_replace_primary_keeps_other_entries() {
        let existing = vec![
            work_email("old@x.com"),
            MultiValueEntry::new("home@y.com").with_kind("home"),
            MultiValueEntry::new("alt@z.com"),
        ];
        let change = PartialChange::replace(EntryTarget::Primary, work_email("new@x.com"));

        let merged = merge(&existing, &change);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0], work_email("new@x.com"));
        assert_eq!(merged[1], existing[1]);
        assert_eq!(merged[2], existing[2]);
    }

    #[test]
    fn test_unmatched_target_appends() {
        let existing = vec![MultiValueEntry::new("home@y.com").with_kind("home")];
        let change = PartialChange::replace(EntryTarget::Primary, work_email("new@x.com"));

        let merged = merge(&existing, &change);

        assert_eq!(merged, vec![existing[0].clone(), work_email("new@x.com")]);
    }

    #[test]
    fn test_merge_into_empty_array() {
        let change = PartialChange::replace(EntryTarget::Primary, work_email("a@x.com"));
        assert_eq!(merge(&[], &change), vec![work_email("a@x.com")]);
    }

    #[test]
    fn test_target_by_kind_and_identity() {
        let existing = vec![
            MultiValueEntry::new("+1 555 0100").with_kind("work"),
            MultiValueEntry::new("+1 555 0199").with_kind("mobile"),
        ];

        let by_kind = PartialChange::replace(
            EntryTarget::Kind("mobile".to_string()),
            MultiValueEntry::new("+1 555 0142").with_kind("mobile"),
        );
        let merged = merge(&existing, &by_kind);
        assert_eq!(merged[0], existing[0]);
        assert_eq!(merged[1].value, "+1 555 0142");

        let by_identity = PartialChange::remove(EntryTarget::Identity("+1 555 0100".to_string()));
        assert_eq!(merge(&existing, &by_identity), vec![existing[1].clone()]);
    }

    #[test]
    fn test_promoting_existing_value_keeps_that_entry() {
        let home = MultiValueEntry::new("new@x.com").with_kind("home");
        let existing = vec![work_email("old@x.com"), home.clone()];
        let change = PartialChange::replace(EntryTarget::Primary, work_email("new@x.com"));

        let merged = merge(&existing, &change);

        assert_eq!(merged, vec![work_email("new@x.com"), home]);
    }

    #[test]
    fn test_identity_target_rewrites_matching_entry() {
        let existing = vec![
            work_email("old@x.com"),
            MultiValueEntry::new("new@x.com").with_kind("home"),
        ];
        let change = PartialChange::replace(
            EntryTarget::Identity("NEW@x.com".to_string()),
            MultiValueEntry::new("new@x.com").with_kind("work"),
        );

        let merged = merge(&existing, &change);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], existing[0]);
        assert_eq!(merged[1].kind.as_deref(), Some("work"));
    }

    #[test]
    fn test_untargeted_entries_are_never_lost() {
        let existing: Vec<MultiValueEntry> = (0..6)
            .map(|i| MultiValueEntry::new(format!("user{i}@x.com")).with_kind("other"))
            .collect();

        for target in 0..existing.len() {
            let change = PartialChange::replace(
                EntryTarget::Identity(existing[target].value.clone()),
                MultiValueEntry::new("fresh@x.com"),
            );
            let merged = merge(&existing, &change);
            for (i, entry) in existing.iter().enumerate() {
                if i != target {
                    assert!(merged.contains(entry), "entry {i} lost when targeting {target}");
                }
            }
            assert_eq!(merged.len(), existing.len());
        }
    }

    #[test]
    fn test_address_merge_preserves_other_addresses() {
        let home = Address {
            formatted: Some("1 Home St".to_string()),
            kind: Some("home".to_string()),
            ..Address::default()
        };
        let work = Address {
            formatted: Some("2 Work Ave".to_string()),
            kind: Some("work".to_string()),
            primary: true,
            ..Address::default()
        };
        let moved = Address {
            formatted: Some("3 New Rd".to_string()),
            kind: Some("work".to_string()),
            primary: true,
            ..Address::default()
        };

        let merged = merge(
            &[home.clone(), work],
            &PartialChange::replace(EntryTarget::Kind("work".to_string()), moved.clone()),
        );

        assert_eq!(merged, vec![home, moved]);
    }

    #[test]
    fn test_check_writes_rejects_indexed_paths() {
        let writes = vec![AttributeWrite {
            path: "emails[0].value".to_string(),
            value: AttributeValue::Text("a@x.com".to_string()),
        }];
        assert!(matches!(
            check_writes(&writes),
            Err(Error::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_check_writes_rejects_scalar_for_array() {
        let writes = vec![AttributeWrite {
            path: "emails".to_string(),
            value: AttributeValue::Text("a@x.com".to_string()),
        }];
        assert!(check_writes(&writes).is_err());
    }

    #[test]
    fn test_check_writes_accepts_scalar_and_whole_array() {
        let writes = vec![
            AttributeWrite {
                path: "displayName".to_string(),
                value: AttributeValue::Text("E1_Alice".to_string()),
            },
            AttributeWrite {
                path: "emails".to_string(),
                value: AttributeValue::Entries(vec![work_email("a@x.com")]),
            },
        ];
        assert!(check_writes(&writes).is_ok());
    }
}
