//! Username templates
//!
//! Directory usernames are derived from employee ids through a template such
//! as `{employee_id}@corp-saml.com`. The same template identifies managed
//! users: a directory username that does not fit it is never touched.

use crate::error::ValidationError;
use std::fmt;

const PLACEHOLDER: &str = "{employee_id}";

/// A parsed username template with exactly one `{employee_id}` placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameTemplate {
    raw: String,
    prefix: String,
    suffix: String,
}

impl UsernameTemplate {
    /// Parse a template string
    pub fn parse(template: &str) -> Result<Self, ValidationError> {
        let malformed = |reason: &str| ValidationError::MalformedTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let count = template.matches(PLACEHOLDER).count();
        if count == 0 {
            return Err(malformed("missing {employee_id} placeholder"));
        }
        if count > 1 {
            return Err(malformed("{employee_id} must appear exactly once"));
        }

        let Some((prefix, suffix)) = template.split_once(PLACEHOLDER) else {
            return Err(malformed("missing {employee_id} placeholder"));
        };
        if prefix.contains(['{', '}']) || suffix.contains(['{', '}']) {
            return Err(malformed("unknown placeholder"));
        }
        if prefix.is_empty() && suffix.is_empty() {
            return Err(malformed("template must add a prefix or suffix to mark managed users"));
        }

        Ok(Self {
            raw: template.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Build the username for an employee id
    pub fn render(&self, employee_id: &str) -> String {
        format!("{}{}{}", self.prefix, employee_id, self.suffix)
    }

    /// Recover the employee id from a managed username
    ///
    /// Prefix and suffix match case-insensitively (the directory treats
    /// usernames that way). Returns `None` for unmanaged usernames.
    pub fn extract<'a>(&self, username: &'a str) -> Option<&'a str> {
        let min_len = self.prefix.len() + self.suffix.len();
        if username.len() <= min_len {
            return None;
        }
        let (head, rest) = split_at_checked(username, self.prefix.len())?;
        let (middle, tail) = split_at_checked(rest, rest.len() - self.suffix.len())?;
        if !head.eq_ignore_ascii_case(&self.prefix) || !tail.eq_ignore_ascii_case(&self.suffix) {
            return None;
        }
        Some(middle)
    }

    /// Whether a username was produced by this template
    pub fn is_managed(&self, username: &str) -> bool {
        self.extract(username).is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for UsernameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn split_at_checked(s: &str, mid: usize) -> Option<(&str, &str)> {
    s.is_char_boundary(mid).then(|| s.split_at(mid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> UsernameTemplate {
        UsernameTemplate::parse("{employee_id}@corp-saml.com").unwrap()
    }

    #[test]
    fn test_render_and_extract() {
        let t = template();
        assert_eq!(t.render("E1001"), "E1001@corp-saml.com");
        assert_eq!(t.extract("E1001@corp-saml.com"), Some("E1001"));
        assert_eq!(t.extract("E1001@CORP-SAML.COM"), Some("E1001"));
    }

    #[test]
    fn test_unmanaged_usernames() {
        let t = template();
        assert!(!t.is_managed("admin@other.com"));
        assert!(!t.is_managed("@corp-saml.com"));
        assert!(!t.is_managed("svc-account"));
        assert!(!t.is_managed("é"));
    }

    #[test]
    fn test_prefix_template() {
        let t = UsernameTemplate::parse("emp-{employee_id}").unwrap();
        assert_eq!(t.render("42"), "emp-42");
        assert_eq!(t.extract("emp-42"), Some("42"));
        assert_eq!(t.extract("contractor-42"), None);
    }

    #[test]
    fn test_malformed_templates() {
        for bad in [
            "no-placeholder@corp.com",
            "{employee_id}{employee_id}@corp.com",
            "{employee_id}@{domain}",
            "{employee_id}",
        ] {
            assert!(
                matches!(
                    UsernameTemplate::parse(bad),
                    Err(ValidationError::MalformedTemplate { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }
}
