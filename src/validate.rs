//! Roster validation
//!
//! Turns loaded rows into [`DesiredUser`]s. Errors make the roster unusable
//! and abort the run; warnings are reported and the run continues.

use crate::config::ValidationConfig;
use crate::loader::RosterRow;
use reconcile::{DesiredUser, Subscription};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

static EMPLOYEE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{3,20}$").expect("EMPLOYEE_ID is a valid regex pattern")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("EMAIL is a valid regex pattern")
});

const MAX_NAME_CHARS: usize = 30;
const MAX_EMAIL_LEN: usize = 254;
const MAX_LOCAL_PART_LEN: usize = 64;
/// Share of unsubscribed users above which the roster looks suspicious
const UNSUBSCRIBED_WARNING_RATIO: f64 = 0.5;

/// One validation finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Source row, `None` for roster-wide findings
    pub row: Option<usize>,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "row {row}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validation {
    /// Rows that passed, normalized
    pub users: Vec<DesiredUser>,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, row: usize, message: String) {
        self.errors.push(Issue {
            row: Some(row),
            message,
        });
    }

    fn warn(&mut self, row: Option<usize>, message: String) {
        self.warnings.push(Issue { row, message });
    }
}

/// Collapse runs of whitespace to single spaces
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_valid_employee_id(employee_id: &str) -> bool {
    EMPLOYEE_ID.is_match(employee_id.trim())
}

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let local_len = email.split('@').next().map_or(0, str::len);
    EMAIL.is_match(email) && email.len() <= MAX_EMAIL_LEN && local_len <= MAX_LOCAL_PART_LEN
}

/// Whether the email's domain ends with one of the allowed domains
pub fn is_allowed_domain(email: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let domain = email.rsplit_once('@').map_or("", |(_, d)| d).to_lowercase();
    allowed
        .iter()
        .any(|a| domain.ends_with(&a.trim().to_lowercase()))
}

/// Validate and normalize roster rows
pub fn validate(rows: &[RosterRow], config: &ValidationConfig) -> Validation {
    let mut result = Validation::default();
    if rows.is_empty() {
        result.errors.push(Issue {
            row: None,
            message: "roster contains no users".to_string(),
        });
        return result;
    }

    let mut seen_ids: HashMap<String, usize> = HashMap::new();
    let mut seen_emails: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let employee_id = row.employee_id.trim().to_string();
        let name = normalize_whitespace(&row.name);
        let email = row.email.trim().to_lowercase();
        let errors_before = result.errors.len();

        if employee_id.is_empty() {
            result.error(row.row, "employee id is empty".to_string());
        } else if !is_valid_employee_id(&employee_id) {
            result.error(
                row.row,
                format!("invalid employee id '{employee_id}' (3-20 letters, digits, '_' or '-')"),
            );
        } else if let Some(first) = seen_ids.insert(employee_id.to_lowercase(), row.row) {
            result.error(
                row.row,
                format!("duplicate employee id '{employee_id}' (first seen on row {first})"),
            );
        }

        if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
            result.error(
                row.row,
                format!("name must be 1-{MAX_NAME_CHARS} characters, got '{}'", row.name),
            );
        }

        if !is_valid_email(&email) {
            result.error(row.row, format!("invalid email '{}'", row.email));
        } else {
            if let Some(first) = seen_emails.insert(email.clone(), row.row) {
                result.warn(
                    Some(row.row),
                    format!("duplicate email '{email}' (first seen on row {first})"),
                );
            }
            if !is_allowed_domain(&email, &config.allowed_email_domains) {
                result.warn(Some(row.row), format!("email domain not in allowed list: '{email}'"));
            }
        }

        let subscription = Subscription::from_label(&row.subscription);
        if subscription.is_none() {
            result.error(
                row.row,
                format!("unknown subscription '{}'", row.subscription),
            );
        }

        if result.errors.len() == errors_before
            && let Some(subscription) = subscription
        {
            result
                .users
                .push(DesiredUser::new(employee_id, name, email, subscription).at_row(row.row));
        }
    }

    if rows.len() > config.max_users_warning {
        result.warn(
            None,
            format!(
                "roster has {} users, more than the expected maximum of {}",
                rows.len(),
                config.max_users_warning
            ),
        );
    }

    let unsubscribed = result
        .users
        .iter()
        .filter(|u| u.subscription == Subscription::None)
        .count();
    if !result.users.is_empty() {
        let ratio = unsubscribed as f64 / result.users.len() as f64;
        if ratio > UNSUBSCRIBED_WARNING_RATIO {
            result.warn(
                None,
                format!(
                    "{:.1}% of users are unsubscribed; check the roster is correct",
                    ratio * 100.0
                ),
            );
        }
    }

    log::info!(
        "Validated {} rows: {} valid, {} errors, {} warnings",
        rows.len(),
        result.users.len(),
        result.errors.len(),
        result.warnings.len()
    );
    result
}
