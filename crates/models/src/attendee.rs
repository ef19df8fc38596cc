use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of the person a ticket is issued to. May differ from the account
/// holder making the booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttendeeError {
    #[error("at least one attendee is required")]
    NoAttendees,
    #[error("first name is required")]
    MissingFirstName,
    #[error("last name is required")]
    MissingLastName,
    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),
}

impl AttendeeInfo {
    pub fn new(first_name: &str, last_name: &str, email: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            phone: None,
        }
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }

    /// Trimmed copy with a lowercased email and blank phone dropped, or the
    /// first rule the record breaks.
    pub fn normalized(&self) -> Result<AttendeeInfo, AttendeeError> {
        let first_name = self.first_name.trim();
        if first_name.is_empty() {
            return Err(AttendeeError::MissingFirstName);
        }
        let last_name = self.last_name.trim();
        if last_name.is_empty() {
            return Err(AttendeeError::MissingLastName);
        }
        let email = self.email.trim().to_ascii_lowercase();
        if !is_valid_email(&email) {
            return Err(AttendeeError::InvalidEmail(self.email.clone()));
        }
        let phone = self
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(AttendeeInfo {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email,
            phone,
        })
    }
}

/// Address grammar accepted for attendees: one `@`, a local part of
/// `[A-Za-z0-9._%+-]` and a dotted domain whose labels are alphanumeric with
/// inner hyphens.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 3 || email.len() > 254 {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if domain.contains('@') || local.is_empty() || local.len() > 64 {
        return false;
    }

    let local_ok = local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-'));
    if !local_ok || local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
