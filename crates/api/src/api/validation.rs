// Input validation for subscription APIs
//
// Deliberately loose: the confirmation email is the real proof that the
// address exists. This only rejects input that can never be an address.

use std::sync::LazyLock;

use regex::Regex;

/// RFC 5321 path limit.
pub const MAX_EMAIL_BYTES: usize = 254;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("email is required")]
    MissingEmail,

    #[error("email is too long")]
    EmailTooLong,

    #[error("email is not a valid address")]
    InvalidEmail,
}

/// Validate an email address, returning it trimmed
pub fn validate_email(email: &str) -> Result<&str, ValidationError> {
    let email = email.trim();

    if email.is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    if email.len() > MAX_EMAIL_BYTES {
        return Err(ValidationError::EmailTooLong);
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(ValidationError::InvalidEmail);
    }

    Ok(email)
}
