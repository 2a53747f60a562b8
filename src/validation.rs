//! Input checks shared by the account, comment and feed operations.
//! Every failure is an `ApiError::BadRequest` carrying a user-facing message.

use crate::error::ApiError;
use crate::models::Id;

pub const MAX_COMMENT_CHARS: usize = 500;
pub const MAX_REASON_CHARS: usize = 200;

fn non_empty(v: &str) -> Option<&str> {
    let t = v.trim();
    (!t.is_empty()).then_some(t)
}

pub fn validate_email(email: &str) -> Result<String, ApiError> {
    let email = non_empty(email).ok_or_else(|| ApiError::bad_request("Email is required."))?;
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
                && domain
                    .split_once('.')
                    .map(|(host, _)| !host.is_empty())
                    .unwrap_or(false)
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::bad_request("Email is invalid."));
    }
    Ok(email.to_string())
}

pub fn validate_username(username: &str) -> Result<String, ApiError> {
    let u = non_empty(username).ok_or_else(|| ApiError::bad_request("Username is required."))?;
    if !(3..=20).contains(&u.chars().count()) {
        return Err(ApiError::bad_request("Username must be 3-20 chars."));
    }
    if !u.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ApiError::bad_request("Username must be alphanumeric/underscore."));
    }
    Ok(u.to_string())
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if non_empty(password).is_none() {
        return Err(ApiError::bad_request("Password is required."));
    }
    if password.chars().count() < 8 {
        return Err(ApiError::bad_request("Password must be at least 8 characters."));
    }
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(ApiError::bad_request("Password must contain letters and numbers."));
    }
    Ok(())
}

pub fn validate_comment(content: &str) -> Result<String, ApiError> {
    let c = non_empty(content).ok_or_else(|| ApiError::bad_request("Comment cannot be empty."))?;
    if c.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::bad_request("Comment must be 500 characters or less."));
    }
    Ok(c.to_string())
}

pub fn validate_reason(reason: &str) -> Result<String, ApiError> {
    let r = non_empty(reason).ok_or_else(|| ApiError::bad_request("A report reason is required."))?;
    if r.chars().count() > MAX_REASON_CHARS {
        return Err(ApiError::bad_request("Report reason must be 200 characters or less."));
    }
    Ok(r.to_string())
}

/// Parse an id taken from a URL segment.
pub fn parse_id(raw: &str, what: &str) -> Result<Id, ApiError> {
    let raw = non_empty(raw).ok_or_else(|| ApiError::bad_request(format!("{what} id is required.")))?;
    match raw.parse::<Id>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::bad_request(format!("Invalid {} id.", what.to_lowercase()))),
    }
}

/// A search ZIP must normalize to five digits.
pub fn validate_zip(zip: &str) -> Result<String, ApiError> {
    crate::opendata::normalize_zip(zip).ok_or_else(|| ApiError::bad_request("ZIP must be a 5-digit code."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(validate_email("demo@example.com").is_ok());
        assert!(validate_email("  demo@example.com ").is_ok());
        assert!(validate_email("demo@example").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a b@example.com").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn username_rules() {
        assert_eq!(validate_username(" demo_User ").unwrap(), "demo_User");
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has-dash").is_err());
        assert!(validate_username(&"x".repeat(21)).is_err());
    }

    #[test]
    fn password_needs_letters_and_digits() {
        assert!(validate_password("DemoPass123!").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("lettersonly").is_err());
        assert!(validate_password("12345678").is_err());
    }

    #[test]
    fn comment_length_bounds() {
        assert_eq!(validate_comment("  hi  ").unwrap(), "hi");
        assert!(validate_comment("   ").is_err());
        assert!(validate_comment(&"a".repeat(500)).is_ok());
        assert!(validate_comment(&"a".repeat(501)).is_err());
    }

    #[test]
    fn ids_must_be_positive_integers() {
        assert_eq!(parse_id("42", "Comment").unwrap(), 42);
        assert!(matches!(parse_id("", "Comment"), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_id("abc", "Comment"), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_id("-3", "Comment"), Err(ApiError::BadRequest(_))));
    }
}
