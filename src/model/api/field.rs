use thiserror::Error;

/// Longest name accepted for elections, positions and candidates.
pub const MAX_NAME_LENGTH: usize = 255;

/// A request field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {field}: {reason}")]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Trim `value` and check it is a usable name.
pub fn name(field: &'static str, value: &str) -> Result<String, FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(FieldError::new(field, "must not be empty"))
    } else if trimmed.chars().count() > MAX_NAME_LENGTH {
        Err(FieldError::new(
            field,
            format!("must be at most {MAX_NAME_LENGTH} characters"),
        ))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Trim an optional value, treating blank as absent.
pub fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
