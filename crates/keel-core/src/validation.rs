//! Static validation rules for issues and labels.
//!
//! These are the constraints that hold regardless of workflow templates;
//! template-driven checks (status vocabulary, transition gates) live in
//! `keel-templates`.

/// Label names starting with this prefix are reserved for internal use.
pub const RESERVED_LABEL_PREFIX: &str = "keel:";

/// Maximum accepted title length in characters.
pub const MAX_TITLE_LEN: usize = 500;

/// Error type for validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("title is required")]
    TitleRequired,

    #[error("title must be {MAX_TITLE_LEN} characters or less (got {0})")]
    TitleTooLong(usize),

    #[error("priority must be between 0 and 4 (got {0})")]
    InvalidPriority(i64),

    #[error("label name is empty")]
    EmptyLabel,

    #[error("label name contains whitespace: {0:?}")]
    LabelWhitespace(String),

    #[error("label name is reserved: {0:?}")]
    ReservedLabel(String),

    #[error("issue cannot be its own parent")]
    SelfParent,

    #[error("issue cannot depend on itself")]
    SelfDependency,
}

/// Validates a title for create/update.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    let len = title.chars().count();
    if len > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong(len));
    }
    Ok(())
}

/// Validates a priority value (0 = critical .. 4 = backlog).
pub fn validate_priority(priority: i64) -> Result<(), ValidationError> {
    if !(0..=4).contains(&priority) {
        return Err(ValidationError::InvalidPriority(priority));
    }
    Ok(())
}

/// Validates a label name: non-empty, no whitespace, not reserved.
pub fn validate_label(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyLabel);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ValidationError::LabelWhitespace(name.to_owned()));
    }
    if name.starts_with(RESERVED_LABEL_PREFIX) {
        return Err(ValidationError::ReservedLabel(name.to_owned()));
    }
    Ok(())
}
