use thiserror::Error;

/// A remote record failed the message schema check.
///
/// Carries the offending field and the value that was rejected (`Null` when
/// the field was missing altogether).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}: field `{field}` (got {value})")]
pub struct ValidationError {
    pub field: &'static str,
    pub value: serde_json::Value,
    pub reason: ValidationReason,
}

impl ValidationError {
    pub fn missing(field: &'static str) -> Self {
        Self {
            field,
            value: serde_json::Value::Null,
            reason: ValidationReason::Missing,
        }
    }

    pub fn invalid(field: &'static str, value: &serde_json::Value) -> Self {
        Self {
            field,
            value: value.clone(),
            reason: ValidationReason::Invalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    Missing,
    Invalid,
}

impl std::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "Missing required field"),
            Self::Invalid => write!(f, "Invalid value"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("Invalid file type {0}: expected JPEG, PNG, GIF or WebP")]
    UnsupportedType(String),

    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("File is empty")]
    Empty,
}
