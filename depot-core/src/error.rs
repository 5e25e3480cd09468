//! Error types shared across depot
//!
//! Business-rule failures (a denied link, a duplicate open transfer) are
//! reported as [`FieldError`]s; structural failures (a missing record, a bad
//! stored status) are [`DepotError`] variants.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::TransferStatus;

/// A human-readable message attached to one attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
    /// The offending record, when the attribute holds several IDs
    pub id: Option<Uuid>,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
            id: None,
        }
    }

    pub fn for_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)?;
        if let Some(id) = self.id {
            write!(f, " ({})", id)?;
        }
        Ok(())
    }
}

/// Field-keyed collection of validation messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Messages recorded against one field, in insertion order
    pub fn on(&self, field: &str) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }
}

#[derive(Error, Debug)]
pub enum DepotError {
    #[error("Work not found: {0}")]
    WorkNotFound(Uuid),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Transfer request not found: {0}")]
    TransferNotFound(Uuid),

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("'{0}' is not a valid transfer status")]
    InvalidStatus(String),

    #[error("Transfer request {id} is already {from}, cannot move to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error(transparent)]
    Storage(anyhow::Error),
}

/// Backends report through `anyhow`; a typed error raised inside a backend
/// comes back out as itself rather than as an opaque storage failure.
impl From<anyhow::Error> for DepotError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DepotError>() {
            Ok(typed) => typed,
            Err(other) => DepotError::Storage(other),
        }
    }
}

impl DepotError {
    /// Validation messages, if this is a validation failure
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            DepotError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

pub type DepotResult<T> = std::result::Result<T, DepotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add("transfer_to", "must be an existing user");
        errors.add("sending_user", "must specify another user to receive the work");

        assert_eq!(errors.on("transfer_to"), vec!["must be an existing user"]);
        assert!(errors.on("open_transfer").is_empty());
        assert_eq!(
            errors.to_string(),
            "transfer_to must be an existing user; sending_user must specify another user to receive the work"
        );
    }

    #[test]
    fn test_storage_error_is_transparent() {
        let err: DepotError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, DepotError::Storage(_)));
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn test_typed_error_survives_anyhow() {
        let id = Uuid::new_v4();
        let wrapped = anyhow::Error::new(DepotError::WorkNotFound(id));
        let err: DepotError = wrapped.into();
        assert!(matches!(err, DepotError::WorkNotFound(found) if found == id));
    }
}
