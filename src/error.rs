//! Error handling module
//!
//! Crate-wide error type for event application and command persistence.

use crate::domain::{ValidationErrors, BASE_FIELD};
use crate::event::EventState;
use crate::event_store::StoreError;
use crate::registry::{AggregatorError, ConfigurationError};

/// Crate-wide Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while applying and persisting events
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wiring mistake; never recoverable
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Field-level validation failure of an event or its aggregate
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// The aggregator refused the event
    #[error("Aggregator failed: {0}")]
    Aggregator(#[from] AggregatorError),

    /// Store-level failure (including lock timeouts)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Lifecycle step attempted from the wrong state
    #[error("Invalid event state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: EventState,
        actual: EventState,
    },

    /// Environment configuration error
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// Check if this error must always propagate
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Config(_))
    }

    /// Fold a recoverable error into `{field, message}` entries.
    ///
    /// Fatal errors are handed back unchanged.
    pub fn into_field_errors(self) -> std::result::Result<ValidationErrors, Error> {
        match self {
            Error::Configuration(_) | Error::Config(_) => Err(self),
            Error::Validation(errors) => Ok(errors),
            Error::Aggregator(AggregatorError::InvalidField { field, message }) => {
                Ok(ValidationErrors::single(field, message))
            }
            other => Ok(ValidationErrors::single(BASE_FIELD, other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validation_errors_fold_unchanged() {
        let errors = ValidationErrors::single("title", "must be a string");
        let folded = Error::Validation(errors.clone())
            .into_field_errors()
            .unwrap();
        assert_eq!(folded, errors);
    }

    #[test]
    fn test_aggregator_field_error_folds_to_field() {
        let folded = Error::Aggregator(AggregatorError::invalid_field("status", "is not allowed"))
            .into_field_errors()
            .unwrap();
        assert_eq!(folded.messages_for("status"), vec!["is not allowed"]);
    }

    #[test]
    fn test_store_error_folds_to_base() {
        let folded = Error::Store(StoreError::LockTimeout(Uuid::new_v4()))
            .into_field_errors()
            .unwrap();
        assert!(folded.contains_field(BASE_FIELD));
        assert!(folded.messages_for(BASE_FIELD)[0].starts_with("Lock timeout"));
    }

    #[test]
    fn test_configuration_error_is_fatal() {
        let err = Error::Configuration(ConfigurationError::AggregatorNotSet("X".to_string()));
        assert!(err.is_fatal());
        assert!(err.into_field_errors().is_err());
    }
}
