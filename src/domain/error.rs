use std::collections::BTreeMap;

use thiserror::Error;
use validator::ValidationErrors;

/// Core domain errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {entity} '{id}'")]
    NotFound { entity: String, id: String },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        /// Field name to the messages of the rules it failed
        fields: BTreeMap<String, Vec<String>>,
    },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("Lock '{key}' is held by another caller")]
    LockAcquisition { key: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },
}

impl DomainError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Validation failure pinned to a single field
    pub fn field_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = BTreeMap::new();
        fields.insert(field.into(), vec![message.clone()]);

        Self::Validation { message, fields }
    }

    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    pub fn lock_acquisition(key: impl Into<String>) -> Self {
        Self::LockAcquisition { key: key.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Field-level details of a validation failure, empty for other variants
    pub fn field_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            Self::Validation { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for DomainError {
    fn from(errors: ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, failures)| {
                let messages = failures
                    .iter()
                    .map(|failure| match &failure.message {
                        Some(message) => message.to_string(),
                        None => failure.code.to_string(),
                    })
                    .collect();

                (field.to_string(), messages)
            })
            .collect::<BTreeMap<String, Vec<String>>>();

        let names: Vec<&str> = fields.keys().map(String::as_str).collect();

        Self::Validation {
            message: format!("Invalid fields: {}", names.join(", ")),
            fields,
        }
    }
}
