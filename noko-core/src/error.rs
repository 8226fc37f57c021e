// ABOUTME: Typed errors for configuration validation and plugin registration.
// ABOUTME: Application code wraps these in anyhow; tests match on the variants.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        min: String,
        max: String,
        value: String,
    },

    #[error("{0} must not be empty")]
    Empty(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

impl ConfigError {
    pub fn out_of_range(
        field: &str,
        min: impl ToString,
        max: impl ToString,
        value: impl ToString,
    ) -> Self {
        Self::OutOfRange {
            field: field.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            value: value.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("command '{command}' from plugin '{plugin}' is already served by '{existing}'")]
    DuplicateCommand {
        command: String,
        plugin: String,
        existing: String,
    },

    #[error("no such command: {0}")]
    NotFound(String),
}
