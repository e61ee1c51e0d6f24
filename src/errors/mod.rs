//! # Error Handling
//!
//! Crate-wide error types for the Hatch daemon, built on `thiserror`.
//! Component operations return structured errors; the supervisor wraps them
//! with the failing component's name, and the API layer maps them onto HTTP
//! status codes.

use std::fmt;

/// Custom result type for Hatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Hatch daemon.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors (paths, parsing, startup wiring)
    #[error("configuration error: {0}")]
    Config(String),

    /// Aggregated validation failures; every broken rule is reported
    #[error("{0}")]
    Validation(ValidationErrors),

    /// Certificate authority errors
    #[error("certificate error: {0}")]
    Certs(String),

    /// Network transport errors (DNS, HTTP, admin endpoint)
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A named resource does not exist
    #[error("{resource} {name:?} not found")]
    NotFound { resource: &'static str, name: String },

    /// A named resource already exists or clashes with another
    #[error("{0}")]
    Conflict(String),

    /// Internal errors that should not occur in normal operation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new certificate error
    pub fn certs<S: Into<String>>(message: S) -> Self {
        Self::Certs(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Create a not-found error for a named resource
    pub fn not_found<S: Into<String>>(resource: &'static str, name: S) -> Self {
        Self::NotFound { resource, name: name.into() }
    }

    /// Create a validation error from a list of rule violations
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation(ValidationErrors(errors))
    }
}

/// Collects every validation failure found in a single pass over a config
/// document. Callers report all of them, never just the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{}", single),
            errors => {
                write!(f, "{} config errors:", errors.len())?;
                for (i, err) in errors.iter().enumerate() {
                    write!(f, "\n  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}
