//! Error types for the installer
//!
//! Errors are structured with fields so a failed run can be traced back to
//! the generator, resource or configuration field that caused it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for installer operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed or unreadable configuration
    #[error("{message}")]
    Config {
        /// Description of what's wrong, already prefixed for display
        message: String,
    },

    /// A structurally required field is missing or invalid
    #[error("{message}")]
    Validation {
        /// The offending field path (e.g., "namespace")
        field: Option<String>,
        /// Description of what's invalid, including the offending value
        message: String,
    },

    /// A generator failed to produce its resources
    #[error("generator {generator} failed: {message}")]
    Generation {
        /// Name of the generator that failed
        generator: String,
        /// Description of what failed
        message: String,
    },

    /// Creating or updating a resource in the cluster failed
    #[error("failed to apply {kind} {resource}: {message}")]
    Apply {
        /// Name of the resource descriptor
        resource: String,
        /// Kind of the underlying object
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Unknown generator set identifier
    #[error("Invalid set '{name}'. Valid options are {valid}")]
    UnknownSet {
        /// The identifier that was requested
        name: String,
        /// Human-readable list of the known identifiers
        valid: String,
    },

    /// I/O error while reading configuration or writing output
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error, prefixed the way YAML decode failures are reported
    pub fn malformed_yaml(msg: impl std::fmt::Display) -> Self {
        Self::Config {
            message: format!("malformed yaml: {}", msg),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: msg.into(),
        }
    }

    /// Create a validation error tied to a configuration field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            message: msg.into(),
        }
    }

    /// Create a generation error for the named generator
    pub fn generation(generator: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Generation {
            generator: generator.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error for a resource
    pub fn apply(
        resource: impl Into<String>,
        kind: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Apply {
            resource: resource.into(),
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an unknown-set error listing the valid identifiers
    pub fn unknown_set(name: impl Into<String>, valid: &[&str]) -> Self {
        Self::UnknownSet {
            name: name.into(),
            valid: join_options(valid),
        }
    }

    /// Get the resource name if this error is associated with a specific resource
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Apply { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Get the generator name if this error came out of a generator
    pub fn generator(&self) -> Option<&str> {
        match self {
            Error::Generation { generator, .. } => Some(generator),
            _ => None,
        }
    }

    /// Get the offending configuration field, if known
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

/// Render `["a", "b", "c"]` as `a, b, or c`
fn join_options(options: &[&str]) -> String {
    match options {
        [] => UNKNOWN_CONTEXT.to_string(),
        [only] => (*only).to_string(),
        [a, b] => format!("{} or {}", a, b),
        [rest @ .., last] => format!("{}, or {}", rest.join(", "), last),
    }
}
