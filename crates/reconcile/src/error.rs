//! Error types for graph building, provider calls and state persistence.
//!
//! Errors are split by blast radius: a [`ConfigError`] aborts the run before
//! anything is applied, a [`ProviderError`] fails a single node (and blocks
//! its dependents), and a [`StateError`] means RunState could not be read or
//! written.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration errors, detected before any apply begins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The dependency graph contains a cycle
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// Full cycle path; the first id is repeated at the end
        path: Vec<String>,
    },

    /// Two descriptors share the same logical name
    #[error("duplicate resource name: {name}")]
    DuplicateResource { name: String },

    /// An explicit dependency names a resource that was never declared
    #[error("resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency { resource: String, dependency: String },

    /// A property references the output of a resource that was never declared
    #[error("resource '{resource}' references output '{attribute}' of unknown resource '{target}'")]
    UnknownReference {
        resource: String,
        target: String,
        attribute: String,
    },

    /// A required property for the resource kind is absent
    #[error("resource '{resource}' ({kind}) is missing required property '{property}'")]
    MissingProperty {
        resource: String,
        kind: String,
        property: String,
    },

    /// A required configuration key has no value
    #[error("missing required configuration value '{key}' (used by '{resource}')")]
    MissingConfig { resource: String, key: String },
}

/// Categories of provider errors for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A freshly created identity is not yet visible (transient, retryable)
    TransientPropagation,
    /// Propagation retries were exhausted
    PropagationTimeout,
    /// The caller lacks permission for the operation
    PermissionDenied,
    /// A quota or rate limit was hit
    Quota,
    /// The request was rejected as invalid
    Malformed,
    /// The resource does not exist
    NotFound,
    /// The resource exists in a conflicting state
    Conflict,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Whether this category is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientPropagation)
    }

    /// Short user-facing description of the category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::TransientPropagation => "Identity not yet propagated",
            Self::PropagationTimeout => "Propagation did not complete in time",
            Self::PermissionDenied => "Permission denied",
            Self::Quota => "Quota exceeded",
            Self::Malformed => "Malformed request",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Resource conflict",
            Self::Other => "Unexpected provider error",
        }
    }

    /// Actionable advice for resolving errors of this category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::TransientPropagation | Self::PropagationTimeout => {
                "Wait a minute and re-run apply; only the failed subgraph is retried"
            }
            Self::PermissionDenied => "Grant the deploying identity the missing role",
            Self::Quota => "Request a quota increase or wait for the window to reset",
            Self::Malformed => "Fix the resource properties in the stack configuration",
            Self::NotFound => "Check that the referenced resource exists",
            Self::Conflict => "Resolve the conflicting resource manually",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// An error reported by a provider adapter for a single resource operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category}: {message}")]
pub struct ProviderError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ProviderError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientPropagation, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Malformed, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::PermissionDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    /// Whether the retry layer should try again.
    pub fn is_transient(&self) -> bool {
        self.category.is_transient()
    }
}

/// Errors from loading or saving RunState.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("state file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("failed to create worker pool: {0}")]
    WorkerPool(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
