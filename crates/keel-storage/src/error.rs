//! Engine error taxonomy.
//!
//! Every public operation fails with an [`EngineError`]; the `code()` string
//! is part of the external contract and is what collaborators (CLI, tool
//! server, HTTP routes) surface to agents. Messages are human-oriented and
//! never contain raw internal details.

use serde::Serialize;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The entity id does not resolve.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity ("issue", "dependency", "comment", ...).
        entity: String,
        id: String,
    },

    /// Input violates a static constraint.
    #[error("{message}")]
    Invalid { message: String },

    /// The workflow template rejected this status change.
    #[error("transition {from:?} -> {to:?} not allowed for type {issue_type:?}")]
    InvalidTransition {
        issue_type: String,
        from: String,
        to: String,
        /// Gate fields that are missing or empty.
        missing_fields: Vec<String>,
        /// States reachable from `from` right now.
        valid_transitions: Vec<String>,
    },

    /// Optimistic lock lost, cycle would be created, or duplicate id after
    /// retry exhaustion.
    #[error("{message}")]
    Conflict { message: String },

    /// The store timed out waiting for a write lock. Not retried in-engine;
    /// callers decide.
    #[error("store busy: {0}")]
    Busy(String),

    /// Migration mismatch, corrupt file, or referential-integrity violation.
    /// Fatal for the instance.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Any unexpected internal error.
    #[error("internal error: {0}")]
    Unknown(String),
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Machine-readable rendering of an [`EngineError`], stable across versions.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub valid_transitions: Vec<String>,
}

impl EngineError {
    // -- Constructors --------------------------------------------------------

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    // -- Contract ------------------------------------------------------------

    /// The machine code for this error; part of the external contract.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Invalid { .. } => "invalid",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict { .. } => "conflict",
            Self::Busy(_) => "busy",
            Self::Integrity(_) => "integrity",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Renders the error for structured (JSON) surfaces.
    pub fn structured(&self) -> StructuredError {
        let (missing_fields, valid_transitions) = match self {
            Self::InvalidTransition {
                missing_fields,
                valid_transitions,
                ..
            } => (missing_fields.clone(), valid_transitions.clone()),
            _ => (Vec::new(), Vec::new()),
        };
        StructuredError {
            code: self.code(),
            message: self.to_string(),
            missing_fields,
            valid_transitions,
        }
    }

    /// Returns `true` if the instance should refuse further operations.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &e {
            rusqlite::Error::SqliteFailure(ffi, _) => match ffi.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Self::Busy(e.to_string()),
                ErrorCode::ConstraintViolation => Self::Integrity(e.to_string()),
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                    Self::Integrity(e.to_string())
                }
                _ => Self::Unknown(e.to_string()),
            },
            _ => Self::Unknown(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Unknown(format!("serialization error: {e}"))
    }
}

impl From<keel_core::validation::ValidationError> for EngineError {
    fn from(e: keel_core::validation::ValidationError) -> Self {
        Self::Invalid {
            message: e.to_string(),
        }
    }
}

impl From<keel_templates::PackError> for EngineError {
    fn from(e: keel_templates::PackError) -> Self {
        Self::Invalid {
            message: e.to_string(),
        }
    }
}
