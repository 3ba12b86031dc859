//! Error taxonomy for the governance pipeline.
//!
//! Each stage of a run has its own error type so callers can tell where a
//! submission stopped. [`GovernanceError`] wraps them all and reports the
//! stage through [`GovernanceError::stage`]. Nothing in the core retries on
//! its own; a [`ConflictError`] in particular is handed straight back so the
//! caller can re-run against refreshed state.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::governance::GovernanceState;
use crate::validate::ValidationResult;

/// Raised by a [`crate::document::DocumentSource`] while supplying a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Input '{input}' was not found")]
    NotFound { input: String },
    #[error("Failed to read '{input}'")]
    Read {
        input: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse '{input}': {message}")]
    Parse { input: String, message: String },
    #[error("Unsupported input format for '{input}'")]
    UnsupportedFormat { input: String },
}

/// Problems with a canonical type signature or parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("Unknown type signature '{0}'")]
    InvalidSignature(String),
    #[error("Decimal({precision},{scale}) is outside the supported range")]
    DecimalOutOfRange { precision: u16, scale: u16 },
    #[error("Unknown time unit '{0}'")]
    InvalidTimeUnit(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaInferenceError {
    #[error("Incompatible types at '{path}': {left} vs {right}")]
    IncompatibleTypes {
        path: String,
        left: String,
        right: String,
    },
    #[error("Nesting at '{path}' exceeds the maximum depth of {limit}")]
    NestingTooDeep { path: String, limit: usize },
    #[error("Document contains no records")]
    EmptyDocument,
    #[error("Record {index} is not an object")]
    NotARecord { index: usize },
    #[error("Duplicate field name at '{path}'")]
    DuplicateField { path: String },
    #[error("Required field '{path}' was not observed in the sampled records")]
    MissingRequiredField { path: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("Target name '{name}' is produced by more than one field: {}", paths.join(", "))]
    NameCollision { name: String, paths: Vec<String> },
    #[error("Field '{path}' maps to invalid identifier '{name}': {reason}")]
    InvalidIdentifier {
        path: String,
        name: String,
        reason: String,
    },
    #[error("Field '{path}' contains characters not allowed in target identifiers")]
    IllegalCharacters { path: String },
    #[error("Field '{path}' is a repeated value nested inside a repeated value")]
    NestedRepetition { path: String },
    #[error("Field '{path}' exceeds the maximum nesting depth of {limit}")]
    NestingTooDeep { path: String, limit: usize },
    #[error("Override refers to unknown field '{path}'")]
    UnknownOverridePath { path: String },
    #[error("Override for '{path}' is not applicable: {message}")]
    InvalidOverride { path: String, message: String },
}

/// Raised when an append targets a version number that is no longer next.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "Dataset '{dataset_id}' cannot accept version {attempted}: latest stored version is {}",
    latest.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
)]
pub struct ConflictError {
    pub dataset_id: String,
    pub attempted: u32,
    pub latest: Option<u32>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("I/O failure on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Stored version at {path:?} is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("Version belongs to dataset '{found}', expected '{expected}'")]
    DatasetMismatch { expected: String, found: String },
    #[error("Dataset identifier '{0}' cannot be used as a storage key")]
    InvalidDatasetId(String),
}

/// A mapping that failed validation; carries every error found.
#[derive(Debug, Clone, Error)]
#[error("Mapping failed validation with {} error(s)", result.errors.len())]
pub struct ValidationFailure {
    pub result: ValidationResult,
}

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Inference(#[from] SchemaInferenceError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error(transparent)]
    Conflict(ConflictError),
    #[error(transparent)]
    Storage(StoreError),
    #[error("Pending approval belongs to dataset '{found}', not '{expected}'")]
    DatasetMismatch { expected: String, found: String },
    #[error("Illegal state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: GovernanceState,
        to: GovernanceState,
    },
}

impl From<StoreError> for GovernanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(conflict) => GovernanceError::Conflict(conflict),
            other => GovernanceError::Storage(other),
        }
    }
}

impl GovernanceError {
    /// The state at which the run aborted.
    pub fn stage(&self) -> GovernanceState {
        match self {
            GovernanceError::Document(_) => GovernanceState::Received,
            GovernanceError::Inference(_) => GovernanceState::Built,
            GovernanceError::Mapping(_) => GovernanceState::Mapped,
            GovernanceError::Validation(_) => GovernanceState::Validated,
            GovernanceError::Conflict(_)
            | GovernanceError::Storage(_)
            | GovernanceError::DatasetMismatch { .. } => GovernanceState::DriftChecked,
            GovernanceError::InvalidTransition { from, .. } => *from,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, GovernanceError::Conflict(_))
    }
}
