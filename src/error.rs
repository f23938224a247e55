// 🚨 Error taxonomy for the intake-to-ledger pipeline
//
// Per-document failures never show up here as errors: they become
// ProcessingOutcome variants and are counted. Everything in PipelineError
// is fatal for the operation in progress (scan startup or import).

use crate::importer::ConsistencyReport;
use crate::lifecycle::TransitionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR CATEGORY
// ============================================================================

/// Stable classification used in failure logs and run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    FileUnreadable,
    ExtractionProviderError,
    ExtractionParseError,
    ValidationFailed,
    /// Not an error: the document was already seen
    DuplicateSkipped,
    LedgerConsistencyViolation,
    LedgerWriteError,
    FolderAccessError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::FileUnreadable => "FileUnreadable",
            ErrorCategory::ExtractionProviderError => "ExtractionProviderError",
            ErrorCategory::ExtractionParseError => "ExtractionParseError",
            ErrorCategory::ValidationFailed => "ValidationFailed",
            ErrorCategory::DuplicateSkipped => "DuplicateSkipped",
            ErrorCategory::LedgerConsistencyViolation => "LedgerConsistencyViolation",
            ErrorCategory::LedgerWriteError => "LedgerWriteError",
            ErrorCategory::FolderAccessError => "FolderAccessError",
        }
    }

    /// Fatal categories abort the whole operation instead of one document
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCategory::LedgerConsistencyViolation
                | ErrorCategory::LedgerWriteError
                | ErrorCategory::FolderAccessError
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// STORAGE ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{op} failed for {location}: {source}")]
    Io {
        op: &'static str,
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {location}")]
    NotFound { location: String },

    #[error("already exists: {location}")]
    AlreadyExists { location: String },
}

impl StorageError {
    pub fn io(op: &'static str, location: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            op,
            location: location.into(),
            source,
        }
    }

    pub fn location(&self) -> &str {
        match self {
            StorageError::Io { location, .. }
            | StorageError::NotFound { location }
            | StorageError::AlreadyExists { location } => location,
        }
    }
}

// ============================================================================
// PIPELINE ERRORS (fatal)
// ============================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cannot access folder {location}: {reason}")]
    FolderAccess { location: String, reason: String },

    #[error("Ledger consistency violation, import aborted with no changes: {0}")]
    LedgerConsistency(ConsistencyReport),

    #[error("Staging table does not match the scanned folder, import aborted with no changes: {0}")]
    StagingMismatch(String),

    #[error("Cannot write ledger {location}: {reason}")]
    LedgerWrite { location: String, reason: String },

    #[error("Import rolled back after a file move failed ({reason}); rollback complete: {rolled_back}")]
    ImportRolledBack { reason: String, rolled_back: bool },

    #[error("Staging table error: {0}")]
    Staging(#[from] rusqlite::Error),

    #[error("Cannot write staging export {location}: {reason}")]
    StagingExport { location: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl PipelineError {
    pub fn ledger_write(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        PipelineError::LedgerWrite {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Category reported to the operator; None for programming/config errors
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            PipelineError::FolderAccess { .. }
            | PipelineError::Staging(_)
            | PipelineError::StagingExport { .. } => Some(ErrorCategory::FolderAccessError),
            PipelineError::LedgerConsistency(_) | PipelineError::StagingMismatch(_) => {
                Some(ErrorCategory::LedgerConsistencyViolation)
            }
            PipelineError::LedgerWrite { .. } | PipelineError::ImportRolledBack { .. } => {
                Some(ErrorCategory::LedgerWriteError)
            }
            PipelineError::Config(_) | PipelineError::Transition(_) => None,
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        PipelineError::FolderAccess {
            location: err.location().to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_categories() {
        assert!(ErrorCategory::LedgerConsistencyViolation.is_fatal());
        assert!(ErrorCategory::LedgerWriteError.is_fatal());
        assert!(ErrorCategory::FolderAccessError.is_fatal());
        assert!(!ErrorCategory::ValidationFailed.is_fatal());
        assert!(!ErrorCategory::DuplicateSkipped.is_fatal());
    }

    #[test]
    fn test_storage_error_becomes_folder_access() {
        let err = StorageError::NotFound {
            location: "/data/imported".to_string(),
        };
        let pipeline: PipelineError = err.into();

        assert_eq!(pipeline.category(), Some(ErrorCategory::FolderAccessError));
        assert!(pipeline.to_string().contains("/data/imported"));
    }
}
