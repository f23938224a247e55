// Receipt Ledger - Core Library
// Intake-to-ledger pipeline: scan receipts, stage them, import into the ledger

pub mod amount;
pub mod config;
pub mod error;
pub mod extraction;
pub mod fingerprint;
pub mod importer;
pub mod ledger;
pub mod lifecycle;
pub mod pipeline;
pub mod provider;
pub mod staging;
pub mod storage;

// Re-export commonly used types
pub use amount::Amount;
pub use config::Config;
pub use error::{ErrorCategory, PipelineError, StorageError};
pub use extraction::{
    ExtractionEngine, ExtractionResult, FailureClass, ProcessingOutcome, ValidationRules,
};
pub use fingerprint::{classify, fingerprint, Classification, FileFingerprint, FingerprintSet};
pub use importer::{
    check_consistency, import, ConsistencyReport, ConsistencyViolation, ImportOptions,
    ImportResult, ValidationStatus,
};
pub use ledger::{CsvLedger, Ledger, LedgerEntry, LedgerLayout, MemoryLedger};
pub use lifecycle::{DocumentFormat, LifecycleManager, LifecycleState, ReceiptDocument};
pub use pipeline::{
    check_import, run_import, run_scan, snapshot, DocumentReport, ImportReport, RunCounters,
    RunSummary, ScanOptions, ScanReport, StagingSnapshot,
};
pub use provider::{ExtractionProvider, HttpProvider, MockProvider, ProviderError, ProviderFields};
pub use staging::{MemoryStaging, SqliteStaging, StagingRecord, StagingStore, StagingTable};
pub use storage::{DocumentStore, FolderLayout, FolderRole, FsStore, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
