// 🔄 Pipeline Orchestrator - one scan run, one import, read-only views
//
// Scan: prepare folders → imported fingerprints → per-document
//   load → classify → extract → relocate, then rebuild staging.
// Import: staging → importer → clear staging.
//
// Documents are processed one at a time in discovery order. Per-document
// failures are counted and logged; only folder/staging errors abort a run.

use crate::error::{ErrorCategory, PipelineError};
use crate::extraction::{ExtractionEngine, FailureClass, ProcessingOutcome, ValidationRules};
use crate::fingerprint::{classify, Classification, FingerprintSet};
use crate::importer::{self, ImportOptions, ImportResult, ValidationStatus};
use crate::ledger::Ledger;
use crate::lifecycle::{FailureRecord, LifecycleManager};
use crate::provider::ExtractionProvider;
use crate::staging::{self, StagingStore, StagingTable};
use crate::storage::DocumentStore;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: usize,
    pub succeeded: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl RunCounters {
    fn record(&mut self, outcome: &ProcessingOutcome) {
        self.processed += 1;
        match outcome {
            ProcessingOutcome::Success { .. } => self.succeeded += 1,
            ProcessingOutcome::Duplicate { .. } => self.duplicates += 1,
            ProcessingOutcome::ValidationFailed { .. }
            | ProcessingOutcome::ExtractionFailed { .. } => self.errors += 1,
        }
    }
}

/// What view-staging shows about the last scan
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub counters: RunCounters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReport {
    /// Name in incoming/
    pub source_name: String,
    pub outcome: ProcessingOutcome,
    /// Set for successes
    pub scanned_name: Option<String>,
    /// Set for failures
    pub log_name: Option<String>,
}

impl DocumentReport {
    fn new(source_name: &str, outcome: ProcessingOutcome) -> Self {
        DocumentReport {
            source_name: source_name.to_string(),
            outcome,
            scanned_name: None,
            log_name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub documents: Vec<DocumentReport>,
    pub counters: RunCounters,
    pub staging: StagingTable,
}

impl ScanReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            finished_at: self.finished_at,
            counters: self.counters,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentReport> {
        self.documents.iter().filter(|d| d.outcome.is_failure())
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Per-call provider timeout
    pub timeout: Duration,
    pub rules: ValidationRules,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            rules: ValidationRules::for_today(Local::now().date_naive()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub ledger: String,
    pub result: ImportResult,
}

/// Read-only view for the presentation layer
#[derive(Debug, Clone)]
pub struct StagingSnapshot {
    pub table: StagingTable,
    pub last_run: Option<RunSummary>,
    /// None when the ledger could not be opened
    pub status: Option<ValidationStatus>,
}

// ============================================================================
// SCAN
// ============================================================================

/// One scan run over incoming/. Rebuilds scanned/ and the staging table.
pub fn run_scan<S: DocumentStore + ?Sized>(
    store: &mut S,
    provider: &dyn ExtractionProvider,
    staging_store: &mut dyn StagingStore,
    options: &ScanOptions,
) -> Result<ScanReport, PipelineError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(run_id = %run_id, provider = provider.name(), "scan started");

    let mut lifecycle = LifecycleManager::new(store, run_id);
    lifecycle.prepare()?;
    // scanned/ is empty now, so the old rows are gone too
    staging_store.clear()?;
    let imported = lifecycle.imported_fingerprints()?;
    // Owned by this run only; a new run starts empty
    let mut session = FingerprintSet::new();
    let engine = ExtractionEngine::new(provider, options.timeout, options.rules.clone());

    let mut documents = Vec::new();
    let mut counters = RunCounters::default();

    for name in lifecycle.discover()? {
        let report = process_document(&mut lifecycle, &engine, &imported, &mut session, &name)?;
        counters.record(&report.outcome);
        info!(
            document = %name,
            outcome = report.outcome.label(),
            confidence = report.outcome.confidence(),
            "document processed"
        );
        let staged = report.outcome.is_success();
        documents.push(report);
        // Keep staging in step with scanned/ in case the run stops early
        if staged {
            staging_store.replace(&staging::rebuild(&documents))?;
        }
    }

    let table = staging::rebuild(&documents);
    staging_store.replace(&table)?;

    let report = ScanReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        documents,
        counters,
        staging: table,
    };
    staging_store.record_run(&report.summary())?;

    info!(
        run_id = %run_id,
        processed = counters.processed,
        succeeded = counters.succeeded,
        duplicates = counters.duplicates,
        errors = counters.errors,
        "scan finished"
    );
    Ok(report)
}

fn process_document<S: DocumentStore + ?Sized>(
    lifecycle: &mut LifecycleManager<'_, S>,
    engine: &ExtractionEngine<'_>,
    imported: &FingerprintSet,
    session: &mut FingerprintSet,
    name: &str,
) -> Result<DocumentReport, PipelineError> {
    let mut document = match lifecycle.load(name) {
        Ok(document) => document,
        Err(err) => {
            let reason = format!("cannot read file: {}", err);
            let log = lifecycle.fail_unreadable(name, &reason)?;
            let mut report = DocumentReport::new(
                name,
                ProcessingOutcome::ExtractionFailed {
                    reason,
                    class: FailureClass::UnreadableFile,
                },
            );
            report.log_name = Some(log);
            return Ok(report);
        }
    };

    lifecycle.begin(&mut document)?;
    let fingerprint = document.fingerprint();

    if let Classification::Duplicate(source) = classify(&fingerprint, imported, session) {
        lifecycle.skip(&mut document, &fingerprint, source.describe())?;
        return Ok(DocumentReport::new(name, ProcessingOutcome::Duplicate { fingerprint }));
    }

    let outcome = engine.extract(&document, fingerprint);
    let mut report = DocumentReport::new(name, outcome);

    match &report.outcome {
        ProcessingOutcome::Success { result, .. } => {
            report.scanned_name = Some(lifecycle.complete(&mut document, result)?);
        }
        ProcessingOutcome::ValidationFailed { reason } => {
            let failure = FailureRecord {
                category: ErrorCategory::ValidationFailed,
                class: None,
                reason,
            };
            report.log_name = Some(lifecycle.fail(&mut document, &failure)?);
        }
        ProcessingOutcome::ExtractionFailed { reason, class } => {
            let failure = FailureRecord {
                category: class.category(),
                class: Some(*class),
                reason,
            };
            report.log_name = Some(lifecycle.fail(&mut document, &failure)?);
        }
        ProcessingOutcome::Duplicate { .. } => {}
    }

    Ok(report)
}

// ============================================================================
// IMPORT
// ============================================================================

/// Commit the staged rows. Staging is cleared only after a successful import.
pub fn run_import<S: DocumentStore + ?Sized, L: Ledger + ?Sized>(
    staging_store: &mut dyn StagingStore,
    store: &mut S,
    ledger: &mut L,
    options: &ImportOptions,
) -> Result<ImportReport, PipelineError> {
    let table = staging_store.load()?;
    info!(rows = table.len(), ledger = %ledger.location(), "import started");

    let result = importer::import(&table, store, ledger, options).map_err(|err| {
        error!(error = %err, "import aborted");
        err
    })?;

    if result.count() > 0 {
        staging_store.clear()?;
    }

    Ok(ImportReport {
        ledger: ledger.location(),
        result,
    })
}

/// Both import prechecks, nothing written
pub fn check_import<S: DocumentStore + ?Sized, L: Ledger + ?Sized>(
    staging_store: &dyn StagingStore,
    store: &S,
    ledger: &L,
) -> Result<ValidationStatus, PipelineError> {
    let table = staging_store.load()?;
    importer::validation_status(&table, store, ledger)
}

pub fn snapshot<S: DocumentStore + ?Sized, L: Ledger + ?Sized>(
    staging_store: &dyn StagingStore,
    store: &S,
    ledger: Option<&L>,
) -> Result<StagingSnapshot, PipelineError> {
    let table = staging_store.load()?;
    let last_run = staging_store.last_run()?;
    let status = match ledger {
        Some(ledger) => Some(importer::validation_status(&table, store, ledger)?),
        None => None,
    };

    Ok(StagingSnapshot {
        table,
        last_run,
        status,
    })
}

// ============================================================================
// TESTS
// ============================================================================
