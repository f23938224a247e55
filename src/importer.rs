// 📥 Ledger Importer - staging rows → numbered ledger entries + imported/ files
//
// Protocol:
//   1. ledger ⇄ imported/ must correspond one-to-one (pure check, full report)
//   2. every staging row must match its scanned file and be new
//   3. append all rows at once, then move the files
//   4. a failed move puts everything back, files and ledger
//
// Nothing is written unless both prechecks pass.

use crate::error::PipelineError;
use crate::fingerprint::{fingerprint, FingerprintSet};
use crate::ledger::{Ledger, LedgerContents, LedgerEntry};
use crate::lifecycle::{imported_name, parse_imported_sequence};
use crate::staging::{StagingRecord, StagingTable};
use crate::storage::{DocumentStore, FolderRole};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{error, info, warn};

// ============================================================================
// CONSISTENCY REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyViolation {
    /// Ledger has the sequence, imported/ has no file for it
    MissingFile { sequence: u32 },
    /// File in imported/ whose sequence is not in the ledger
    OrphanFile { file: String, sequence: u32 },
    DuplicateSequence { sequence: u32, rows: usize },
    DuplicateFile { sequence: u32, files: Vec<String> },
    MalformedRow { row: usize, reason: String },
    /// File in imported/ without a `{sequence}-` prefix
    UnrecognizedFile { file: String },
    /// Highest sequence leaves no room for another row
    SequenceExhausted { sequence: u32 },
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyViolation::MissingFile { sequence } => {
                write!(f, "sequence {} has no file in imported/", sequence)
            }
            ConsistencyViolation::OrphanFile { file, sequence } => {
                write!(f, "{} has sequence {} which is not in the ledger", file, sequence)
            }
            ConsistencyViolation::DuplicateSequence { sequence, rows } => {
                write!(f, "sequence {} appears in {} ledger rows", sequence, rows)
            }
            ConsistencyViolation::DuplicateFile { sequence, files } => {
                write!(f, "sequence {} has several files: {}", sequence, files.join(", "))
            }
            ConsistencyViolation::MalformedRow { row, reason } => {
                write!(f, "ledger row {}: {}", row, reason)
            }
            ConsistencyViolation::UnrecognizedFile { file } => {
                write!(f, "{} does not start with a sequence number", file)
            }
            ConsistencyViolation::SequenceExhausted { sequence } => {
                write!(f, "sequence {} is the last one available", sequence)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub ledger_entries: usize,
    pub imported_files: usize,
    pub violations: Vec<ConsistencyViolation>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} ledger entries, {} imported files, {} problem(s)",
            self.ledger_entries,
            self.imported_files,
            self.violations.len()
        )
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        for violation in &self.violations {
            write!(f, "; {}", violation)?;
        }
        Ok(())
    }
}

/// Check that ledger sequences and imported/ file names correspond one-to-one.
/// Pure: the caller reads both sides.
pub fn check_consistency(ledger: &LedgerContents, imported: &[String]) -> ConsistencyReport {
    let mut violations = Vec::new();

    for row in &ledger.malformed {
        violations.push(ConsistencyViolation::MalformedRow {
            row: row.row,
            reason: row.reason.clone(),
        });
    }

    let mut sequences: BTreeMap<u32, usize> = BTreeMap::new();
    for entry in &ledger.entries {
        *sequences.entry(entry.sequence).or_insert(0) += 1;
    }
    for (sequence, rows) in &sequences {
        if *rows > 1 {
            violations.push(ConsistencyViolation::DuplicateSequence {
                sequence: *sequence,
                rows: *rows,
            });
        }
    }

    let mut files: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    let mut unrecognized = Vec::new();
    let visible = imported.iter().filter(|name| !name.starts_with('.'));
    for name in visible.clone() {
        match parse_imported_sequence(name) {
            Some(sequence) => files.entry(sequence).or_default().push(name.clone()),
            None => unrecognized.push(name.clone()),
        }
    }

    for sequence in sequences.keys() {
        if !files.contains_key(sequence) {
            violations.push(ConsistencyViolation::MissingFile { sequence: *sequence });
        }
    }

    for (sequence, names) in &files {
        if names.len() > 1 {
            violations.push(ConsistencyViolation::DuplicateFile {
                sequence: *sequence,
                files: names.clone(),
            });
        }
        if !sequences.contains_key(sequence) {
            for file in names {
                violations.push(ConsistencyViolation::OrphanFile {
                    file: file.clone(),
                    sequence: *sequence,
                });
            }
        }
    }

    violations.extend(
        unrecognized
            .into_iter()
            .map(|file| ConsistencyViolation::UnrecognizedFile { file }),
    );

    ConsistencyReport {
        ledger_entries: ledger.entries.len() + ledger.malformed.len(),
        imported_files: visible.count(),
        violations,
    }
}

// ============================================================================
// STAGING PRECHECK
// ============================================================================

/// Problems that make a staging row unimportable
pub fn check_staging<S: DocumentStore + ?Sized>(
    table: &StagingTable,
    store: &S,
    imported: &FingerprintSet,
) -> Vec<String> {
    let mut problems = Vec::new();
    let mut hashes = HashSet::new();
    let mut names = HashSet::new();

    for row in table.iter() {
        let name = &row.done_filename;

        if !names.insert(name.as_str()) {
            problems.push(format!("{} is staged twice", name));
        }
        if !hashes.insert(row.hash.as_str()) {
            problems.push(format!("{}: hash {} repeats within staging", name, row.hash.short()));
        }
        if imported.contains(&row.hash) {
            problems.push(format!("{}: already imported (hash {})", name, row.hash.short()));
        }

        match store.read(FolderRole::Scanned, name) {
            Ok(bytes) => {
                let actual = fingerprint(&bytes);
                if actual != row.hash {
                    problems.push(format!(
                        "{}: content hash {} does not match staged {}",
                        name,
                        actual.short(),
                        row.hash.short()
                    ));
                }
            }
            Err(err) => problems.push(format!("{}: {}", name, err)),
        }
    }

    problems
}

// ============================================================================
// PLAN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Currency the ledger is kept in; others get a note
    pub base_currency: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            base_currency: "EUR".to_string(),
        }
    }
}

pub fn currency_note(currency: &str, base_currency: &str) -> String {
    if currency.eq_ignore_ascii_case(base_currency) {
        String::new()
    } else {
        format!("Original currency: {}", currency)
    }
}

pub fn ledger_entry(record: &StagingRecord, sequence: u32, options: &ImportOptions) -> LedgerEntry {
    LedgerEntry {
        sequence,
        date: record.date,
        description: record.description.clone(),
        total: record.amount,
        tax: record.tax,
        notes: currency_note(&record.currency, &options.base_currency),
    }
}

/// What an import will write, in staging order
#[derive(Debug, Clone, PartialEq)]
pub struct ImportPlan {
    pub entries: Vec<LedgerEntry>,
    /// (scanned name, imported name), parallel to `entries`
    pub moves: Vec<(String, String)>,
}

impl ImportPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationStatus {
    Ready { rows: usize, next_sequence: u32 },
    NothingToImport { next_sequence: u32 },
    Inconsistent(ConsistencyReport),
    StagingMismatch(Vec<String>),
}

impl ValidationStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ValidationStatus::Ready { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            ValidationStatus::Ready { rows, next_sequence } => format!(
                "ready: {} row(s) will be numbered from {}",
                rows, next_sequence
            ),
            ValidationStatus::NothingToImport { next_sequence } => {
                format!("nothing staged (next sequence {})", next_sequence)
            }
            ValidationStatus::Inconsistent(report) => format!("ledger inconsistent: {}", report),
            ValidationStatus::StagingMismatch(problems) => {
                format!("staging mismatch: {}", problems.join("; "))
            }
        }
    }
}

fn imported_fingerprints<S: DocumentStore + ?Sized>(
    store: &S,
    names: &[String],
) -> Result<FingerprintSet, PipelineError> {
    let mut set = FingerprintSet::new();
    for name in names {
        set.insert(fingerprint(&store.read(FolderRole::Imported, name)?));
    }
    Ok(set)
}

fn sequence_at(next_sequence: u32, offset: usize) -> Option<u32> {
    u32::try_from(offset).ok().and_then(|offset| next_sequence.checked_add(offset))
}

/// Run both prechecks without writing anything
pub fn validation_status<S: DocumentStore + ?Sized, L: Ledger + ?Sized>(
    table: &StagingTable,
    store: &S,
    ledger: &L,
) -> Result<ValidationStatus, PipelineError> {
    let contents = ledger.read()?;
    let imported = store.list(FolderRole::Imported)?;

    let mut report = check_consistency(&contents, &imported);
    let next_sequence = match (report.is_consistent(), contents.next_sequence()) {
        (true, Some(next)) => next,
        (_, next) => {
            if next.is_none() {
                report.violations.push(ConsistencyViolation::SequenceExhausted { sequence: u32::MAX });
            }
            return Ok(ValidationStatus::Inconsistent(report));
        }
    };
    if table.is_empty() {
        return Ok(ValidationStatus::NothingToImport { next_sequence });
    }

    let known = imported_fingerprints(store, &imported)?;
    let mut problems = check_staging(table, store, &known);
    for (offset, row) in table.iter().enumerate() {
        let Some(sequence) = sequence_at(next_sequence, offset) else {
            problems.push(format!("no sequence number left for {}", row.done_filename));
            continue;
        };
        let target = imported_name(sequence, &row.done_filename);
        if imported.contains(&target) {
            problems.push(format!("{} already exists in imported/", target));
        }
    }
    if !problems.is_empty() {
        return Ok(ValidationStatus::StagingMismatch(problems));
    }

    Ok(ValidationStatus::Ready {
        rows: table.len(),
        next_sequence,
    })
}

/// Prechecks, then the plan. Any violation is an error and nothing is written.
pub fn validate_import<S: DocumentStore + ?Sized, L: Ledger + ?Sized>(
    table: &StagingTable,
    store: &S,
    ledger: &L,
    options: &ImportOptions,
) -> Result<ImportPlan, PipelineError> {
    let next_sequence = match validation_status(table, store, ledger)? {
        ValidationStatus::Ready { next_sequence, .. } => next_sequence,
        ValidationStatus::NothingToImport { .. } => {
            return Ok(ImportPlan {
                entries: Vec::new(),
                moves: Vec::new(),
            })
        }
        ValidationStatus::Inconsistent(report) => {
            error!(report = %report, "ledger consistency check failed");
            return Err(PipelineError::LedgerConsistency(report));
        }
        ValidationStatus::StagingMismatch(problems) => {
            error!(problems = problems.len(), "staging precheck failed");
            return Err(PipelineError::StagingMismatch(problems.join("; ")));
        }
    };

    let mut plan = ImportPlan {
        entries: Vec::with_capacity(table.len()),
        moves: Vec::with_capacity(table.len()),
    };
    for (offset, row) in table.iter().enumerate() {
        let sequence = sequence_at(next_sequence, offset).ok_or_else(|| {
            PipelineError::StagingMismatch(format!("no sequence number left for {}", row.done_filename))
        })?;
        plan.entries.push(ledger_entry(row, sequence, options));
        plan.moves
            .push((row.done_filename.clone(), imported_name(sequence, &row.done_filename)));
    }
    Ok(plan)
}

// ============================================================================
// IMPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResult {
    pub entries: Vec<LedgerEntry>,
    /// Names now in imported/
    pub files: Vec<String>,
}

impl ImportResult {
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn first_sequence(&self) -> Option<u32> {
        self.entries.first().map(|e| e.sequence)
    }

    pub fn last_sequence(&self) -> Option<u32> {
        self.entries.last().map(|e| e.sequence)
    }
}

/// Commit the staging table to the ledger and move its files into imported/
pub fn import<S: DocumentStore + ?Sized, L: Ledger + ?Sized>(
    table: &StagingTable,
    store: &mut S,
    ledger: &mut L,
    options: &ImportOptions,
) -> Result<ImportResult, PipelineError> {
    let plan = validate_import(table, &*store, &*ledger, options)?;
    if plan.is_empty() {
        info!("nothing to import");
        return Ok(ImportResult::default());
    }

    let snapshot = ledger.snapshot()?;
    ledger.append(&plan.entries)?;

    let mut moved: Vec<&(String, String)> = Vec::with_capacity(plan.moves.len());
    for pair in &plan.moves {
        let (scanned, target) = pair;
        if let Err(err) = store.rename(FolderRole::Scanned, scanned, FolderRole::Imported, target) {
            error!(file = %scanned, error = %err, "move into imported/ failed, rolling back");
            let rolled_back = roll_back(store, ledger, &moved, &snapshot);
            return Err(PipelineError::ImportRolledBack {
                reason: err.to_string(),
                rolled_back,
            });
        }
        moved.push(pair);
    }

    let result = ImportResult {
        files: plan.moves.into_iter().map(|(_, target)| target).collect(),
        entries: plan.entries,
    };
    info!(
        rows = result.count(),
        first = result.first_sequence().unwrap_or(0),
        last = result.last_sequence().unwrap_or(0),
        "import committed"
    );
    Ok(result)
}

/// Undo moved files (newest first) and the ledger append. True when fully undone.
fn roll_back<S: DocumentStore + ?Sized, L: Ledger + ?Sized>(
    store: &mut S,
    ledger: &mut L,
    moved: &[&(String, String)],
    snapshot: &crate::ledger::LedgerSnapshot,
) -> bool {
    let mut complete = true;

    for (scanned, target) in moved.iter().rev().map(|pair| (&pair.0, &pair.1)) {
        if let Err(err) = store.rename(FolderRole::Imported, target, FolderRole::Scanned, scanned) {
            warn!(file = %target, error = %err, "could not move file back to scanned/");
            complete = false;
        }
    }

    if let Err(err) = ledger.restore(snapshot) {
        warn!(error = %err, "could not restore ledger snapshot");
        complete = false;
    }

    complete
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::ledger::{LedgerLayout, MemoryLedger};
    use crate::storage::MemoryStore;
    use chrono::NaiveDate;

    fn stage(store: &mut MemoryStore, name: &str, day: u32, currency: &str) -> StagingRecord {
        let bytes = format!("receipt bytes for {}", name).into_bytes();
        store.put(FolderRole::Scanned, name, &bytes);
        StagingRecord {
            amount: Amount::from_minor(1000 + day as i64),
            tax: None,
            tax_percentage: None,
            description: name.trim_end_matches(".jpg").to_string(),
            currency: currency.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 4, day).unwrap(),
            confidence: 80,
            hash: fingerprint(&bytes),
            done_filename: name.to_string(),
        }
    }

    fn committed(store: &mut MemoryStore, sequences: &[u32]) -> MemoryLedger {
        let entries: Vec<LedgerEntry> = sequences
            .iter()
            .map(|seq| {
                store.put(
                    FolderRole::Imported,
                    &format!("{}-20240101-old.jpg", seq),
                    format!("old {}", seq).as_bytes(),
                );
                LedgerEntry {
                    sequence: *seq,
                    date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    description: "old".to_string(),
                    total: Amount::from_minor(100),
                    tax: None,
                    notes: String::new(),
                }
            })
            .collect();
        MemoryLedger::with_entries(LedgerLayout::default(), &entries)
    }

    #[test]
    fn test_consistency_clean() {
        let mut store = MemoryStore::with_folders();
        let ledger = committed(&mut store, &[1, 2, 3]);

        let report = check_consistency(&ledger.read().unwrap(), &store.list(FolderRole::Imported).unwrap());
        assert!(report.is_consistent());
        assert_eq!(report.ledger_entries, 3);
        assert_eq!(report.imported_files, 3);
    }

    #[test]
    fn test_missing_imported_file_aborts_import() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = committed(&mut store, &[1, 2, 3, 4, 5]);
        store.remove(FolderRole::Imported, "3-20240101-old.jpg").unwrap();
        let table = StagingTable::from_rows(vec![stage(&mut store, "20240402-new.jpg", 2, "EUR")]);
        let before = ledger.rows().to_vec();

        let result = import(&table, &mut store, &mut ledger, &ImportOptions::default());

        match result {
            Err(PipelineError::LedgerConsistency(report)) => {
                assert_eq!(
                    report.violations,
                    vec![ConsistencyViolation::MissingFile { sequence: 3 }]
                );
            }
            other => panic!("expected consistency error, got {:?}", other),
        }
        assert_eq!(ledger.rows(), before.as_slice());
        assert_eq!(store.names(FolderRole::Scanned), vec!["20240402-new.jpg"]);
        assert_eq!(store.names(FolderRole::Imported).len(), 4);
        println!("✅ Missing imported file aborts import with no writes");
    }

    #[test]
    fn test_consistency_reports_every_problem() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = committed(&mut store, &[1, 2]);
        ledger.push_raw_row(&["2", "1-Jan-24", "again", "1.00"]);
        ledger.push_raw_row(&["x", "1-Jan-24", "broken", "1.00"]);
        store.put(FolderRole::Imported, "7-20240101-stray.jpg", b"stray");
        store.put(FolderRole::Imported, "1-20240101-copy.jpg", b"copy");
        store.put(FolderRole::Imported, "notes.txt", b"?");
        store.put(FolderRole::Imported, ".DS_Store", b"");

        let report = check_consistency(&ledger.read().unwrap(), &store.list(FolderRole::Imported).unwrap());
        let violations = &report.violations;

        assert!(violations.contains(&ConsistencyViolation::DuplicateSequence { sequence: 2, rows: 2 }));
        assert!(violations.iter().any(|v| matches!(v, ConsistencyViolation::MalformedRow { row: 6, .. })));
        assert!(violations.contains(&ConsistencyViolation::OrphanFile {
            file: "7-20240101-stray.jpg".to_string(),
            sequence: 7
        }));
        assert!(violations.iter().any(|v| matches!(v, ConsistencyViolation::DuplicateFile { sequence: 1, .. })));
        assert!(violations.contains(&ConsistencyViolation::UnrecognizedFile {
            file: "notes.txt".to_string()
        }));
        assert_eq!(violations.len(), 5);
        assert!(report.to_string().contains("5 problem(s)"));
    }

    #[test]
    fn test_import_extends_sequence_contiguously() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = committed(&mut store, &[1, 2, 3, 4, 5, 6, 7]);
        let table = StagingTable::from_rows(vec![
            stage(&mut store, "20240401-a.jpg", 1, "EUR"),
            stage(&mut store, "20240402-b.jpg", 2, "USD"),
            stage(&mut store, "20240403-c.jpg", 3, "EUR"),
        ]);

        let result = import(&table, &mut store, &mut ledger, &ImportOptions::default()).unwrap();

        assert_eq!(result.first_sequence(), Some(8));
        assert_eq!(result.last_sequence(), Some(10));
        assert_eq!(
            result.files,
            vec!["8-20240401-a.jpg", "9-20240402-b.jpg", "10-20240403-c.jpg"]
        );

        let sequences: Vec<u32> = ledger.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
        assert_eq!(ledger.entries()[8].notes, "Original currency: USD");
        assert_eq!(ledger.entries()[7].notes, "");
        assert!(store.names(FolderRole::Scanned).is_empty());

        let after = check_consistency(&ledger.read().unwrap(), &store.list(FolderRole::Imported).unwrap());
        assert!(after.is_consistent());
    }

    #[test]
    fn test_exhausted_sequence_blocks_import() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = committed(&mut store, &[u32::MAX]);
        let table = StagingTable::from_rows(vec![stage(&mut store, "20240402-new.jpg", 2, "EUR")]);
        let before = ledger.rows().to_vec();

        match import(&table, &mut store, &mut ledger, &ImportOptions::default()) {
            Err(PipelineError::LedgerConsistency(report)) => {
                assert_eq!(
                    report.violations,
                    vec![ConsistencyViolation::SequenceExhausted { sequence: u32::MAX }]
                );
            }
            other => panic!("expected consistency error, got {:?}", other),
        }
        assert_eq!(ledger.rows(), before.as_slice());
        assert_eq!(store.names(FolderRole::Scanned), vec!["20240402-new.jpg"]);
    }

    #[test]
    fn test_rows_past_last_sequence_are_rejected() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = committed(&mut store, &[u32::MAX - 1]);
        let table = StagingTable::from_rows(vec![
            stage(&mut store, "20240402-a.jpg", 2, "EUR"),
            stage(&mut store, "20240403-b.jpg", 3, "EUR"),
        ]);
        let before = ledger.rows().to_vec();

        let status = validation_status(&table, &store, &ledger).unwrap();
        match status {
            ValidationStatus::StagingMismatch(problems) => {
                assert_eq!(problems, vec!["no sequence number left for 20240403-b.jpg".to_string()]);
            }
            other => panic!("expected staging mismatch, got {:?}", other),
        }

        let result = import(&table, &mut store, &mut ledger, &ImportOptions::default());
        assert!(matches!(result, Err(PipelineError::StagingMismatch(_))));
        assert_eq!(ledger.rows(), before.as_slice());
    }

    #[test]
    fn test_import_into_empty_ledger_starts_at_one() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = MemoryLedger::new(LedgerLayout::default());
        let table = StagingTable::from_rows(vec![stage(&mut store, "20240405-x.jpg", 5, "EUR")]);

        let result = import(&table, &mut store, &mut ledger, &ImportOptions::default()).unwrap();

        assert_eq!(result.first_sequence(), Some(1));
        assert!(store.exists(FolderRole::Imported, "1-20240405-x.jpg"));
    }

    #[test]
    fn test_failed_move_rolls_back_everything() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = committed(&mut store, &[1]);
        let table = StagingTable::from_rows(vec![
            stage(&mut store, "20240401-a.jpg", 1, "EUR"),
            stage(&mut store, "20240402-b.jpg", 2, "EUR"),
        ]);
        store.fail_writes_to(FolderRole::Imported, "3-20240402-b.jpg");
        let before = ledger.rows().to_vec();

        let result = import(&table, &mut store, &mut ledger, &ImportOptions::default());

        assert!(matches!(
            result,
            Err(PipelineError::ImportRolledBack { rolled_back: true, .. })
        ));
        assert_eq!(ledger.rows(), before.as_slice());
        assert_eq!(store.names(FolderRole::Scanned), vec!["20240401-a.jpg", "20240402-b.jpg"]);
        assert_eq!(store.names(FolderRole::Imported), vec!["1-20240101-old.jpg"]);
        println!("✅ Import atomicity PASSED");
    }

    #[test]
    fn test_incomplete_rollback_is_reported() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = MemoryLedger::new(LedgerLayout::default());
        let table = StagingTable::from_rows(vec![
            stage(&mut store, "20240401-a.jpg", 1, "EUR"),
            stage(&mut store, "20240402-b.jpg", 2, "EUR"),
        ]);
        store.fail_writes_to(FolderRole::Imported, "2-20240402-b.jpg");
        ledger.fail_restores();

        let result = import(&table, &mut store, &mut ledger, &ImportOptions::default());

        assert!(matches!(
            result,
            Err(PipelineError::ImportRolledBack { rolled_back: false, .. })
        ));
    }

    #[test]
    fn test_ledger_write_failure_leaves_files_alone() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = MemoryLedger::new(LedgerLayout::default());
        ledger.fail_appends();
        let table = StagingTable::from_rows(vec![stage(&mut store, "20240401-a.jpg", 1, "EUR")]);

        let result = import(&table, &mut store, &mut ledger, &ImportOptions::default());

        assert!(matches!(result, Err(PipelineError::LedgerWrite { .. })));
        assert_eq!(store.names(FolderRole::Scanned), vec!["20240401-a.jpg"]);
        assert!(store.names(FolderRole::Imported).is_empty());
    }

    #[test]
    fn test_staging_precheck_catches_tampered_and_missing_files() {
        let mut store = MemoryStore::with_folders();
        let ledger = MemoryLedger::new(LedgerLayout::default());
        let tampered = stage(&mut store, "20240401-a.jpg", 1, "EUR");
        store.put(FolderRole::Scanned, "20240401-a.jpg", b"edited after the scan");
        let mut missing = stage(&mut store, "20240402-b.jpg", 2, "EUR");
        missing.done_filename = "20240402-gone.jpg".to_string();
        let table = StagingTable::from_rows(vec![tampered, missing]);

        let status = validation_status(&table, &store, &ledger).unwrap();

        match status {
            ValidationStatus::StagingMismatch(problems) => {
                assert_eq!(problems.len(), 2);
                assert!(problems[0].contains("does not match"));
                assert!(problems[1].contains("20240402-gone.jpg"));
            }
            other => panic!("expected staging mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_staging_precheck_rejects_already_imported_hash() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = committed(&mut store, &[1]);
        let row = stage(&mut store, "20240401-a.jpg", 1, "EUR");
        store.put(FolderRole::Scanned, "20240401-a.jpg", b"old 1");
        let row = StagingRecord {
            hash: fingerprint(b"old 1"),
            ..row
        };
        let table = StagingTable::from_rows(vec![row]);

        let result = import(&table, &mut store, &mut ledger, &ImportOptions::default());
        match result {
            Err(PipelineError::StagingMismatch(reason)) => assert!(reason.contains("already imported")),
            other => panic!("expected staging mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_staging_is_a_no_op() {
        let mut store = MemoryStore::with_folders();
        let mut ledger = committed(&mut store, &[1, 2]);

        let status = validation_status(&StagingTable::default(), &store, &ledger).unwrap();
        assert_eq!(status, ValidationStatus::NothingToImport { next_sequence: 3 });

        let result = import(&StagingTable::default(), &mut store, &mut ledger, &ImportOptions::default()).unwrap();
        assert_eq!(result.count(), 0);
    }
}
