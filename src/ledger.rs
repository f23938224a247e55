// 📒 Ledger - the authoritative, append-only spreadsheet
//
// The ledger is a CSV grid: a few reserved header rows, then one row per
// committed receipt. Columns are fixed: sequence, purchase date, description,
// total amount, tax amount, notes.
//
// Writes are whole-file replacements (temp file + rename), so a reader
// never sees half an append.

use crate::amount::Amount;
use crate::error::PipelineError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// LAYOUT
// ============================================================================

pub const COL_SEQUENCE: usize = 0;
pub const COL_DATE: usize = 1;
pub const COL_DESCRIPTION: usize = 2;
pub const COL_AMOUNT: usize = 3;
pub const COL_TAX: usize = 4;
pub const COL_NOTES: usize = 5;

pub const LEDGER_TITLE: &str = "Receipts ledger";
pub const LEDGER_HEADINGS: [&str; 6] = ["No.", "Date", "Description", "Amount", "Tax", "Notes"];

pub const DEFAULT_HEADER_ROWS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLayout {
    /// Rows reserved above the data; never parsed as entries
    pub header_rows: usize,
}

impl Default for LedgerLayout {
    fn default() -> Self {
        LedgerLayout {
            header_rows: DEFAULT_HEADER_ROWS,
        }
    }
}

impl LedgerLayout {
    /// Header rows for a brand-new ledger: title, then column headings
    fn initial_rows(&self) -> Vec<Vec<String>> {
        let headings: Vec<String> = LEDGER_HEADINGS.iter().map(|h| h.to_string()).collect();
        let mut rows = match self.header_rows {
            0 => Vec::new(),
            1 => vec![headings],
            _ => vec![vec![LEDGER_TITLE.to_string()], headings],
        };
        rows.resize(self.header_rows, Vec::new());
        rows
    }
}

// ============================================================================
// DATES
// ============================================================================

/// `d-MMM-yy`, e.g. `2-Mar-24`
pub fn format_ledger_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%y").to_string()
}

/// Years the two-digit ledger format can hold
pub const LEDGER_FIRST_YEAR: i32 = 1969;
pub const LEDGER_LAST_YEAR: i32 = 2068;

/// Two-digit years map to 1969-2068
pub fn parse_ledger_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%d-%b-%y").ok()
}

// ============================================================================
// ENTRIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u32,
    pub date: NaiveDate,
    pub description: String,
    pub total: Amount,
    pub tax: Option<Amount>,
    pub notes: String,
}

impl LedgerEntry {
    fn to_row(&self) -> Vec<String> {
        let mut row = vec![String::new(); LEDGER_HEADINGS.len()];
        row[COL_SEQUENCE] = self.sequence.to_string();
        row[COL_DATE] = format_ledger_date(self.date);
        row[COL_DESCRIPTION] = self.description.clone();
        row[COL_AMOUNT] = self.total.to_string();
        row[COL_TAX] = self.tax.map(|t| t.to_string()).unwrap_or_default();
        row[COL_NOTES] = self.notes.clone();
        row
    }

    fn from_row(cells: &[String]) -> Result<Self, String> {
        let cell = |idx: usize| cells.get(idx).map(|c| c.trim()).unwrap_or("");

        let sequence = cell(COL_SEQUENCE)
            .parse::<u32>()
            .ok()
            .filter(|seq| *seq > 0)
            .ok_or_else(|| format!("unparseable sequence {:?}", cell(COL_SEQUENCE)))?;
        let date = parse_ledger_date(cell(COL_DATE))
            .ok_or_else(|| format!("sequence {}: unparseable date {:?}", sequence, cell(COL_DATE)))?;
        let total = Amount::parse(cell(COL_AMOUNT))
            .ok_or_else(|| format!("sequence {}: unparseable amount {:?}", sequence, cell(COL_AMOUNT)))?;
        let tax = match cell(COL_TAX) {
            "" => None,
            raw => Some(
                Amount::parse(raw)
                    .ok_or_else(|| format!("sequence {}: unparseable tax {:?}", sequence, raw))?,
            ),
        };

        Ok(LedgerEntry {
            sequence,
            date,
            description: cell(COL_DESCRIPTION).to_string(),
            total,
            tax,
            notes: cell(COL_NOTES).to_string(),
        })
    }
}

/// A data row that could not be read as an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRow {
    /// 1-based, as a spreadsheet shows it
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerContents {
    pub entries: Vec<LedgerEntry>,
    pub malformed: Vec<MalformedRow>,
    /// 0-based index of the first free row after existing data
    pub next_row: usize,
}

impl LedgerContents {
    pub fn max_sequence(&self) -> Option<u32> {
        self.entries.iter().map(|e| e.sequence).max()
    }

    /// None once the ledger holds `u32::MAX`
    pub fn next_sequence(&self) -> Option<u32> {
        match self.max_sequence() {
            Some(max) => max.checked_add(1),
            None => Some(1),
        }
    }
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// Read entries out of a raw grid
pub fn parse_sheet(rows: &[Vec<String>], layout: &LedgerLayout) -> LedgerContents {
    let mut contents = LedgerContents {
        next_row: layout.header_rows,
        ..Default::default()
    };

    for (idx, row) in rows.iter().enumerate().skip(layout.header_rows) {
        if is_blank(row) {
            continue;
        }
        contents.next_row = idx + 1;
        match LedgerEntry::from_row(row) {
            Ok(entry) => contents.entries.push(entry),
            Err(reason) => contents.malformed.push(MalformedRow { row: idx + 1, reason }),
        }
    }

    contents
}

/// Grid after writing `entries` at the next free row
fn appended(rows: &[Vec<String>], layout: &LedgerLayout, entries: &[LedgerEntry]) -> Vec<Vec<String>> {
    let contents = parse_sheet(rows, layout);
    let mut grid: Vec<Vec<String>> = rows.iter().take(contents.next_row).cloned().collect();
    if grid.len() < contents.next_row {
        grid.resize(contents.next_row, Vec::new());
    }
    grid.extend(entries.iter().map(LedgerEntry::to_row));
    grid
}

// ============================================================================
// LEDGER TRAIT
// ============================================================================

/// Full grid captured before an import, used to undo it
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    rows: Vec<Vec<String>>,
}

impl LedgerSnapshot {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub trait Ledger {
    fn location(&self) -> String;

    fn read(&self) -> Result<LedgerContents, PipelineError>;

    fn snapshot(&self) -> Result<LedgerSnapshot, PipelineError>;

    /// All rows land or none do
    fn append(&mut self, entries: &[LedgerEntry]) -> Result<(), PipelineError>;

    fn restore(&mut self, snapshot: &LedgerSnapshot) -> Result<(), PipelineError>;
}

// ============================================================================
// CSV LEDGER
// ============================================================================

/// Exclusive-access marker next to the ledger, removed on drop
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
}

impl LedgerLock {
    pub fn acquire(ledger: &Path) -> Result<Self, PipelineError> {
        let path = lock_path(ledger);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    PipelineError::ledger_write(
                        ledger.display().to_string(),
                        format!("ledger is locked by another import ({} exists)", path.display()),
                    )
                } else {
                    PipelineError::ledger_write(ledger.display().to_string(), e)
                }
            })?;

        // The pid only helps an operator decide whether a lock is stale
        let _ = writeln!(file, "{}", std::process::id());
        debug!(lock = %path.display(), "ledger lock acquired");
        Ok(LedgerLock { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "could not release ledger lock");
        }
    }
}

pub fn lock_path(ledger: &Path) -> PathBuf {
    let mut name = ledger.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn temp_path(ledger: &Path) -> PathBuf {
    let mut name = ledger.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Ledger spreadsheet on disk. Holds the lock for as long as it lives.
#[derive(Debug)]
pub struct CsvLedger {
    path: PathBuf,
    layout: LedgerLayout,
    _lock: LedgerLock,
}

impl CsvLedger {
    /// Lock the ledger. A missing file reads as empty and is created with
    /// its header rows on the first append.
    pub fn open(path: &Path, layout: LedgerLayout) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(PipelineError::ledger_write(
                    path.display().to_string(),
                    format!("directory {} does not exist", parent.display()),
                ));
            }
        }

        let lock = LedgerLock::acquire(path)?;
        Ok(CsvLedger {
            path: path.to_path_buf(),
            layout,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_rows(&self) -> Result<Vec<Vec<String>>, PipelineError> {
        if !self.path.exists() {
            return Ok(self.layout.initial_rows());
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| PipelineError::ledger_write(self.location(), e))?;

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| PipelineError::ledger_write(self.location(), e))?;
            rows.push(record.iter().map(|cell| cell.to_string()).collect());
        }
        Ok(rows)
    }

    fn store_rows(&self, rows: &[Vec<String>]) -> Result<(), PipelineError> {
        let tmp = temp_path(&self.path);
        let write_err = |e: &dyn std::fmt::Display| PipelineError::ledger_write(self.location(), e);

        {
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(&tmp)
                .map_err(|e| write_err(&e))?;
            for row in rows {
                // csv refuses to write a zero-field record
                if row.is_empty() {
                    wtr.write_record([""]).map_err(|e| write_err(&e))?;
                } else {
                    wtr.write_record(row).map_err(|e| write_err(&e))?;
                }
            }
            wtr.flush().map_err(|e| write_err(&e))?;
        }

        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(&err));
        }
        Ok(())
    }
}

impl Ledger for CsvLedger {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> Result<LedgerContents, PipelineError> {
        Ok(parse_sheet(&self.load_rows()?, &self.layout))
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, PipelineError> {
        Ok(LedgerSnapshot {
            rows: self.load_rows()?,
        })
    }

    fn append(&mut self, entries: &[LedgerEntry]) -> Result<(), PipelineError> {
        let rows = self.load_rows()?;
        let grid = appended(&rows, &self.layout, entries);
        self.store_rows(&grid)?;

        info!(ledger = %self.location(), rows = entries.len(), "ledger rows appended");
        Ok(())
    }

    fn restore(&mut self, snapshot: &LedgerSnapshot) -> Result<(), PipelineError> {
        self.store_rows(&snapshot.rows)?;
        warn!(ledger = %self.location(), "ledger restored to pre-import snapshot");
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY LEDGER
// ============================================================================

/// Grid kept in memory, with failure injection for import tests
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    rows: Vec<Vec<String>>,
    layout: LedgerLayout,
    fail_appends: bool,
    fail_restores: bool,
}

impl MemoryLedger {
    pub fn new(layout: LedgerLayout) -> Self {
        MemoryLedger {
            rows: layout.initial_rows(),
            layout,
            ..Default::default()
        }
    }

    pub fn with_entries(layout: LedgerLayout, entries: &[LedgerEntry]) -> Self {
        let mut ledger = Self::new(layout);
        ledger.rows = appended(&ledger.rows, &layout, entries);
        ledger
    }

    /// Put a raw row at the end, bypassing validation
    pub fn push_raw_row(&mut self, cells: &[&str]) {
        self.rows.push(cells.iter().map(|c| c.to_string()).collect());
    }

    pub fn fail_appends(&mut self) {
        self.fail_appends = true;
    }

    pub fn fail_restores(&mut self) {
        self.fail_restores = true;
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        parse_sheet(&self.rows, &self.layout).entries
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

impl Ledger for MemoryLedger {
    fn location(&self) -> String {
        "memory://ledger".to_string()
    }

    fn read(&self) -> Result<LedgerContents, PipelineError> {
        Ok(parse_sheet(&self.rows, &self.layout))
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, PipelineError> {
        Ok(LedgerSnapshot {
            rows: self.rows.clone(),
        })
    }

    fn append(&mut self, entries: &[LedgerEntry]) -> Result<(), PipelineError> {
        if self.fail_appends {
            return Err(PipelineError::ledger_write(self.location(), "injected append failure"));
        }
        self.rows = appended(&self.rows, &self.layout, entries);
        Ok(())
    }

    fn restore(&mut self, snapshot: &LedgerSnapshot) -> Result<(), PipelineError> {
        if self.fail_restores {
            return Err(PipelineError::ledger_write(self.location(), "injected restore failure"));
        }
        self.rows = snapshot.rows.clone();
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sequence: u32, day: u32, minor: i64) -> LedgerEntry {
        LedgerEntry {
            sequence,
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            description: format!("Receipt {}", sequence),
            total: Amount::from_minor(minor),
            tax: Some(Amount::from_minor(minor / 10)),
            notes: String::new(),
        }
    }

    #[test]
    fn test_ledger_date_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(format_ledger_date(date), "2-Mar-24");
        assert_eq!(parse_ledger_date("2-Mar-24"), Some(date));
        assert_eq!(parse_ledger_date("02-Mar-24"), Some(date));
        assert_eq!(parse_ledger_date("not a date"), None);
    }

    #[test]
    fn test_ledger_date_round_trip_over_two_digit_range() {
        let mut date = NaiveDate::from_ymd_opt(LEDGER_FIRST_YEAR, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(LEDGER_LAST_YEAR, 12, 31).unwrap();

        while date <= end {
            assert_eq!(parse_ledger_date(&format_ledger_date(date)), Some(date));
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_parse_sheet_skips_headers_and_blank_rows() {
        let mut ledger = MemoryLedger::with_entries(LedgerLayout::default(), &[entry(1, 1, 1000)]);
        ledger.push_raw_row(&["", "", ""]);
        ledger.push_raw_row(&["2", "5-Mar-24", "Taxi", "18.00", "", ""]);

        let contents = ledger.read().unwrap();
        assert_eq!(contents.entries.len(), 2);
        assert!(contents.malformed.is_empty());
        assert_eq!(contents.next_row, 5);
        assert_eq!(contents.next_sequence(), Some(3));
    }

    #[test]
    fn test_parse_sheet_reports_malformed_rows() {
        let mut ledger = MemoryLedger::new(LedgerLayout::default());
        ledger.push_raw_row(&["abc", "5-Mar-24", "Taxi", "18.00"]);

        let contents = ledger.read().unwrap();
        assert!(contents.entries.is_empty());
        assert_eq!(contents.malformed.len(), 1);
        assert_eq!(contents.malformed[0].row, 3);
    }

    #[test]
    fn test_empty_ledger_starts_at_one() {
        let ledger = MemoryLedger::new(LedgerLayout::default());
        let contents = ledger.read().unwrap();

        assert_eq!(contents.max_sequence(), None);
        assert_eq!(contents.next_sequence(), Some(1));
        assert_eq!(contents.next_row, 2);
    }

    #[test]
    fn test_memory_append_and_restore() {
        let mut ledger = MemoryLedger::with_entries(LedgerLayout::default(), &[entry(1, 1, 500)]);
        let snapshot = ledger.snapshot().unwrap();

        ledger.append(&[entry(2, 2, 700), entry(3, 3, 900)]).unwrap();
        assert_eq!(ledger.entries().len(), 3);

        ledger.restore(&snapshot).unwrap();
        assert_eq!(ledger.entries(), vec![entry(1, 1, 500)]);
    }

    #[test]
    fn test_csv_ledger_created_with_headers_on_first_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");

        {
            let mut ledger = CsvLedger::open(&path, LedgerLayout::default()).unwrap();
            assert!(ledger.read().unwrap().entries.is_empty());
            ledger.append(&[entry(1, 2, 1234)]).unwrap();
        }

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], LEDGER_TITLE);
        assert_eq!(lines[1], "No.,Date,Description,Amount,Tax,Notes");
        assert_eq!(lines[2], "1,2-Mar-24,Receipt 1,12.34,1.23,");
        assert!(!lock_path(&path).exists(), "lock released on drop");
    }

    #[test]
    fn test_csv_ledger_appends_after_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");

        {
            let mut ledger = CsvLedger::open(&path, LedgerLayout::default()).unwrap();
            ledger.append(&[entry(1, 1, 100)]).unwrap();
        }
        {
            let mut ledger = CsvLedger::open(&path, LedgerLayout::default()).unwrap();
            ledger.append(&[entry(2, 2, 200)]).unwrap();
            let contents = ledger.read().unwrap();
            let sequences: Vec<u32> = contents.entries.iter().map(|e| e.sequence).collect();
            assert_eq!(sequences, vec![1, 2]);
        }
    }

    #[test]
    fn test_csv_ledger_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");

        let first = CsvLedger::open(&path, LedgerLayout::default()).unwrap();
        let second = CsvLedger::open(&path, LedgerLayout::default());
        assert!(matches!(second, Err(PipelineError::LedgerWrite { .. })));

        drop(first);
        assert!(CsvLedger::open(&path, LedgerLayout::default()).is_ok());
    }

    #[test]
    fn test_csv_ledger_restore_undoes_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let mut ledger = CsvLedger::open(&path, LedgerLayout::default()).unwrap();
        ledger.append(&[entry(1, 1, 100)]).unwrap();

        let snapshot = ledger.snapshot().unwrap();
        ledger.append(&[entry(2, 2, 200)]).unwrap();
        ledger.restore(&snapshot).unwrap();

        assert_eq!(ledger.read().unwrap().entries.len(), 1);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_csv_ledger_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("ledger.csv");

        let result = CsvLedger::open(&path, LedgerLayout::default());
        assert!(matches!(result, Err(PipelineError::LedgerWrite { .. })));
    }
}
