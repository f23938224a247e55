// 📋 Staging Writer - reviewable table of receipts waiting for import
//
// The table is dropped and rebuilt on every scan; nothing carries over between
// runs. SQLite holds the authoritative copy, a CSV export sits next to it for review.

use crate::amount::Amount;
use crate::error::PipelineError;
use crate::extraction::ProcessingOutcome;
use crate::fingerprint::FileFingerprint;
use crate::pipeline::{DocumentReport, RunCounters, RunSummary};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// `dd-MM-YYYY`
pub const STAGING_DATE_FORMAT: &str = "%d-%m-%Y";

pub const STAGING_COLUMNS: [&str; 9] = [
    "Amount",
    "Tax",
    "TaxPercentage",
    "Description",
    "Currency",
    "Date",
    "Confidence",
    "Hash",
    "DoneFilename",
];

// ============================================================================
// STAGING TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRecord {
    pub amount: Amount,
    pub tax: Option<Amount>,
    pub tax_percentage: Option<f64>,
    pub description: String,
    pub currency: String,
    pub date: NaiveDate,
    pub confidence: u8,
    pub hash: FileFingerprint,
    /// Name in scanned/; the importer prefixes the sequence number
    pub done_filename: String,
}

impl StagingRecord {
    pub fn staging_date(&self) -> String {
        self.date.format(STAGING_DATE_FORMAT).to_string()
    }

    fn cells(&self) -> [String; 9] {
        [
            self.amount.to_string(),
            self.tax.map(|t| t.to_string()).unwrap_or_default(),
            self.tax_percentage.map(|p| p.to_string()).unwrap_or_default(),
            self.description.clone(),
            self.currency.clone(),
            self.staging_date(),
            self.confidence.to_string(),
            self.hash.to_string(),
            self.done_filename.clone(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingTable {
    rows: Vec<StagingRecord>,
}

impl StagingTable {
    pub fn from_rows(rows: Vec<StagingRecord>) -> Self {
        StagingTable { rows }
    }

    pub fn rows(&self) -> &[StagingRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StagingRecord> {
        self.rows.iter()
    }
}

/// Build the table from one run's outcomes.
///
/// Only successes that made it into scanned/ are kept. Order is ascending by
/// (date, extraction time, description); description breaks timestamp ties.
pub fn rebuild(reports: &[DocumentReport]) -> StagingTable {
    let mut keyed: Vec<(DateTime<Utc>, StagingRecord)> = reports
        .iter()
        .filter_map(|report| match (&report.outcome, &report.scanned_name) {
            (ProcessingOutcome::Success { result, fingerprint }, Some(scanned)) => Some((
                result.extracted_at,
                StagingRecord {
                    amount: result.amount,
                    tax: result.tax,
                    tax_percentage: result.tax_percentage,
                    description: result.description.clone().unwrap_or_default(),
                    currency: result.currency.clone(),
                    date: result.date,
                    confidence: result.confidence,
                    hash: fingerprint.clone(),
                    done_filename: scanned.clone(),
                },
            )),
            _ => None,
        })
        .collect();

    keyed.sort_by(|(time_a, a), (time_b, b)| {
        a.date
            .cmp(&b.date)
            .then_with(|| time_a.cmp(time_b))
            .then_with(|| a.description.cmp(&b.description))
    });

    StagingTable {
        rows: keyed.into_iter().map(|(_, record)| record).collect(),
    }
}

/// Write the table as CSV with the staging header, even when empty
pub fn write_csv<W: io::Write>(table: &StagingTable, writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(STAGING_COLUMNS)?;
    for row in table.iter() {
        wtr.write_record(row.cells())?;
    }
    wtr.flush()?;
    Ok(())
}

// ============================================================================
// STAGING STORE
// ============================================================================

pub trait StagingStore {
    /// Drop whatever was staged and store `table` in its place
    fn replace(&mut self, table: &StagingTable) -> Result<(), PipelineError>;

    fn load(&self) -> Result<StagingTable, PipelineError>;

    fn clear(&mut self) -> Result<(), PipelineError> {
        self.replace(&StagingTable::default())
    }

    fn record_run(&mut self, summary: &RunSummary) -> Result<(), PipelineError>;

    fn last_run(&self) -> Result<Option<RunSummary>, PipelineError>;
}

#[derive(Error, Debug)]
#[error("invalid staging value: {0}")]
struct InvalidStagingValue(String);

fn invalid(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(InvalidStagingValue(message)),
    )
}

pub struct SqliteStaging {
    conn: Connection,
    csv_path: Option<PathBuf>,
}

impl SqliteStaging {
    pub fn open(database: &Path, csv_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let conn = Connection::open(database)?;
        Self::with_connection(conn, csv_path)
    }

    pub fn open_in_memory() -> Result<Self, PipelineError> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, csv_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS scan_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                processed INTEGER NOT NULL,
                succeeded INTEGER NOT NULL,
                duplicates INTEGER NOT NULL,
                errors INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(SqliteStaging { conn, csv_path })
    }

    fn table_exists(&self) -> Result<bool, PipelineError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'staging'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn export(&self, table: &StagingTable) -> Result<(), PipelineError> {
        let Some(path) = &self.csv_path else {
            return Ok(());
        };
        let export_err = |reason: String| PipelineError::StagingExport {
            location: path.display().to_string(),
            reason,
        };
        let file = std::fs::File::create(path).map_err(|e| export_err(e.to_string()))?;
        write_csv(table, file).map_err(|e| export_err(e.to_string()))
    }
}

impl StagingStore for SqliteStaging {
    fn replace(&mut self, table: &StagingTable) -> Result<(), PipelineError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DROP TABLE IF EXISTS staging;
             CREATE TABLE staging (
                position INTEGER PRIMARY KEY,
                Amount TEXT NOT NULL,
                Tax TEXT,
                TaxPercentage REAL,
                Description TEXT NOT NULL,
                Currency TEXT NOT NULL,
                Date TEXT NOT NULL,
                Confidence INTEGER NOT NULL,
                Hash TEXT NOT NULL,
                DoneFilename TEXT NOT NULL
             );",
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO staging (
                    position, Amount, Tax, TaxPercentage, Description,
                    Currency, Date, Confidence, Hash, DoneFilename
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for (position, row) in table.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    row.amount.to_string(),
                    row.tax.map(|t| t.to_string()),
                    row.tax_percentage,
                    row.description,
                    row.currency,
                    row.staging_date(),
                    row.confidence as i64,
                    row.hash.as_str(),
                    row.done_filename,
                ])?;
            }
        }
        tx.commit()?;

        self.export(table)?;
        info!(rows = table.len(), "staging table rebuilt");
        Ok(())
    }

    fn load(&self) -> Result<StagingTable, PipelineError> {
        if !self.table_exists()? {
            return Ok(StagingTable::default());
        }

        let mut stmt = self.conn.prepare(
            "SELECT Amount, Tax, TaxPercentage, Description, Currency,
                    Date, Confidence, Hash, DoneFilename
             FROM staging
             ORDER BY position",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let amount: String = row.get(0)?;
                let tax: Option<String> = row.get(1)?;
                let date: String = row.get(5)?;
                let confidence: i64 = row.get(6)?;
                let hash: String = row.get(7)?;

                let tax = match tax.filter(|t| !t.is_empty()) {
                    Some(raw) => Some(
                        Amount::parse(&raw).ok_or_else(|| invalid(1, format!("tax {:?}", raw)))?,
                    ),
                    None => None,
                };

                Ok(StagingRecord {
                    amount: Amount::parse(&amount)
                        .ok_or_else(|| invalid(0, format!("amount {:?}", amount)))?,
                    tax,
                    tax_percentage: row.get(2)?,
                    description: row.get(3)?,
                    currency: row.get(4)?,
                    date: NaiveDate::parse_from_str(&date, STAGING_DATE_FORMAT)
                        .map_err(|_| invalid(5, format!("date {:?}", date)))?,
                    confidence: u8::try_from(confidence)
                        .map_err(|_| invalid(6, format!("confidence {}", confidence)))?,
                    hash: FileFingerprint::from_hex(&hash)
                        .ok_or_else(|| invalid(7, format!("hash {:?}", hash)))?,
                    done_filename: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StagingTable { rows })
    }

    fn record_run(&mut self, summary: &RunSummary) -> Result<(), PipelineError> {
        self.conn.execute(
            "INSERT INTO scan_runs (run_id, finished_at, processed, succeeded, duplicates, errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                summary.run_id.to_string(),
                summary.finished_at.to_rfc3339(),
                summary.counters.processed as i64,
                summary.counters.succeeded as i64,
                summary.counters.duplicates as i64,
                summary.counters.errors as i64,
            ],
        )?;
        Ok(())
    }

    fn last_run(&self) -> Result<Option<RunSummary>, PipelineError> {
        let summary = self
            .conn
            .query_row(
                "SELECT run_id, finished_at, processed, succeeded, duplicates, errors
                 FROM scan_runs
                 ORDER BY id DESC
                 LIMIT 1",
                [],
                |row| {
                    let run_id: String = row.get(0)?;
                    let finished_at: String = row.get(1)?;
                    let count = |idx: usize| -> rusqlite::Result<usize> {
                        let value: i64 = row.get(idx)?;
                        Ok(value.max(0) as usize)
                    };

                    Ok(RunSummary {
                        run_id: uuid::Uuid::parse_str(&run_id)
                            .map_err(|_| invalid(0, format!("run id {:?}", run_id)))?,
                        finished_at: DateTime::parse_from_rfc3339(&finished_at)
                            .map_err(|_| invalid(1, format!("timestamp {:?}", finished_at)))?
                            .with_timezone(&Utc),
                        counters: RunCounters {
                            processed: count(2)?,
                            succeeded: count(3)?,
                            duplicates: count(4)?,
                            errors: count(5)?,
                        },
                    })
                },
            )
            .optional()?;

        Ok(summary)
    }
}

/// Staging kept in memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryStaging {
    table: StagingTable,
    runs: Vec<RunSummary>,
    replacements: usize,
}

impl MemoryStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the table was rebuilt or cleared
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl StagingStore for MemoryStaging {
    fn replace(&mut self, table: &StagingTable) -> Result<(), PipelineError> {
        self.table = table.clone();
        self.replacements += 1;
        Ok(())
    }

    fn load(&self) -> Result<StagingTable, PipelineError> {
        Ok(self.table.clone())
    }

    fn record_run(&mut self, summary: &RunSummary) -> Result<(), PipelineError> {
        self.runs.push(summary.clone());
        Ok(())
    }

    fn last_run(&self) -> Result<Option<RunSummary>, PipelineError> {
        Ok(self.runs.last().cloned())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionResult;
    use crate::fingerprint::fingerprint;
    use chrono::TimeZone;

    fn success(
        source: &str,
        ymd: (i32, u32, u32),
        description: &str,
        extracted_secs: i64,
        scanned: &str,
    ) -> DocumentReport {
        DocumentReport {
            source_name: source.to_string(),
            outcome: ProcessingOutcome::Success {
                result: ExtractionResult {
                    amount: Amount::from_minor(1000),
                    currency: "EUR".to_string(),
                    date: NaiveDate::from_ymd_opt(ymd.0, ymd.1, ymd.2).unwrap(),
                    tax: Some(Amount::from_minor(160)),
                    tax_percentage: Some(16.0),
                    description: Some(description.to_string()),
                    confidence: 90,
                    extracted_at: Utc.timestamp_opt(1_700_000_000 + extracted_secs, 0).unwrap(),
                },
                fingerprint: fingerprint(source.as_bytes()),
            },
            scanned_name: Some(scanned.to_string()),
            log_name: None,
        }
    }

    fn sample_reports() -> Vec<DocumentReport> {
        vec![
            success("a.jpg", (2024, 3, 2), "Lunch", 1, "20240302-Lunch.jpg"),
            DocumentReport {
                source_name: "b.jpg".to_string(),
                outcome: ProcessingOutcome::Duplicate {
                    fingerprint: fingerprint(b"a.jpg"),
                },
                scanned_name: None,
                log_name: None,
            },
            DocumentReport {
                source_name: "c.jpg".to_string(),
                outcome: ProcessingOutcome::ValidationFailed {
                    reason: "amount: missing".to_string(),
                },
                scanned_name: None,
                log_name: Some("c.jpg.log".to_string()),
            },
            success("d.jpg", (2024, 1, 15), "Fuel", 2, "20240115-Fuel.jpg"),
        ]
    }

    #[test]
    fn test_rebuild_keeps_only_successes_sorted_by_date() {
        let table = rebuild(&sample_reports());

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].description, "Fuel");
        assert_eq!(table.rows()[1].description, "Lunch");
    }

    #[test]
    fn test_rebuild_same_date_orders_by_time_then_description() {
        let reports = vec![
            success("x.jpg", (2024, 5, 1), "Zebra", 5, "20240501-Zebra.jpg"),
            success("y.jpg", (2024, 5, 1), "Apple", 9, "20240501-Apple.jpg"),
            success("z.jpg", (2024, 5, 1), "Mango", 5, "20240501-Mango.jpg"),
        ];
        let table = rebuild(&reports);
        let order: Vec<_> = table.iter().map(|r| r.description.as_str()).collect();

        // Zebra and Mango share a timestamp, Apple came later
        assert_eq!(order, vec!["Mango", "Zebra", "Apple"]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let reports = sample_reports();
        assert_eq!(rebuild(&reports), rebuild(&reports));
    }

    #[test]
    fn test_sqlite_replace_and_load_preserves_order() {
        let mut staging = SqliteStaging::open_in_memory().unwrap();
        let table = rebuild(&sample_reports());

        staging.replace(&table).unwrap();
        let loaded = staging.load().unwrap();

        assert_eq!(loaded, table);
    }

    #[test]
    fn test_sqlite_replace_drops_previous_rows() {
        let mut staging = SqliteStaging::open_in_memory().unwrap();
        staging.replace(&rebuild(&sample_reports())).unwrap();

        staging.clear().unwrap();
        assert!(staging.load().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_load_without_table_is_empty() {
        let staging = SqliteStaging::open_in_memory().unwrap();
        assert!(staging.load().unwrap().is_empty());
        assert!(staging.last_run().unwrap().is_none());
    }

    #[test]
    fn test_sqlite_run_history() {
        let mut staging = SqliteStaging::open_in_memory().unwrap();
        let summary = RunSummary {
            run_id: uuid::Uuid::new_v4(),
            finished_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            counters: RunCounters {
                processed: 5,
                succeeded: 3,
                duplicates: 1,
                errors: 1,
            },
        };

        staging.record_run(&summary).unwrap();
        assert_eq!(staging.last_run().unwrap(), Some(summary));
    }

    #[test]
    fn test_csv_export_format() {
        let table = rebuild(&sample_reports());
        let mut buffer = Vec::new();
        write_csv(&table, &mut buffer).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Amount,Tax,TaxPercentage,Description,Currency,Date,Confidence,Hash,DoneFilename")
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("10.00,1.60,16,Fuel,EUR,15-01-2024,90,"));
        assert!(first.ends_with(",20240115-Fuel.jpg"));
    }

    #[test]
    fn test_csv_export_written_on_replace() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("staging.csv");
        let mut staging =
            SqliteStaging::open(&dir.path().join("staging.db"), Some(csv_path.clone())).unwrap();

        staging.replace(&StagingTable::default()).unwrap();

        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(text.lines().count(), 1, "empty table still gets a header");
    }
}
