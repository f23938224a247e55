// 📁 Document Lifecycle Manager - folders as a state machine
//
//   Discovered → Processing → Completed  (copied into scanned/, staged)
//                           → Errored    (copied into failed/ + .log)
//                           → Skipped    (duplicate, no artifact)
//
// Incoming is read-only for us. Scanned is rebuilt from scratch every run.

use crate::error::{ErrorCategory, PipelineError, StorageError};
use crate::extraction::{ExtractionResult, FailureClass};
use crate::fingerprint::{fingerprint, FileFingerprint, FingerprintSet};
use crate::storage::{DocumentStore, FolderRole};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_SLUG_LEN: usize = 60;
const FALLBACK_SLUG: &str = "receipt";
const LOG_EXTENSION: &str = "log";

// ============================================================================
// DOCUMENT FORMAT (magic bytes, not extensions)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pdf,
    Jpeg,
    Png,
    Tiff,
    Heic,
    Webp,
    Gif,
    Unsupported,
}

impl DocumentFormat {
    pub fn detect(bytes: &[u8]) -> Self {
        match bytes {
            [0x25, 0x50, 0x44, 0x46, ..] => DocumentFormat::Pdf,
            [0xFF, 0xD8, 0xFF, ..] => DocumentFormat::Jpeg,
            [0x89, 0x50, 0x4E, 0x47, ..] => DocumentFormat::Png,
            [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => DocumentFormat::Tiff,
            [b'G', b'I', b'F', b'8', ..] => DocumentFormat::Gif,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => DocumentFormat::Webp,
            _ if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" => DocumentFormat::Heic,
            _ => DocumentFormat::Unsupported,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Jpeg => "image/jpeg",
            DocumentFormat::Png => "image/png",
            DocumentFormat::Tiff => "image/tiff",
            DocumentFormat::Heic => "image/heic",
            DocumentFormat::Webp => "image/webp",
            DocumentFormat::Gif => "image/gif",
            DocumentFormat::Unsupported => "application/octet-stream",
        }
    }

    /// Canonical extension; None for unsupported files
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            DocumentFormat::Pdf => Some("pdf"),
            DocumentFormat::Jpeg => Some("jpg"),
            DocumentFormat::Png => Some("png"),
            DocumentFormat::Tiff => Some("tiff"),
            DocumentFormat::Heic => Some("heic"),
            DocumentFormat::Webp => Some("webp"),
            DocumentFormat::Gif => Some("gif"),
            DocumentFormat::Unsupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        *self != DocumentFormat::Unsupported
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Discovered,
    Processing,
    Completed { scanned_name: String },
    Errored { log_name: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Begin,
    Complete { scanned_name: String },
    Fail { log_name: String },
    Skip,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid lifecycle transition for {document}: {from} cannot handle {event}")]
pub struct TransitionError {
    pub document: String,
    pub from: String,
    pub event: String,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Discovered => "Discovered",
            LifecycleState::Processing => "Processing",
            LifecycleState::Completed { .. } => "Completed",
            LifecycleState::Errored { .. } => "Errored",
            LifecycleState::Skipped => "Skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Completed { .. } | LifecycleState::Errored { .. } | LifecycleState::Skipped
        )
    }

    /// Next state, or None when the event is not allowed from here.
    /// Discovered may fail directly: a file that cannot be read never starts processing.
    pub fn next(&self, event: &LifecycleEvent) -> Option<LifecycleState> {
        match (self, event) {
            (LifecycleState::Discovered, LifecycleEvent::Begin) => Some(LifecycleState::Processing),
            (LifecycleState::Discovered, LifecycleEvent::Fail { log_name })
            | (LifecycleState::Processing, LifecycleEvent::Fail { log_name }) => {
                Some(LifecycleState::Errored {
                    log_name: log_name.clone(),
                })
            }
            (LifecycleState::Processing, LifecycleEvent::Complete { scanned_name }) => {
                Some(LifecycleState::Completed {
                    scanned_name: scanned_name.clone(),
                })
            }
            (LifecycleState::Processing, LifecycleEvent::Skip) => Some(LifecycleState::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Begin => "Begin",
            LifecycleEvent::Complete { .. } => "Complete",
            LifecycleEvent::Fail { .. } => "Fail",
            LifecycleEvent::Skip => "Skip",
        };
        f.write_str(name)
    }
}

// ============================================================================
// RECEIPT DOCUMENT
// ============================================================================

/// One input file during a run. Identity is the incoming file name.
#[derive(Debug, Clone)]
pub struct ReceiptDocument {
    name: String,
    bytes: Vec<u8>,
    format: DocumentFormat,
    state: LifecycleState,
}

impl ReceiptDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let format = DocumentFormat::detect(&bytes);
        ReceiptDocument {
            name: name.into(),
            bytes,
            format,
            state: LifecycleState::Discovered,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn fingerprint(&self) -> FileFingerprint {
        fingerprint(&self.bytes)
    }

    /// Extension used for the scanned copy
    pub fn target_extension(&self) -> String {
        match self.format.extension() {
            Some(ext) => ext.to_string(),
            None => source_extension(&self.name).unwrap_or_else(|| "bin".to_string()),
        }
    }

    fn transition(&mut self, event: LifecycleEvent) -> Result<(), TransitionError> {
        match self.state.next(&event) {
            Some(next) => {
                debug!(document = %self.name, from = %self.state, to = %next, "lifecycle transition");
                self.state = next;
                Ok(())
            }
            None => Err(TransitionError {
                document: self.name.clone(),
                from: self.state.to_string(),
                event: event.to_string(),
            }),
        }
    }
}

// ============================================================================
// NAMING
// ============================================================================

fn source_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Filename-safe description: ASCII alphanumerics, `-` and `_`, whitespace → `-`
pub fn slugify(description: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;

    for c in description.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_whitespace() {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// `{yyyyMMdd}-{description}.{ext}`
pub fn scanned_name(date: NaiveDate, description: Option<&str>, extension: &str) -> String {
    format!(
        "{}-{}.{}",
        date.format("%Y%m%d"),
        slugify(description.unwrap_or("")),
        extension
    )
}

/// `{sequence}-{scanned name}`
pub fn imported_name(sequence: u32, scanned_name: &str) -> String {
    format!("{}-{}", sequence, scanned_name)
}

/// Sequence prefix of an imported file name, if it follows the convention
pub fn parse_imported_sequence(name: &str) -> Option<u32> {
    let (prefix, rest) = name.split_once('-')?;
    if prefix.is_empty() || rest.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok().filter(|seq| *seq > 0)
}

pub fn log_name(original: &str) -> String {
    format!("{}.{}", original, LOG_EXTENSION)
}

fn with_suffix(name: &str, counter: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}-{}.{}", stem, counter, ext),
        None => format!("{}-{}", name, counter),
    }
}

// ============================================================================
// FAILURE RECORD
// ============================================================================

/// What goes into a failed file's sibling `.log`
#[derive(Debug, Clone)]
pub struct FailureRecord<'a> {
    pub category: ErrorCategory,
    pub class: Option<FailureClass>,
    pub reason: &'a str,
}

// ============================================================================
// LIFECYCLE MANAGER
// ============================================================================

pub struct LifecycleManager<'s, S: DocumentStore + ?Sized> {
    store: &'s mut S,
    run_id: Uuid,
    scanned_names: HashSet<String>,
}

impl<'s, S: DocumentStore + ?Sized> LifecycleManager<'s, S> {
    pub fn new(store: &'s mut S, run_id: Uuid) -> Self {
        LifecycleManager {
            store,
            run_id,
            scanned_names: HashSet::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Create all folders and empty scanned/. Any error here is fatal for the run.
    pub fn prepare(&mut self) -> Result<(), PipelineError> {
        for role in FolderRole::ALL {
            self.store.ensure_folder(role)?;
        }
        self.store.clear(FolderRole::Scanned)?;
        self.scanned_names.clear();

        info!(run_id = %self.run_id, "folders ready, scanned folder cleared");
        Ok(())
    }

    /// Candidate input names in discovery order
    pub fn discover(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self.store.list(FolderRole::Incoming)?)
    }

    pub fn load(&self, name: &str) -> Result<ReceiptDocument, StorageError> {
        let bytes = self.store.read(FolderRole::Incoming, name)?;
        Ok(ReceiptDocument::new(name, bytes))
    }

    /// Fingerprints of everything already committed. An unreadable imported
    /// file makes deduplication unsafe, so it aborts the run.
    pub fn imported_fingerprints(&self) -> Result<FingerprintSet, PipelineError> {
        let mut set = FingerprintSet::new();
        for name in self.store.list(FolderRole::Imported)? {
            let bytes = self.store.read(FolderRole::Imported, &name)?;
            set.insert(fingerprint(&bytes));
        }
        Ok(set)
    }

    pub fn begin(&mut self, document: &mut ReceiptDocument) -> Result<(), PipelineError> {
        document.transition(LifecycleEvent::Begin)?;
        Ok(())
    }

    /// Copy into scanned/ under its dated name. Returns the scanned name.
    pub fn complete(
        &mut self,
        document: &mut ReceiptDocument,
        result: &ExtractionResult,
    ) -> Result<String, PipelineError> {
        let base = scanned_name(
            result.date,
            result.description.as_deref(),
            &document.target_extension(),
        );
        let name = self.unique_scanned_name(&base);

        self.store.write(FolderRole::Scanned, &name, document.bytes())?;
        self.scanned_names.insert(name.clone());
        document.transition(LifecycleEvent::Complete {
            scanned_name: name.clone(),
        })?;

        info!(document = %document.name(), scanned = %name, "document completed");
        Ok(name)
    }

    /// Copy into failed/ under the original name and write the sibling log.
    /// The copy is best effort, the log is mandatory.
    pub fn fail(
        &mut self,
        document: &mut ReceiptDocument,
        failure: &FailureRecord<'_>,
    ) -> Result<String, PipelineError> {
        if let Err(err) = self
            .store
            .write(FolderRole::Failed, document.name(), document.bytes())
        {
            warn!(document = %document.name(), error = %err, "could not copy file into failed folder");
        }
        let log = self.write_log(document.name(), failure)?;
        document.transition(LifecycleEvent::Fail {
            log_name: log.clone(),
        })?;

        warn!(
            document = %document.name(),
            category = %failure.category,
            reason = failure.reason,
            "document failed"
        );
        Ok(log)
    }

    /// A file we could not even read: best-effort copy, the log is mandatory
    pub fn fail_unreadable(&mut self, name: &str, reason: &str) -> Result<String, PipelineError> {
        if let Err(err) = self
            .store
            .copy(FolderRole::Incoming, name, FolderRole::Failed, name)
        {
            warn!(document = %name, error = %err, "could not copy unreadable file into failed folder");
        }

        let failure = FailureRecord {
            category: ErrorCategory::FileUnreadable,
            class: Some(FailureClass::UnreadableFile),
            reason,
        };
        let log = self.write_log(name, &failure)?;

        warn!(document = %name, reason, "document unreadable");
        Ok(log)
    }

    pub fn skip(
        &mut self,
        document: &mut ReceiptDocument,
        fingerprint: &FileFingerprint,
        why: &str,
    ) -> Result<(), PipelineError> {
        document.transition(LifecycleEvent::Skip)?;
        info!(
            document = %document.name(),
            hash = fingerprint.short(),
            why,
            "duplicate skipped"
        );
        Ok(())
    }

    fn unique_scanned_name(&self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut counter = 2;
        while self.scanned_names.contains(&candidate) || self.store.exists(FolderRole::Scanned, &candidate) {
            candidate = with_suffix(base, counter);
            counter += 1;
        }
        candidate
    }

    fn write_log(&mut self, name: &str, failure: &FailureRecord<'_>) -> Result<String, PipelineError> {
        let log = log_name(name);
        let class = failure.class.map(|c| c.as_str()).unwrap_or("-");
        let body = format!(
            "run_id: {}\ntimestamp: {}\nfile: {}\ncategory: {}\nclassification: {}\nreason: {}\n",
            self.run_id,
            Utc::now().to_rfc3339(),
            name,
            failure.category,
            class,
            failure.reason
        );
        self.store.write(FolderRole::Failed, &log, body.as_bytes())?;
        Ok(log)
    }
}

// ============================================================================
// TESTS
// ============================================================================
