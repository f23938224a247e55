// 🔍 Fingerprint Service - content identity for receipt files
// SHA-256 over the raw bytes. The path never takes part in identity:
// the same receipt renamed or re-scanned into another folder is still a duplicate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// FILE FINGERPRINT
// ============================================================================

/// 256-bit content hash, kept as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileFingerprint(String);

impl FileFingerprint {
    /// Parse a stored hash (staging table, logs). Rejects anything that is not 64 hex chars.
    pub fn from_hex(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(FileFingerprint(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, enough to eyeball in logs
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for FileFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic, side-effect-free content hash
pub fn fingerprint(bytes: &[u8]) -> FileFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    FileFingerprint(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// FINGERPRINT SETS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FingerprintSet {
    seen: HashSet<FileFingerprint>,
}

impl FingerprintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the fingerprint was already present
    pub fn insert(&mut self, fingerprint: FileFingerprint) -> bool {
        self.seen.insert(fingerprint)
    }

    pub fn contains(&self, fingerprint: &FileFingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl FromIterator<FileFingerprint> for FingerprintSet {
    fn from_iter<I: IntoIterator<Item = FileFingerprint>>(iter: I) -> Self {
        FingerprintSet {
            seen: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Where the earlier copy of a duplicate lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateSource {
    /// Already committed to the ledger in a previous run
    Imported,
    /// Seen earlier in the current run
    ThisRun,
}

impl DuplicateSource {
    pub fn describe(&self) -> &'static str {
        match self {
            DuplicateSource::Imported => "already imported",
            DuplicateSource::ThisRun => "seen earlier in this run",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    Duplicate(DuplicateSource),
}

/// Classify a fingerprint against the imported set and the run's session set.
///
/// A `New` fingerprint is recorded in `session` right away, before any
/// extraction happens, so two identical files in one run are never both processed.
pub fn classify(
    fingerprint: &FileFingerprint,
    imported: &FingerprintSet,
    session: &mut FingerprintSet,
) -> Classification {
    if imported.contains(fingerprint) {
        return Classification::Duplicate(DuplicateSource::Imported);
    }

    if !session.insert(fingerprint.clone()) {
        return Classification::Duplicate(DuplicateSource::ThisRun);
    }

    Classification::New
}

// ============================================================================
// TESTS
// ============================================================================
