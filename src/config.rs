// ⚙️ Configuration - receipt-ledger.toml
//
// Every section is optional; a missing file means all defaults.
// Relative paths are resolved against `[folders] root`.

use crate::error::PipelineError;
use crate::extraction::{ValidationRules, DEFAULT_EARLIEST_YEAR, DEFAULT_MAX_FUTURE_DAYS};
use crate::importer::ImportOptions;
use crate::ledger::{LedgerLayout, DEFAULT_HEADER_ROWS, LEDGER_FIRST_YEAR, LEDGER_LAST_YEAR};
use crate::pipeline::{ScanOptions, DEFAULT_TIMEOUT_SECS};
use crate::storage::FolderLayout;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "receipt-ledger.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub folders: FolderSettings,
    #[serde(default)]
    pub staging: StagingSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
}

/// Folder roles; each one defaults to `{root}/{role}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSettings {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanned: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingSettings {
    #[serde(default = "default_staging_database")]
    pub database: PathBuf,
    /// Reviewable CSV copy of the staging table
    #[serde(default = "default_staging_csv")]
    pub csv: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Needed for run-scan only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the bearer token
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_earliest_year")]
    pub earliest_year: i32,
    #[serde(default = "default_max_future_days")]
    pub max_future_days: i64,
}

impl Config {
    /// Read `path`, or `receipt-ledger.toml` in the working directory.
    /// An explicit path must exist; the default one may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if explicit {
                return Err(PipelineError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&contents).map_err(|e| match e {
            PipelineError::Config(msg) => PipelineError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, PipelineError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let empty = |p: &Path| p.as_os_str().is_empty();

        if empty(&self.folders.root) {
            return Err(PipelineError::Config("folders.root is empty".into()));
        }
        for (key, path) in [
            ("folders.incoming", &self.folders.incoming),
            ("folders.scanned", &self.folders.scanned),
            ("folders.imported", &self.folders.imported),
            ("folders.failed", &self.folders.failed),
            ("staging.csv", &self.staging.csv),
        ] {
            if path.as_deref().map(empty).unwrap_or(false) {
                return Err(PipelineError::Config(format!("{} is empty", key)));
            }
        }
        if empty(&self.staging.database) {
            return Err(PipelineError::Config("staging.database is empty".into()));
        }
        if empty(&self.ledger.path) {
            return Err(PipelineError::Config("ledger.path is empty".into()));
        }

        let currency = &self.ledger.base_currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(PipelineError::Config(format!(
                "ledger.base_currency must be three upper-case letters, got {:?}",
                currency
            )));
        }

        if self.provider.timeout_secs == 0 {
            return Err(PipelineError::Config("provider.timeout_secs must be positive".into()));
        }
        if let Some(endpoint) = &self.provider.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(PipelineError::Config(format!(
                    "provider.endpoint must be an http(s) URL, got {:?}",
                    endpoint
                )));
            }
        }

        if self.validation.max_future_days < 0 {
            return Err(PipelineError::Config("validation.max_future_days cannot be negative".into()));
        }
        // Ledger dates use two-digit years (1969-2068)
        if !(LEDGER_FIRST_YEAR..=LEDGER_LAST_YEAR).contains(&self.validation.earliest_year) {
            return Err(PipelineError::Config(format!(
                "validation.earliest_year {} is outside {}-{}",
                self.validation.earliest_year, LEDGER_FIRST_YEAR, LEDGER_LAST_YEAR
            )));
        }

        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.folders.root.join(path)
        }
    }

    pub fn layout(&self) -> FolderLayout {
        let defaults = FolderLayout::under(&self.folders.root);
        let pick = |custom: &Option<PathBuf>, fallback: PathBuf| match custom {
            Some(path) => self.resolve(path),
            None => fallback,
        };

        FolderLayout {
            incoming: pick(&self.folders.incoming, defaults.incoming.clone()),
            scanned: pick(&self.folders.scanned, defaults.scanned.clone()),
            imported: pick(&self.folders.imported, defaults.imported.clone()),
            failed: pick(&self.folders.failed, defaults.failed.clone()),
        }
    }

    pub fn staging_database(&self) -> PathBuf {
        self.resolve(&self.staging.database)
    }

    pub fn staging_csv(&self) -> Option<PathBuf> {
        self.staging.csv.as_deref().map(|p| self.resolve(p))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve(&self.ledger.path)
    }

    pub fn ledger_layout(&self) -> LedgerLayout {
        LedgerLayout {
            header_rows: self.ledger.header_rows,
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            base_currency: self.ledger.base_currency.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    pub fn rules(&self, today: NaiveDate) -> ValidationRules {
        ValidationRules::new(
            today,
            self.validation.earliest_year,
            self.validation.max_future_days,
        )
    }

    pub fn scan_options(&self, today: NaiveDate) -> ScanOptions {
        ScanOptions {
            timeout: self.timeout(),
            rules: self.rules(today),
        }
    }

    /// Bearer token from the configured environment variable, if set
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl Default for FolderSettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            incoming: None,
            scanned: None,
            imported: None,
            failed: None,
        }
    }
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            database: default_staging_database(),
            csv: default_staging_csv(),
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            base_currency: default_base_currency(),
            header_rows: default_header_rows(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            earliest_year: default_earliest_year(),
            max_future_days: default_max_future_days(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_staging_database() -> PathBuf {
    PathBuf::from("staging.db")
}

fn default_staging_csv() -> Option<PathBuf> {
    Some(PathBuf::from("staging.csv"))
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("ledger.csv")
}

fn default_base_currency() -> String {
    "EUR".to_string()
}

fn default_header_rows() -> usize {
    DEFAULT_HEADER_ROWS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_api_key_env() -> String {
    "RECEIPT_LEDGER_API_KEY".to_string()
}

fn default_earliest_year() -> i32 {
    DEFAULT_EARLIEST_YEAR
}

fn default_max_future_days() -> i64 {
    DEFAULT_MAX_FUTURE_DAYS
}
