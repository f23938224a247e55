// ✅ Extraction & Validation Engine
//
// Calls the provider once per document and turns whatever comes back into
// exactly one ProcessingOutcome. Required fields: amount > 0, 3-letter currency,
// plausible date. Optional fields never fail a receipt, they are dropped instead.

use crate::amount::Amount;
use crate::error::ErrorCategory;
use crate::fingerprint::FileFingerprint;
use crate::ledger::LEDGER_LAST_YEAR;
use crate::lifecycle::ReceiptDocument;
use crate::provider::{ExtractionProvider, ExtractionRequest, ProviderFields};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Accepted provider date layouts, tried in order
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y"];

pub const DEFAULT_EARLIEST_YEAR: i32 = 1990;
pub const DEFAULT_MAX_FUTURE_DAYS: i64 = 31;

// ============================================================================
// EXTRACTION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub amount: Amount,
    /// Upper-case ISO-style code
    pub currency: String,
    pub date: NaiveDate,
    pub tax: Option<Amount>,
    pub tax_percentage: Option<f64>,
    pub description: Option<String>,
    /// 0-100
    pub confidence: u8,
    /// When the provider answered; orders same-day receipts in staging
    pub extracted_at: DateTime<Utc>,
}

// ============================================================================
// PROCESSING OUTCOME
// ============================================================================

/// Why the provider call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    Api,
    Parsing,
    UnreadableFile,
    Unknown,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Api => "api",
            FailureClass::Parsing => "parsing",
            FailureClass::UnreadableFile => "unreadable-file",
            FailureClass::Unknown => "unknown",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FailureClass::Api | FailureClass::Unknown => ErrorCategory::ExtractionProviderError,
            FailureClass::Parsing => ErrorCategory::ExtractionParseError,
            FailureClass::UnreadableFile => ErrorCategory::FileUnreadable,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    Success {
        result: ExtractionResult,
        fingerprint: FileFingerprint,
    },
    Duplicate {
        fingerprint: FileFingerprint,
    },
    ValidationFailed {
        reason: String,
    },
    ExtractionFailed {
        reason: String,
        class: FailureClass,
    },
}

impl ProcessingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProcessingOutcome::ValidationFailed { .. } | ProcessingOutcome::ExtractionFailed { .. }
        )
    }

    /// Failed outcomes report 0 whatever the provider claimed
    pub fn confidence(&self) -> u8 {
        match self {
            ProcessingOutcome::Success { result, .. } => result.confidence,
            _ => 0,
        }
    }

    /// None for Success
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ProcessingOutcome::Success { .. } => None,
            ProcessingOutcome::Duplicate { .. } => Some(ErrorCategory::DuplicateSkipped),
            ProcessingOutcome::ValidationFailed { .. } => Some(ErrorCategory::ValidationFailed),
            ProcessingOutcome::ExtractionFailed { class, .. } => Some(class.category()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Success { .. } => "success",
            ProcessingOutcome::Duplicate { .. } => "duplicate",
            ProcessingOutcome::ValidationFailed { .. } => "validation-failed",
            ProcessingOutcome::ExtractionFailed { .. } => "extraction-failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ProcessingOutcome::ValidationFailed { reason }
            | ProcessingOutcome::ExtractionFailed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

// ============================================================================
// VALIDATION RULES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRules {
    /// Dates before this are rejected
    pub earliest: NaiveDate,
    /// Dates after this are rejected
    pub latest: NaiveDate,
}

impl ValidationRules {
    pub fn new(today: NaiveDate, earliest_year: i32, max_future_days: i64) -> Self {
        let earliest = NaiveDate::from_ymd_opt(earliest_year, 1, 1).unwrap_or(NaiveDate::MIN);
        // Later dates do not survive the two-digit ledger year
        let last_storable = NaiveDate::from_ymd_opt(LEDGER_LAST_YEAR, 12, 31).unwrap_or(NaiveDate::MAX);
        let latest = today
            .checked_add_signed(ChronoDuration::days(max_future_days.max(0)))
            .unwrap_or(last_storable)
            .min(last_storable);
        ValidationRules { earliest, latest }
    }

    pub fn for_today(today: NaiveDate) -> Self {
        Self::new(today, DEFAULT_EARLIEST_YEAR, DEFAULT_MAX_FUTURE_DAYS)
    }

    pub fn accepts(&self, date: NaiveDate) -> bool {
        date >= self.earliest && date <= self.latest
    }
}

/// One failing field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub message: String,
}

impl FieldIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        FieldIssue {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn parse_receipt_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    // Providers sometimes append a time: keep the date part
    let date_part = value
        .split(|c: char| c == 'T' || c == ' ')
        .next()
        .unwrap_or(value);
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}

fn normalize_currency(value: &str) -> Option<String> {
    let value = value.trim();
    if value.len() == 3 && value.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(value.to_ascii_uppercase())
    } else {
        None
    }
}

/// Validate provider fields. Returns every failing required field at once.
pub fn validate_fields(
    fields: &ProviderFields,
    rules: &ValidationRules,
    extracted_at: DateTime<Utc>,
) -> Result<ExtractionResult, Vec<FieldIssue>> {
    let mut issues = Vec::new();

    let amount = match &fields.amount {
        None | Some(serde_json::Value::Null) => {
            issues.push(FieldIssue::new("amount", "missing"));
            None
        }
        Some(raw) => match Amount::from_json(raw) {
            Some(amount) if amount.is_positive() => Some(amount),
            Some(amount) => {
                issues.push(FieldIssue::new("amount", format!("must be positive, got {}", amount)));
                None
            }
            None => {
                issues.push(FieldIssue::new("amount", format!("not a number: {}", raw)));
                None
            }
        },
    };

    let currency = match fields.currency.as_deref() {
        None => {
            issues.push(FieldIssue::new("currency", "missing"));
            None
        }
        Some(raw) => {
            let normalized = normalize_currency(raw);
            if normalized.is_none() {
                issues.push(FieldIssue::new("currency", format!("not a 3-letter code: {:?}", raw)));
            }
            normalized
        }
    };

    let date = match fields.date.as_deref() {
        None => {
            issues.push(FieldIssue::new("date", "missing"));
            None
        }
        Some(raw) => match parse_receipt_date(raw) {
            Some(date) if rules.accepts(date) => Some(date),
            Some(date) => {
                issues.push(FieldIssue::new(
                    "date",
                    format!("{} outside {}..={}", date, rules.earliest, rules.latest),
                ));
                None
            }
            None => {
                issues.push(FieldIssue::new("date", format!("unparseable: {:?}", raw)));
                None
            }
        },
    };

    let (amount, currency, date) = match (amount, currency, date) {
        (Some(a), Some(c), Some(d)) if issues.is_empty() => (a, c, d),
        _ => return Err(issues),
    };

    Ok(ExtractionResult {
        amount,
        currency,
        date,
        tax: optional_tax(fields),
        tax_percentage: optional_tax_percentage(fields),
        description: fields
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        confidence: clamp_confidence(fields.confidence.as_ref()),
        extracted_at,
    })
}

fn optional_tax(fields: &ProviderFields) -> Option<Amount> {
    let raw = fields.tax.as_ref().filter(|v| !v.is_null())?;
    match Amount::from_json(raw) {
        Some(tax) if !tax.is_negative() => Some(tax),
        _ => {
            warn!(tax = %raw, "dropping invalid tax value");
            None
        }
    }
}

/// Numbers may come as JSON numbers or strings like "19%" or " 88 "
fn json_number(value: &serde_json::Value) -> Option<f64> {
    let number = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim_end().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn optional_tax_percentage(fields: &ProviderFields) -> Option<f64> {
    let raw = fields.tax_percentage.as_ref().filter(|v| !v.is_null())?;
    match json_number(raw) {
        Some(pct) if (0.0..=100.0).contains(&pct) => Some(pct),
        _ => {
            warn!(tax_percentage = %raw, "dropping invalid tax percentage");
            None
        }
    }
}

fn clamp_confidence(raw: Option<&serde_json::Value>) -> u8 {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return 0;
    };
    match json_number(raw) {
        Some(value) => value.round().clamp(0.0, 100.0) as u8,
        None => {
            warn!(confidence = %raw, "unreadable confidence, using 0");
            0
        }
    }
}

// ============================================================================
// EXTRACTION ENGINE
// ============================================================================

pub struct ExtractionEngine<'p> {
    provider: &'p dyn ExtractionProvider,
    timeout: Duration,
    rules: ValidationRules,
}

impl<'p> ExtractionEngine<'p> {
    pub fn new(provider: &'p dyn ExtractionProvider, timeout: Duration, rules: ValidationRules) -> Self {
        ExtractionEngine {
            provider,
            timeout,
            rules,
        }
    }

    /// One provider call, one outcome. Never touches storage.
    pub fn extract(&self, document: &ReceiptDocument, fingerprint: FileFingerprint) -> ProcessingOutcome {
        let format = document.format();
        if !format.is_supported() {
            return ProcessingOutcome::ExtractionFailed {
                reason: format!("unsupported file format for {}", document.name()),
                class: FailureClass::UnreadableFile,
            };
        }

        let request = ExtractionRequest {
            file_name: document.name(),
            mime_type: format.mime_type(),
            bytes: document.bytes(),
        };

        let fields = match self.provider.extract(&request, self.timeout) {
            Ok(fields) => fields,
            Err(err) => {
                return ProcessingOutcome::ExtractionFailed {
                    reason: format!("{} provider: {}", self.provider.name(), err),
                    class: err.kind.failure_class(),
                }
            }
        };

        match validate_fields(&fields, &self.rules, Utc::now()) {
            Ok(result) => {
                debug!(
                    document = %document.name(),
                    amount = %result.amount,
                    currency = %result.currency,
                    confidence = result.confidence,
                    "extraction validated"
                );
                ProcessingOutcome::Success { result, fingerprint }
            }
            Err(issues) => ProcessingOutcome::ValidationFailed {
                reason: issues
                    .iter()
                    .map(|issue| issue.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, ProviderError, ProviderErrorKind};
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn rules() -> ValidationRules {
        ValidationRules::for_today(today())
    }

    fn good_fields() -> ProviderFields {
        ProviderFields {
            amount: Some(json!("23.40")),
            currency: Some("eur".to_string()),
            date: Some("2024-06-01".to_string()),
            tax: Some(json!(3.74)),
            tax_percentage: Some(json!(19.0)),
            description: Some("  Hardware store ".to_string()),
            confidence: Some(json!(87.6)),
        }
    }

    fn jpeg(name: &str) -> ReceiptDocument {
        ReceiptDocument::new(name, b"\xFF\xD8\xFF\xE0body".to_vec())
    }

    #[test]
    fn test_valid_fields() {
        let result = validate_fields(&good_fields(), &rules(), Utc::now()).unwrap();

        assert_eq!(result.amount, Amount::from_minor(2340));
        assert_eq!(result.currency, "EUR");
        assert_eq!(result.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(result.tax, Some(Amount::from_minor(374)));
        assert_eq!(result.description.as_deref(), Some("Hardware store"));
        assert_eq!(result.confidence, 88);
    }

    #[test]
    fn test_missing_required_fields_reported_together() {
        let fields = ProviderFields {
            confidence: Some(json!(99.0)),
            ..Default::default()
        };
        let issues = validate_fields(&fields, &rules(), Utc::now()).unwrap_err();
        let names: Vec<_> = issues.iter().map(|i| i.field).collect();

        assert_eq!(names, vec!["amount", "currency", "date"]);
    }

    #[test]
    fn test_amount_must_be_positive() {
        let mut fields = good_fields();
        fields.amount = Some(json!(0));
        assert!(validate_fields(&fields, &rules(), Utc::now()).is_err());

        fields.amount = Some(json!("-5.00"));
        assert!(validate_fields(&fields, &rules(), Utc::now()).is_err());
    }

    #[test]
    fn test_currency_must_be_three_letters() {
        let mut fields = good_fields();
        fields.currency = Some("EURO".to_string());
        assert!(validate_fields(&fields, &rules(), Utc::now()).is_err());

        fields.currency = Some("€".to_string());
        assert!(validate_fields(&fields, &rules(), Utc::now()).is_err());
    }

    #[test]
    fn test_date_window() {
        let mut fields = good_fields();

        fields.date = Some("1989-12-31".to_string());
        assert!(validate_fields(&fields, &rules(), Utc::now()).is_err());

        fields.date = Some("2024-07-31".to_string()); // today + 31 days
        assert!(validate_fields(&fields, &rules(), Utc::now()).is_ok());

        fields.date = Some("2024-08-01".to_string());
        assert!(validate_fields(&fields, &rules(), Utc::now()).is_err());

        fields.date = Some("31-02-2024".to_string());
        assert!(validate_fields(&fields, &rules(), Utc::now()).is_err());
    }

    #[test]
    fn test_date_window_capped_at_last_ledger_year() {
        let rules = ValidationRules::new(today(), 1990, 365 * 100);
        assert_eq!(rules.latest, NaiveDate::from_ymd_opt(2068, 12, 31).unwrap());
        assert!(rules.accepts(NaiveDate::from_ymd_opt(2068, 12, 31).unwrap()));
        assert!(!rules.accepts(NaiveDate::from_ymd_opt(2069, 1, 1).unwrap()));
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7);
        assert_eq!(parse_receipt_date("2024-03-07"), expected);
        assert_eq!(parse_receipt_date("07-03-2024"), expected);
        assert_eq!(parse_receipt_date("07/03/2024"), expected);
        assert_eq!(parse_receipt_date("07.03.2024"), expected);
        assert_eq!(parse_receipt_date("2024-03-07T10:15:00Z"), expected);
        assert_eq!(parse_receipt_date("March 7th"), None);
    }

    #[test]
    fn test_optional_fields_dropped_not_failed() {
        let mut fields = good_fields();
        fields.tax = Some(json!(-1));
        fields.tax_percentage = Some(json!(250.0));
        fields.description = Some("   ".to_string());
        fields.confidence = Some(json!(400.0));

        let result = validate_fields(&fields, &rules(), Utc::now()).unwrap();
        assert_eq!(result.tax, None);
        assert_eq!(result.tax_percentage, None);
        assert_eq!(result.description, None);
        assert_eq!(result.confidence, 100);
    }

    #[test]
    fn test_string_typed_optional_fields() {
        let mut fields = good_fields();
        fields.tax_percentage = Some(json!("19%"));
        fields.confidence = Some(json!("88"));

        let result = validate_fields(&fields, &rules(), Utc::now()).unwrap();
        assert_eq!(result.tax_percentage, Some(19.0));
        assert_eq!(result.confidence, 88);

        fields.tax_percentage = Some(json!("standard rate"));
        fields.confidence = Some(json!({"score": 88}));

        let result = validate_fields(&fields, &rules(), Utc::now()).unwrap();
        assert_eq!(result.tax_percentage, None);
        assert_eq!(result.confidence, 0);
        assert_eq!(result.amount, Amount::from_minor(2340));
    }

    #[test]
    fn test_engine_success() {
        let provider = MockProvider::new(good_fields());
        let engine = ExtractionEngine::new(&provider, Duration::from_secs(30), rules());
        let doc = jpeg("r.jpg");

        let outcome = engine.extract(&doc, doc.fingerprint());
        assert!(outcome.is_success());
        assert_eq!(outcome.confidence(), 88);
        assert_eq!(provider.last_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_engine_validation_failure_zeroes_confidence() {
        let provider = MockProvider::new(ProviderFields {
            amount: Some(json!("12.00")),
            confidence: Some(json!(97.0)),
            ..Default::default()
        });
        let engine = ExtractionEngine::new(&provider, Duration::from_secs(30), rules());
        let doc = jpeg("r.jpg");

        let outcome = engine.extract(&doc, doc.fingerprint());
        assert_eq!(outcome.category(), Some(ErrorCategory::ValidationFailed));
        assert_eq!(outcome.confidence(), 0);
        assert!(outcome.reason().unwrap().contains("currency: missing"));
    }

    #[test]
    fn test_engine_provider_errors_classified() {
        let provider = MockProvider::failing(ProviderError::new(ProviderErrorKind::Malformed, "not json"));
        let engine = ExtractionEngine::new(&provider, Duration::from_secs(30), rules());
        let doc = jpeg("r.jpg");

        let outcome = engine.extract(&doc, doc.fingerprint());
        assert_eq!(outcome.category(), Some(ErrorCategory::ExtractionParseError));
        assert_eq!(outcome.label(), "extraction-failed");
    }

    #[test]
    fn test_engine_rejects_unsupported_format_without_calling_provider() {
        let provider = MockProvider::new(good_fields());
        let engine = ExtractionEngine::new(&provider, Duration::from_secs(30), rules());
        let doc = ReceiptDocument::new("notes.txt", b"just text".to_vec());

        let outcome = engine.extract(&doc, doc.fingerprint());
        assert_eq!(outcome.category(), Some(ErrorCategory::FileUnreadable));
        assert_eq!(provider.call_count(), 0);
    }
}
