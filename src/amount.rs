// 💰 Amount - currency-scaled decimal stored as integer minor units (2 places)

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(i64);

impl Amount {
    pub fn from_minor(minor: i64) -> Self {
        Amount(minor)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Parse a decimal string such as "42", "1,234.50", "12,5" or "-3.999".
    ///
    /// A lone comma followed by one or two digits is a decimal comma,
    /// otherwise commas are thousands separators. Extra fraction digits
    /// are rounded half away from zero.
    pub fn parse(input: &str) -> Option<Amount> {
        let trimmed = input.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed).trim_start()),
        };
        if body.is_empty() {
            return None;
        }

        let normalized = normalize_separators(body)?;
        let (whole, fraction) = match normalized.split_once('.') {
            Some((w, f)) => (w, f),
            None => (normalized.as_str(), ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let units: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut digits = fraction.chars().map(|c| c as i64 - '0' as i64);
        let tenths = digits.next().unwrap_or(0);
        let hundredths = digits.next().unwrap_or(0);
        let round_up = digits.next().map(|d| d >= 5).unwrap_or(false);

        let mut minor = units.checked_mul(100)?.checked_add(tenths * 10 + hundredths)?;
        if round_up {
            minor = minor.checked_add(1)?;
        }

        Some(Amount(if negative { -minor } else { minor }))
    }

    /// Convert a JSON float, rounding to the nearest minor unit
    pub fn from_f64(value: f64) -> Option<Amount> {
        if !value.is_finite() {
            return None;
        }
        let minor = (value * 100.0).round();
        if minor.abs() > i64::MAX as f64 {
            return None;
        }
        Some(Amount(minor as i64))
    }

    /// Accept either a JSON number or a decimal string
    pub fn from_json(value: &serde_json::Value) -> Option<Amount> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().and_then(Amount::from_f64),
            serde_json::Value::String(s) => Amount::parse(s),
            _ => None,
        }
    }
}

fn normalize_separators(body: &str) -> Option<String> {
    let commas = body.matches(',').count();
    let has_dot = body.contains('.');

    if commas == 0 {
        return Some(body.to_string());
    }
    if has_dot {
        return Some(body.replace(',', ""));
    }
    if commas == 1 {
        if let Some((_, after)) = body.split_once(',') {
            if !after.is_empty() && after.len() <= 2 {
                return Some(body.replace(',', "."));
            }
        }
    }
    Some(body.replace(',', ""))
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_separators() {
        assert_eq!(Amount::parse("42"), Some(Amount::from_minor(4200)));
        assert_eq!(Amount::parse("42.5"), Some(Amount::from_minor(4250)));
        assert_eq!(Amount::parse("1,234.56"), Some(Amount::from_minor(123456)));
        assert_eq!(Amount::parse("12,50"), Some(Amount::from_minor(1250)));
        assert_eq!(Amount::parse("1,234"), Some(Amount::from_minor(123400)));
        assert_eq!(Amount::parse(".99"), Some(Amount::from_minor(99)));
    }

    #[test]
    fn test_parse_sign_and_rounding() {
        assert_eq!(Amount::parse("-3.999"), Some(Amount::from_minor(-400)));
        assert_eq!(Amount::parse("+0.005"), Some(Amount::from_minor(1)));
        assert_eq!(Amount::parse("0.004"), Some(Amount::from_minor(0)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Amount::parse(""), None);
        assert_eq!(Amount::parse("-"), None);
        assert_eq!(Amount::parse("12.3.4"), None);
        assert_eq!(Amount::parse("EUR 12"), None);
        assert_eq!(Amount::parse("."), None);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Amount::from_json(&serde_json::json!(19.99)), Some(Amount::from_minor(1999)));
        assert_eq!(Amount::from_json(&serde_json::json!("7.10")), Some(Amount::from_minor(710)));
        assert_eq!(Amount::from_json(&serde_json::json!(null)), None);
        assert_eq!(Amount::from_json(&serde_json::json!(true)), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_minor(123456).to_string(), "1234.56");
        assert_eq!(Amount::from_minor(5).to_string(), "0.05");
        assert_eq!(Amount::from_minor(-250).to_string(), "-2.50");
    }
}
