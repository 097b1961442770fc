//! Parsing and formatting of display values.
//!
//! Customer exports carry their numbers as display strings (`"255,000"`) and
//! their last-visit dates as `DD/MM/YYYY` or the literal `"Never"`. Everything
//! in this module is a pure function so the two directions can be tested on
//! their own and used at the edges only.

use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

lazy_static! {
    static ref VISIT_DATE_REGEX: Regex = Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap();
}

/// Sentinel used by exports for customers who have never visited.
pub const NEVER: &str = "Never";

/// Errors raised while turning a display string back into a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("'{0}' is not a number")]
    InvalidNumber(String),

    #[error("'{0}' is not a DD/MM/YYYY date")]
    InvalidDate(String),
}

/// Last visit of a customer.
///
/// `Never` is declared first so the derived ordering places it before every
/// concrete date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LastVisit {
    Never,
    On(NaiveDate),
}

impl LastVisit {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            LastVisit::Never => None,
            LastVisit::On(date) => Some(*date),
        }
    }
}

impl fmt::Display for LastVisit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_visit_date(*self))
    }
}

/// Parse a display amount such as `"255,000"` or `"1,234.50"`
///
/// Thousands separators and surrounding whitespace are ignored. Empty,
/// non-numeric and non-finite values (`"NaN"`, `"inf"`) are rejected.
///
/// # Examples
/// ```
/// use loyalty_dashboard::format::parse_amount;
///
/// assert_eq!(parse_amount("255,000").unwrap(), 255000.0);
/// assert!(parse_amount("abc").is_err());
/// ```
pub fn parse_amount(raw: &str) -> Result<f64, FormatError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(FormatError::InvalidNumber(raw.to_string()));
    }

    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(FormatError::InvalidNumber(raw.to_string())),
    }
}

/// Format an amount with thousands separators
///
/// Whole numbers are printed without decimals, everything else with two.
pub fn format_amount(value: f64) -> String {
    let negative = value < 0.0;
    let abs = value.abs();
    let rendered = if abs.fract() == 0.0 {
        format!("{:.0}", abs)
    } else {
        format!("{:.2}", abs)
    };

    let (whole, fraction) = match rendered.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (rendered.as_str(), None),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3 + 4);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let mut out = String::new();
    if negative && abs > 0.0 {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    out
}

/// Parse a last-visit value
///
/// Accepts `DD/MM/YYYY` with or without zero padding (`"4/02/2025"`) and the
/// sentinel `"Never"` (case-insensitive).
///
/// # Examples
/// ```
/// use loyalty_dashboard::format::{parse_visit_date, LastVisit};
///
/// assert_eq!(parse_visit_date("Never").unwrap(), LastVisit::Never);
/// assert!(parse_visit_date("22/01/2024").unwrap() > LastVisit::Never);
/// ```
pub fn parse_visit_date(raw: &str) -> Result<LastVisit, FormatError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case(NEVER) {
        return Ok(LastVisit::Never);
    }

    let captures = VISIT_DATE_REGEX
        .captures(trimmed)
        .ok_or_else(|| FormatError::InvalidDate(raw.to_string()))?;

    let day = captures[1].parse::<u32>().ok();
    let month = captures[2].parse::<u32>().ok();
    let year = captures[3].parse::<i32>().ok();

    match (year, month, day) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d)
            .map(LastVisit::On)
            .ok_or_else(|| FormatError::InvalidDate(raw.to_string())),
        _ => Err(FormatError::InvalidDate(raw.to_string())),
    }
}

pub fn format_visit_date(visit: LastVisit) -> String {
    match visit {
        LastVisit::Never => NEVER.to_string(),
        LastVisit::On(date) => format!("{:02}/{:02}/{}", date.day(), date.month(), date.year()),
    }
}

/// Compare two strings the way a person reading a list would expect
///
/// Case is ignored first; strings that only differ in case fall back to the
/// plain ordering so the result stays total.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_ignore_thousands_separators() {
        assert_eq!(parse_amount("1,500").unwrap(), 1500.0);
        assert_eq!(parse_amount(" 350,000 ").unwrap(), 350000.0);
        assert_eq!(parse_amount("12.5").unwrap(), 12.5);
        assert_eq!(parse_amount("-2,000").unwrap(), -2000.0);
    }

    #[test]
    fn amounts_reject_garbage() {
        assert!(parse_amount("").is_err());
        assert!(parse_amount("twelve").is_err());
        assert!(parse_amount("NaN").is_err());
        assert!(parse_amount("inf").is_err());
        assert!(parse_amount(",,,").is_err());
    }

    #[test]
    fn amounts_format_with_groups() {
        assert_eq!(format_amount(0.0), "0");
        assert_eq!(format_amount(999.0), "999");
        assert_eq!(format_amount(1000.0), "1,000");
        assert_eq!(format_amount(255000.0), "255,000");
        assert_eq!(format_amount(1234567.0), "1,234,567");
        assert_eq!(format_amount(1234.5), "1,234.50");
        assert_eq!(format_amount(-1500.0), "-1,500");
    }

    #[test]
    fn formatted_amounts_parse_back() {
        for value in [0.0, 12.0, 1500.0, 255000.0, 1234.5, -98765.25] {
            assert_eq!(parse_amount(&format_amount(value)).unwrap(), value);
        }
    }

    #[test]
    fn visit_dates_accept_unpadded_parts() {
        let visit = parse_visit_date("4/02/2025").unwrap();
        assert_eq!(
            visit,
            LastVisit::On(NaiveDate::from_ymd_opt(2025, 2, 4).unwrap())
        );
        assert_eq!(format_visit_date(visit), "04/02/2025");
    }

    #[test]
    fn never_is_earliest() {
        let never = parse_visit_date("Never").unwrap();
        let old = parse_visit_date("01/01/1900").unwrap();
        assert!(never < old);
        assert_eq!(parse_visit_date("never").unwrap(), LastVisit::Never);
        assert_eq!(never.to_string(), "Never");
    }

    #[test]
    fn visit_dates_reject_impossible_days() {
        assert!(parse_visit_date("31/02/2024").is_err());
        assert!(parse_visit_date("2024-01-22").is_err());
        assert!(parse_visit_date("").is_err());
    }

    #[test]
    fn locale_compare_ignores_case_first() {
        assert_eq!(locale_compare("apple", "Banana"), Ordering::Less);
        assert_eq!(locale_compare("Zed", "alpha"), Ordering::Greater);
        assert_eq!(locale_compare("same", "same"), Ordering::Equal);
        assert_ne!(locale_compare("Ada", "ada"), Ordering::Equal);
    }
}
