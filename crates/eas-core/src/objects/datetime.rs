//! ActiveSync date/time formats.
//!
//! Calendar times travel in the compact form (`20260101T120000Z`); contact and
//! task dates in the extended form (`2026-01-01T12:00:00.000Z`). Both are UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{CoreError, CoreResult};

const COMPACT: &str = "%Y%m%dT%H%M%SZ";
const EXTENDED: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn format_compact(value: &DateTime<Utc>) -> String {
    value.format(COMPACT).to_string()
}

pub fn format_extended(value: &DateTime<Utc>) -> String {
    value.format(EXTENDED).to_string()
}

/// Whole-day values are sent as midnight UTC in the extended form.
pub fn format_date(value: &NaiveDate) -> String {
    format!("{}T00:00:00.000Z", value.format("%Y-%m-%d"))
}

/// Parses either wire form. `field` names the element for error messages.
pub fn parse(field: &str, value: &str) -> CoreResult<DateTime<Utc>> {
    let trimmed = value.trim();
    let parsed = NaiveDateTime::parse_from_str(trimmed, COMPACT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.fZ"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%SZ"))
        .map_err(|_| CoreError::invalid(field, value))?;
    Ok(parsed.and_utc())
}

pub fn parse_date(field: &str, value: &str) -> CoreResult<NaiveDate> {
    parse(field, value).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_both_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(parse("StartTime", "20260101T120000Z").unwrap(), expected);
        assert_eq!(parse("DueDate", "2026-01-01T12:00:00.000Z").unwrap(), expected);
        assert_eq!(parse("DueDate", "2026-01-01T12:00:00Z").unwrap(), expected);
    }

    #[test]
    fn test_formatting() {
        let value = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_compact(&value), "20260304T050607Z");
        assert_eq!(format_extended(&value), "2026-03-04T05:06:07.000Z");
        let date = NaiveDate::from_ymd_opt(1990, 7, 15).unwrap();
        assert_eq!(format_date(&date), "1990-07-15T00:00:00.000Z");
        assert_eq!(parse_date("Birthday", &format_date(&date)).unwrap(), date);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = parse("StartTime", "tomorrow").unwrap_err();
        assert!(matches!(err, CoreError::InvalidField { ref field, .. } if field == "StartTime"));
    }
}
