//! Literal-shape recognition for text scalars.
//!
//! Untyped text (CSV cells, for example) is classified by what it looks
//! like: booleans, integers, decimals with their precision and scale,
//! scientific-notation floats, and the temporal shapes. Typed strings only go
//! through the temporal recognisers since the source already vouched for
//! them being text.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::types::{CanonicalType, DECIMAL_MAX_PRECISION, TimeUnit};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_time(value: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
}

pub fn is_boolean_token(lowered: &str) -> bool {
    matches!(lowered, "true" | "false")
}

/// Digits after the seconds' decimal point, if any.
fn fraction_digits(value: &str) -> usize {
    let Some(time_start) = value.find(['T', ' ']) else {
        return 0;
    };
    let time = &value[time_start..];
    match time.find('.') {
        Some(dot) => time[dot + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .count(),
        None => 0,
    }
}

/// Timestamp precision never drops below seconds-with-micros unless the
/// literal says otherwise; whole-second literals are recorded as micros so
/// that they line up with sub-second values of the same column.
fn timestamp_unit(digits: usize) -> TimeUnit {
    match TimeUnit::for_fraction_digits(digits) {
        TimeUnit::Nanos => TimeUnit::Nanos,
        _ => TimeUnit::Micros,
    }
}

/// Recognises temporal literals: zoned timestamps, naive date-times, dates,
/// and times.
pub fn classify_temporal(value: &str) -> Option<CanonicalType> {
    if DateTime::parse_from_rfc3339(value).is_ok() {
        return Some(CanonicalType::timestamp_utc(timestamp_unit(
            fraction_digits(value),
        )));
    }
    if parse_naive_datetime(value).is_some() {
        return Some(CanonicalType::naive_timestamp(timestamp_unit(
            fraction_digits(value),
        )));
    }
    if parse_naive_date(value).is_some() {
        return Some(CanonicalType::Date);
    }
    if parse_naive_time(value).is_some() {
        return Some(CanonicalType::Time);
    }
    None
}

/// Integer literal without a leading zero (`007` stays text).
fn looks_like_integer(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && !(digits.len() > 1 && digits.starts_with('0'))
}

fn looks_like_decimal(value: &str) -> bool {
    let body = value.strip_prefix(['+', '-']).unwrap_or(value);
    let Some((whole, fraction)) = body.split_once('.') else {
        return false;
    };
    !whole.is_empty()
        && !fraction.is_empty()
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit())
}

fn looks_like_scientific(value: &str) -> bool {
    (value.contains('e') || value.contains('E')) && value.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Precision and scale of a plain decimal literal.
pub fn decimal_shape(value: &str) -> Option<(u32, u32)> {
    if let Ok(decimal) = Decimal::from_str_exact(value) {
        let scale = decimal.scale();
        let digits = decimal.mantissa().unsigned_abs().to_string().len() as u32;
        return Some((digits.max(scale).max(1), scale));
    }
    // Wider than rust_decimal's 28 digits: count them directly.
    let body = value.strip_prefix(['+', '-']).unwrap_or(value);
    let (whole, fraction) = body.split_once('.')?;
    let whole = whole.trim_start_matches('0');
    let scale = fraction.len() as u32;
    Some(((whole.len() as u32 + scale).max(1), scale))
}

/// Classifies untyped text. Falls back to `String`.
pub fn classify_text(value: &str) -> CanonicalType {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return CanonicalType::String;
    }
    let lowered = trimmed.to_ascii_lowercase();
    if is_boolean_token(&lowered) {
        return CanonicalType::Boolean;
    }
    if looks_like_integer(trimmed) {
        return if i64::from_str(trimmed).is_ok() {
            CanonicalType::int64()
        } else {
            decimal_or_string(trimmed.len() as u32, 0)
        };
    }
    if looks_like_decimal(trimmed) {
        if let Some((precision, scale)) = decimal_shape(trimmed) {
            return decimal_or_string(precision, scale);
        }
    }
    if looks_like_scientific(trimmed) {
        return CanonicalType::float64();
    }
    classify_temporal(trimmed).unwrap_or(CanonicalType::String)
}

fn decimal_or_string(precision: u32, scale: u32) -> CanonicalType {
    if precision > u32::from(DECIMAL_MAX_PRECISION) {
        return CanonicalType::String;
    }
    CanonicalType::decimal(precision as u8, scale as u8).unwrap_or(CanonicalType::String)
}

/// Shape of an already-typed decimal value.
pub fn classify_decimal(value: &Decimal) -> CanonicalType {
    let scale = value.scale();
    let digits = value.mantissa().unsigned_abs().to_string().len() as u32;
    decimal_or_string(digits.max(scale).max(1), scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_numeric_literals() {
        assert_eq!(classify_text("42"), CanonicalType::int64());
        assert_eq!(classify_text("-7"), CanonicalType::int64());
        assert_eq!(
            classify_text("12.50"),
            CanonicalType::Decimal {
                precision: 4,
                scale: 2
            }
        );
        assert_eq!(classify_text("1.5e3"), CanonicalType::float64());
        assert_eq!(
            classify_text("123456789012345678901234"),
            CanonicalType::Decimal {
                precision: 24,
                scale: 0
            }
        );
    }

    #[test]
    fn leading_zero_integers_stay_text() {
        assert_eq!(classify_text("007"), CanonicalType::String);
        assert_eq!(classify_text("0"), CanonicalType::int64());
    }

    #[test]
    fn classifies_temporal_literals() {
        assert_eq!(
            classify_text("2024-01-01T08:30:00Z"),
            CanonicalType::timestamp_utc(TimeUnit::Micros)
        );
        assert_eq!(
            classify_text("2024-01-01T08:30:00.123456789+02:00"),
            CanonicalType::timestamp_utc(TimeUnit::Nanos)
        );
        assert_eq!(
            classify_text("2024-01-01 08:30:00"),
            CanonicalType::naive_timestamp(TimeUnit::Micros)
        );
        assert_eq!(classify_text("2024-01-01"), CanonicalType::Date);
        assert_eq!(classify_text("08:30:00"), CanonicalType::Time);
        assert_eq!(classify_text("shipped"), CanonicalType::String);
    }

    #[test]
    fn booleans_need_explicit_tokens() {
        assert_eq!(classify_text("TRUE"), CanonicalType::Boolean);
        assert_eq!(classify_text("1"), CanonicalType::int64());
    }

    #[test]
    fn wide_decimals_are_measured_without_rust_decimal() {
        let wide = "1234567890123456789012345678901234.5";
        assert_eq!(decimal_shape(wide), Some((35, 1)));
    }
}
