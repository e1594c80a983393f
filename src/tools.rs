//! Pure predicates shared by the compiler and callers
//!
//! Deep structural equality, array uniqueness, and range membership over
//! the `"-2,4-6,8,10-"` syntax. None of these know anything about schemas.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

/// Deep structural equality of two values.
///
/// Numbers compare numerically (`1 == 1.0`), arrays element-wise in order,
/// objects by key set. Used by [`unique`] and available to custom
/// validators.
pub fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(p), Some(q)) => p == q,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(v, w)| equals(v, w))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map_or(false, |w| equals(v, w)))
        }
        _ => a == b,
    }
}

/// Whether no two elements of the slice are structurally equal.
pub fn unique(values: &[Value]) -> bool {
    for (idx, first) in values.iter().enumerate() {
        for second in &values[idx + 1..] {
            if equals(first, second) {
                return false;
            }
        }
    }
    true
}

/// A malformed range specification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("Ranges must be a number or a string expressed as: ex. '-2,4-6,8,10-'.")]
    NotARange,

    #[error("Malformed range '{0}'.")]
    MalformedRange(String),

    #[error("Malformed boundary '{0}'.")]
    MalformedBoundary(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    low: Option<u64>,
    high: Option<u64>,
}

impl Span {
    fn contains(&self, value: f64) -> bool {
        self.low.map_or(true, |low| value >= low as f64)
            && self.high.map_or(true, |high| value <= high as f64)
    }
}

/// A parsed range specification.
///
/// The syntax is a comma-separated list of spans: `"8"` (exact), `"4-6"`
/// (inclusive), `"-2"` (open low end), `"10-"` (open high end). Parsing
/// happens once, at schema formalization time; membership tests are cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranges {
    source: String,
    spans: Vec<Span>,
}

impl Ranges {
    /// Parse a range specification string.
    pub fn parse(spec: &str) -> Result<Self, RangeError> {
        if spec.is_empty() {
            return Err(RangeError::NotARange);
        }
        let mut spans = Vec::new();
        for part in spec.split(',') {
            let boundaries: Vec<&str> = part.split('-').collect();
            let (low, high) = match boundaries.as_slice() {
                [single] => (*single, *single),
                [low, high] => (*low, *high),
                _ => return Err(RangeError::MalformedRange(part.to_string())),
            };
            spans.push(Span {
                low: parse_boundary(low)?,
                high: parse_boundary(high)?,
            });
        }
        Ok(Self {
            source: spec.to_string(),
            spans,
        })
    }

    /// Build a single-value range from a number, as `len: 5` would.
    pub fn from_number(n: f64) -> Result<Self, RangeError> {
        if !n.is_finite() {
            return Err(RangeError::NotARange);
        }
        Self::parse(&format_number(n))
    }

    /// The original specification text, for messages and serialization.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the value falls inside any span.
    pub fn contains(&self, value: f64) -> bool {
        self.spans.iter().any(|span| span.contains(value))
    }
}

impl std::str::FromStr for Ranges {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Ranges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_boundary(text: &str) -> Result<Option<u64>, RangeError> {
    if text.is_empty() {
        return Ok(None);
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::MalformedBoundary(text.to_string()));
    }
    text.parse::<u64>()
        .map(Some)
        .map_err(|_| RangeError::MalformedBoundary(text.to_string()))
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// One-shot range membership test.
pub fn test_range(spec: &str, value: f64) -> Result<bool, RangeError> {
    Ok(Ranges::parse(spec)?.contains(value))
}

/// Parse an ISO-8601 date string: RFC 3339, naive datetime, or bare date.
pub fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    if let Ok(nd) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&nd.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Render a date the way sanitized output carries it.
pub fn format_iso_date(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
