//! Four-way score classification
//!
//! Uses the combined score of the reference evaluator. The thresholds are
//! provisional and mirror what the web front end has always shown; the
//! server-side evaluation is expected to replace them.

use crate::protocol::CambiaResponse;
use serde::Serialize;

/// Evaluator whose combined score drives the counters
pub const REFERENCE_EVALUATOR: &str = "OPS";

/// Counter bucket for one result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreClass {
    Bad,
    Warning,
    Perfect,
    Unknown,
}

/// Classify an integer score
///
/// `< 0` bad, `0..100` warning, `100` perfect, anything else unknown.
pub fn classify(score: Option<i64>) -> ScoreClass {
    match score {
        Some(s) if s < 0 => ScoreClass::Bad,
        Some(s) if s < 100 => ScoreClass::Warning,
        Some(100) => ScoreClass::Perfect,
        _ => ScoreClass::Unknown,
    }
}

/// Classify a result by its reference evaluator score
pub fn classify_response(response: &CambiaResponse) -> ScoreClass {
    classify(
        response
            .combined_score(REFERENCE_EVALUATOR)
            .and_then(parse_score),
    )
}

/// Parse the leading integer of a score string
///
/// Leading whitespace and a sign are accepted and parsing stops at the
/// first non-digit, so `"99.5"` reads as 99. Returns `None` when no digit
/// follows. Out-of-range values saturate.
pub fn parse_score(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let digits: &str = {
        let end = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        &digits[..end]
    };
    if digits.is_empty() {
        return None;
    }

    let magnitude = digits.bytes().try_fold(0i64, |acc, b| {
        acc.checked_mul(10)?.checked_add(i64::from(b - b'0'))
    });

    Some(match (magnitude, negative) {
        (Some(m), true) => -m,
        (Some(m), false) => m,
        (None, true) => i64::MIN,
        (None, false) => i64::MAX,
    })
}
