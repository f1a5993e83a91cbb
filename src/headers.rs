//! Header-level parsing helpers shared by the policy and the layer.
//!
//! HTTP dates arrive in several legacy shapes; parsing tries each known
//! format in order and assumes UTC when the format carries no zone. Emission
//! is always RFC 1123. Cache-Control directives are located by
//! case-insensitive substring search, which intentionally also matches a
//! directive embedded in a longer token (`fresh-max-age=3` satisfies a
//! search for `max-age`).

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use http::header::HeaderName;
use http::HeaderMap;

/// Formats accepted by [`try_parse_date`], tried in order: RFC 1123,
/// RFC 850 (two-digit year), ANSI C `asctime`. RFC 5322 variants are
/// handled by the rfc2822 fallback.
const DATE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S GMT",
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Parses an HTTP date in any of the accepted legacy forms.
///
/// Leading and trailing whitespace is ignored. Returns `None` when no format
/// matches; callers treat that as absence of the value.
pub fn try_parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Formats a timestamp as an RFC 1123 HTTP date.
pub fn format_date(time: DateTime<Utc>) -> String {
    time.format(RFC1123_FORMAT).to_string()
}

/// Extracts `directive=seconds` from a set of comma-joined header values.
///
/// The directive is located by case-insensitive substring match within each
/// value; the first value containing it decides the outcome. Once found, a
/// missing `=` or a missing digit run fails the whole extraction.
pub fn try_parse_seconds<'a, I>(values: I, directive: &str) -> Option<Duration>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = directive.to_ascii_lowercase();
    for value in values {
        let Some(index) = value.to_ascii_lowercase().find(&needle) else {
            continue;
        };
        let rest = value[index + directive.len()..].as_bytes();
        let mut i = 0;
        while i < rest.len() && rest[i] == b' ' {
            i += 1;
        }
        if i >= rest.len() || rest[i] != b'=' {
            return None;
        }
        i += 1;
        while i < rest.len() && rest[i] == b' ' {
            i += 1;
        }
        let digits_start = i;
        let mut seconds: u64 = 0;
        while i < rest.len() && rest[i].is_ascii_digit() {
            seconds = seconds
                .saturating_mul(10)
                .saturating_add(u64::from(rest[i] - b'0'));
            i += 1;
        }
        if i == digits_start {
            return None;
        }
        return Some(Duration::from_secs(seconds));
    }
    None
}

/// Case-insensitive substring test across any of the values.
pub fn contains<'a, I>(values: I, token: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = token.to_ascii_lowercase();
    values
        .into_iter()
        .any(|value| value.to_ascii_lowercase().contains(&needle))
}

/// Normalizes a collection for order- and casing-insensitive comparison.
///
/// Multi-element collections are ASCII-uppercased, sorted, and deduped. A
/// single element is returned as-is; callers control comma-splitting.
pub fn normalize_string_values(values: &[String]) -> Vec<String> {
    if values.len() > 1 {
        let mut normalized: Vec<String> = values.iter().map(|v| v.to_ascii_uppercase()).collect();
        normalized.sort_unstable();
        normalized.dedup();
        normalized
    } else {
        values.to_vec()
    }
}

/// Iterates the UTF-8 values of a header, skipping undecodable ones.
pub(crate) fn string_values<'a>(
    headers: &'a HeaderMap,
    name: &HeaderName,
) -> impl Iterator<Item = &'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
}

/// Splits comma-separated header values into trimmed, non-empty tokens.
pub(crate) fn split_comma_separated<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}
