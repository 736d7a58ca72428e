use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref GATE_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap();
}

/// Key under which gate and range names are indexed; lookups normalize the same way.
pub(crate) fn normalize_key(key: &str) -> String {
    key.to_lowercase()
}

pub(crate) fn contains_ignore_case<S: AsRef<str>>(haystack: &[S], needle: &str) -> bool {
    haystack
        .iter()
        .any(|candidate| eq_ignore_case(candidate.as_ref(), needle))
}

pub(crate) fn eq_ignore_case(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        a.eq_ignore_ascii_case(b)
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}

pub(crate) fn is_valid_gate_name(name: &str) -> bool {
    GATE_NAME_REGEX.is_match(name)
}

/// Splits a comma separated header or query value, dropping blank entries.
pub(crate) fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
