//! Rule-driven decoding of nodetool's human-readable reports.
//!
//! nodetool output is unversioned text whose layout drifts between Cassandra
//! releases, so decoding never fails: every line is tried against an ordered
//! list of rules, the first matching rule updates the target and lines that
//! match nothing are skipped. Values that do not convert leave the field at
//! its default.

use regex::{Captures, Regex};

/// A line pattern and the setter it drives
pub struct FieldRule<T> {
    pattern: Regex,
    apply: fn(&mut T, &Captures<'_>),
}

impl<T> FieldRule<T> {
    /// Build a rule; `pattern` is a compile-time constant
    pub fn new(pattern: &str, apply: fn(&mut T, &Captures<'_>)) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("field patterns are valid regexes"),
            apply,
        }
    }
}

/// Decode `text` line by line with `rules`, first match wins
pub fn parse_report<T: Default>(text: &str, rules: &[FieldRule<T>]) -> T {
    let mut target = T::default();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        for rule in rules {
            if let Some(caps) = rule.pattern.captures(line) {
                (rule.apply)(&mut target, &caps);
                break;
            }
        }
    }

    target
}

/// Text of capture group `i`, or "" when the group did not participate
pub fn group<'a>(caps: &'a Captures<'_>, i: usize) -> &'a str {
    caps.get(i).map(|m| m.as_str().trim()).unwrap_or("")
}

/// Boolean spellings nodetool (and humans) use
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("t") || v == "1" => {
            Some(true)
        }
        v if v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("f") || v == "0" => {
            Some(false)
        }
        _ => None,
    }
}
