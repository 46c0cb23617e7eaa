//! Best-effort extraction of a calendar date from free text.
//!
//! Recognised, in priority order: `YYYY-MM-DD` / `YYYY/MM/DD`, relative
//! phrases (`today`, `day before yesterday`, `yesterday`, `N days ago` and
//! their Japanese forms), then bare `MM/DD` in the current year.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

static FULL_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[/-](\d{1,2})[/-](\d{1,2})").unwrap());

static SHORT_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[/-](\d{1,2})\b").unwrap());

static DAYS_AGO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3})\s*(?:days?\s+ago|日前)").unwrap()
});

static DATE_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\d{4}[/-]\d{1,2}[/-]\d{1,2}|\d{1,2}[/-]\d{1,2}|today|yesterday|days?|ago|\d+)$")
        .unwrap()
});

/// Extracts a date from `text`, resolving relative phrases against `today`.
pub fn parse_date_hint(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(caps) = FULL_DATE_RE.captures(text) {
        if let Some(date) = ymd(&caps[1], &caps[2], &caps[3]) {
            return Some(date);
        }
    }

    let lower = text.to_lowercase();
    if lower.contains("today") || text.contains("今日") {
        return Some(today);
    }
    // Checked before "yesterday": 一昨日 contains 昨日.
    if lower.contains("day before yesterday") || text.contains("一昨日") || text.contains("おととい") {
        return today.checked_sub_signed(Duration::days(2));
    }
    if lower.contains("yesterday") || text.contains("昨日") {
        return today.checked_sub_signed(Duration::days(1));
    }
    if let Some(caps) = DAYS_AGO_RE.captures(text) {
        let days: i64 = caps[1].parse().ok()?;
        return today.checked_sub_signed(Duration::days(days));
    }

    if let Some(caps) = SHORT_DATE_RE.captures(text) {
        let month: u32 = caps[1].parse().ok()?;
        let day: u32 = caps[2].parse().ok()?;
        return NaiveDate::from_ymd_opt(today.year(), month, day);
    }

    None
}

/// True for tokens that only carry date information ("2025-01-27", "ago", "3").
pub fn is_date_word(word: &str) -> bool {
    DATE_WORD_RE.is_match(word)
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}
