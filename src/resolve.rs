use crate::model::DateSignal;
use crate::search::SearchProvider;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

const SEARCH_RESULT_LIMIT: usize = 3;
const SNIPPET_WINDOW_CHARS: usize = 150;
const WHOLE_TEXT_CEILING_CHARS: usize = 1000;
const RANGE_SNIPPET_CEILING_CHARS: usize = 64;

/// Keywords that tend to precede a registration-end date, in priority order.
const DEADLINE_KEYWORDS: &[&str] = &[
    "registration ends",
    "registration end",
    "registration closes",
    "closes on",
    "closes in",
    "deadline",
    "submission deadline",
    "last date",
    "apply by",
    "applications close",
    "ends on",
];

const COUNTDOWN_WORDS: &[&str] = &[
    "d", "day", "days", "h", "hr", "hrs", "hour", "hours", "m", "min", "mins", "minute",
    "minutes", "s", "sec", "secs", "second", "seconds", "left", "remaining", "to", "go",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%a %b %d %Y",
    "%a, %d %b %Y",
];

struct Patterns {
    countdown: Regex,
    labeled_named: Regex,
    labeled_numeric: Regex,
    bare_deadline: Regex,
    mdy_named: Regex,
    dmy_named: Regex,
    ymd_numeric: Regex,
    dmy_numeric: Regex,
    md_named: Regex,
    dm_named: Regex,
    days_relative: Regex,
    today_word: Regex,
    tomorrow_word: Regex,
    leading_alpha: Regex,
}

impl Patterns {
    fn new() -> Self {
        Self {
            countdown: Regex::new(
                r"(?i)\b(\d+)\s*d(?:ays?)?[^0-9]*(\d+)?\s*h(?:ours?)?[^0-9]*(\d+)?\s*m",
            )
            .expect("countdown regex must compile"),
            labeled_named: Regex::new(
                r"(?i)(?:registration|application|submission)s?\s*(?:ends?|closes?|deadline)\s*(?:on|is|at)?\s*[:\-]?\s*([a-z]{3,9}\s+\d{1,2},?\s*\d{4})",
            )
            .expect("labeled deadline regex must compile"),
            labeled_numeric: Regex::new(
                r"(?i)(?:registration|application|submission)s?\s*(?:ends?|closes?|deadline)\s*(?:on|is|at)?\s*[:\-]?\s*(\d{1,2}[/\-]\d{1,2}[/\-]\d{4})",
            )
            .expect("numeric deadline regex must compile"),
            bare_deadline: Regex::new(
                r"(?i)deadline\s*[:\-]?\s*([a-z]{3,9}\s+\d{1,2},?\s*\d{4})",
            )
            .expect("bare deadline regex must compile"),
            mdy_named: Regex::new(
                r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?\s*,?\s*(\d{4})\b",
            )
            .expect("month-day-year regex must compile"),
            dmy_named: Regex::new(
                r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\.?\s*,?\s*(\d{4})\b",
            )
            .expect("day-month-year regex must compile"),
            ymd_numeric: Regex::new(r"\b(\d{4})[-/](\d{1,2})[-/](\d{1,2})\b")
                .expect("ymd regex must compile"),
            dmy_numeric: Regex::new(r"\b(\d{1,2})[-/](\d{1,2})[-/](\d{4})\b")
                .expect("numeric dmy regex must compile"),
            md_named: Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b")
                .expect("month-day regex must compile"),
            dm_named: Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\b")
                .expect("day-month regex must compile"),
            days_relative: Regex::new(
                r"(?i)\b(?:in\s+(\d{1,3})\s+days?|(\d{1,3})\s+days?\s+(?:left|remaining|to\s+go))\b",
            )
            .expect("relative days regex must compile"),
            today_word: Regex::new(r"(?i)\btoday\b").expect("today regex must compile"),
            tomorrow_word: Regex::new(r"(?i)\btomorrow\b").expect("tomorrow regex must compile"),
            leading_alpha: Regex::new(r"[A-Za-z]+").expect("alpha regex must compile"),
        }
    }
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(Patterns::new)
}

struct Strategy {
    name: &'static str,
    run: fn(&str, DateTime<Utc>) -> Option<NaiveDate>,
}

/// Extraction strategies in fixed priority order; first success wins.
const CASCADE: &[Strategy] = &[
    Strategy { name: "countdown", run: countdown },
    Strategy { name: "labeled_deadline", run: labeled_deadline },
    Strategy { name: "numeric_labeled_deadline", run: numeric_labeled_deadline },
    Strategy { name: "bare_deadline", run: bare_deadline },
    Strategy { name: "month_day_year", run: month_day_year },
    Strategy { name: "date_range", run: date_range },
    Strategy { name: "keyword_window", run: keyword_window },
    Strategy { name: "whole_text", run: whole_text },
];

/// Resolves registration-end dates from noisy listing text.
///
/// Holds no mutable state; safe to share across worker threads. The search
/// capability is injected so tests can substitute a fixture provider.
pub struct Resolver<'a> {
    search: &'a dyn SearchProvider,
    reference: Option<DateTime<Utc>>,
}

impl<'a> Resolver<'a> {
    pub fn new(search: &'a dyn SearchProvider) -> Self {
        Self {
            search,
            reference: None,
        }
    }

    /// Pins "now" to a fixed instant instead of the wall clock.
    pub fn with_reference(search: &'a dyn SearchProvider, reference: DateTime<Utc>) -> Self {
        Self {
            search,
            reference: Some(reference),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.reference.unwrap_or_else(Utc::now)
    }

    pub fn extract_date(&self, text: &str) -> Option<NaiveDate> {
        let normalized = squish(text);
        if normalized.is_empty() {
            return None;
        }
        let now = self.now();
        for strategy in CASCADE {
            if let Some(date) = (strategy.run)(&normalized, now) {
                debug!(strategy = strategy.name, date = %date, "date resolved");
                return Some(date);
            }
        }
        None
    }

    /// Countdown-only extraction for dedicated timer elements.
    pub fn countdown_to_date(&self, text: &str) -> Option<NaiveDate> {
        let normalized = squish(text);
        if normalized.is_empty() {
            return None;
        }
        countdown(&normalized, self.now())
    }

    /// The keyword-window scanner alone, without the structured patterns.
    pub fn scan_for_deadline(&self, text: &str) -> Option<NaiveDate> {
        let normalized = squish(text);
        if normalized.is_empty() {
            return None;
        }
        let now = self.now();
        keyword_window(&normalized, now).or_else(|| whole_text(&normalized, now))
    }

    pub fn resolve_via_title(&self, title: &str) -> Option<NaiveDate> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        let query = format!(
            "{title} hackathon registration deadline {}",
            self.now().year()
        );
        info!(%query, "web search fallback");
        let hits = match self.search.search(&query, SEARCH_RESULT_LIMIT) {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "web search failed");
                return None;
            }
        };
        for hit in hits.iter().take(SEARCH_RESULT_LIMIT) {
            let combined = format!("{} {}", hit.snippet, hit.title);
            if let Some(date) = self.extract_date(&combined) {
                return Some(date);
            }
        }
        None
    }

    /// Final validation gate: any already-collected date value, rechecked.
    pub fn normalize(&self, signal: &DateSignal) -> Option<NaiveDate> {
        match signal {
            DateSignal::Absent => None,
            DateSignal::Day(date) => Some(*date),
            DateSignal::Instant(instant) => Some(instant.date_naive()),
            DateSignal::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let now = self.now();
                last_date_in(trimmed, now).or_else(|| parse_single(trimmed, now))
            }
        }
    }
}

fn squish(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn month_from_name(word: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let lower = word.to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|name| name.starts_with(&lower))
        .map(|index| index as u32 + 1)
}

/// Completes a year-less month/day to its nearest occurrence on or after today.
fn future_preferring(month: u32, day: u32, today: NaiveDate) -> Option<NaiveDate> {
    for year in today.year()..=today.year() + 3 {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if date >= today {
                return Some(date);
            }
        }
    }
    None
}

/// Day-first, with a month-first retry when the day slot cannot be a month.
fn parse_numeric_dmy(first: u32, second: u32, year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, second, first).or_else(|| NaiveDate::from_ymd_opt(year, first, second))
}

fn capture_u32(caps: &regex::Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

fn capture_i32(caps: &regex::Captures<'_>, index: usize) -> Option<i32> {
    caps.get(index)?.as_str().parse().ok()
}

/// Every date mention in the text as (start, end, date), in text order.
fn scan_dates(text: &str, now: DateTime<Utc>) -> Vec<(usize, usize, NaiveDate)> {
    let p = patterns();
    let today = now.date_naive();
    let mut found: Vec<(usize, usize, NaiveDate)> = Vec::new();

    for caps in p.ymd_numeric.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if let (Some(year), Some(month), Some(day)) =
            (capture_i32(&caps, 1), capture_u32(&caps, 2), capture_u32(&caps, 3))
            && let Some(date) = NaiveDate::from_ymd_opt(year, month, day)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }

    for caps in p.dmy_numeric.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if let (Some(first), Some(second), Some(year)) =
            (capture_u32(&caps, 1), capture_u32(&caps, 2), capture_i32(&caps, 3))
            && let Some(date) = parse_numeric_dmy(first, second, year)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }

    for caps in p.mdy_named.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if let Some(month) = caps.get(1).and_then(|m| month_from_name(m.as_str()))
            && let (Some(day), Some(year)) = (capture_u32(&caps, 2), capture_i32(&caps, 3))
            && let Some(date) = NaiveDate::from_ymd_opt(year, month, day)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }

    for caps in p.dmy_named.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if let Some(month) = caps.get(2).and_then(|m| month_from_name(m.as_str()))
            && let (Some(day), Some(year)) = (capture_u32(&caps, 1), capture_i32(&caps, 3))
            && let Some(date) = NaiveDate::from_ymd_opt(year, month, day)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }

    for caps in p.days_relative.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        let days = capture_u32(&caps, 1).or_else(|| capture_u32(&caps, 2));
        if let Some(days) = days
            && let Some(offset) = Duration::try_days(i64::from(days))
            && let Some(end) = now.checked_add_signed(offset)
        {
            found.push((whole.start(), whole.end(), end.date_naive()));
        }
    }

    for m in p.today_word.find_iter(text) {
        found.push((m.start(), m.end(), today));
    }
    for m in p.tomorrow_word.find_iter(text) {
        if let Some(date) = today.succ_opt() {
            found.push((m.start(), m.end(), date));
        }
    }

    // Year-less mentions only count where no explicit date already matched,
    // otherwise "Feb 20, 2024" would also surface as a future "Feb 20".
    let explicit: Vec<(usize, usize)> = found.iter().map(|(s, e, _)| (*s, *e)).collect();
    let overlaps = |start: usize, end: usize| {
        explicit.iter().any(|(s, e)| start < *e && *s < end)
    };

    for caps in p.md_named.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if overlaps(whole.start(), whole.end()) {
            continue;
        }
        if let Some(month) = caps.get(1).and_then(|m| month_from_name(m.as_str()))
            && let Some(day) = capture_u32(&caps, 2)
            && let Some(date) = future_preferring(month, day, today)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }

    for caps in p.dm_named.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if overlaps(whole.start(), whole.end()) {
            continue;
        }
        if let Some(month) = caps.get(2).and_then(|m| month_from_name(m.as_str()))
            && let Some(day) = capture_u32(&caps, 1)
            && let Some(date) = future_preferring(month, day, today)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }

    found.sort_by_key(|(start, end, _)| (*start, *end));
    found
}

fn last_date_in(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    scan_dates(text, now).last().map(|(_, _, date)| *date)
}

fn countdown(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    if let Some(caps) = patterns().countdown.captures(text) {
        let days: i64 = caps.get(1)?.as_str().parse().ok()?;
        let hours: i64 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let minutes: i64 = caps
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        return add_offset(now, days, hours, minutes);
    }
    numeric_triple(text, now)
}

fn add_offset(now: DateTime<Utc>, days: i64, hours: i64, minutes: i64) -> Option<NaiveDate> {
    let total_minutes = days
        .checked_mul(1440)?
        .checked_add(hours.checked_mul(60)?)?
        .checked_add(minutes)?;
    let end = now.checked_add_signed(Duration::try_minutes(total_minutes)?)?;
    Some(end.date_naive())
}

/// Bare "days hours minutes" triple, accepted only for countdown-shaped text:
/// every token must be a number or countdown vocabulary, so page bodies that
/// merely contain three numbers never qualify.
fn numeric_triple(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let mut numbers = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || c == ':' || c == '.') {
        if token.is_empty() {
            continue;
        }
        if let Ok(value) = token.parse::<i64>() {
            numbers.push(value);
            continue;
        }
        if !COUNTDOWN_WORDS.contains(&token.to_ascii_lowercase().as_str()) {
            return None;
        }
    }
    if numbers.len() < 3 {
        return None;
    }
    add_offset(now, numbers[0], numbers[1], numbers[2])
}

fn labeled_deadline(text: &str, _now: DateTime<Utc>) -> Option<NaiveDate> {
    let caps = patterns().labeled_named.captures(text)?;
    parse_named_capture(caps.get(1)?.as_str())
}

fn numeric_labeled_deadline(text: &str, _now: DateTime<Utc>) -> Option<NaiveDate> {
    let caps = patterns().labeled_numeric.captures(text)?;
    let inner = patterns().dmy_numeric.captures(caps.get(1)?.as_str())?;
    parse_numeric_dmy(
        capture_u32(&inner, 1)?,
        capture_u32(&inner, 2)?,
        capture_i32(&inner, 3)?,
    )
}

fn bare_deadline(text: &str, _now: DateTime<Utc>) -> Option<NaiveDate> {
    let caps = patterns().bare_deadline.captures(text)?;
    parse_named_capture(caps.get(1)?.as_str())
}

fn parse_named_capture(text: &str) -> Option<NaiveDate> {
    let caps = patterns().mdy_named.captures(text)?;
    let month = month_from_name(caps.get(1)?.as_str())?;
    NaiveDate::from_ymd_opt(capture_i32(&caps, 3)?, month, capture_u32(&caps, 2)?)
}

/// Generic month-name + day + year (or numeric d/m/y) anywhere; last one wins.
fn month_day_year(text: &str, _now: DateTime<Utc>) -> Option<NaiveDate> {
    let p = patterns();
    let mut found: Vec<(usize, usize, NaiveDate)> = Vec::new();

    for caps in p.mdy_named.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if let Some(month) = caps.get(1).and_then(|m| month_from_name(m.as_str()))
            && let (Some(day), Some(year)) = (capture_u32(&caps, 2), capture_i32(&caps, 3))
            && let Some(date) = NaiveDate::from_ymd_opt(year, month, day)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }
    for caps in p.dmy_named.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if let Some(month) = caps.get(2).and_then(|m| month_from_name(m.as_str()))
            && let (Some(day), Some(year)) = (capture_u32(&caps, 1), capture_i32(&caps, 3))
            && let Some(date) = NaiveDate::from_ymd_opt(year, month, day)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }
    for caps in p.dmy_numeric.captures_iter(text) {
        let whole = caps.get(0).expect("match group 0");
        if let (Some(first), Some(second), Some(year)) =
            (capture_u32(&caps, 1), capture_u32(&caps, 2), capture_i32(&caps, 3))
            && let Some(date) = parse_numeric_dmy(first, second, year)
        {
            found.push((whole.start(), whole.end(), date));
        }
    }

    found.sort_by_key(|(start, end, _)| (*start, *end));
    found.last().map(|(_, _, date)| *date)
}

/// "start - end" ranges; the close date is the one that matters. When the end
/// segment lacks a month name, it borrows the leading one from the start
/// segment ("Apr 11 - 18, 2026" reads as "Apr 18, 2026"). Only attempted on
/// short date-shaped snippets so hyphens in prose cannot misparse.
fn date_range(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.chars().count() > RANGE_SNIPPET_CEILING_CHARS {
        return None;
    }
    let mut parts = trimmed.splitn(2, ['-', '–']);
    let start_part = parts.next()?.trim();
    let end_part = parts.next()?.trim();
    if start_part.is_empty() || end_part.is_empty() {
        return None;
    }

    let has_month_in_end = end_part.chars().any(|c| c.is_ascii_alphabetic());
    let candidate = if has_month_in_end {
        end_part.to_string()
    } else if let Some(month) = patterns().leading_alpha.find(start_part) {
        format!("{} {}", month.as_str(), end_part)
    } else {
        end_part.to_string()
    };

    last_date_in(&candidate, now)
}

fn keyword_window(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    for keyword in DEADLINE_KEYWORDS {
        let Some(start) = find_ignore_ascii_case(text, keyword) else {
            continue;
        };
        let window = char_window(text, start, SNIPPET_WINDOW_CHARS);
        if let Some(date) = last_date_in(window, now) {
            return Some(date);
        }
    }
    None
}

/// Whole-text search is only worth it on short pages; long bodies are full of
/// navigation and footer dates.
fn whole_text(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    if text.chars().count() >= WHOLE_TEXT_CEILING_CHARS {
        return None;
    }
    last_date_in(text, now)
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn char_window(text: &str, byte_start: usize, max_chars: usize) -> &str {
    let tail = &text[byte_start..];
    match tail.char_indices().nth(max_chars) {
        Some((index, _)) => &tail[..index],
        None => tail,
    }
}

/// Strict direct parse of a whole value, for signals that are already a date
/// rather than prose around one.
fn parse_single(text: &str, _now: DateTime<Utc>) -> Option<NaiveDate> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(instant) = NaiveDateTime::parse_from_str(text, format) {
            return Some(instant.date());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    if let Ok(instant) = dateparser::parse(text) {
        return Some(instant.date_naive());
    }
    None
}
