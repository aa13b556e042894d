use anyhow::{Result, bail};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use hackradar::model::{DateSignal, canonical};
use hackradar::resolve::Resolver;
use hackradar::search::{SearchHit, SearchProvider};

struct StubSearch {
    hits: Vec<SearchHit>,
}

impl SearchProvider for StubSearch {
    fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

struct FailingSearch;

impl SearchProvider for FailingSearch {
    fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
        bail!("rate limited")
    }
}

static NO_HITS: StubSearch = StubSearch { hits: Vec::new() };

fn reference() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 10, 12, 0, 0).unwrap()
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

#[test]
fn countdown_colon_format_adds_offset_to_now() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    // 2025-11-10 12:00 + 2d 10h 30m lands on 2025-11-12 22:30.
    assert_eq!(resolver.extract_date("2d:10h:30m"), Some(date(2025, 11, 12)));
}

#[test]
fn countdown_worded_format_tolerates_uppercase() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(
        resolver.extract_date("00 DAYS 12 HOURS 30 MINUTES"),
        Some(date(2025, 11, 11))
    );
}

#[test]
fn countdown_missing_minutes_defaults_to_zero() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(resolver.extract_date("3d:h:m"), Some(date(2025, 11, 13)));
}

#[test]
fn countdown_numeric_triple_needs_countdown_shaped_text() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(
        resolver.countdown_to_date("00 : 12 : 30"),
        Some(date(2025, 11, 11))
    );
    assert_eq!(
        resolver.countdown_to_date("00\nDAYS\n12\nHOURS\n30\nMINUTES"),
        Some(date(2025, 11, 11))
    );
    // Three numbers inside prose are not a countdown.
    assert_eq!(
        resolver.countdown_to_date("Join 500 teams for 48 hours with 30 mentors"),
        None
    );
}

#[test]
fn countdown_against_wall_clock_stays_within_tolerance() {
    let resolver = Resolver::new(&NO_HITS);
    let before = (Utc::now() + Duration::days(3)).date_naive();
    let got = resolver.extract_date("3d:0h:0m").expect("countdown must resolve");
    let after = (Utc::now() + Duration::days(3)).date_naive();
    assert!(got == before || got == after);
}

#[test]
fn range_borrows_month_from_start_segment() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(
        resolver.extract_date("Apr 11 - 18, 2026"),
        Some(date(2026, 4, 18))
    );
}

#[test]
fn range_across_years_selects_the_close_date() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(
        resolver.extract_date("Dec 01, 2025 - Jan 07, 2026"),
        Some(date(2026, 1, 7))
    );
}

#[test]
fn labeled_deadline_beats_generic_mentions() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(
        resolver.extract_date(
            "Registration closes on Apr 18, 2026. Winners announced Dec 31, 2027."
        ),
        Some(date(2026, 4, 18))
    );
}

#[test]
fn snippet_scanner_keeps_the_last_date_in_the_window() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    let text = "Early deadline: Jan 5, 2026. Final deadline: Feb 20, 2026.";
    assert_eq!(resolver.scan_for_deadline(text), Some(date(2026, 2, 20)));
    assert_eq!(
        resolver.normalize(&DateSignal::Text(text.to_string())),
        Some(date(2026, 2, 20))
    );
}

#[test]
fn yearless_dates_prefer_the_next_future_occurrence() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    // March has already passed relative to November 2025.
    assert_eq!(
        resolver.extract_date("Apply by March 3"),
        Some(date(2026, 3, 3))
    );
    // December has not.
    assert_eq!(
        resolver.extract_date("Apply by December 1"),
        Some(date(2025, 12, 1))
    );
}

#[test]
fn explicit_years_are_never_shifted_forward() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(
        resolver.normalize(&DateSignal::Text("Feb 20, 2024".to_string())),
        Some(date(2024, 2, 20))
    );
}

#[test]
fn whole_text_search_is_gated_by_length() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    let filler = "lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(20);
    let long_text = format!("{filler} March 3");
    assert!(long_text.chars().count() >= 1000);
    assert_eq!(resolver.extract_date(&long_text), None);

    let short_text = "lorem ipsum dolor sit amet March 3";
    assert_eq!(
        resolver.extract_date(short_text),
        Some(date(2026, 3, 3))
    );
}

#[test]
fn empty_and_whitespace_inputs_yield_no_date() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(resolver.extract_date(""), None);
    assert_eq!(resolver.extract_date("   \n\t "), None);
    assert_eq!(resolver.countdown_to_date(""), None);
    assert_eq!(resolver.scan_for_deadline(""), None);
    assert_eq!(resolver.normalize(&DateSignal::Absent), None);
    assert_eq!(resolver.normalize(&DateSignal::Text("   ".to_string())), None);
    assert_eq!(resolver.resolve_via_title(""), None);
    assert_eq!(resolver.resolve_via_title("   "), None);
}

#[test]
fn normalize_is_idempotent() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    let first = resolver
        .normalize(&DateSignal::Text("Apr 18, 2026".to_string()))
        .expect("prose date must normalize");
    let second = resolver
        .normalize(&DateSignal::Text(canonical(first)))
        .expect("canonical date must normalize");
    assert_eq!(first, second);
}

#[test]
fn normalize_passes_structured_values_through() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    let day = date(2026, 4, 18);
    assert_eq!(resolver.normalize(&DateSignal::Day(day)), Some(day));

    let instant = Utc.with_ymd_and_hms(2026, 4, 18, 23, 59, 59).unwrap();
    assert_eq!(resolver.normalize(&DateSignal::Instant(instant)), Some(day));
}

#[test]
fn normalize_handles_machine_formats() {
    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(
        resolver.normalize(&DateSignal::Text("2026-04-18T00:30:00".to_string())),
        Some(date(2026, 4, 18))
    );
    assert_eq!(
        resolver.normalize(&DateSignal::Text("18/04/2026".to_string())),
        Some(date(2026, 4, 18))
    );
    // Day-first reading is impossible here, so the month-first retry applies.
    assert_eq!(
        resolver.normalize(&DateSignal::Text("04/18/2026".to_string())),
        Some(date(2026, 4, 18))
    );
    assert_eq!(
        resolver.normalize(&DateSignal::Text("Tue Dec 02 2025".to_string())),
        Some(date(2025, 12, 2))
    );
}

#[test]
fn search_fallback_extracts_from_result_snippets() {
    let stub = StubSearch {
        hits: vec![
            SearchHit {
                title: "Foo Hackathon homepage".to_string(),
                snippet: "The biggest student hackathon, now global.".to_string(),
            },
            SearchHit {
                title: "Foo Hackathon 2026".to_string(),
                snippet: "Registration ends on Apr 18, 2026. Register now.".to_string(),
            },
        ],
    };
    let resolver = Resolver::with_reference(&stub, reference());
    assert_eq!(
        resolver.resolve_via_title("Foo Hackathon"),
        Some(date(2026, 4, 18))
    );
}

#[test]
fn search_fallback_degrades_on_provider_failure() {
    let failing = FailingSearch;
    let resolver = Resolver::with_reference(&failing, reference());
    assert_eq!(resolver.resolve_via_title("Foo Hackathon"), None);

    let resolver = Resolver::with_reference(&NO_HITS, reference());
    assert_eq!(resolver.resolve_via_title("Foo Hackathon"), None);
}

#[test]
fn search_fallback_ignores_dateless_results() {
    let stub = StubSearch {
        hits: vec![SearchHit {
            title: "Foo Hackathon".to_string(),
            snippet: "A community event about building things.".to_string(),
        }],
    };
    let resolver = Resolver::with_reference(&stub, reference());
    assert_eq!(resolver.resolve_via_title("Foo Hackathon"), None);
}
