use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Canonical storage form of a calendar date.
pub fn canonical(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DateSignal {
    #[default]
    Absent,
    Text(String),
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

impl DateSignal {
    pub fn is_absent(&self) -> bool {
        matches!(self, DateSignal::Absent)
    }

    pub fn identity_text(&self) -> String {
        match self {
            DateSignal::Absent => String::new(),
            DateSignal::Text(text) => text.trim().to_string(),
            DateSignal::Day(date) => canonical(*date),
            DateSignal::Instant(instant) => canonical(instant.date_naive()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateListing {
    pub source_key: String,
    pub platform: String,
    pub title: String,
    pub organizer: String,
    pub location: String,
    pub link: String,
    pub image_url: Option<String>,
    pub themes: String,
    pub is_offline: bool,
    pub date: DateSignal,
}

impl CandidateListing {
    pub fn dedup_hash(&self) -> String {
        let raw = format!(
            "{}|{}",
            self.title.trim().to_lowercase(),
            self.date.identity_text()
        );
        hex::encode(Sha256::digest(raw.as_bytes()))
    }

    pub fn mode(&self) -> &'static str {
        if self.is_offline { "Offline" } else { "Online" }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub title: String,
    pub organizer: String,
    pub mode: String,
    pub reg_end_date: NaiveDate,
    pub location: String,
    pub link: String,
    pub image_url: Option<String>,
    pub source: String,
    pub themes: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl ListingRecord {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.reg_end_date < today
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub schema_version: u32,
    pub listings: BTreeMap<String, ListingRecord>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            schema_version: 1,
            listings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceRunReport {
    pub source_key: String,
    pub pages_fetched: usize,
    pub records_parsed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub raw_listings: usize,
    pub after_dedup: usize,
    pub region_matches: usize,
    pub dropped_no_date: usize,
    pub dropped_expired: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub purged: usize,
}
