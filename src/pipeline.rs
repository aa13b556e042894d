use crate::config::{LoadedSource, load_source_file, load_sources_from_dir};
use crate::fetch::fetch_source_documents;
use crate::model::{BatchReport, CandidateListing, ListingRecord, SourceRunReport, State};
use crate::parser::parse_source_listings;
use crate::region::RegionMatcher;
use crate::resolve::Resolver;
use crate::search::{DuckDuckGo, SearchDisabled, SearchProvider};
use crate::store::{load_state, purge_expired, save_state};
use anyhow::{Result, bail};
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{error, info};

const SEARCH_CLIENT_TIMEOUT_SECS: u64 = 20;
const SEARCH_CLIENT_USER_AGENT: &str = "hackradar/0.1 (+https://example.invalid)";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub config_dir: PathBuf,
    pub state_path: PathBuf,
    pub source: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct PurgeOptions {
    pub state_path: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub config_dir: Option<PathBuf>,
    pub source_file: Option<PathBuf>,
}

pub fn sync_sources(options: &SyncOptions) -> Result<(Vec<SourceRunReport>, BatchReport)> {
    let mut sources = load_sources_from_dir(&options.config_dir)?;
    if let Some(filter) = &options.source {
        sources.retain(|s| s.config.source.key == *filter);
    }
    if sources.is_empty() {
        bail!("no matching source configurations found");
    }

    let wants_search = sources
        .iter()
        .any(|s| s.config.source.enabled && s.config.search.enabled);
    let provider: Box<dyn SearchProvider> = if wants_search {
        Box::new(DuckDuckGo::new(
            SEARCH_CLIENT_TIMEOUT_SECS,
            SEARCH_CLIENT_USER_AGENT,
        )?)
    } else {
        Box::new(SearchDisabled)
    };
    let resolver = Resolver::new(provider.as_ref());

    let mut reports = Vec::new();
    let mut candidates: Vec<CandidateListing> = Vec::new();

    for source in &sources {
        if !source.config.source.enabled {
            info!(source = %source.config.source.key, "source disabled; skipping");
            continue;
        }

        info!(source = %source.config.source.key, "scrape start");

        // One bad source must never abort the batch.
        let docs = match fetch_source_documents(source) {
            Ok(docs) => docs,
            Err(err) => {
                error!(source = %source.config.source.key, error = %err, "fetch failed");
                continue;
            }
        };
        let parsed = match parse_source_listings(source, &docs, &resolver) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(source = %source.config.source.key, error = %err, "parse failed");
                continue;
            }
        };

        info!(
            source = %source.config.source.key,
            pages = docs.len(),
            listings = parsed.len(),
            "scrape complete"
        );

        reports.push(SourceRunReport {
            source_key: source.config.source.key.clone(),
            pages_fetched: docs.len(),
            records_parsed: parsed.len(),
        });
        candidates.extend(parsed);
    }

    let mut batch = BatchReport {
        raw_listings: candidates.len(),
        ..BatchReport::default()
    };

    let unique = dedupe_listings(candidates);
    batch.after_dedup = unique.len();
    info!(
        raw = batch.raw_listings,
        unique = batch.after_dedup,
        removed = batch.raw_listings - batch.after_dedup,
        "cross-source dedup complete"
    );

    batch.region_matches = count_region_matches(&sources, &unique)?;
    info!(matches = batch.region_matches, "relevance keyword matches");

    let mut state = load_state(&options.state_path)?;
    let today = Utc::now().date_naive();
    merge_listings(&mut state, &resolver, unique, today, &mut batch);
    batch.purged = purge_expired(&mut state, today);

    info!(
        kept = batch.inserted + batch.updated + batch.unchanged,
        no_date = batch.dropped_no_date,
        expired = batch.dropped_expired,
        inserted = batch.inserted,
        updated = batch.updated,
        unchanged = batch.unchanged,
        purged = batch.purged,
        "sync merge complete"
    );

    if !options.dry_run {
        save_state(&options.state_path, &state)?;
        info!(state = %options.state_path.display(), "state written");
    } else {
        info!("dry run enabled; state not persisted");
    }

    Ok((reports, batch))
}

/// First occurrence wins, matching the original ingest order.
fn dedupe_listings(listings: Vec<CandidateListing>) -> Vec<CandidateListing> {
    let mut seen = HashSet::new();
    listings
        .into_iter()
        .filter(|listing| seen.insert(listing.dedup_hash()))
        .collect()
}

fn count_region_matches(
    sources: &[LoadedSource],
    listings: &[CandidateListing],
) -> Result<usize> {
    let mut matchers: HashMap<&str, RegionMatcher> = HashMap::new();
    for source in sources {
        matchers.insert(
            source.config.source.key.as_str(),
            RegionMatcher::new(&source.config.relevance.keywords)?,
        );
    }

    Ok(listings
        .iter()
        .filter(|listing| {
            matchers
                .get(listing.source_key.as_str())
                .is_some_and(|matcher| matcher.matches(&listing.location))
        })
        .count())
}

/// Second validation gate before persistence: every date signal is re-run
/// through the normalizer; records without a valid future date are dropped.
fn merge_listings(
    state: &mut State,
    resolver: &Resolver<'_>,
    listings: Vec<CandidateListing>,
    today: NaiveDate,
    batch: &mut BatchReport,
) {
    let now = Utc::now();

    for listing in listings {
        let Some(reg_end_date) = resolver.normalize(&listing.date) else {
            batch.dropped_no_date += 1;
            continue;
        };
        if reg_end_date < today {
            batch.dropped_expired += 1;
            continue;
        }

        let key = listing.link.clone();
        match state.listings.get_mut(&key) {
            Some(existing) => {
                let incoming = listing_to_record(&listing, reg_end_date, existing.first_seen_at, now);
                if records_differ(existing, &incoming) {
                    *existing = incoming;
                    batch.updated += 1;
                } else {
                    existing.last_seen_at = now;
                    batch.unchanged += 1;
                }
            }
            None => {
                state
                    .listings
                    .insert(key, listing_to_record(&listing, reg_end_date, now, now));
                batch.inserted += 1;
            }
        }
    }
}

fn listing_to_record(
    listing: &CandidateListing,
    reg_end_date: NaiveDate,
    first_seen_at: chrono::DateTime<Utc>,
    now: chrono::DateTime<Utc>,
) -> ListingRecord {
    ListingRecord {
        title: listing.title.clone(),
        organizer: listing.organizer.clone(),
        mode: listing.mode().to_string(),
        reg_end_date,
        location: listing.location.clone(),
        link: listing.link.clone(),
        image_url: listing.image_url.clone(),
        source: listing.platform.clone(),
        themes: listing.themes.clone(),
        first_seen_at,
        last_seen_at: now,
    }
}

fn records_differ(existing: &ListingRecord, incoming: &ListingRecord) -> bool {
    existing.title != incoming.title
        || existing.organizer != incoming.organizer
        || existing.mode != incoming.mode
        || existing.reg_end_date != incoming.reg_end_date
        || existing.location != incoming.location
        || existing.image_url != incoming.image_url
        || existing.source != incoming.source
        || existing.themes != incoming.themes
}

pub fn purge_state(options: &PurgeOptions) -> Result<usize> {
    let mut state = load_state(&options.state_path)?;
    let today = Utc::now().date_naive();
    let removed = purge_expired(&mut state, today);

    if !options.dry_run {
        save_state(&options.state_path, &state)?;
    }

    info!(
        removed,
        remaining = state.listings.len(),
        dry_run = options.dry_run,
        "purge complete"
    );
    Ok(removed)
}

pub fn validate_configs(options: &ValidateOptions) -> Result<Vec<String>> {
    let mut messages = Vec::new();

    if let Some(file) = &options.source_file {
        let source = load_source_file(file)?;
        messages.push(format!(
            "OK: {} ({})",
            source.config.source.key,
            file.display()
        ));
        return Ok(messages);
    }

    if let Some(dir) = &options.config_dir {
        let sources = load_sources_from_dir(dir)?;
        for source in sources {
            messages.push(format!(
                "OK: {} ({})",
                source.config.source.key,
                source.path.display()
            ));
        }
        return Ok(messages);
    }

    bail!("either --config-dir or --source-file must be provided");
}

pub fn load_state_for_read(path: &Path) -> Result<State> {
    load_state(path)
}
