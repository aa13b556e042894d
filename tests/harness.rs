use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use hackradar::harness::{HarnessOptions, run_harness};
use hackradar::model::{ListingRecord, State};
use hackradar::pipeline::{PurgeOptions, SyncOptions, load_state_for_read, purge_state, sync_sources};
use hackradar::store::{purge_expired, save_state};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

#[test]
fn sync_keeps_dated_listings_and_drops_the_rest() -> Result<()> {
    let env = setup_fixture_env()?;

    let (reports, batch) = sync_sources(&SyncOptions {
        config_dir: env.config_dir.clone(),
        state_path: env.state_path.clone(),
        source: None,
        dry_run: false,
    })?;

    assert_eq!(reports.len(), 3);
    assert_eq!(batch.raw_listings, 6);
    assert_eq!(batch.after_dedup, 6);
    assert_eq!(batch.region_matches, 2);
    assert_eq!(batch.inserted, 4);
    assert_eq!(batch.dropped_no_date, 1);
    assert_eq!(batch.dropped_expired, 1);
    assert_eq!(batch.purged, 0);

    let state = load_state_for_read(&env.state_path)?;
    assert_eq!(state.listings.len(), 4);

    let ai = state
        .listings
        .get("https://devlist.example/ai")
        .expect("range-dated listing must be stored");
    assert_eq!(ai.reg_end_date, date(2030, 4, 18));
    assert_eq!(ai.mode, "Online");
    assert_eq!(ai.image_url.as_deref(), Some("https://cdn.devlist.example/ai.png"));
    assert_eq!(ai.location, "Guindy, Chennai");

    let prose = state
        .listings
        .get("https://devlist.example/prose")
        .expect("prose-dated listing must be stored");
    assert_eq!(prose.reg_end_date, date(2031, 3, 30));

    let api = state
        .listings
        .get("https://api.example/hackfest")
        .expect("api listing must be stored");
    assert_eq!(api.reg_end_date, date(2030, 6, 1));
    assert_eq!(api.source, "Unstop");

    let slider = state
        .listings
        .get("https://slider.example/genai")
        .expect("slider listing must be stored");
    assert_eq!(slider.reg_end_date, date(2030, 3, 4));
    assert_eq!(slider.mode, "Online");
    assert!(!state.listings.contains_key("https://slider.example/old"));
    assert!(!state.listings.contains_key("https://devlist.example/legacy"));
    assert!(!state.listings.contains_key("https://devlist.example/mystery"));

    Ok(())
}

#[test]
fn sync_updates_changed_listings_by_link() -> Result<()> {
    let env = setup_fixture_env()?;

    let sync_options = SyncOptions {
        config_dir: env.config_dir.clone(),
        state_path: env.state_path.clone(),
        source: None,
        dry_run: false,
    };

    sync_sources(&sync_options)?;
    let (_, second) = sync_sources(&sync_options)?;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 4);

    let fixture_html = env.data_dir.join("devlist.html");
    let html = fs::read_to_string(&fixture_html)?;
    let changed = html
        .replace("Chennai AI Hackathon", "Chennai AI Hackathon Redux")
        .replace("Apr 11 - 18, 2030", "Apr 11 - 19, 2030");
    fs::write(&fixture_html, changed)?;

    let (_, third) = sync_sources(&sync_options)?;
    assert_eq!(third.updated, 1);
    assert_eq!(third.unchanged, 3);

    let state = load_state_for_read(&env.state_path)?;
    let ai = state
        .listings
        .get("https://devlist.example/ai")
        .expect("updated listing must be stored");
    assert_eq!(ai.title, "Chennai AI Hackathon Redux");
    assert_eq!(ai.reg_end_date, date(2030, 4, 19));

    Ok(())
}

#[test]
fn harness_reports_two_run_stability() -> Result<()> {
    let env = setup_fixture_env()?;

    let report = run_harness(&HarnessOptions {
        config_dir: env.config_dir,
        state_path: env.state_path,
    })?;

    assert_eq!(report.first_run_sources, 3);
    assert_eq!(report.first_run_inserted, 4);
    assert_eq!(report.first_run_dropped_no_date, 1);
    assert_eq!(report.first_run_dropped_expired, 1);
    assert_eq!(report.second_run_inserted, 0);
    assert_eq!(report.second_run_updated, 0);
    assert_eq!(report.second_run_unchanged, 4);
    assert_eq!(report.total_listings, 4);

    Ok(())
}

#[test]
fn purge_drops_expired_records_from_state() -> Result<()> {
    let mut state = State::default();
    state
        .listings
        .insert("https://a.example".to_string(), record("https://a.example", date(2020, 1, 1)));
    state
        .listings
        .insert("https://b.example".to_string(), record("https://b.example", date(2031, 1, 1)));

    let removed = purge_expired(&mut state, date(2026, 8, 1));
    assert_eq!(removed, 1);
    assert!(state.listings.contains_key("https://b.example"));

    let temp = tempdir()?;
    let state_path = temp.path().join("state/listings.json");
    state
        .listings
        .insert("https://c.example".to_string(), record("https://c.example", date(2021, 6, 1)));
    save_state(&state_path, &state)?;

    let removed = purge_state(&PurgeOptions {
        state_path: state_path.clone(),
        dry_run: false,
    })?;
    assert_eq!(removed, 1);

    let reloaded = load_state_for_read(&state_path)?;
    assert_eq!(reloaded.listings.len(), 1);
    assert!(reloaded.listings.contains_key("https://b.example"));

    Ok(())
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn record(link: &str, reg_end_date: NaiveDate) -> ListingRecord {
    let seen = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    ListingRecord {
        title: "Fixture Hack".to_string(),
        organizer: String::new(),
        mode: "Online".to_string(),
        reg_end_date,
        location: String::new(),
        link: link.to_string(),
        image_url: None,
        source: "Fixture".to_string(),
        themes: String::new(),
        first_seen_at: seen,
        last_seen_at: seen,
    }
}

struct FixtureEnv {
    config_dir: std::path::PathBuf,
    data_dir: std::path::PathBuf,
    state_path: std::path::PathBuf,
}

fn setup_fixture_env() -> Result<FixtureEnv> {
    let temp = tempdir()?;
    let root = temp.keep();

    let fixture_root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let config_dir = root.join("sources");
    let data_dir = root.join("data");
    copy_dir(&fixture_root.join("sources"), &config_dir)?;
    copy_dir(&fixture_root.join("data"), &data_dir)?;

    let state_path = root.join("state/listings.json");

    Ok(FixtureEnv {
        config_dir,
        data_dir,
        state_path,
    })
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else {
            if let Some(parent) = dst_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(src_path, dst_path)?;
        }
    }

    Ok(())
}
