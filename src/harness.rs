use crate::pipeline::{SyncOptions, load_state_for_read, sync_sources};
use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub config_dir: PathBuf,
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub first_run_sources: usize,
    pub first_run_inserted: usize,
    pub first_run_dropped_no_date: usize,
    pub first_run_dropped_expired: usize,
    pub second_run_inserted: usize,
    pub second_run_updated: usize,
    pub second_run_unchanged: usize,
    pub total_listings: usize,
}

/// Syncs twice over the configured sources; a stable setup inserts on the
/// first pass and reports everything unchanged on the second.
pub fn run_harness(options: &HarnessOptions) -> Result<HarnessReport> {
    if options.state_path.exists() {
        std::fs::remove_file(&options.state_path)?;
    }

    let sync_options = SyncOptions {
        config_dir: options.config_dir.clone(),
        state_path: options.state_path.clone(),
        source: None,
        dry_run: false,
    };

    let (first_reports, first_batch) = sync_sources(&sync_options)?;
    let (_, second_batch) = sync_sources(&sync_options)?;

    let state = load_state_for_read(&options.state_path)?;

    Ok(HarnessReport {
        first_run_sources: first_reports.len(),
        first_run_inserted: first_batch.inserted,
        first_run_dropped_no_date: first_batch.dropped_no_date,
        first_run_dropped_expired: first_batch.dropped_expired,
        second_run_inserted: second_batch.inserted,
        second_run_updated: second_batch.updated,
        second_run_unchanged: second_batch.unchanged,
        total_listings: state.listings.len(),
    })
}
