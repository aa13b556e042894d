use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use hackradar::harness::{HarnessOptions, run_harness};
use hackradar::model::{DateSignal, canonical};
use hackradar::pipeline::{
    PurgeOptions, SyncOptions, ValidateOptions, purge_state, sync_sources, validate_configs,
};
use hackradar::resolve::Resolver;
use hackradar::search::{DuckDuckGo, SearchDisabled};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hackradar", about = "Hackathon listing aggregator")]
struct Cli {
    #[arg(long, default_value = "configs/sources")]
    config_dir: PathBuf,

    #[arg(long, default_value = "data/state/listings.json")]
    state_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Sync {
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Run a single text or title through the date-resolution cascade.
    Resolve {
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        title: Option<String>,
    },
    Validate {
        #[arg(long)]
        source_file: Option<PathBuf>,
    },
    Purge {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    Harness,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { source, dry_run } => {
            let (reports, batch) = sync_sources(&SyncOptions {
                config_dir: cli.config_dir,
                state_path: cli.state_path,
                source,
                dry_run,
            })?;

            for report in reports {
                info!(
                    source = %report.source_key,
                    pages = report.pages_fetched,
                    listings = report.records_parsed,
                    "source sync summary"
                );
            }
            info!(
                inserted = batch.inserted,
                updated = batch.updated,
                unchanged = batch.unchanged,
                dropped_no_date = batch.dropped_no_date,
                dropped_expired = batch.dropped_expired,
                purged = batch.purged,
                "batch summary"
            );
        }
        Commands::Resolve { text, file, title } => {
            let result = resolve_once(text, file, title)?;
            match result {
                Some(date) => println!("{}", canonical(date)),
                None => println!("no date"),
            }
        }
        Commands::Validate { source_file } => {
            let messages = validate_configs(&ValidateOptions {
                config_dir: Some(cli.config_dir),
                source_file,
            })?;
            for line in messages {
                println!("{line}");
            }
        }
        Commands::Purge { dry_run } => {
            let removed = purge_state(&PurgeOptions {
                state_path: cli.state_path,
                dry_run,
            })?;
            println!("purged {removed} expired listings");
        }
        Commands::Harness => {
            let report = run_harness(&HarnessOptions {
                config_dir: cli.config_dir,
                state_path: cli.state_path,
            })?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn resolve_once(
    text: Option<String>,
    file: Option<PathBuf>,
    title: Option<String>,
) -> Result<Option<chrono::NaiveDate>> {
    if let Some(title) = title {
        let provider = DuckDuckGo::new(20, "hackradar/0.1 (+https://example.invalid)")?;
        let resolver = Resolver::new(&provider);
        return Ok(resolver.resolve_via_title(&title));
    }

    let input = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)?,
        (None, None) => bail!("one of --text, --file or --title is required"),
    };

    let provider = SearchDisabled;
    let resolver = Resolver::new(&provider);
    Ok(resolver
        .extract_date(&input)
        .or_else(|| resolver.normalize(&DateSignal::Text(input.clone()))))
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
