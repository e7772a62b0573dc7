//! Command-line surface and the plain settings the pipeline runs on.
use crate::retry::RetryPolicy;
use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use nba_api::Season;
use nba_api::client::{REFERENCE_BASE, STATS_BASE};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "nba-ingest", version, about = "Incremental NBA box-score ingestion")]
pub struct Cli {
    #[command(flatten)]
    pub args: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// SQLite database file.
    #[arg(long, global = true, env = "NBA_INGEST_DB", default_value = "nba_stats.db")]
    pub db: PathBuf,

    /// Directory for per-run CSV snapshots.
    #[arg(long, global = true, env = "NBA_INGEST_DATA_DIR", default_value = "data/player_logs")]
    pub data_dir: PathBuf,

    /// Retriable failure list.
    #[arg(
        long,
        global = true,
        env = "NBA_INGEST_FAILED_FILE",
        default_value = "failed_players.json"
    )]
    pub failed_file: PathBuf,

    /// Concurrent player fetches.
    #[arg(long, global = true, default_value_t = 5)]
    pub workers: usize,

    /// Attempts per upstream call, including the first.
    #[arg(long, global = true, default_value_t = 3)]
    pub attempts: u32,

    /// First backoff wait; doubles per attempt.
    #[arg(long, global = true, default_value_t = 1000)]
    pub base_delay_ms: u64,

    /// Players per retry batch.
    #[arg(long, global = true, default_value_t = 20)]
    pub batch_size: usize,

    /// Cooldown after each retry batch.
    #[arg(long, global = true, default_value_t = 10)]
    pub batch_pause_secs: u64,

    /// Per-request timeout.
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Season override, e.g. 2024-25. Defaults to the season of the date.
    #[arg(long, global = true)]
    pub season: Option<Season>,

    /// Log filter when RUST_LOG is unset (e.g. info, debug, nba_ingest=trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[arg(long, global = true, env = "NBA_INGEST_STATS_URL", default_value = STATS_BASE)]
    pub stats_url: String,

    #[arg(long, global = true, env = "NBA_INGEST_REFERENCE_URL", default_value = REFERENCE_BASE)]
    pub reference_url: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ingest every player on a team that plays on one date (default: yesterday).
    Pull {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Re-run even if the date's snapshot file exists.
        #[arg(long)]
        force: bool,
    },
    /// Ingest an inclusive date range, one scope per date.
    Backfill {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long)]
        force: bool,
    },
    /// Ingest every rostered player in the league for a season.
    League,
    /// Re-drive the players in the failure list.
    Retry,
    /// Create the table and indexes, then exit.
    Init,
}

/// Everything the pipeline needs, detached from clap and the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub failed_file: PathBuf,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub timeout: Duration,
    pub season: Option<Season>,
    pub stats_url: String,
    pub reference_url: String,
}

impl Settings {
    /// Season for a date scope: the override if given, else the date's own.
    pub fn season_for(&self, date: NaiveDate) -> Season {
        self.season.unwrap_or_else(|| Season::for_date(date))
    }
}

impl TryFrom<&GlobalArgs> for Settings {
    type Error = anyhow::Error;

    fn try_from(args: &GlobalArgs) -> Result<Self> {
        if args.workers == 0 {
            bail!("--workers must be at least 1");
        }
        if args.attempts == 0 {
            bail!("--attempts must be at least 1");
        }
        if args.batch_size == 0 {
            bail!("--batch-size must be at least 1");
        }
        Ok(Self {
            db_path: args.db.clone(),
            data_dir: args.data_dir.clone(),
            failed_file: args.failed_file.clone(),
            workers: args.workers,
            retry: RetryPolicy::new(args.attempts, Duration::from_millis(args.base_delay_ms)),
            batch_size: args.batch_size,
            batch_pause: Duration::from_secs(args.batch_pause_secs),
            timeout: Duration::from_secs(args.timeout_secs),
            season: args.season,
            stats_url: args.stats_url.clone(),
            reference_url: args.reference_url.clone(),
        })
    }
}
