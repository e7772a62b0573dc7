use anyhow::Context;
use chrono::{Days, Local};
use clap::Parser;
use log::info;
use nba_api::Season;
use nba_ingest::store::Store;
use nba_ingest::{Cli, Command, Pipeline, Settings, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.args.log_level);
    let settings = Settings::try_from(&cli.args)?;

    if let Command::Init = cli.command {
        let mut store = Store::open(&settings.db_path)
            .with_context(|| format!("opening {}", settings.db_path.display()))?;
        store.ensure_schema()?;
        info!("schema ready in {}", settings.db_path.display());
        return Ok(());
    }

    let today = Local::now().date_naive();
    let mut pipeline = Pipeline::from_settings(settings.clone())?;
    let summary = match cli.command {
        Command::Pull { date, force } => {
            let date = date.or_else(|| today.checked_sub_days(Days::new(1))).unwrap_or(today);
            pipeline.pull_date(date, force).await?
        }
        Command::Backfill { from, to, force } => pipeline.backfill(from, to, force).await?,
        Command::League => {
            let season = settings.season.unwrap_or_else(|| Season::for_date(today));
            pipeline.league(season).await?
        }
        Command::Retry => pipeline.retry_failed().await?,
        Command::Init => return Ok(()),
    };

    println!("{summary}");
    for path in &summary.snapshots {
        println!("  snapshot: {}", path.display());
    }
    Ok(())
}
