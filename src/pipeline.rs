//! The retry/backfill orchestrator: resolve, fetch, merge, persist.
//!
//! Each scope (a date, the league, or the failure list) walks
//! `Idle -> Fetching -> Merging -> Persisted -> Idle`. Player failures never
//! abort a scope; they end up in the failure list for `retry`.
use crate::config::Settings;
use crate::failures::{FailedPlayer, FailureList};
use crate::fetch::{FetchExecutor, FetchJob, FetchStatus, PlayerFetchOutcome, jobs_from_rosters};
use crate::roster::RosterResolver;
use crate::snapshot::SnapshotWriter;
use crate::store::Store;
use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use log::{error, info, warn};
use nba_api::{ReferenceSource, RequestConfig, Season, SourceChain, StatsApi};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    Merging,
    Persisted,
}

/// What a scope (or an aggregate of scopes) did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scope: String,
    pub players_succeeded: usize,
    pub players_skipped: usize,
    pub players_failed: usize,
    pub rows_processed: usize,
    pub rows_inserted: usize,
    pub snapshots: Vec<PathBuf>,
    /// Scopes skipped because their snapshot already existed.
    pub scopes_short_circuited: usize,
    /// Scopes that aborted on a structural error.
    pub scopes_failed: usize,
}

impl RunSummary {
    fn new(scope: impl Into<String>) -> Self {
        Self { scope: scope.into(), ..Default::default() }
    }

    fn absorb(&mut self, other: RunSummary) {
        self.players_succeeded += other.players_succeeded;
        self.players_skipped += other.players_skipped;
        self.players_failed += other.players_failed;
        self.rows_processed += other.rows_processed;
        self.rows_inserted += other.rows_inserted;
        self.snapshots.extend(other.snapshots);
        self.scopes_short_circuited += other.scopes_short_circuited;
        self.scopes_failed += other.scopes_failed;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} players ok, {} skipped, {} failed; {} of {} rows inserted",
            self.scope,
            self.players_succeeded,
            self.players_skipped,
            self.players_failed,
            self.rows_inserted,
            self.rows_processed
        )?;
        if self.scopes_short_circuited > 0 {
            write!(f, "; {} scopes already done", self.scopes_short_circuited)?;
        }
        if self.scopes_failed > 0 {
            write!(f, "; {} scopes failed", self.scopes_failed)?;
        }
        Ok(())
    }
}

/// How a scope's failures land in the failure list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureUpdate {
    /// Union with the stored list, dropping players that succeeded.
    Merge,
    /// The list becomes exactly this scope's failures.
    Replace,
}

pub struct Pipeline {
    settings: Settings,
    roster: RosterResolver,
    fetcher: FetchExecutor,
    store: Store,
    snapshots: SnapshotWriter,
    failures: FailureList,
    phase: RunPhase,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        mut store: Store,
        roster: RosterResolver,
        chain: SourceChain,
    ) -> Result<Self> {
        store.ensure_schema().context("preparing store schema")?;
        Ok(Self {
            fetcher: FetchExecutor::new(chain, settings.retry, settings.workers),
            snapshots: SnapshotWriter::new(&settings.data_dir),
            failures: FailureList::new(&settings.failed_file),
            roster,
            store,
            settings,
            phase: RunPhase::Idle,
        })
    }

    /// Wire the real adapters: stats API first, reference site as fallback.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let stats = StatsApi::with_base_url(
            &RequestConfig::stats().with_timeout(settings.timeout),
            &settings.stats_url,
        )
        .context("building stats client")?;
        let reference = ReferenceSource::with_base_url(
            &RequestConfig::reference().with_timeout(settings.timeout),
            &settings.reference_url,
        )
        .context("building reference client")?;

        if let Some(parent) = settings.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let store = Store::open(&settings.db_path)
            .with_context(|| format!("opening {}", settings.db_path.display()))?;

        let roster = RosterResolver::new(stats.clone(), settings.retry, settings.workers);
        let chain = SourceChain::new(Arc::new(stats)).with_fallback(Arc::new(reference));
        Self::new(settings, store, roster, chain)
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Ingest every player on a team that plays on `date`. Without `force`
    /// a date whose snapshot exists is skipped; key dedup applies either way.
    pub async fn pull_date(&mut self, date: NaiveDate, force: bool) -> Result<RunSummary> {
        let label = date.format("%Y-%m-%d").to_string();
        let scope = format!("date {label}");
        if !force && self.snapshots.exists(&label) {
            info!("{scope}: snapshot {} exists, skipping", self.snapshots.path_for(&label).display());
            return Ok(RunSummary { scopes_short_circuited: 1, ..RunSummary::new(scope) });
        }

        let season = self.settings.season_for(date);
        let rosters = self
            .roster
            .for_date(date, season)
            .await
            .with_context(|| format!("resolving rosters for {label}"))?;
        let jobs = jobs_from_rosters(&rosters, season);
        info!("{scope}: {} players on {} teams", jobs.len(), rosters.len());

        self.run_scope(&scope, &label, vec![jobs], FailureUpdate::Merge).await
    }

    /// Pull each date in `from..=to`. A date that fails structurally is
    /// logged and counted; the range carries on.
    pub async fn backfill(&mut self, from: NaiveDate, to: NaiveDate, force: bool) -> Result<RunSummary> {
        if from > to {
            bail!("backfill range is empty: {from} is after {to}");
        }
        let mut total = RunSummary::new(format!("backfill {from}..={to}"));
        for date in from.iter_days().take_while(|d| *d <= to) {
            match self.pull_date(date, force).await {
                Ok(summary) => total.absorb(summary),
                Err(e) => {
                    error!("date {date}: {e:#}");
                    total.scopes_failed += 1;
                }
            }
        }
        info!("{total}");
        Ok(total)
    }

    /// Ingest every rostered player in the league for `season`.
    pub async fn league(&mut self, season: Season) -> Result<RunSummary> {
        let scope = format!("league {season}");
        let rosters = self.roster.for_league(season).await;
        if rosters.is_empty() {
            bail!("{scope}: no team rosters could be fetched");
        }
        let jobs = jobs_from_rosters(&rosters, season);
        info!("{scope}: {} players on {} teams", jobs.len(), rosters.len());
        self.run_scope(&scope, &format!("league_{season}"), vec![jobs], FailureUpdate::Merge)
            .await
    }

    /// Re-drive the failure list in fixed-size batches with a cooldown
    /// between them. Whoever still fails stays on the list.
    pub async fn retry_failed(&mut self) -> Result<RunSummary> {
        let listed = self.failures.load().context("loading failure list")?;
        let scope = "retry".to_string();
        if listed.is_empty() {
            info!("failure list {} is empty", self.failures.path().display());
            return Ok(RunSummary::new(scope));
        }
        info!("{scope}: {} players to re-drive", listed.len());

        let today = Local::now().date_naive();
        let jobs: Vec<FetchJob> = listed.iter().map(|entry| self.retry_job(entry, today)).collect();
        let batches: Vec<Vec<FetchJob>> =
            jobs.chunks(self.settings.batch_size).map(<[FetchJob]>::to_vec).collect();
        let label = format!("retry_{}", Local::now().format("%Y%m%dT%H%M%S"));
        self.run_scope(&scope, &label, batches, FailureUpdate::Replace).await
    }

    fn retry_job(&self, entry: &FailedPlayer, today: NaiveDate) -> FetchJob {
        FetchJob {
            player: entry.player(),
            team: entry.team_id.and_then(nba_api::find_team).cloned(),
            season: entry
                .season
                .or(self.settings.season)
                .unwrap_or_else(|| Season::for_date(today)),
        }
    }

    fn enter(&mut self, scope: &str, next: RunPhase) {
        info!("{scope}: {:?} -> {next:?}", self.phase);
        self.phase = next;
    }

    async fn run_scope(
        &mut self,
        scope: &str,
        label: &str,
        batches: Vec<Vec<FetchJob>>,
        update: FailureUpdate,
    ) -> Result<RunSummary> {
        self.enter(scope, RunPhase::Fetching);
        let mut outcomes: Vec<PlayerFetchOutcome> = Vec::new();
        let batch_count = batches.len();
        for (idx, batch) in batches.into_iter().enumerate() {
            outcomes.extend(self.fetcher.fetch_all(batch).await);
            if idx + 1 < batch_count {
                info!(
                    "{scope}: batch {}/{batch_count} done, cooling down for {:?}",
                    idx + 1,
                    self.settings.batch_pause
                );
                tokio::time::sleep(self.settings.batch_pause).await;
            }
        }

        self.enter(scope, RunPhase::Merging);
        let mut summary = RunSummary::new(scope);
        let mut failed = Vec::new();
        let mut succeeded = HashSet::new();
        let mut rows = Vec::new();
        for outcome in outcomes {
            match outcome.status {
                FetchStatus::Succeeded => {
                    summary.players_succeeded += 1;
                    succeeded.insert(outcome.job.player.id);
                }
                FetchStatus::Skipped => {
                    summary.players_skipped += 1;
                    succeeded.insert(outcome.job.player.id);
                }
                FetchStatus::Failed => summary.players_failed += 1,
            }
            failed.extend(outcome.failure_record());
            rows.extend(outcome.rows);
        }
        summary.rows_processed = rows.len();

        if !rows.is_empty() {
            match self.snapshots.write(label, &rows) {
                Ok(path) => summary.snapshots.push(path),
                Err(e) => warn!("{scope}: snapshot not written: {e:#}"),
            }
        }

        let merged = self.store.merge_new(rows);
        let report = match merged {
            Ok(report) => report,
            Err(e) => {
                error!("{scope}: database step aborted: {e}");
                // Nothing was persisted: fold into the stored list, never replace it.
                self.update_failures(failed, &HashSet::new(), FailureUpdate::Merge)?;
                self.enter(scope, RunPhase::Idle);
                return Err(e).with_context(|| format!("{scope}: persisting rows"));
            }
        };
        summary.rows_inserted = report.inserted;
        self.enter(scope, RunPhase::Persisted);

        self.update_failures(failed, &succeeded, update)?;
        self.enter(scope, RunPhase::Idle);
        info!("{summary}");
        Ok(summary)
    }

    fn update_failures(
        &self,
        failed: Vec<FailedPlayer>,
        succeeded: &HashSet<i64>,
        update: FailureUpdate,
    ) -> Result<()> {
        let count = failed.len();
        match update {
            FailureUpdate::Merge => {
                let merged = self.failures.merge(failed, succeeded)?;
                info!("failure list now holds {} players ({count} new)", merged.len());
            }
            FailureUpdate::Replace => {
                self.failures.save(&failed)?;
                info!("failure list now holds {count} players");
            }
        }
        Ok(())
    }
}
