//! Concurrent per-player game-log fetches. Failures come back as data.
use crate::failures::FailedPlayer;
use crate::retry::RetryPolicy;
use crate::roster::TeamRosterSnapshot;
use futures_util::{StreamExt, stream};
use log::{debug, warn};
use nba_api::schema::has_usable_rows;
use nba_api::{ApiError, GameLogRow, PlayerRef, Season, SourceChain, TeamRef};
use std::collections::HashSet;

/// One player to fetch, with the team context their rows get tagged with.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchJob {
    pub player: PlayerRef,
    pub team: Option<TeamRef>,
    pub season: Season,
}

/// Flatten rosters into jobs. A player listed by two teams is fetched once,
/// under the first team.
pub fn jobs_from_rosters(snapshots: &[TeamRosterSnapshot], season: Season) -> Vec<FetchJob> {
    let mut seen = HashSet::new();
    snapshots
        .iter()
        .flat_map(|snap| snap.players.iter().map(move |p| (p, &snap.team)))
        .filter(|(player, _)| seen.insert(player.id))
        .map(|(player, team)| FetchJob {
            player: player.clone(),
            team: Some(team.clone()),
            season,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Succeeded,
    /// Both adapters answered but had nothing usable.
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PlayerFetchOutcome {
    pub job: FetchJob,
    pub status: FetchStatus,
    pub rows: Vec<GameLogRow>,
    pub provider: Option<&'static str>,
    pub error: Option<String>,
}

impl PlayerFetchOutcome {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn failure_record(&self) -> Option<FailedPlayer> {
        (self.status == FetchStatus::Failed).then(|| FailedPlayer {
            id: self.job.player.id,
            full_name: self.job.player.full_name.clone(),
            team_id: self.job.team.as_ref().map(|t| t.id),
            season: Some(self.job.season),
            error: self.error.clone(),
        })
    }
}

pub struct FetchExecutor {
    chain: SourceChain,
    retry: RetryPolicy,
    workers: usize,
}

impl FetchExecutor {
    pub fn new(chain: SourceChain, retry: RetryPolicy, workers: usize) -> Self {
        Self { chain, retry, workers: workers.max(1) }
    }

    /// At most `workers` fetches are in flight. Outcomes arrive in
    /// completion order.
    pub async fn fetch_all(&self, jobs: Vec<FetchJob>) -> Vec<PlayerFetchOutcome> {
        stream::iter(jobs)
            .map(|job| self.fetch_one(job))
            .buffer_unordered(self.workers)
            .collect()
            .await
    }

    pub async fn fetch_one(&self, job: FetchJob) -> PlayerFetchOutcome {
        let label = format!("{} ({})", job.player.full_name, job.player.id);
        let result = self
            .retry
            .run(&label, ApiError::is_transient, || self.chain.game_log(&job.player, job.season))
            .await;

        match result {
            Err(e) => {
                warn!("{label}: giving up: {e}");
                PlayerFetchOutcome {
                    job,
                    status: FetchStatus::Failed,
                    rows: Vec::new(),
                    provider: None,
                    error: Some(e.to_string()),
                }
            }
            Ok(output) if !has_usable_rows(&output.rows) => {
                debug!("{label}: no usable rows from any source");
                PlayerFetchOutcome {
                    job,
                    status: FetchStatus::Skipped,
                    rows: Vec::new(),
                    provider: output.provider,
                    error: None,
                }
            }
            Ok(mut output) => {
                if let Some(team) = &job.team {
                    tag_team(&mut output.rows, team);
                }
                debug!("{label}: {} rows from {:?}", output.rows.len(), output.provider);
                PlayerFetchOutcome {
                    job,
                    status: FetchStatus::Succeeded,
                    rows: output.rows,
                    provider: output.provider,
                    error: None,
                }
            }
        }
    }
}

/// Fill team fields the provider left empty. Provider values win.
fn tag_team(rows: &mut [GameLogRow], team: &TeamRef) {
    for row in rows {
        if row.team_id.is_none() {
            row.team_id = Some(team.id);
        }
        if !team.abbreviation.is_empty() && row.team_abbreviation.is_none() {
            row.team_abbreviation = Some(team.abbreviation.clone());
        }
        if !team.name.is_empty() && row.team_name.is_none() {
            row.team_name = Some(team.name.clone());
        }
    }
}
