//! Maps a date (or the whole league) to the players to fetch.
use crate::retry::RetryPolicy;
use chrono::NaiveDate;
use futures_util::{StreamExt, stream};
use log::{info, warn};
use nba_api::{ApiError, ApiResult, PlayerRef, Season, StatsApi, TeamRef, find_team, teams};

/// One team's roster as resolved for this run. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamRosterSnapshot {
    pub team: TeamRef,
    pub players: Vec<PlayerRef>,
}

pub struct RosterResolver {
    api: StatsApi,
    retry: RetryPolicy,
    workers: usize,
}

impl RosterResolver {
    pub fn new(api: StatsApi, retry: RetryPolicy, workers: usize) -> Self {
        Self { api, retry, workers: workers.max(1) }
    }

    /// Teams with a game on `date`. A scoreboard failure fails the scope.
    pub async fn teams_playing(&self, date: NaiveDate) -> ApiResult<Vec<TeamRef>> {
        let label = format!("scoreboard {date}");
        let ids = self
            .retry
            .run(&label, ApiError::is_transient, || self.api.fetch_scoreboard(date))
            .await?;
        Ok(ids
            .into_iter()
            .map(|id| {
                find_team(id).cloned().unwrap_or_else(|| {
                    warn!("team {id} is not in the franchise table");
                    TeamRef { id, ..Default::default() }
                })
            })
            .collect())
    }

    pub async fn for_date(&self, date: NaiveDate, season: Season) -> ApiResult<Vec<TeamRosterSnapshot>> {
        let playing = self.teams_playing(date).await?;
        info!("{} teams play on {date}", playing.len());
        Ok(self.rosters(playing, season).await)
    }

    /// Every franchise's roster for the season.
    pub async fn for_league(&self, season: Season) -> Vec<TeamRosterSnapshot> {
        self.rosters(teams().to_vec(), season).await
    }

    /// Fetch rosters with bounded concurrency, in team order. A team whose
    /// roster cannot be fetched is logged and left out.
    async fn rosters(&self, teams: Vec<TeamRef>, season: Season) -> Vec<TeamRosterSnapshot> {
        let results: Vec<(TeamRef, ApiResult<Vec<PlayerRef>>)> = stream::iter(teams)
            .map(|team| async move {
                let label = format!("roster {}", team.id);
                let players = self
                    .retry
                    .run(&label, ApiError::is_transient, || self.api.fetch_roster(team.id, season))
                    .await;
                (team, players)
            })
            .buffered(self.workers)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(team, players)| match players {
                Ok(players) => Some(TeamRosterSnapshot { team, players }),
                Err(e) => {
                    warn!("skipping team {} ({}): {e}", team.abbreviation, team.id);
                    None
                }
            })
            .collect()
    }
}
