use async_trait::async_trait;
use chrono::NaiveDate;
use mockito::{Matcher, Mock, Server, ServerGuard};
use nba_api::{
    ApiError, ApiResult, GameLogRow, GameLogSource, PlayerRef, RequestConfig, Season, SourceChain,
    StatsApi,
};
use nba_ingest::failures::FailureList;
use nba_ingest::retry::RetryPolicy;
use nba_ingest::roster::RosterResolver;
use nba_ingest::store::Store;
use nba_ingest::{Pipeline, RunPhase, Settings};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LAL: i64 = 1610612747;
const BOS: i64 = 1610612738;

fn game_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 4, 13).unwrap()
}

fn settings(dir: &Path, server_url: &str) -> Settings {
    Settings {
        db_path: dir.join("nba_stats.db"),
        data_dir: dir.join("player_logs"),
        failed_file: dir.join("failed_players.json"),
        workers: 5,
        retry: RetryPolicy::new(2, Duration::from_millis(5)),
        batch_size: 20,
        batch_pause: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
        season: None,
        stats_url: server_url.to_owned(),
        reference_url: server_url.to_owned(),
    }
}

async fn mock_schedule(server: &mut ServerGuard, date: &str, teams: &[(i64, i64)]) -> Mock {
    let rows: Vec<String> = teams.iter().map(|(h, v)| format!("[{h}, {v}]")).collect();
    server
        .mock("GET", "/scoreboardv2")
        .match_query(Matcher::UrlEncoded("GameDate".into(), date.into()))
        .with_body(format!(
            r#"{{"resultSets": [{{"name": "GameHeader", "headers": ["HOME_TEAM_ID", "VISITOR_TEAM_ID"], "rowSet": [{}]}}]}}"#,
            rows.join(",")
        ))
        .create_async()
        .await
}

async fn mock_roster(server: &mut ServerGuard, team_id: i64, players: &[(i64, &str)]) -> Mock {
    let rows: Vec<String> =
        players.iter().map(|(id, name)| format!(r#"["{name}", {id}]"#)).collect();
    server
        .mock("GET", "/commonteamroster")
        .match_query(Matcher::UrlEncoded("TeamID".into(), team_id.to_string()))
        .with_body(format!(
            r#"{{"resultSets": [{{"name": "CommonTeamRoster", "headers": ["PLAYER", "PLAYER_ID"], "rowSet": [{}]}}]}}"#,
            rows.join(",")
        ))
        .create_async()
        .await
}

fn assert_keys_unique(store: &Store) {
    let keyed = store.existing_keys().unwrap().len();
    let mut stmt_count = 0;
    for player in [2544, 203076, 1628369, 1, 2, 3] {
        stmt_count += store
            .rows_for_player(player)
            .unwrap()
            .iter()
            .filter(|r| r.game_id.is_some())
            .count();
    }
    assert_eq!(keyed, stmt_count, "a (player_id, game_id) pair is stored twice");
}

// ---------------------------------------------------------------------------
// Real adapters against a mock upstream
// ---------------------------------------------------------------------------

const LEBRON_LOG: &str = r#"{"resultSets": [{"name": "PlayerGameLog",
    "headers": ["SEASON_ID", "Player_ID", "Game_ID", "GAME_DATE", "MATCHUP", "WL", "MIN", "PTS", "REB", "VIDEO_AVAILABLE"],
    "rowSet": [
        ["22024", 2544, "0022401180", "APR 11, 2025", "LAL vs. HOU", "W", 36, 14, 7, 1],
        ["22024", 2544, "0022401199", "APR 13, 2025", "LAL @ POR", "L", 0, 0, 0, 1]
    ]}]}"#;

const EMPTY_LOG: &str = r#"{"resultSets": [{"name": "PlayerGameLog",
    "headers": ["SEASON_ID", "Player_ID", "Game_ID", "PTS"], "rowSet": []}]}"#;

const DAVIS_PAGE: &str = r#"<html><body><table id="pgl_basic">
  <thead><tr><th>Rk</th><th>Date</th><th>Team</th><th>Opp</th><th>MP</th><th>TRB</th><th>PTS</th></tr></thead>
  <tbody>
    <tr><th>2</th><td>2025-04-11</td><td>LAL</td><td>HOU</td><td>35:00</td><td>12</td><td>28</td></tr>
    <tr class="thead"><th>Rk</th><td>Date</td><td>Team</td><td>Opp</td><td>MP</td><td>TRB</td><td>PTS</td></tr>
    <tr><th>1</th><td>2025-04-09</td><td>LAL</td><td>DAL</td><td>31:30</td><td>9</td><td>22</td></tr>
  </tbody></table></body></html>"#;

#[tokio::test]
async fn full_run_falls_back_records_failures_and_reingests_idempotently() {
    let mut server = Server::new_async().await;
    mock_schedule(&mut server, "04/13/2025", &[(LAL, BOS)]).await;
    mock_roster(&mut server, LAL, &[(2544, "LeBron James"), (203076, "Anthony Davis")]).await;
    mock_roster(&mut server, BOS, &[(1628369, "Jayson Tatum")]).await;
    server
        .mock("GET", "/playergamelog")
        .match_query(Matcher::UrlEncoded("PlayerID".into(), "2544".into()))
        .with_body(LEBRON_LOG)
        .create_async()
        .await;
    server
        .mock("GET", "/playergamelog")
        .match_query(Matcher::UrlEncoded("PlayerID".into(), "203076".into()))
        .with_body(EMPTY_LOG)
        .create_async()
        .await;
    let tatum = server
        .mock("GET", "/playergamelog")
        .match_query(Matcher::UrlEncoded("PlayerID".into(), "1628369".into()))
        .with_status(503)
        .expect(4)
        .create_async()
        .await;
    let davis_page = server
        .mock("GET", "/players/d/davisan01/gamelog/2025/")
        .with_body(DAVIS_PAGE)
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::from_settings(settings(dir.path(), &server.url())).unwrap();

    let first = pipeline.pull_date(game_day(), false).await.unwrap();
    assert_eq!(first.players_succeeded, 2);
    assert_eq!(first.players_failed, 1);
    assert_eq!(first.rows_processed, 4);
    assert_eq!(first.rows_inserted, 4);
    assert_eq!(first.snapshots, vec![dir.path().join("player_logs").join("stats_2025-04-13.csv")]);
    assert_eq!(pipeline.phase(), RunPhase::Idle);

    let store = pipeline.store();
    let davis = store.rows_for_player(203076).unwrap();
    assert_eq!(davis.len(), 2);
    assert_eq!(davis[0].game_date, NaiveDate::from_ymd_opt(2025, 4, 9));
    assert_eq!(davis[0].source.as_deref(), Some("bref:davisan01"));
    assert_eq!(davis[0].game_id, None);
    assert_eq!(davis[0].team_id, Some(LAL));
    assert_eq!(davis[1].pts, Some(28));

    let lebron = store.rows_for_player(2544).unwrap();
    assert_eq!(lebron[0].player_name.as_deref(), Some("LeBron James"));
    assert_eq!(lebron[0].team_abbreviation.as_deref(), Some("LAL"));
    assert_eq!(lebron[0].source.as_deref(), Some("stats"));

    let failed = FailureList::new(dir.path().join("failed_players.json")).load().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, 1628369);
    assert_eq!(failed[0].full_name, "Jayson Tatum");

    let second = pipeline.pull_date(game_day(), true).await.unwrap();
    assert_eq!(second.rows_processed, 4);
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(pipeline.store().row_count().unwrap(), 4);
    assert_keys_unique(pipeline.store());

    tatum.assert_async().await;
    davis_page.assert_async().await;
}

// ---------------------------------------------------------------------------
// Fake adapters
// ---------------------------------------------------------------------------

/// Two games per player; players in `failing` error out.
#[derive(Default)]
struct FakeSource {
    failing: Mutex<HashSet<i64>>,
    calls: AtomicUsize,
}

impl FakeSource {
    fn failing(ids: &[i64]) -> Arc<Self> {
        Arc::new(Self { failing: Mutex::new(ids.iter().copied().collect()), ..Default::default() })
    }

    fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl GameLogSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn game_log(&self, player: &PlayerRef, _: Season) -> ApiResult<Vec<GameLogRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&player.id) {
            return Err(ApiError::NotFound(format!("{} unavailable", player.id)));
        }
        Ok(["0022400001", "0022400002"]
            .iter()
            .map(|game| GameLogRow {
                player_id: player.id,
                game_id: Some(game.to_string()),
                pts: Some(player.id * 10),
                ..Default::default()
            })
            .collect())
    }
}

fn fake_pipeline(dir: &Path, server: &ServerGuard, source: Arc<FakeSource>) -> Pipeline {
    let settings = settings(dir, &server.url());
    let stats = StatsApi::with_base_url(&RequestConfig::stats(), &settings.stats_url).unwrap();
    let roster = RosterResolver::new(stats, settings.retry, settings.workers);
    let store = Store::open(&settings.db_path).unwrap();
    Pipeline::new(settings, store, roster, SourceChain::new(source)).unwrap()
}

#[tokio::test]
async fn existing_snapshot_short_circuits_unless_forced() {
    let mut server = Server::new_async().await;
    mock_schedule(&mut server, "04/13/2025", &[(LAL, BOS)]).await;
    mock_roster(&mut server, LAL, &[(1, "Aa Bb")]).await;
    mock_roster(&mut server, BOS, &[(2, "Cc Dd")]).await;

    let dir = tempfile::tempdir().unwrap();
    let source = FakeSource::failing(&[]);
    let mut pipeline = fake_pipeline(dir.path(), &server, source.clone());

    let first = pipeline.pull_date(game_day(), false).await.unwrap();
    assert_eq!(first.rows_inserted, 4);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);

    let skipped = pipeline.pull_date(game_day(), false).await.unwrap();
    assert_eq!(skipped.scopes_short_circuited, 1);
    assert_eq!(skipped.rows_processed, 0);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);

    let forced = pipeline.pull_date(game_day(), true).await.unwrap();
    assert_eq!(forced.rows_processed, 4);
    assert_eq!(forced.rows_inserted, 0);
    assert_eq!(source.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn failure_list_shrinks_once_players_recover() {
    let mut server = Server::new_async().await;
    mock_schedule(&mut server, "04/13/2025", &[(LAL, BOS)]).await;
    mock_roster(&mut server, LAL, &[(1, "Aa Bb"), (2, "Cc Dd")]).await;
    mock_roster(&mut server, BOS, &[(3, "Ee Ff")]).await;

    let dir = tempfile::tempdir().unwrap();
    let source = FakeSource::failing(&[2, 3]);
    let mut pipeline = fake_pipeline(dir.path(), &server, source.clone());
    let list = FailureList::new(dir.path().join("failed_players.json"));

    let first = pipeline.pull_date(game_day(), false).await.unwrap();
    assert_eq!(first.players_failed, 2);
    let ids: Vec<i64> = list.load().unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![2, 3]);

    source.recover();
    let retried = pipeline.retry_failed().await.unwrap();
    assert_eq!(retried.players_succeeded, 2);
    assert_eq!(retried.rows_inserted, 4);
    assert!(list.load().unwrap().is_empty());
    assert_eq!(pipeline.store().row_count().unwrap(), 6);
    assert_keys_unique(pipeline.store());
}

#[tokio::test]
async fn backfill_continues_past_a_broken_date() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/scoreboardv2")
        .match_query(Matcher::UrlEncoded("GameDate".into(), "04/12/2025".into()))
        .with_status(500)
        .create_async()
        .await;
    mock_schedule(&mut server, "04/13/2025", &[(LAL, BOS)]).await;
    mock_roster(&mut server, LAL, &[(1, "Aa Bb")]).await;
    mock_roster(&mut server, BOS, &[(2, "Cc Dd")]).await;

    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = fake_pipeline(dir.path(), &server, FakeSource::failing(&[]));

    let from = NaiveDate::from_ymd_opt(2025, 4, 12).unwrap();
    let summary = pipeline.backfill(from, game_day(), false).await.unwrap();
    assert_eq!(summary.scopes_failed, 1);
    assert_eq!(summary.players_succeeded, 2);
    assert_eq!(summary.rows_inserted, 4);
    assert_eq!(summary.snapshots.len(), 1);
}
