use crate::schema::{Frame, SchemaError};
use crate::stats::{StatsResponse, value_as_id};
use crate::{PlayerRef, Season};
use chrono::NaiveDate;
use log::debug;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER};
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

pub const STATS_BASE: &str = "https://stats.nba.com/stats";
pub const REFERENCE_BASE: &str = "https://www.basketball-reference.com";

const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error for {1}: {0}")]
    Network(#[source] reqwest::Error, String),
    #[error("API error for {1}: {0}")]
    Api(#[source] reqwest::Error, String),
    #[error("Parse error for {1}: {0}")]
    Parsing(#[source] reqwest::Error, String),
    #[error("Malformed page at {url}: {reason}")]
    Html { url: String, reason: String },
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Error: {0}")]
    Other(String),
}

impl ApiError {
    /// Transport, status and body-decode failures may succeed on a later
    /// attempt; malformed pages and schema mismatches will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(..) | ApiError::Api(..) | ApiError::Parsing(..))
    }
}

// ---------------------------------------------------------------------------
// Request configuration
// ---------------------------------------------------------------------------

/// Immutable per-adapter request settings. Each adapter builds its own
/// `reqwest::Client` from one of these; nothing mutates headers afterwards.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub user_agent: String,
    pub accept: String,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl RequestConfig {
    /// Headers the stats API insists on before it will answer.
    pub fn stats() -> Self {
        Self {
            user_agent: BROWSER_UA.into(),
            accept: "application/json, text/plain, */*".into(),
            referer: Some("https://www.nba.com/".into()),
            origin: Some("https://www.nba.com".into()),
            extra_headers: vec![
                ("x-nba-stats-origin".into(), "stats".into()),
                ("x-nba-stats-token".into(), "true".into()),
            ],
            timeout: Duration::from_secs(30),
        }
    }

    pub fn reference() -> Self {
        Self {
            user_agent: BROWSER_UA.into(),
            accept: "text/html,application/xhtml+xml".into(),
            referer: None,
            origin: None,
            extra_headers: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn build_client(&self) -> ApiResult<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, header_value(&self.accept)?);
        if let Some(referer) = &self.referer {
            headers.insert(REFERER, header_value(referer)?);
        }
        if let Some(origin) = &self.origin {
            headers.insert(ORIGIN, header_value(origin)?);
        }
        for (name, value) in &self.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::Other(format!("invalid header name {name}: {e}")))?;
            headers.insert(name, header_value(value)?);
        }
        Client::builder()
            .user_agent(self.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Other(format!("could not build http client: {e}")))
    }
}

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::Other(format!("invalid header value {value}: {e}")))
}

pub(crate) fn endpoint_url(base: &str, path: &str, query: &[(&str, String)]) -> ApiResult<Url> {
    let raw = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    let parsed = if query.is_empty() {
        Url::parse(&raw)
    } else {
        Url::parse_with_params(&raw, query.iter().map(|(k, v)| (*k, v.as_str())))
    };
    parsed.map_err(|e| ApiError::Other(format!("invalid url {raw}: {e}")))
}

// ---------------------------------------------------------------------------
// Stats API client (upstream A)
// ---------------------------------------------------------------------------

/// Client for the league stats API: game logs, rosters and the daily scoreboard.
#[derive(Debug, Clone)]
pub struct StatsApi {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl StatsApi {
    pub fn new(config: &RequestConfig) -> ApiResult<Self> {
        Self::with_base_url(config, STATS_BASE)
    }

    pub fn with_base_url(config: &RequestConfig, base_url: &str) -> ApiResult<Self> {
        Ok(Self {
            client: config.build_client()?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout: config.timeout,
        })
    }

    /// Fetch a player's regular-season game log as a frame with lower-cased
    /// columns. An unknown player or season yields an empty frame.
    pub async fn fetch_game_log(&self, player: &PlayerRef, season: Season) -> ApiResult<Frame> {
        let query = [
            ("PlayerID", player.id.to_string()),
            ("Season", season.to_string()),
            ("SeasonType", "Regular Season".to_owned()),
        ];
        let raw: StatsResponse = self.get("playergamelog", &query).await?;
        let Some(set) = raw.take_result_set("PlayerGameLog") else {
            return Ok(Frame::default());
        };
        let mut frame = set.into_frame();
        frame.lowercase_columns();
        Ok(frame)
    }

    /// Fetch the players on one team's roster for a season.
    pub async fn fetch_roster(&self, team_id: i64, season: Season) -> ApiResult<Vec<PlayerRef>> {
        let query = [("TeamID", team_id.to_string()), ("Season", season.to_string())];
        let raw: StatsResponse = self.get("commonteamroster", &query).await?;
        let Some(set) = raw.result_set("CommonTeamRoster") else {
            return Ok(Vec::new());
        };
        let (Some(id_idx), Some(name_idx)) = (set.column("PLAYER_ID"), set.column("PLAYER")) else {
            return Err(ApiError::NotFound(format!(
                "roster for team {team_id} lacks PLAYER_ID/PLAYER columns"
            )));
        };
        let players = set
            .row_set
            .iter()
            .filter_map(|row| {
                let id = row.get(id_idx).and_then(value_as_id)?;
                let name = row.get(name_idx).and_then(Value::as_str)?.trim().to_owned();
                Some(PlayerRef { id, full_name: name })
            })
            .collect();
        Ok(players)
    }

    /// Ids of every team with a game on `date`, ascending and de-duplicated.
    pub async fn fetch_scoreboard(&self, date: NaiveDate) -> ApiResult<Vec<i64>> {
        let query = [
            ("GameDate", date.format("%m/%d/%Y").to_string()),
            ("LeagueID", "00".to_owned()),
            ("DayOffset", "0".to_owned()),
        ];
        let raw: StatsResponse = self.get("scoreboardv2", &query).await?;
        let Some(header) = raw.result_set("GameHeader") else {
            return Ok(Vec::new());
        };
        let mut team_ids: Vec<i64> = header
            .values("HOME_TEAM_ID")
            .chain(header.values("VISITOR_TEAM_ID"))
            .filter_map(value_as_id)
            .collect();
        team_ids.sort_unstable();
        team_ids.dedup();
        Ok(team_ids)
    }

    async fn get<T: Default + serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        let url = endpoint_url(&self.base_url, path, query)?;
        let url_str = url.to_string();
        debug!("GET {url_str}");
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::Network(e, url_str.clone()))?;

        match response.error_for_status() {
            Ok(res) => res
                .json::<T>()
                .await
                .map_err(|e| ApiError::Parsing(e, url_str)),
            Err(e) => {
                if e.status().map(|s| s.is_client_error()).unwrap_or(false) {
                    Ok(T::default())
                } else {
                    Err(ApiError::Api(e, url_str))
                }
            }
        }
    }
}
