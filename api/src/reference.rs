//! Fallback adapter: scrapes per-player game-log tables from the reference site
//! and remaps its column vocabulary onto the canonical schema.
//!
//! The reference site keys players by a textual id we can only guess from the
//! display name, so every row this adapter produces must be treated as a
//! best-effort match.
use crate::client::{ApiError, ApiResult, REFERENCE_BASE, RequestConfig, endpoint_url};
use crate::schema::{Frame, parse_date, parse_minutes};
use crate::Season;
use chrono::NaiveDate;
use log::debug;
use reqwest::{Client, StatusCode, Url};
use scraper::{ElementRef, Html, Selector};
use serde_json::{Number, Value};
use std::time::Duration;

/// Reference-site header -> canonical column. Headers that have no schema
/// column (`Opp`, `GmSc`) are still carried; alignment drops them.
const VOCABULARY: &[(&str, &str)] = &[
    ("Date", "game_date"),
    ("Team", "team_abbreviation"),
    ("Tm", "team_abbreviation"),
    ("Opp", "opponent"),
    ("MP", "min"),
    ("FG", "fgm"),
    ("FGA", "fga"),
    ("FG%", "fg_pct"),
    ("3P", "fg3m"),
    ("3PA", "fg3a"),
    ("3P%", "fg3_pct"),
    ("FT", "ftm"),
    ("FTA", "fta"),
    ("FT%", "ft_pct"),
    ("ORB", "oreb"),
    ("DRB", "dreb"),
    ("TRB", "reb"),
    ("AST", "ast"),
    ("STL", "stl"),
    ("BLK", "blk"),
    ("TOV", "tov"),
    ("PF", "pf"),
    ("PTS", "pts"),
    ("GmSc", "gmsc"),
    ("+/-", "plus_minus"),
];

const TEXT_HEADERS: &[&str] = &["Team", "Tm", "Opp"];
const NAME_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v"];
const DEFAULT_DISAMBIGUATOR: &str = "01";

/// Guess a player's reference-site id from their display name: the first five
/// letters of the surname, the first two of the given name, then `01`.
///
/// Two players whose names share those letters map to the same id; callers
/// must treat a match as unverified.
pub fn derive_reference_id(display_name: &str) -> Option<String> {
    let mut parts: Vec<String> = display_name
        .split_whitespace()
        .map(|part| {
            part.chars()
                .map(fold_diacritic)
                .filter(char::is_ascii_alphabetic)
                .map(|c| c.to_ascii_lowercase())
                .collect::<String>()
        })
        .filter(|part| !part.is_empty())
        .collect();
    while parts.len() > 2 && parts.last().is_some_and(|p| NAME_SUFFIXES.contains(&p.as_str())) {
        parts.pop();
    }
    let (first, last) = match parts.as_slice() {
        [first, .., last] => (first, last),
        _ => return None,
    };
    let last: String = last.chars().take(5).collect();
    let first: String = first.chars().take(2).collect();
    Some(format!("{last}{first}{DEFAULT_DISAMBIGUATOR}"))
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => 'a',
        'ć' | 'č' | 'ç' => 'c',
        'đ' | 'ď' => 'd',
        'é' | 'è' | 'ê' | 'ë' | 'ė' | 'ę' | 'ě' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ł' | 'ľ' => 'l',
        'ñ' | 'ń' | 'ň' | 'ņ' => 'n',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' => 'o',
        'ř' => 'r',
        'š' | 'ś' | 'ş' => 's',
        'ť' | 'ţ' => 't',
        'ú' | 'ù' | 'û' | 'ü' | 'ů' => 'u',
        'ý' | 'ÿ' => 'y',
        'ž' | 'ź' | 'ż' => 'z',
        'Č' | 'Ć' => 'C',
        'Š' => 'S',
        'Ž' => 'Z',
        other => other,
    }
}

/// Client for the reference site's player game-log pages (upstream B).
#[derive(Debug, Clone)]
pub struct ReferenceSource {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ReferenceSource {
    pub fn new(config: &RequestConfig) -> ApiResult<Self> {
        Self::with_base_url(config, REFERENCE_BASE)
    }

    pub fn with_base_url(config: &RequestConfig, base_url: &str) -> ApiResult<Self> {
        Ok(Self {
            client: config.build_client()?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout: config.timeout,
        })
    }

    pub fn game_log_url(&self, reference_id: &str, season: Season) -> ApiResult<Url> {
        let initial = reference_id
            .chars()
            .next()
            .ok_or_else(|| ApiError::Other("empty reference id".into()))?;
        let path = format!("players/{initial}/{reference_id}/gamelog/{}/", season.end_year());
        endpoint_url(&self.base_url, &path, &[])
    }

    /// Fetch and parse one season page. A missing page is "no data".
    pub async fn fetch_game_log(&self, reference_id: &str, season: Season) -> ApiResult<Frame> {
        let url = self.game_log_url(reference_id, season)?;
        let url_str = url.to_string();
        debug!("GET {url_str}");
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::Network(e, url_str.clone()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Frame::default());
        }
        let body = response
            .error_for_status()
            .map_err(|e| ApiError::Api(e, url_str.clone()))?
            .text()
            .await
            .map_err(|e| ApiError::Parsing(e, url_str.clone()))?;

        parse_game_log(&body, season).map_err(|reason| ApiError::Html { url: url_str, reason })
    }
}

// ---------------------------------------------------------------------------
// HTML table parsing
// ---------------------------------------------------------------------------

/// Output columns: `season_id` followed by each canonical name once.
fn output_columns() -> Vec<&'static str> {
    let mut columns = vec!["season_id"];
    for (_, canonical) in VOCABULARY {
        if !columns.contains(canonical) {
            columns.push(canonical);
        }
    }
    columns
}

fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("bad selector {css}: {e:?}"))
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_owned()
}

/// Game rows carry a numeric rank; repeated sub-header rows do not.
fn is_rank(text: &str) -> bool {
    let digits: String = text.chars().filter(|c| *c != '.').collect();
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn numeric(text: &str) -> Value {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn convert(header: &str, text: &str, date: &mut Option<NaiveDate>) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    match header {
        "Date" => {
            *date = parse_date(text);
            date.map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null)
        }
        "MP" => parse_minutes(text)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        h if TEXT_HEADERS.contains(&h) => Value::String(text.to_owned()),
        _ => numeric(text),
    }
}

/// Parse every game-log table on a page (regular season and playoffs),
/// keeping only ranked game rows, sorted ascending by date. Unparseable
/// numbers become null; nothing is inferred.
pub fn parse_game_log(html: &str, season: Season) -> Result<Frame, String> {
    let document = Html::parse_document(html);
    let tables = selector("table")?;
    let header_rows = selector("thead tr")?;
    let header_cells = selector("th")?;
    let body_rows = selector("tbody tr")?;
    let row_cells = selector("th, td")?;

    let columns = output_columns();
    let mut games: Vec<(Option<NaiveDate>, Vec<Value>)> = Vec::new();

    for table in document.select(&tables) {
        let Some(header_row) = table.select(&header_rows).last() else {
            continue;
        };
        let headers: Vec<String> = header_row.select(&header_cells).map(cell_text).collect();
        if !headers.iter().any(|h| h == "PTS") {
            continue;
        }
        let Some(rank_idx) = headers.iter().position(|h| h == "Rk") else {
            continue;
        };
        let playoffs = table
            .value()
            .id()
            .is_some_and(|id| id.contains("playoff") || id.contains("post"));

        for tr in table.select(&body_rows) {
            let texts: Vec<String> = tr.select(&row_cells).map(cell_text).collect();
            if !texts.get(rank_idx).is_some_and(|rk| is_rank(rk)) {
                continue;
            }
            let mut values = vec![Value::Null; columns.len()];
            values[0] = Value::String(season.stats_season_id(playoffs));
            let mut date = None;
            for (header, text) in headers.iter().zip(&texts) {
                let Some((_, canonical)) = VOCABULARY.iter().find(|(h, _)| h == header) else {
                    continue;
                };
                if let Some(slot) = columns.iter().position(|c| c == canonical) {
                    values[slot] = convert(header, text, &mut date);
                }
            }
            games.push((date, values));
        }
    }

    games.sort_by_key(|(date, _)| (date.is_none(), *date));
    Ok(Frame {
        columns: columns.into_iter().map(str::to_owned).collect(),
        rows: games.into_iter().map(|(_, values)| values).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    const PAGE: &str = r#"
    <html><body>
    <table id="pgl_basic">
      <thead><tr><th>Rk</th><th>Gcar</th><th>Date</th><th>Team</th><th></th><th>Opp</th>
        <th>MP</th><th>FG</th><th>FGA</th><th>FG%</th><th>TRB</th><th>PTS</th><th>+/-</th></tr></thead>
      <tbody>
        <tr><th>2</th><td>1500</td><td>2024-10-26</td><td>LAL</td><td>@</td><td>SAC</td>
          <td>36:30</td><td>11</td><td>20</td><td>.550</td><td>9</td><td>32</td><td>+4</td></tr>
        <tr class="thead"><th>Rk</th><td>Gcar</td><td>Date</td><td>Team</td><td></td><td>Opp</td>
          <td>MP</td><td>FG</td><td>FGA</td><td>FG%</td><td>TRB</td><td>PTS</td><td>+/-</td></tr>
        <tr><th>1</th><td>1499</td><td>2024-10-22</td><td>LAL</td><td></td><td>MIN</td>
          <td>34:00</td><td>6</td><td>13</td><td>.462</td><td>5</td><td>16</td><td>-2</td></tr>
        <tr><th></th><td></td><td>2024-10-24</td><td>LAL</td><td></td><td>PHX</td>
          <td colspan="7">Inactive</td></tr>
      </tbody>
    </table>
    <table id="pgl_basic_playoffs">
      <thead><tr><th>Rk</th><th>Date</th><th>Team</th><th>Opp</th><th>MP</th><th>PTS</th></tr></thead>
      <tbody>
        <tr><th>1</th><td>2025-04-19</td><td>LAL</td><td>MIN</td><td>40:02</td><td>Inactive</td></tr>
      </tbody>
    </table>
    <table id="advanced"><thead><tr><th>Rk</th><th>TS%</th></tr></thead>
      <tbody><tr><th>1</th><td>.600</td></tr></tbody></table>
    </body></html>"#;

    fn column(frame: &Frame, name: &str) -> Vec<Value> {
        let idx = frame.column_index(name).unwrap();
        frame.rows.iter().map(|r| r[idx].clone()).collect()
    }

    #[test]
    fn derived_ids_follow_surname_given_name_rule() {
        assert_eq!(derive_reference_id("LeBron James").as_deref(), Some("jamesle01"));
        assert_eq!(derive_reference_id("Stephen Curry").as_deref(), Some("curryst01"));
        assert_eq!(derive_reference_id("Jaren Jackson Jr.").as_deref(), Some("jacksja01"));
        assert_eq!(derive_reference_id("Nikola Jokić").as_deref(), Some("jokicni01"));
        assert_eq!(derive_reference_id("Shai Gilgeous-Alexander").as_deref(), Some("gilgesh01"));
        assert_eq!(derive_reference_id("Nenê"), None);
        assert_eq!(derive_reference_id("   "), None);
    }

    #[test]
    fn parse_keeps_ranked_rows_sorted_by_date() {
        let frame = parse_game_log(PAGE, Season::from_start_year(2024)).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(
            column(&frame, "game_date"),
            vec![json!("2024-10-22"), json!("2024-10-26"), json!("2025-04-19")]
        );
        assert_eq!(column(&frame, "pts"), vec![json!(16), json!(32), Value::Null]);
        assert_eq!(column(&frame, "fgm"), vec![json!(6), json!(11), Value::Null]);
        assert_eq!(column(&frame, "plus_minus"), vec![json!(-2), json!(4), Value::Null]);
        assert_eq!(column(&frame, "opponent")[0], json!("MIN"));
        assert_eq!(
            column(&frame, "season_id"),
            vec![json!("22024"), json!("22024"), json!("42024")]
        );
        let minutes = column(&frame, "min");
        assert_eq!(minutes[1].as_f64(), Some(36.5));
    }

    #[test]
    fn parsed_frame_aligns_with_nulls_for_unknown_fields() {
        let frame = parse_game_log(PAGE, Season::from_start_year(2024)).unwrap();
        let rows = {
            let mut f = frame.clone();
            f.set_column("player_id", json!(2544));
            crate::schema::align(&f).unwrap()
        };
        assert_eq!(rows[0].team_abbreviation.as_deref(), Some("LAL"));
        assert_eq!(rows[0].reb, Some(5));
        assert_eq!(rows[0].team_id, None);
        assert_eq!(rows[0].game_id, None);
        assert_eq!(rows[0].matchup, None);
        assert_eq!(rows[0].wl, None);
    }

    #[test]
    fn page_without_game_tables_is_empty_not_an_error() {
        let frame = parse_game_log("<html><p>nothing</p></html>", Season::from_start_year(2024))
            .unwrap();
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn fetch_builds_season_url_and_treats_404_as_empty() {
        let mut server = Server::new_async().await;
        let page = server
            .mock("GET", "/players/j/jamesle01/gamelog/2025/")
            .with_status(200)
            .with_body(PAGE)
            .create_async()
            .await;
        server
            .mock("GET", "/players/j/jamesxx01/gamelog/2025/")
            .with_status(404)
            .create_async()
            .await;

        let source = ReferenceSource::with_base_url(&RequestConfig::reference(), &server.url())
            .unwrap();
        let season = Season::from_start_year(2024);
        let frame = source.fetch_game_log("jamesle01", season).await.unwrap();
        page.assert_async().await;
        assert_eq!(frame.len(), 3);
        assert!(source.fetch_game_log("jamesxx01", season).await.unwrap().is_empty());
    }
}
