pub mod client;
pub mod reference;
pub mod schema;
pub mod source;
pub mod stats;

pub use client::{ApiError, ApiResult, RequestConfig, StatsApi};
pub use reference::{ReferenceSource, derive_reference_id};
pub use schema::{Frame, GameKey, GameLogRow};
pub use source::{ChainOutput, GameLogSource, SourceChain};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

const TEAMS_JSON: &str = include_str!("../data/teams.json");

static TEAMS: LazyLock<Vec<TeamRef>> =
    LazyLock::new(|| serde_json::from_str(TEAMS_JSON).unwrap_or_default());

// ---------------------------------------------------------------------------
// Domain types, independent of any provider's wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: i64,
    pub abbreviation: String, // "LAL"
    pub name: String,         // "Los Angeles Lakers"
}

/// A player as the stats provider identifies them. `full_name` is the display
/// name and the only input to the reference-site identifier heuristic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerRef {
    pub id: i64,
    pub full_name: String,
}

impl PlayerRef {
    pub fn new(id: i64, full_name: impl Into<String>) -> Self {
        Self { id, full_name: full_name.into() }
    }
}

/// The 30 franchises, embedded at compile time.
pub fn teams() -> &'static [TeamRef] {
    &TEAMS
}

pub fn find_team(id: i64) -> Option<&'static TeamRef> {
    TEAMS.iter().find(|t| t.id == id)
}

/// Tip-off years `Season::from_str` accepts; the league's first season is 1946-47.
const SEASON_START_YEARS: std::ops::RangeInclusive<i32> = 1946..=9998;

/// An NBA season, identified by the calendar year it tips off in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Season {
    start_year: i32,
}

impl Season {
    pub fn from_start_year(start_year: i32) -> Self {
        Self { start_year }
    }

    /// Seasons tip off in October; anything earlier in the calendar year
    /// belongs to the season that started the previous autumn.
    pub fn for_date(date: NaiveDate) -> Self {
        if date.month() >= 10 {
            Self::from_start_year(date.year())
        } else {
            Self::from_start_year(date.year() - 1)
        }
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    /// Year the season ends in; the reference site keys seasons by it.
    pub fn end_year(&self) -> i32 {
        self.start_year.saturating_add(1)
    }

    /// `22024` for the 2024-25 regular season, `42024` for its playoffs.
    pub fn stats_season_id(&self, playoffs: bool) -> String {
        let prefix = if playoffs { 4 } else { 2 };
        format!("{prefix}{}", self.start_year)
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.start_year, self.end_year().rem_euclid(100))
    }
}

impl FromStr for Season {
    type Err = String;

    /// Accepts `2024-25` or the end year alone (`2025`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let year = |part: &str| -> Result<i32, String> {
            part.parse().map_err(|_| format!("invalid season: {s}"))
        };
        let start = match s.split_once('-') {
            Some((start, end)) => {
                let start = year(start)?;
                let end = year(end)?;
                let next = start.checked_add(1).ok_or_else(|| format!("season out of range: {s}"))?;
                if next.rem_euclid(100) != end.rem_euclid(100) {
                    return Err(format!("season years are not consecutive: {s}"));
                }
                start
            }
            None => year(s)?.checked_sub(1).ok_or_else(|| format!("season out of range: {s}"))?,
        };
        if !SEASON_START_YEARS.contains(&start) {
            return Err(format!("season out of range: {s}"));
        }
        Ok(Self::from_start_year(start))
    }
}

impl TryFrom<String> for Season {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Season> for String {
    fn from(season: Season) -> Self {
        season.to_string()
    }
}
