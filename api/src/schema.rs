//! Canonical game-log schema shared by every adapter and by the persistence layer.
//!
//! Providers hand over loosely-typed column frames; `align` is the single place
//! where those frames become `GameLogRow`s. Column names are canonicalised to
//! lower snake case here, never per adapter.
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Bumped whenever `COLUMNS` changes shape.
pub const SCHEMA_VERSION: i64 = 1;
pub const TABLE: &str = "player_game_logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    /// Minutes played: numeric or `MM:SS`.
    Minutes,
    Text,
    /// Stored as `YYYY-MM-DD` text.
    Date,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real | ColumnKind::Minutes => "REAL",
            ColumnKind::Text | ColumnKind::Date => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind, required: false }
}

/// Column order here is the storage order, the CSV order and the order of
/// `GameLogRow::cells`.
pub const COLUMNS: &[Column] = &[
    Column { name: "player_id", kind: ColumnKind::Integer, required: true },
    col("player_name", ColumnKind::Text),
    col("season_id", ColumnKind::Text),
    col("team_id", ColumnKind::Integer),
    col("team_abbreviation", ColumnKind::Text),
    col("team_name", ColumnKind::Text),
    col("game_id", ColumnKind::Text),
    col("game_date", ColumnKind::Date),
    col("matchup", ColumnKind::Text),
    col("wl", ColumnKind::Text),
    col("min", ColumnKind::Minutes),
    col("pts", ColumnKind::Integer),
    col("fgm", ColumnKind::Integer),
    col("fga", ColumnKind::Integer),
    col("fg_pct", ColumnKind::Real),
    col("fg3m", ColumnKind::Integer),
    col("fg3a", ColumnKind::Integer),
    col("fg3_pct", ColumnKind::Real),
    col("ftm", ColumnKind::Integer),
    col("fta", ColumnKind::Integer),
    col("ft_pct", ColumnKind::Real),
    col("oreb", ColumnKind::Integer),
    col("dreb", ColumnKind::Integer),
    col("reb", ColumnKind::Integer),
    col("ast", ColumnKind::Integer),
    col("stl", ColumnKind::Integer),
    col("blk", ColumnKind::Integer),
    col("tov", ColumnKind::Integer),
    col("pf", ColumnKind::Integer),
    col("plus_minus", ColumnKind::Real),
    col("source", ColumnKind::Text),
];

pub fn column_names() -> impl Iterator<Item = &'static str> {
    COLUMNS.iter().map(|c| c.name)
}

// ---------------------------------------------------------------------------
// Typed rows
// ---------------------------------------------------------------------------

/// Composite natural key of a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameKey {
    pub player_id: i64,
    pub game_id: String,
}

impl GameKey {
    pub fn new(player_id: i64, game_id: impl Into<String>) -> Self {
        Self { player_id, game_id: game_id.into() }
    }
}

/// One player's box score for one game. Missing upstream values stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameLogRow {
    pub player_id: i64,
    pub player_name: Option<String>,
    pub season_id: Option<String>,
    pub team_id: Option<i64>,
    pub team_abbreviation: Option<String>,
    pub team_name: Option<String>,
    pub game_id: Option<String>,
    pub game_date: Option<NaiveDate>,
    pub matchup: Option<String>,
    pub wl: Option<String>,
    pub min: Option<f64>,
    pub pts: Option<i64>,
    pub fgm: Option<i64>,
    pub fga: Option<i64>,
    pub fg_pct: Option<f64>,
    pub fg3m: Option<i64>,
    pub fg3a: Option<i64>,
    pub fg3_pct: Option<f64>,
    pub ftm: Option<i64>,
    pub fta: Option<i64>,
    pub ft_pct: Option<f64>,
    pub oreb: Option<i64>,
    pub dreb: Option<i64>,
    pub reb: Option<i64>,
    pub ast: Option<i64>,
    pub stl: Option<i64>,
    pub blk: Option<i64>,
    pub tov: Option<i64>,
    pub pf: Option<i64>,
    pub plus_minus: Option<f64>,
    pub source: Option<String>,
}

/// A single storable value, in `COLUMNS` order.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<Option<i64>> for Cell {
    fn from(v: Option<i64>) -> Self {
        v.map(Cell::Integer).unwrap_or(Cell::Null)
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map(Cell::Real).unwrap_or(Cell::Null)
    }
}

impl From<&Option<String>> for Cell {
    fn from(v: &Option<String>) -> Self {
        v.clone().map(Cell::Text).unwrap_or(Cell::Null)
    }
}

impl GameLogRow {
    /// `None` for rows whose provider could not supply a game id.
    pub fn key(&self) -> Option<GameKey> {
        self.game_id
            .as_ref()
            .map(|game_id| GameKey::new(self.player_id, game_id.clone()))
    }

    pub fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Integer(self.player_id),
            (&self.player_name).into(),
            (&self.season_id).into(),
            self.team_id.into(),
            (&self.team_abbreviation).into(),
            (&self.team_name).into(),
            (&self.game_id).into(),
            self.game_date
                .map(|d| Cell::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Cell::Null),
            (&self.matchup).into(),
            (&self.wl).into(),
            self.min.into(),
            self.pts.into(),
            self.fgm.into(),
            self.fga.into(),
            self.fg_pct.into(),
            self.fg3m.into(),
            self.fg3a.into(),
            self.fg3_pct.into(),
            self.ftm.into(),
            self.fta.into(),
            self.ft_pct.into(),
            self.oreb.into(),
            self.dreb.into(),
            self.reb.into(),
            self.ast.into(),
            self.stl.into(),
            self.blk.into(),
            self.tov.into(),
            self.pf.into(),
            self.plus_minus.into(),
            (&self.source).into(),
        ]
    }
}

/// True when the batch is non-empty and carries at least one scored game.
pub fn has_usable_rows(rows: &[GameLogRow]) -> bool {
    rows.iter().any(|r| r.pts.is_some())
}

// ---------------------------------------------------------------------------
// Frames: provider-shaped tables before alignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn lowercase_columns(&mut self) {
        for c in &mut self.columns {
            *c = c.trim().to_lowercase();
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Overwrite (or append) a column holding the same value on every row.
    pub fn set_column(&mut self, name: &str, value: Value) {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    if let Some(cell) = row.get_mut(idx) {
                        *cell = value.clone();
                    }
                }
            }
            None => {
                self.columns.push(name.to_owned());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no schema columns in batch (got: {})", .0.join(", "))]
    NoOverlap(Vec<String>),
    #[error("row {row} has {found} cells, header has {expected}")]
    RowWidth { row: usize, expected: usize, found: usize },
    #[error("row {row}: required column {column} is null")]
    MissingValue { row: usize, column: &'static str },
    #[error("row {row}: cannot coerce {value} into {column}")]
    Coerce { row: usize, column: &'static str, value: String },
    #[error("row {row}: {source}")]
    Decode {
        row: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Align a frame onto the canonical schema.
///
/// Unknown columns are dropped, schema columns absent from the frame become
/// null, and every cell is coerced to its column type. A single bad cell fails
/// the whole frame so callers never persist half a batch.
pub fn align(frame: &Frame) -> Result<Vec<GameLogRow>, SchemaError> {
    let lowered: Vec<String> = frame.columns.iter().map(|c| c.trim().to_lowercase()).collect();
    let positions: Vec<(&Column, Option<usize>)> = COLUMNS
        .iter()
        .map(|column| (column, lowered.iter().position(|c| c == column.name)))
        .collect();

    if positions.iter().all(|(_, pos)| pos.is_none()) {
        return Err(SchemaError::NoOverlap(frame.columns.clone()));
    }

    let dropped: Vec<&str> = lowered
        .iter()
        .filter(|c| !COLUMNS.iter().any(|column| column.name == c.as_str()))
        .map(String::as_str)
        .collect();
    if !dropped.is_empty() {
        debug!("dropping non-schema columns: {}", dropped.join(", "));
    }

    frame
        .rows
        .iter()
        .enumerate()
        .map(|(row_idx, row)| {
            if row.len() != frame.columns.len() {
                return Err(SchemaError::RowWidth {
                    row: row_idx,
                    expected: frame.columns.len(),
                    found: row.len(),
                });
            }
            let mut record = Map::with_capacity(COLUMNS.len());
            for (column, pos) in &positions {
                let raw = pos.map(|p| &row[p]).unwrap_or(&Value::Null);
                let value = coerce(column.kind, raw).ok_or_else(|| SchemaError::Coerce {
                    row: row_idx,
                    column: column.name,
                    value: raw.to_string(),
                })?;
                if column.required && value.is_null() {
                    return Err(SchemaError::MissingValue { row: row_idx, column: column.name });
                }
                record.insert(column.name.to_owned(), value);
            }
            serde_json::from_value(Value::Object(record))
                .map_err(|source| SchemaError::Decode { row: row_idx, source })
        })
        .collect()
}

/// `None` means the value cannot be represented in the column; `Some(Null)`
/// means the value is absent.
fn coerce(kind: ColumnKind, raw: &Value) -> Option<Value> {
    match raw {
        Value::Null => return Some(Value::Null),
        Value::String(s) if s.trim().is_empty() => return Some(Value::Null),
        _ => {}
    }
    match kind {
        ColumnKind::Integer => match raw {
            Value::Number(n) => n.as_i64().or_else(|| integral(n.as_f64()?)).map(Value::from),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| integral(s.parse::<f64>().ok()?))
                    .map(Value::from)
            }
            _ => None,
        },
        ColumnKind::Real => match raw {
            Value::Number(n) => n.as_f64().and_then(Number::from_f64).map(Value::Number),
            Value::String(s) => parse_real(s).and_then(Number::from_f64).map(Value::Number),
            _ => None,
        },
        ColumnKind::Minutes => match raw {
            Value::Number(n) => n.as_f64().and_then(Number::from_f64).map(Value::Number),
            Value::String(s) => parse_minutes(s).and_then(Number::from_f64).map(Value::Number),
            _ => None,
        },
        ColumnKind::Text => match raw {
            Value::String(s) => Some(Value::String(s.trim().to_owned())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ColumnKind::Date => match raw {
            Value::String(s) => {
                parse_date(s).map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            }
            _ => None,
        },
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

fn parse_real(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Minutes as a number (`34`, `33.5`) or `MM:SS` (`34:12` -> 34.2).
pub fn parse_minutes(s: &str) -> Option<f64> {
    let s = s.trim();
    match s.split_once(':') {
        Some((mins, secs)) => {
            let mins = mins.parse::<u32>().ok()?;
            let secs = secs.parse::<u32>().ok().filter(|s| *s < 60)?;
            Some(f64::from(mins) + f64::from(secs) / 60.0)
        }
        None => parse_real(s),
    }
}

/// Accepts `2025-04-13`, ISO datetimes and the stats API's `APR 13, 2025`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(s, "%b %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(&title_case_month(s), "%b %d, %Y"))
        .ok()
}

fn title_case_month(s: &str) -> String {
    let (month, rest) = s.split_at(s.find(' ').unwrap_or(s.len()));
    let mut chars = month.chars();
    match chars.next() {
        None => s.to_owned(),
        Some(first) => {
            first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase() + rest
        }
    }
}
