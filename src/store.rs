//! SQLite persistence for game-log rows.
//!
//! One table, shaped by `nba_api::schema::COLUMNS`, with a unique index on the
//! composite key. The store is single-writer per run; writes that must see a
//! consistent key set run inside an IMMEDIATE transaction.
use crate::dedup::{StoredGames, filter_new};
use chrono::NaiveDate;
use log::{debug, info};
use nba_api::schema::{COLUMNS, Cell, SCHEMA_VERSION, SchemaError, TABLE, align, parse_date};
use nba_api::{Frame, GameKey, GameLogRow};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, TransactionBehavior, params_from_iter};
use serde_json::{Number, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Secondary indexes; the composite one also enforces key uniqueness.
const INDEXES: &[(&str, &str)] = &[
    ("idx_game_date", "CREATE INDEX IF NOT EXISTS idx_game_date ON player_game_logs (game_date)"),
    ("idx_player_id", "CREATE INDEX IF NOT EXISTS idx_player_id ON player_game_logs (player_id)"),
    (
        "idx_player_game",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_player_game ON player_game_logs (player_id, game_id)",
    ),
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store schema version {found} is not supported (expected {expected})")]
    Version { found: i64, expected: i64 },
    #[error("table player_game_logs is missing columns: {}", .0.join(", "))]
    Mismatch(Vec<String>),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("stored row is malformed: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Counts from one merge: rows offered and rows actually inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub processed: usize,
    pub inserted: usize,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!("opened store at {}", path.display());
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    /// Create the table and its indexes if absent. Safe on every run.
    pub fn ensure_schema(&mut self) -> StoreResult<()> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let version: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            return Err(StoreError::Version { found: version, expected: SCHEMA_VERSION });
        }

        let present = table_columns(&tx)?;
        if present.is_empty() {
            tx.execute_batch(&create_table_sql())?;
            info!("created table {TABLE}");
        } else {
            let missing: Vec<String> = COLUMNS
                .iter()
                .filter(|c| !present.contains(c.name))
                .map(|c| c.name.to_owned())
                .collect();
            if !missing.is_empty() {
                return Err(StoreError::Mismatch(missing));
            }
        }
        for (name, sql) in INDEXES {
            tx.execute_batch(sql)?;
            debug!("ensured index {name}");
        }
        tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
        tx.commit()?;
        Ok(())
    }

    /// Every persisted `(player_id, game_id)` pair. Full scan.
    pub fn existing_keys(&self) -> StoreResult<HashSet<GameKey>> {
        query_keys(&self.conn)
    }

    /// Latest stored game date per player.
    pub fn latest_game_dates(&self) -> StoreResult<HashMap<i64, NaiveDate>> {
        query_watermarks(&self.conn)
    }

    /// Append already-deduplicated rows in one transaction. Any failing row
    /// rolls the whole batch back.
    pub fn append(&mut self, rows: &[GameLogRow]) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;
        let inserted = insert_rows(&tx, rows)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Align a provider-shaped frame onto the schema, then append it.
    pub fn append_frame(&mut self, frame: &Frame) -> StoreResult<usize> {
        let rows = align(frame)?;
        self.append(&rows)
    }

    /// Dedup against the key set read inside the same write transaction,
    /// then insert the survivors.
    pub fn merge_new(&mut self, rows: Vec<GameLogRow>) -> StoreResult<MergeReport> {
        let processed = rows.len();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = StoredGames {
            keys: query_keys(&tx)?,
            watermarks: query_watermarks(&tx)?,
            keyless: query_keyless_days(&tx)?,
        };
        let fresh = filter_new(rows, &stored);
        let inserted = insert_rows(&tx, &fresh)?;
        tx.commit()?;
        Ok(MergeReport { processed, inserted })
    }

    pub fn row_count(&self) -> StoreResult<usize> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// A player's stored rows, oldest first.
    pub fn rows_for_player(&self, player_id: i64) -> StoreResult<Vec<GameLogRow>> {
        let columns: Vec<&str> = COLUMNS.iter().map(|c| c.name).collect();
        let sql = format!(
            "SELECT {} FROM {TABLE} WHERE player_id = ?1 ORDER BY game_date, id",
            columns.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut frame = Frame::new(columns.iter().map(|c| c.to_string()).collect());
        let mut rows = stmt.query([player_id])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(json_value(row.get_ref(idx)?)?);
            }
            frame.rows.push(values);
        }
        Ok(align(&frame)?)
    }
}

fn create_table_sql() -> String {
    let columns: Vec<String> = COLUMNS
        .iter()
        .map(|c| {
            let not_null = if c.required { " NOT NULL" } else { "" };
            format!("    {} {}{not_null}", c.name, c.kind.sql_type())
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {TABLE} (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n{}\n)",
        columns.join(",\n")
    )
}

fn table_columns(conn: &Connection) -> StoreResult<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({TABLE})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}

fn query_keys(conn: &Connection) -> StoreResult<HashSet<GameKey>> {
    let mut stmt =
        conn.prepare(&format!("SELECT player_id, game_id FROM {TABLE} WHERE game_id IS NOT NULL"))?;
    let keys = stmt
        .query_map([], |row| Ok(GameKey::new(row.get(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(keys)
}

fn query_watermarks(conn: &Connection) -> StoreResult<HashMap<i64, NaiveDate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT player_id, MAX(game_date) FROM {TABLE} WHERE game_date IS NOT NULL GROUP BY player_id"
    ))?;
    let mut watermarks = HashMap::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let player_id: i64 = row.get(0)?;
        let raw: String = row.get(1)?;
        let date = parse_date(&raw)
            .ok_or_else(|| StoreError::Corrupt(format!("game_date {raw:?} for player {player_id}")))?;
        watermarks.insert(player_id, date);
    }
    Ok(watermarks)
}

fn query_keyless_days(conn: &Connection) -> StoreResult<HashSet<(i64, NaiveDate)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT player_id, game_date FROM {TABLE} WHERE game_id IS NULL AND game_date IS NOT NULL"
    ))?;
    let mut days = HashSet::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let player_id: i64 = row.get(0)?;
        let raw: String = row.get(1)?;
        let date = parse_date(&raw)
            .ok_or_else(|| StoreError::Corrupt(format!("game_date {raw:?} for player {player_id}")))?;
        days.insert((player_id, date));
    }
    Ok(days)
}

fn insert_rows(conn: &Connection, rows: &[GameLogRow]) -> StoreResult<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let names: Vec<&str> = COLUMNS.iter().map(|c| c.name).collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {TABLE} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    for row in rows {
        stmt.execute(params_from_iter(row.cells().into_iter().map(sql_value)))?;
    }
    debug!("inserted {} rows into {TABLE}", rows.len());
    Ok(rows.len())
}

fn sql_value(cell: Cell) -> SqlValue {
    match cell {
        Cell::Null => SqlValue::Null,
        Cell::Integer(i) => SqlValue::Integer(i),
        Cell::Real(f) => SqlValue::Real(f),
        Cell::Text(s) => SqlValue::Text(s),
    }
}

fn json_value(value: ValueRef<'_>) -> StoreResult<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(
            std::str::from_utf8(bytes)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?
                .to_owned(),
        ),
        ValueRef::Blob(_) => return Err(StoreError::Corrupt("unexpected blob".into())),
    })
}
