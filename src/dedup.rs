//! Filters a fetched batch down to rows the store has not seen.
use chrono::NaiveDate;
use log::debug;
use nba_api::{GameKey, GameLogRow};
use std::collections::{HashMap, HashSet};

/// What the store already holds, read inside the write transaction.
#[derive(Debug, Clone, Default)]
pub struct StoredGames {
    /// Every `(player_id, game_id)` with a game id.
    pub keys: HashSet<GameKey>,
    /// Latest stored `game_date` per player.
    pub watermarks: HashMap<i64, NaiveDate>,
    /// `(player_id, game_date)` of rows stored without a game id.
    pub keyless: HashSet<(i64, NaiveDate)>,
}

/// Keep rows whose `(player_id, game_id)` is absent from the store.
///
/// Keys are compared as exact tuples. Within the batch the first occurrence
/// of a key wins. Rows without a game id cannot be keyed; they survive only
/// when dated strictly after the player's latest stored game, at most one per
/// player and date. A keyed row is dropped when a keyless row already covers
/// its player and date. Surviving rows are returned untouched and in input
/// order.
pub fn filter_new(rows: Vec<GameLogRow>, stored: &StoredGames) -> Vec<GameLogRow> {
    let total = rows.len();
    let mut seen: HashSet<GameKey> = HashSet::new();
    let mut seen_keyless: HashSet<(i64, NaiveDate)> = HashSet::new();
    let mut keyed_dates: HashSet<(i64, NaiveDate)> = HashSet::new();

    let fresh: Vec<GameLogRow> = rows
        .into_iter()
        .filter(|row| match row.key() {
            Some(key) => {
                let day = row.game_date.map(|date| (row.player_id, date));
                let covered = day.is_some_and(|day| {
                    stored.keyless.contains(&day) || seen_keyless.contains(&day)
                });
                if covered || stored.keys.contains(&key) || !seen.insert(key) {
                    return false;
                }
                keyed_dates.extend(day);
                true
            }
            None => {
                let Some(date) = row.game_date else {
                    return false;
                };
                let after_watermark = stored
                    .watermarks
                    .get(&row.player_id)
                    .is_none_or(|latest| date > *latest);
                let day = (row.player_id, date);
                after_watermark && !keyed_dates.contains(&day) && seen_keyless.insert(day)
            }
        })
        .collect();

    debug!("dedup kept {} of {total} rows", fresh.len());
    fresh
}
