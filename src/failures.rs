//! The retriable failure list: a JSON array of players not yet ingested.
use log::debug;
use nba_api::{PlayerRef, Season};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPlayer {
    pub id: i64,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<Season>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FailedPlayer {
    pub fn player(&self) -> PlayerRef {
        PlayerRef::new(self.id, self.full_name.clone())
    }
}

#[derive(Debug, Error)]
pub enum FailureListError {
    #[error("failure list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failure list {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FailureList {
    path: PathBuf,
}

impl FailureList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty list.
    pub fn load(&self) -> Result<Vec<FailedPlayer>, FailureListError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .map_err(|source| FailureListError::Json { path: self.path.clone(), source })
    }

    /// Replace the list. Written to a sibling temp file, then renamed over.
    pub fn save(&self, players: &[FailedPlayer]) -> Result<(), FailureListError> {
        let body = serde_json::to_string_pretty(players)
            .map_err(|source| FailureListError::Json { path: self.path.clone(), source })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        debug!("saved {} failed players to {}", players.len(), self.path.display());
        Ok(())
    }

    /// Fold a scope's outcome into the stored list: players that succeeded
    /// drop out, newly failed players are added or replace their old entry.
    pub fn merge(
        &self,
        failed: Vec<FailedPlayer>,
        succeeded: &HashSet<i64>,
    ) -> Result<Vec<FailedPlayer>, FailureListError> {
        let fresh: HashSet<i64> = failed.iter().map(|p| p.id).collect();
        let mut merged: Vec<FailedPlayer> = self
            .load()?
            .into_iter()
            .filter(|p| !succeeded.contains(&p.id) && !fresh.contains(&p.id))
            .collect();
        merged.extend(failed);
        merged.sort_by_key(|p| p.id);
        merged.dedup_by_key(|p| p.id);
        self.save(&merged)?;
        Ok(merged)
    }

    fn io_error(&self, source: io::Error) -> FailureListError {
        FailureListError::Io { path: self.path.clone(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(id: i64, error: &str) -> FailedPlayer {
        FailedPlayer {
            id,
            full_name: format!("Player {id}"),
            team_id: Some(1610612747),
            season: Some(Season::from_start_year(2024)),
            error: Some(error.into()),
        }
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let list = FailureList::new(dir.path().join("failed_players.json"));
        assert!(list.load().unwrap().is_empty());
    }

    #[test]
    fn reads_bare_identity_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_players.json");
        fs::write(&path, r#"[{"id": 2544, "full_name": "LeBron James"}]"#).unwrap();
        let loaded = FailureList::new(&path).load().unwrap();
        assert_eq!(loaded[0].player(), PlayerRef::new(2544, "LeBron James"));
        assert_eq!(loaded[0].season, None);
    }

    #[test]
    fn save_round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = FailureList::new(dir.path().join("nested").join("failed.json"));
        list.save(&[failed(1, "timeout")]).unwrap();
        assert_eq!(list.load().unwrap(), vec![failed(1, "timeout")]);
        assert!(!dir.path().join("nested").join("failed.json.tmp").exists());
    }

    #[test]
    fn merge_removes_successes_and_replaces_repeat_failures() {
        let dir = tempfile::tempdir().unwrap();
        let list = FailureList::new(dir.path().join("failed.json"));
        list.save(&[failed(1, "old"), failed(2, "old"), failed(3, "old")]).unwrap();

        let succeeded: HashSet<i64> = [2].into();
        let merged = list.merge(vec![failed(3, "new"), failed(4, "new")], &succeeded).unwrap();

        assert_eq!(merged, vec![failed(1, "old"), failed(3, "new"), failed(4, "new")]);
        assert_eq!(list.load().unwrap(), merged);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(FailureList::new(&path).load(), Err(FailureListError::Json { .. })));
    }
}
