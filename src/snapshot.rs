//! Per-run CSV audit files, one per scope, in canonical column order.
use anyhow::{Context, Result};
use log::info;
use nba_api::GameLogRow;
use nba_api::schema::{Cell, column_names};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `stats_{label}.csv` inside the snapshot directory.
    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("stats_{label}.csv"))
    }

    pub fn exists(&self, label: &str) -> bool {
        self.path_for(label).is_file()
    }

    /// Write every fetched row, new or not. Returns the file written.
    pub fn write(&self, label: &str, rows: &[GameLogRow]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating snapshot dir {}", self.dir.display()))?;
        let path = self.path_for(label);
        write_csv(&path, rows).with_context(|| format!("writing snapshot {}", path.display()))?;
        info!("wrote {} rows to {}", rows.len(), path.display());
        Ok(path)
    }
}

fn write_csv(path: &Path, rows: &[GameLogRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(column_names())?;
    for row in rows {
        writer.write_record(row.cells().into_iter().map(cell_text))?;
    }
    writer.flush()?;
    Ok(())
}

fn cell_text(cell: Cell) -> String {
    match cell {
        Cell::Null => String::new(),
        Cell::Integer(i) => i.to_string(),
        Cell::Real(f) => f.to_string(),
        Cell::Text(s) => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn writes_header_and_rows_in_schema_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("player_logs"));
        assert!(!writer.exists("2025-04-13"));

        let row = GameLogRow {
            player_id: 2544,
            player_name: Some("LeBron James".into()),
            game_id: Some("0022401199".into()),
            game_date: NaiveDate::from_ymd_opt(2025, 4, 13),
            pts: Some(31),
            ..Default::default()
        };
        let path = writer.write("2025-04-13", &[row]).unwrap();
        assert!(writer.exists("2025-04-13"));
        assert!(path.ends_with("stats_2025-04-13.csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.get(0), Some("player_id"));
        assert_eq!(headers.len(), nba_api::schema::COLUMNS.len());
        let record = reader.records().next().unwrap().unwrap();
        let pts = headers.iter().position(|h| h == "pts").unwrap();
        let team = headers.iter().position(|h| h == "team_id").unwrap();
        assert_eq!(&record[0], "2544");
        assert_eq!(&record[pts], "31");
        assert_eq!(&record[team], "");
    }
}
