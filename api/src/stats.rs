//! Stats API raw wire types: serde shapes for the `resultSets` envelope every
//! stats endpoint returns. Mapped to domain types in client.rs.
use crate::schema::Frame;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(default)]
    pub result_sets: Vec<ResultSet>,
}

impl StatsResponse {
    pub fn result_set(&self, name: &str) -> Option<&ResultSet> {
        self.result_sets.iter().find(|rs| rs.name.eq_ignore_ascii_case(name))
    }

    /// Take a named result set, falling back to the first one. Some endpoints
    /// rename their primary set between API revisions.
    pub fn take_result_set(mut self, name: &str) -> Option<ResultSet> {
        let idx = self
            .result_sets
            .iter()
            .position(|rs| rs.name.eq_ignore_ascii_case(name))
            .unwrap_or(0);
        (idx < self.result_sets.len()).then(|| self.result_sets.swap_remove(idx))
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ResultSet {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default, rename = "rowSet")]
    pub row_set: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.eq_ignore_ascii_case(header))
    }

    /// Values of one column, skipping rows where it is missing.
    pub fn values<'a>(&'a self, header: &str) -> impl Iterator<Item = &'a Value> + 'a {
        let idx = self.column(header);
        self.row_set
            .iter()
            .filter_map(move |row| idx.and_then(|i| row.get(i)))
    }

    pub fn into_frame(self) -> Frame {
        Frame { columns: self.headers, rows: self.row_set }
    }
}

/// Stats ids arrive as numbers on most endpoints and as strings on a few.
pub fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_sets_deserialize_and_expose_columns() {
        let raw = json!({
            "resource": "scoreboardV2",
            "resultSets": [
                {"name": "GameHeader", "headers": ["GAME_ID", "HOME_TEAM_ID", "VISITOR_TEAM_ID"],
                 "rowSet": [["0022400001", 1610612747, "1610612738"]]},
                {"name": "LineScore", "headers": [], "rowSet": []}
            ]
        });
        let resp: StatsResponse = serde_json::from_value(raw).unwrap();
        let header = resp.result_set("gameheader").unwrap();
        let home: Vec<i64> = header.values("HOME_TEAM_ID").filter_map(value_as_id).collect();
        let away: Vec<i64> = header.values("VISITOR_TEAM_ID").filter_map(value_as_id).collect();
        assert_eq!(home, vec![1610612747]);
        assert_eq!(away, vec![1610612738]);
    }

    #[test]
    fn take_result_set_falls_back_to_first() {
        let resp = StatsResponse {
            result_sets: vec![ResultSet { name: "Renamed".into(), ..Default::default() }],
        };
        assert_eq!(resp.take_result_set("PlayerGameLog").unwrap().name, "Renamed");
        assert!(StatsResponse::default().take_result_set("PlayerGameLog").is_none());
    }
}
