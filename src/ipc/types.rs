use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Per-class monotonic counters backing the poll-based change
    /// subscription: any successful mutation bumps the class's revision and
    /// the dashboard re-queries the day when it sees a newer value.
    pub day_revisions: HashMap<String, i64>,
}

impl AppState {
    pub fn day_revision(&self, class_id: &str) -> i64 {
        self.day_revisions.get(class_id).copied().unwrap_or(0)
    }

    pub fn bump_day_revision(&mut self, class_id: &str) -> i64 {
        let rev = self.day_revisions.entry(class_id.to_string()).or_insert(0);
        *rev += 1;
        *rev
    }
}
