use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::access::Session;
use crate::insights::InsightsClient;

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
    /// At most one live session per connection; a new login replaces it.
    pub session: Option<Session>,
    pub insights: InsightsClient,
}
