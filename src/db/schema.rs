//! Database schema and record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS call_history (
    id TEXT PRIMARY KEY,
    flow_id TEXT,
    step_id TEXT,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    request TEXT,
    response TEXT,
    status_code INTEGER,
    duration_ms INTEGER,
    label TEXT,
    pinned BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_call_history_created ON call_history(created_at DESC);

CREATE TABLE IF NOT EXISTS saved_requests (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    body TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_saved_requests_updated ON saved_requests(updated_at DESC);

CREATE TABLE IF NOT EXISTS variables (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

// ============================================================
// Call History
// ============================================================

/// A recorded call to the payment network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub flow_id: Option<String>,
    pub step_id: Option<String>,
    pub method: String,
    pub endpoint: String,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub status_code: Option<u16>,
    pub duration_ms: Option<u64>,
    pub label: Option<String>,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when recording a call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    #[serde(default)]
    pub flow_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
    pub method: String,
    pub endpoint: String,
    #[serde(default)]
    pub request: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Partial update of a history entry. An empty label clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryUpdate {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub pinned: Option<bool>,
}

// ============================================================
// Saved Requests
// ============================================================

/// A request template saved by the user for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRequest {
    pub id: String,
    pub name: String,
    pub method: String,
    pub endpoint: String,
    pub body: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSavedRequest {
    pub name: String,
    pub method: String,
    pub endpoint: String,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Partial update of a saved request; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SavedRequestUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// `None` keeps the body, `Some(None)` (explicit `null`) clears it
    #[serde(default, deserialize_with = "present_field")]
    pub body: Option<Option<Value>>,
}

/// Distinguish a field set to `null` from an absent one
fn present_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================
// Variables
// ============================================================

/// Environment variable substituted into flow request templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInput {
    pub key: String,
    pub value: String,
}

/// User preferences, an arbitrary JSON object
pub type Preferences = serde_json::Map<String, Value>;
