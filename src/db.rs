//! Database module
//!
//! Persistence for call history, saved requests, variables and preferences.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("Database connection lock poisoned")]
    Poisoned,
}

impl DbError {
    fn not_found(resource: &'static str, id: &str) -> Self {
        DbError::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

const HISTORY_COLUMNS: &str = "id, flow_id, step_id, method, endpoint, request, response, \
                               status_code, duration_ms, label, pinned, created_at";
const SAVED_REQUEST_COLUMNS: &str = "id, name, method, endpoint, body, created_at, updated_at";

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // ==================== Call History ====================

    /// Record a call
    pub fn add_history_entry(&self, entry: &NewHistoryEntry) -> DbResult<HistoryEntry> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO call_history (id, flow_id, step_id, method, endpoint, request, response, status_code, duration_ms, pinned, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
            params![
                id,
                entry.flow_id,
                entry.step_id,
                entry.method,
                entry.endpoint,
                to_json_text(entry.request.as_ref())?,
                to_json_text(entry.response.as_ref())?,
                entry.status_code,
                entry.duration_ms.and_then(|d| i64::try_from(d).ok()),
                now.to_rfc3339(),
            ],
        )?;

        Ok(HistoryEntry {
            id,
            flow_id: entry.flow_id.clone(),
            step_id: entry.step_id.clone(),
            method: entry.method.clone(),
            endpoint: entry.endpoint.clone(),
            request: entry.request.clone(),
            response: entry.response.clone(),
            status_code: entry.status_code,
            duration_ms: entry.duration_ms,
            label: None,
            pinned: false,
            created_at: now,
        })
    }

    /// Most recent calls first
    pub fn list_history(&self, limit: usize) -> DbResult<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM call_history
             ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], parse_history_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn get_history_entry(&self, id: &str) -> DbResult<HistoryEntry> {
        let conn = self.conn()?;
        Self::get_history_entry_internal(&conn, id)
    }

    fn get_history_entry_internal(conn: &Connection, id: &str) -> DbResult<HistoryEntry> {
        conn.query_row(
            &format!("SELECT {HISTORY_COLUMNS} FROM call_history WHERE id = ?1"),
            params![id],
            parse_history_row,
        )
        .optional()?
        .ok_or_else(|| DbError::not_found("History entry", id))
    }

    /// Update label and pinned flag
    pub fn update_history_entry(&self, id: &str, update: &HistoryUpdate) -> DbResult<HistoryEntry> {
        let conn = self.conn()?;

        let updated = conn.execute(
            "UPDATE call_history SET
                label = CASE WHEN ?1 IS NULL THEN label WHEN ?1 = '' THEN NULL ELSE ?1 END,
                pinned = COALESCE(?2, pinned)
             WHERE id = ?3",
            params![update.label, update.pinned, id],
        )?;

        if updated == 0 {
            return Err(DbError::not_found("History entry", id));
        }
        Self::get_history_entry_internal(&conn, id)
    }

    pub fn delete_history_entry(&self, id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM call_history WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(DbError::not_found("History entry", id));
        }
        Ok(())
    }

    /// Delete all unpinned entries, returning how many were removed
    pub fn clear_history(&self) -> DbResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM call_history WHERE pinned = 0", [])?)
    }

    // ==================== Saved Requests ====================

    pub fn create_saved_request(&self, request: &NewSavedRequest) -> DbResult<SavedRequest> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO saved_requests (id, name, method, endpoint, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                request.name,
                request.method,
                request.endpoint,
                to_json_text(request.body.as_ref())?,
                now.to_rfc3339(),
            ],
        )?;

        Ok(SavedRequest {
            id,
            name: request.name.clone(),
            method: request.method.clone(),
            endpoint: request.endpoint.clone(),
            body: request.body.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Most recently updated first
    pub fn list_saved_requests(&self) -> DbResult<Vec<SavedRequest>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SAVED_REQUEST_COLUMNS} FROM saved_requests
             ORDER BY updated_at DESC, rowid DESC"
        ))?;

        let rows = stmt.query_map([], parse_saved_request_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn get_saved_request(&self, id: &str) -> DbResult<SavedRequest> {
        let conn = self.conn()?;
        Self::get_saved_request_internal(&conn, id)
    }

    fn get_saved_request_internal(conn: &Connection, id: &str) -> DbResult<SavedRequest> {
        conn.query_row(
            &format!("SELECT {SAVED_REQUEST_COLUMNS} FROM saved_requests WHERE id = ?1"),
            params![id],
            parse_saved_request_row,
        )
        .optional()?
        .ok_or_else(|| DbError::not_found("Saved request", id))
    }

    pub fn update_saved_request(
        &self,
        id: &str,
        update: &SavedRequestUpdate,
    ) -> DbResult<SavedRequest> {
        let conn = self.conn()?;
        let now = Utc::now();

        let updated = conn.execute(
            "UPDATE saved_requests SET
                name = COALESCE(?1, name),
                method = COALESCE(?2, method),
                endpoint = COALESCE(?3, endpoint),
                body = CASE WHEN ?4 THEN ?5 ELSE body END,
                updated_at = ?6
             WHERE id = ?7",
            params![
                update.name,
                update.method,
                update.endpoint,
                update.body.is_some(),
                to_json_text(update.body.as_ref().and_then(Option::as_ref))?,
                now.to_rfc3339(),
                id,
            ],
        )?;

        if updated == 0 {
            return Err(DbError::not_found("Saved request", id));
        }
        Self::get_saved_request_internal(&conn, id)
    }

    pub fn delete_saved_request(&self, id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM saved_requests WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(DbError::not_found("Saved request", id));
        }
        Ok(())
    }

    // ==================== Variables ====================

    pub fn list_variables(&self) -> DbResult<Vec<Variable>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value, updated_at FROM variables ORDER BY key ASC")?;
        let rows = stmt.query_map([], parse_variable_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Variables as a key -> value map, for template rendering
    pub fn variable_map(&self) -> DbResult<BTreeMap<String, String>> {
        Ok(self
            .list_variables()?
            .into_iter()
            .map(|v| (v.key, v.value))
            .collect())
    }

    pub fn upsert_variable(&self, input: &VariableInput) -> DbResult<Variable> {
        let conn = self.conn()?;
        Self::upsert_variable_internal(&conn, input, Utc::now())
    }

    /// Upsert many variables atomically, returning them in input order
    pub fn upsert_variables(&self, inputs: &[VariableInput]) -> DbResult<Vec<Variable>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();

        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(Self::upsert_variable_internal(&tx, input, now)?);
        }

        tx.commit()?;
        Ok(results)
    }

    fn upsert_variable_internal(
        conn: &Connection,
        input: &VariableInput,
        now: DateTime<Utc>,
    ) -> DbResult<Variable> {
        conn.execute(
            "INSERT INTO variables (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![input.key, input.value, now.to_rfc3339()],
        )?;

        Ok(Variable {
            key: input.key.clone(),
            value: input.value.clone(),
            updated_at: now,
        })
    }

    pub fn delete_variable(&self, key: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM variables WHERE key = ?1", params![key])?;

        if deleted == 0 {
            return Err(DbError::not_found("Variable", key));
        }
        Ok(())
    }

    // ==================== Preferences ====================

    pub fn get_preferences(&self) -> DbResult<Preferences> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM preferences ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, json_column(row, 1)?))
        })?;

        let mut prefs = Preferences::new();
        for row in rows {
            let (key, value) = row?;
            prefs.insert(key, value.unwrap_or(Value::Null));
        }
        Ok(prefs)
    }

    /// Replace the whole preference document
    pub fn replace_preferences(&self, prefs: &Preferences) -> DbResult<Preferences> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute("DELETE FROM preferences", [])?;
        for (key, value) in prefs {
            tx.execute(
                "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, serde_json::to_string(value)?, now],
            )?;
        }

        tx.commit()?;
        Ok(prefs.clone())
    }
}

fn to_json_text(value: Option<&Value>) -> DbResult<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(DbError::from)
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| {
            serde_json::from_str(&text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()
}

fn parse_history_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        flow_id: row.get(1)?,
        step_id: row.get(2)?,
        method: row.get(3)?,
        endpoint: row.get(4)?,
        request: json_column(row, 5)?,
        response: json_column(row, 6)?,
        status_code: row.get(7)?,
        duration_ms: row
            .get::<_, Option<i64>>(8)?
            .and_then(|d| u64::try_from(d).ok()),
        label: row.get(9)?,
        pinned: row.get(10)?,
        created_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

fn parse_saved_request_row(row: &Row<'_>) -> rusqlite::Result<SavedRequest> {
    Ok(SavedRequest {
        id: row.get(0)?,
        name: row.get(1)?,
        method: row.get(2)?,
        endpoint: row.get(3)?,
        body: json_column(row, 4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_variable_row(row: &Row<'_>) -> rusqlite::Result<Variable> {
    Ok(Variable {
        key: row.get(0)?,
        value: row.get(1)?,
        updated_at: parse_datetime(&row.get::<_, String>(2)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
