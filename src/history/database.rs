//! Call History Database
//!
//! SQLite-Datenbank für abgeschlossene Anrufe. Einträge werden nur
//! eingefügt und gelesen, nie geändert.

use super::record::{CallHistory, HistoryParticipant};
use crate::session::CallStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Failed to encode participants: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("History entry not found: {0}")]
    NotFound(String),
}

// ============================================================================
// DATABASE
// ============================================================================

const SELECT_COLUMNS: &str = r#"
    SELECT id, call_id, participants, started_at, ended_at, duration_ms,
           final_status, was_recorded, transcript_entries
    FROM call_history
"#;

/// SQLite-Datenbank für die Anruf-Historie
pub struct HistoryDatabase {
    conn: Mutex<Connection>,
}

impl HistoryDatabase {
    /// Öffnet oder erstellt die Datenbank unter `path`
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening history database at {:?}", path);

        let db = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// In-Memory Datenbank für Tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), HistoryError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS call_history (
                id TEXT PRIMARY KEY,
                call_id TEXT NOT NULL,
                participants TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                final_status TEXT NOT NULL,
                was_recorded INTEGER NOT NULL DEFAULT 0,
                transcript_entries INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_call_history_call_id ON call_history(call_id);
            CREATE INDEX IF NOT EXISTS idx_call_history_ended_at ON call_history(ended_at);
            "#,
        )?;
        Ok(())
    }

    /// Speichert einen abgeschlossenen Anruf
    pub fn record(&self, entry: &CallHistory) -> Result<(), HistoryError> {
        let participants = serde_json::to_string(&entry.participants)?;

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO call_history (
                id, call_id, participants, started_at, ended_at, duration_ms,
                final_status, was_recorded, transcript_entries
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.id,
                entry.call_id,
                participants,
                entry.started_at.map(format_timestamp),
                format_timestamp(entry.ended_at),
                entry.duration_ms,
                entry.final_status.as_str(),
                entry.was_recorded as i32,
                entry.transcript_entries as i64,
            ],
        )?;

        tracing::debug!("Recorded history entry {} for call {}", entry.id, entry.call_id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<CallHistory, HistoryError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id],
            Self::map_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => HistoryError::NotFound(id.to_string()),
            other => HistoryError::Sqlite(other),
        })
    }

    /// Die letzten `limit` Anrufe, neueste zuerst
    pub fn recent(&self, limit: usize) -> Result<Vec<CallHistory>, HistoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY ended_at DESC LIMIT ?1"))?;

        let entries = stmt
            .query_map(params![limit as i64], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn for_call(&self, call_id: &str) -> Result<Vec<CallHistory>, HistoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE call_id = ?1 ORDER BY ended_at ASC"))?;

        let entries = stmt
            .query_map(params![call_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count(&self) -> Result<usize, HistoryError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM call_history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<CallHistory> {
        let participants: String = row.get(2)?;
        let participants: Vec<HistoryParticipant> = serde_json::from_str(&participants)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        let started_at = row
            .get::<_, Option<String>>(3)?
            .map(|raw| parse_timestamp(3, &raw))
            .transpose()?;
        let ended_at = parse_timestamp(4, &row.get::<_, String>(4)?)?;

        let final_status: String = row.get(6)?;
        let final_status: CallStatus = final_status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

        Ok(CallHistory {
            id: row.get(0)?,
            call_id: row.get(1)?,
            participants,
            started_at,
            ended_at,
            duration_ms: row.get(5)?,
            final_status,
            was_recorded: row.get::<_, i32>(7)? != 0,
            transcript_entries: row.get::<_, i64>(8)? as usize,
        })
    }
}

/// Feste Breite, damit `ORDER BY ended_at` chronologisch sortiert
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

impl std::fmt::Debug for HistoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryDatabase").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(call_id: &str, ended_minutes_ago: i64, status: CallStatus) -> CallHistory {
        let ended_at = Utc::now() - Duration::minutes(ended_minutes_ago);
        CallHistory {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.to_string(),
            participants: vec![
                HistoryParticipant {
                    id: "alice".to_string(),
                    name: "Alice".to_string(),
                    language: "de".to_string(),
                },
                HistoryParticipant {
                    id: "bob".to_string(),
                    name: "Bob".to_string(),
                    language: "en".to_string(),
                },
            ],
            started_at: (status == CallStatus::Ended).then(|| ended_at - Duration::minutes(5)),
            ended_at,
            duration_ms: if status == CallStatus::Ended { 300_000 } else { 0 },
            final_status: status,
            was_recorded: status == CallStatus::Ended,
            transcript_entries: 3,
        }
    }

    #[test]
    fn test_record_and_get() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        let original = entry("call-1", 0, CallStatus::Ended);

        db.record(&original).unwrap();
        let loaded = db.get(&original.id).unwrap();

        assert_eq!(loaded.call_id, "call-1");
        assert_eq!(loaded.participants, original.participants);
        assert_eq!(loaded.final_status, CallStatus::Ended);
        assert_eq!(loaded.duration_ms, 300_000);
        assert!(loaded.was_recorded);
        assert_eq!(loaded.transcript_entries, 3);
        assert_eq!(
            loaded.ended_at.timestamp_millis(),
            original.ended_at.timestamp_millis()
        );
    }

    #[test]
    fn test_recent_is_newest_first() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        db.record(&entry("old", 60, CallStatus::Failed)).unwrap();
        db.record(&entry("new", 1, CallStatus::Ended)).unwrap();
        db.record(&entry("middle", 30, CallStatus::Ended)).unwrap();

        let recent = db.recent(2).unwrap();
        let ids: Vec<_> = recent.iter().map(|h| h.call_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "middle"]);
        assert_eq!(db.count().unwrap(), 3);
    }

    #[test]
    fn test_failed_call_without_start() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        let failed = entry("call-2", 0, CallStatus::Failed);
        db.record(&failed).unwrap();

        let loaded = db.for_call("call-2").unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].started_at.is_none());
        assert_eq!(loaded[0].final_status, CallStatus::Failed);
    }

    #[test]
    fn test_missing_entry() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        assert!(matches!(db.get("nope"), Err(HistoryError::NotFound(_))));
    }
}
