//! SQLite event store implementation.

use crate::{Error, Event, Result, SessionId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use std::path::Path;

/// Summary of one session for listings.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub run_count: usize,
    pub message_count: usize,
}

/// SQLite-backed event store.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open or create an event store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory event store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_session
                ON events(session_id, timestamp);
            "#,
        )?;
        Ok(())
    }

    /// Append an event to the store.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (id, session_id, timestamp, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.session_id.to_string(),
                format_timestamp(&event.timestamp),
                event.kind.name(),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        Ok(())
    }

    /// Append several events in one transaction.
    pub fn append_all(&mut self, events: &[Event]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for event in events {
            tx.execute(
                "INSERT INTO events (id, session_id, timestamp, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.id.to_string(),
                    event.session_id.to_string(),
                    format_timestamp(&event.timestamp),
                    event.kind.name(),
                    serde_json::to_string(&event.kind)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load all events for a session in insertion order.
    pub fn load_session(&self, session_id: SessionId) -> Result<Vec<Event>> {
        self.load_events(session_id, None)
    }

    /// Load events for a session, optionally restricted to one kind name
    /// (`message`, `tool_call`, `run_end`, ...).
    pub fn load_events(&self, session_id: SessionId, kind: Option<&str>) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, timestamp, data FROM events
             WHERE session_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY timestamp, rowid",
        )?;

        let rows = stmt.query_map(params![session_id.to_string(), kind], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, session_id, timestamp, data) = row?;
            events.push(Event {
                id: id
                    .parse()
                    .map_err(|e| Error::Corrupt(format!("event id {id}: {e}")))?,
                session_id: session_id
                    .parse()
                    .map_err(|e| Error::Corrupt(format!("session id {session_id}: {e}")))?,
                timestamp: parse_timestamp(&timestamp)?,
                kind: serde_json::from_str(&data)?,
            });
        }
        Ok(events)
    }

    /// List sessions, most recently started first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id,
                    MIN(timestamp),
                    MAX(CASE WHEN kind = 'session_end' THEN timestamp END),
                    SUM(CASE WHEN kind = 'run_start' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN kind = 'message' THEN 1 ELSE 0 END)
             FROM events
             GROUP BY session_id
             ORDER BY MIN(timestamp) DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, started_at, ended_at, run_count, message_count) = row?;
            sessions.push(SessionSummary {
                id: id
                    .parse()
                    .map_err(|e| Error::Corrupt(format!("session id {id}: {e}")))?,
                started_at: parse_timestamp(&started_at)?,
                ended_at: ended_at.as_deref().map(parse_timestamp).transpose()?,
                run_count: usize::try_from(run_count).unwrap_or_default(),
                message_count: usize::try_from(message_count).unwrap_or_default(),
            });
        }
        Ok(sessions)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed width keeps lexical order equal to chronological order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("timestamp {raw}: {e}")))
}
