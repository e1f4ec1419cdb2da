use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use thiserror::Error;
use tokio::sync::broadcast;

use super::store::SUBSCRIPTION_BUFFER;
use super::{EventFilter, LedgerAction, LedgerStore, Metadata, NewLedgerEvent, PointsLedgerEvent};
use crate::StoreError;
use crate::audit::{AuditEntry, AuditLogRecord, AuditSink};
use crate::clock::{Clock, SystemClock};
use crate::ids::generate_event_id;

#[derive(Clone)]
pub struct SqliteLedgerStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    events_tx: broadcast::Sender<PointsLedgerEvent>,
}

impl std::fmt::Debug for SqliteLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedgerStore")
            .field("path", &self.path)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

type EventRow = (String, String, i64, String, String, i64, String);

impl SqliteLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let (events_tx, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self {
            path: path.into(),
            clock,
            events_tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), SqliteStoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SqliteStoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn append_event(
        &self,
        event: NewLedgerEvent,
    ) -> Result<PointsLedgerEvent, SqliteStoreError> {
        let path = self.path.clone();
        let event = event.into_event(generate_event_id(), self.clock.now_millis());
        let metadata_json = serde_json::to_string(&event.metadata)?;
        let row = event.clone();

        tokio::task::spawn_blocking(move || -> Result<(), SqliteStoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            conn.execute(
                "INSERT INTO ledger_events
                    (id, user_id, points, action, reason_code, created_at_ms, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.user_id,
                    row.points,
                    row.action.as_str(),
                    row.reason_code,
                    u64_to_i64(row.created_at_ms),
                    metadata_json
                ],
            )?;
            Ok(())
        })
        .await??;

        let _ = self.events_tx.send(event.clone());
        Ok(event)
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<PointsLedgerEvent>, SqliteStoreError> {
        let path = self.path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(
            move || -> Result<Option<PointsLedgerEvent>, SqliteStoreError> {
                let conn = open_connection(path)?;
                init_schema(&conn)?;
                let row: Option<EventRow> = conn
                    .query_row(
                        "SELECT id, user_id, points, action, reason_code, created_at_ms, metadata_json
                         FROM ledger_events
                         WHERE id = ?1",
                        rusqlite::params![id],
                        read_event_row,
                    )
                    .optional()?;
                row.map(event_from_row).transpose()
            },
        )
        .await?
    }

    pub async fn query_events(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<PointsLedgerEvent>, SqliteStoreError> {
        let path = self.path.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<PointsLedgerEvent>, SqliteStoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let mut clauses = Vec::<&str>::new();
            let mut params = Vec::<rusqlite::types::Value>::new();
            if let Some(user_id) = filter.user_id {
                clauses.push("user_id = ?");
                params.push(user_id.into());
            }
            if let Some(reason_code) = filter.reason_code {
                clauses.push("reason_code = ?");
                params.push(reason_code.into());
            }
            if let Some(action) = filter.action {
                clauses.push("action = ?");
                params.push(action.as_str().to_string().into());
            }
            if let Some(since) = filter.since_ms {
                clauses.push("created_at_ms >= ?");
                params.push(u64_to_i64(since).into());
            }
            if let Some(until) = filter.until_ms {
                clauses.push("created_at_ms <= ?");
                params.push(u64_to_i64(until).into());
            }

            let mut sql = String::from(
                "SELECT id, user_id, points, action, reason_code, created_at_ms, metadata_json
                 FROM ledger_events",
            );
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY created_at_ms ASC, seq ASC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), read_event_row)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(event_from_row(row?)?);
            }
            Ok(out)
        })
        .await?
    }

    pub async fn append_audit_log(
        &self,
        entry: AuditEntry,
    ) -> Result<AuditLogRecord, SqliteStoreError> {
        let path = self.path.clone();
        let payload_json = serde_json::to_string(&entry.payload)?;
        let ts_ms = self.clock.now_millis();

        tokio::task::spawn_blocking(move || -> Result<AuditLogRecord, SqliteStoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            conn.execute(
                "INSERT INTO audit_logs (ts_ms, kind, actor, description, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    u64_to_i64(ts_ms),
                    entry.action,
                    entry.actor,
                    entry.description,
                    payload_json
                ],
            )?;
            Ok(AuditLogRecord {
                id: conn.last_insert_rowid(),
                ts_ms,
                kind: entry.action,
                actor: entry.actor,
                description: entry.description,
                payload: entry.payload,
            })
        })
        .await?
    }

    pub async fn list_audit_logs(
        &self,
        limit: usize,
        since_ts_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>, SqliteStoreError> {
        let path = self.path.clone();
        let limit = i64::try_from(limit.max(1)).unwrap_or(i64::MAX);
        let since = u64_to_i64(since_ts_ms.unwrap_or(0));
        tokio::task::spawn_blocking(move || -> Result<Vec<AuditLogRecord>, SqliteStoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, ts_ms, kind, actor, description, payload_json
                 FROM audit_logs
                 WHERE ts_ms >= ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![since, limit], read_audit_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(audit_from_row(row?)?);
            }
            Ok(out)
        })
        .await?
    }

    pub async fn list_audit_logs_window(
        &self,
        limit: usize,
        since_ts_ms: Option<u64>,
        before_ts_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>, SqliteStoreError> {
        let path = self.path.clone();
        let limit = i64::try_from(limit.max(1)).unwrap_or(i64::MAX);
        let since = u64_to_i64(since_ts_ms.unwrap_or(0));
        let before = before_ts_ms.map(u64_to_i64).unwrap_or(i64::MAX);
        tokio::task::spawn_blocking(move || -> Result<Vec<AuditLogRecord>, SqliteStoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, ts_ms, kind, actor, description, payload_json
                 FROM audit_logs
                 WHERE ts_ms >= ?1 AND ts_ms < ?2
                 ORDER BY id ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(rusqlite::params![since, before, limit], read_audit_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(audit_from_row(row?)?);
            }
            Ok(out)
        })
        .await?
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn append(&self, event: NewLedgerEvent) -> Result<PointsLedgerEvent, StoreError> {
        event
            .validate()
            .map_err(|err| StoreError::Rejected(err.to_string()))?;
        Ok(self.append_event(event).await?)
    }

    async fn get(&self, id: &str) -> Result<Option<PointsLedgerEvent>, StoreError> {
        Ok(self.get_event(id).await?)
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<PointsLedgerEvent>, StoreError> {
        Ok(self.query_events(filter).await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<PointsLedgerEvent> {
        self.events_tx.subscribe()
    }
}

#[async_trait]
impl AuditSink for SqliteLedgerStore {
    async fn append_audit(&self, entry: AuditEntry) -> Result<AuditLogRecord, StoreError> {
        Ok(self.append_audit_log(entry).await?)
    }

    async fn list_audit(
        &self,
        limit: usize,
        since_ts_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>, StoreError> {
        Ok(self.list_audit_logs(limit, since_ts_ms).await?)
    }

    async fn list_audit_window(
        &self,
        limit: usize,
        since_ts_ms: Option<u64>,
        before_ts_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>, StoreError> {
        Ok(self
            .list_audit_logs_window(limit, since_ts_ms, before_ts_ms)
            .await?)
    }
}

fn read_event_row(row: &rusqlite::Row<'_>) -> Result<EventRow, rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn event_from_row(row: EventRow) -> Result<PointsLedgerEvent, SqliteStoreError> {
    let (id, user_id, points, action, reason_code, created_at_ms, metadata_json) = row;
    let action: LedgerAction = action
        .parse()
        .map_err(|_| SqliteStoreError::CorruptRow(format!("event {id} has action {action}")))?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)?;
    Ok(PointsLedgerEvent {
        id,
        user_id,
        points,
        action,
        reason_code,
        created_at_ms: i64_to_u64(created_at_ms),
        metadata,
    })
}

fn read_audit_row(
    row: &rusqlite::Row<'_>,
) -> Result<(i64, i64, String, String, String, String), rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn audit_from_row(
    row: (i64, i64, String, String, String, String),
) -> Result<AuditLogRecord, SqliteStoreError> {
    let (id, ts_ms, kind, actor, description, payload_json) = row;
    Ok(AuditLogRecord {
        id,
        ts_ms: i64_to_u64(ts_ms),
        kind,
        actor,
        description,
        payload: serde_json::from_str(&payload_json)?,
    })
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ledger_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            points INTEGER NOT NULL CHECK (points != 0),
            action TEXT NOT NULL CHECK (action IN ('award', 'revoke')),
            reason_code TEXT NOT NULL CHECK (length(reason_code) > 0),
            created_at_ms INTEGER NOT NULL,
            metadata_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ledger_events_user_ts
            ON ledger_events(user_id, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_ledger_events_reason_ts
            ON ledger_events(reason_code, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_ledger_events_ts
            ON ledger_events(created_at_ms);

        CREATE TRIGGER IF NOT EXISTS ledger_events_no_update
            BEFORE UPDATE ON ledger_events
            BEGIN SELECT RAISE(ABORT, 'ledger_events is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS ledger_events_no_delete
            BEFORE DELETE ON ledger_events
            BEGIN SELECT RAISE(ABORT, 'ledger_events is append-only'); END;

        CREATE TABLE IF NOT EXISTS audit_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts_ms INTEGER NOT NULL,
            kind TEXT NOT NULL,
            actor TEXT NOT NULL,
            description TEXT NOT NULL,
            payload_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_ts_ms
            ON audit_logs(ts_ms);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_kind_ts_ms
            ON audit_logs(kind, ts_ms);

        CREATE TRIGGER IF NOT EXISTS audit_logs_no_update
            BEFORE UPDATE ON audit_logs
            BEGIN SELECT RAISE(ABORT, 'audit_logs is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS audit_logs_no_delete
            BEFORE DELETE ON audit_logs
            BEGIN SELECT RAISE(ABORT, 'audit_logs is append-only'); END;",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn i64_to_u64(value: i64) -> u64 {
    if value <= 0 { 0 } else { value as u64 }
}
