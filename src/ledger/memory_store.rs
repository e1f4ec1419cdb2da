use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::store::SUBSCRIPTION_BUFFER;
use super::{EventFilter, LedgerStore, NewLedgerEvent, PointsLedgerEvent};
use crate::StoreError;
use crate::audit::{AuditEntry, AuditLogRecord, AuditSink};
use crate::clock::{Clock, SystemClock};
use crate::ids::generate_event_id;

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<PointsLedgerEvent>,
    audit_logs: Vec<AuditLogRecord>,
}

/// Process-local ledger and audit log. Events are kept in append order.
#[derive(Clone)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
    events_tx: broadcast::Sender<PointsLedgerEvent>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (events_tx, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
            events_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    pub fn audit_count(&self) -> usize {
        self.lock().audit_logs.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(&self, event: NewLedgerEvent) -> Result<PointsLedgerEvent, StoreError> {
        event
            .validate()
            .map_err(|err| StoreError::Rejected(err.to_string()))?;
        let created_at_ms = self.clock.now_millis();
        let event = event.into_event(generate_event_id(), created_at_ms);
        self.lock().events.push(event.clone());
        let _ = self.events_tx.send(event.clone());
        Ok(event)
    }

    async fn get(&self, id: &str) -> Result<Option<PointsLedgerEvent>, StoreError> {
        Ok(self.lock().events.iter().find(|event| event.id == id).cloned())
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<PointsLedgerEvent>, StoreError> {
        let mut out: Vec<PointsLedgerEvent> = self
            .lock()
            .events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps.
        out.sort_by_key(|event| event.created_at_ms);
        Ok(out)
    }

    fn subscribe(&self) -> broadcast::Receiver<PointsLedgerEvent> {
        self.events_tx.subscribe()
    }
}

#[async_trait]
impl AuditSink for MemoryLedgerStore {
    async fn append_audit(&self, entry: AuditEntry) -> Result<AuditLogRecord, StoreError> {
        let ts_ms = self.clock.now_millis();
        let mut state = self.lock();
        let id = i64::try_from(state.audit_logs.len()).unwrap_or(i64::MAX - 1) + 1;
        let record = AuditLogRecord {
            id,
            ts_ms,
            kind: entry.action,
            actor: entry.actor,
            description: entry.description,
            payload: entry.payload,
        };
        state.audit_logs.push(record.clone());
        Ok(record)
    }

    async fn list_audit(
        &self,
        limit: usize,
        since_ts_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>, StoreError> {
        let state = self.lock();
        Ok(state
            .audit_logs
            .iter()
            .rev()
            .filter(|log| since_ts_ms.is_none_or(|since| log.ts_ms >= since))
            .take(limit.max(1))
            .cloned()
            .collect())
    }

    async fn list_audit_window(
        &self,
        limit: usize,
        since_ts_ms: Option<u64>,
        before_ts_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>, StoreError> {
        let state = self.lock();
        Ok(state
            .audit_logs
            .iter()
            .filter(|log| since_ts_ms.is_none_or(|since| log.ts_ms >= since))
            .filter(|log| before_ts_ms.is_none_or(|before| log.ts_ms < before))
            .take(limit.max(1))
            .cloned()
            .collect())
    }
}
