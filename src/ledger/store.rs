use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{LedgerAction, NewLedgerEvent, PointsLedgerEvent};
use crate::StoreError;

pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Append-only event collection. Implementations assign `id` and
/// `created_at_ms` and never expose an update or delete path.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, event: NewLedgerEvent) -> Result<PointsLedgerEvent, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<PointsLedgerEvent>, StoreError>;

    /// Matching events ordered by `created_at_ms`, ties broken by append order.
    async fn query(&self, filter: &EventFilter) -> Result<Vec<PointsLedgerEvent>, StoreError>;

    /// Receives every event after it has been durably appended.
    fn subscribe(&self) -> broadcast::Receiver<PointsLedgerEvent>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<LedgerAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_ms: Option<u64>,
}

impl EventFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: LedgerAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_reason_code(mut self, reason_code: impl Into<String>) -> Self {
        self.reason_code = Some(reason_code.into());
        self
    }

    pub fn between(mut self, since_ms: Option<u64>, until_ms: Option<u64>) -> Self {
        self.since_ms = since_ms;
        self.until_ms = until_ms;
        self
    }

    pub fn matches(&self, event: &PointsLedgerEvent) -> bool {
        if self
            .user_id
            .as_deref()
            .is_some_and(|user_id| user_id != event.user_id)
        {
            return false;
        }
        if self
            .reason_code
            .as_deref()
            .is_some_and(|reason| reason != event.reason_code)
        {
            return false;
        }
        if self.action.is_some_and(|action| action != event.action) {
            return false;
        }
        if self.since_ms.is_some_and(|since| event.created_at_ms < since) {
            return false;
        }
        if self.until_ms.is_some_and(|until| event.created_at_ms > until) {
            return false;
        }
        true
    }
}
