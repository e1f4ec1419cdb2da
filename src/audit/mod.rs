//! Append-only record of administrative actions.

pub mod export;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::StoreError;

pub use export::{
    AuditChainError, AuditExportFormat, audit_chain_hash, render_audit_export, verify_audit_chain,
};

pub const POINTS_REVOKED: &str = "POINTS_REVOKED";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub actor: String,
    pub description: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditLogRecord {
    pub id: i64,
    pub ts_ms: u64,
    pub kind: String,
    pub actor: String,
    pub description: String,
    pub payload: serde_json::Value,
}

impl AuditLogRecord {
    pub fn batch_id(&self) -> Option<&str> {
        self.payload
            .get("batch_id")
            .and_then(serde_json::Value::as_str)
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_audit(&self, entry: AuditEntry) -> Result<AuditLogRecord, StoreError>;

    /// Newest first.
    async fn list_audit(
        &self,
        limit: usize,
        since_ts_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>, StoreError>;

    /// Oldest first, `since` inclusive and `before` exclusive.
    async fn list_audit_window(
        &self,
        limit: usize,
        since_ts_ms: Option<u64>,
        before_ts_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>, StoreError>;
}
