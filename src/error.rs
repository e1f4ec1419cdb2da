use thiserror::Error;

#[cfg(feature = "store-sqlite")]
use crate::ledger::sqlite_store::SqliteStoreError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("points must be non-zero")]
    ZeroPoints,
    #[error("reason code is required")]
    EmptyReasonCode,
    #[error("reason code has surrounding whitespace: {0:?}")]
    PaddedReasonCode(String),
    #[error("user id is required")]
    EmptyUserId,
    #[error("justification is required")]
    EmptyJustification,
    #[error("actor is required")]
    EmptyActor,
    #[error("at least one selection is required")]
    EmptySelections,
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },
    #[error("invalid date range: since_ms={since_ms} until_ms={until_ms}")]
    InvalidDateRange { since_ms: u64, until_ms: u64 },
    #[error("event referenced more than once in batch: {0}")]
    DuplicateEventReference(String),
    #[error("event not found: {0}")]
    EventNotFound(String),
    #[error("event {event_id} belongs to {owner}, not {user_id}")]
    EventOwnerMismatch {
        event_id: String,
        owner: String,
        user_id: String,
    },
    #[error("event {0} is not an award")]
    NotAnAward(String),
    #[error("event {event_id} already reversed by {revoke_event_ids:?}")]
    AlreadyReversed {
        event_id: String,
        revoke_event_ids: Vec<String>,
    },
    #[error("points total for {user_id} is outside the i64 range")]
    PointsOverflow { user_id: String },
    #[error("second factor rejected")]
    SecondFactorRejected,
    #[error("ledger subscription closed")]
    SubscriptionClosed,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Validation failures are rejected before any store access.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ZeroPoints
                | Self::EmptyReasonCode
                | Self::PaddedReasonCode(_)
                | Self::EmptyUserId
                | Self::EmptyJustification
                | Self::EmptyActor
                | Self::EmptySelections
                | Self::InvalidAction(_)
                | Self::InvalidAmount { .. }
                | Self::InvalidDateRange { .. }
                | Self::DuplicateEventReference(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("rejected by store: {0}")]
    Rejected(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "store-sqlite")]
    #[error(transparent)]
    Sqlite(#[from] SqliteStoreError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
