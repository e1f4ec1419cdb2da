pub mod audit;
pub mod auth;
pub mod clock;
mod error;
mod ids;
pub mod ledger;

pub use error::{LedgerError, Result, StoreError};

pub use audit::{AuditEntry, AuditLogRecord, AuditSink};
pub use auth::{RejectAll, SecondFactor};
pub use clock::{Clock, FixedClock, SystemClock};
pub use ledger::{
    AuditStatus, AwardOnce, BalanceWatch, EventFilter, EventId, LedgerAction, LedgerConfig,
    LedgerOptions, LedgerStore, MemoryLedgerStore, Metadata, NewLedgerEvent, PointsLedger,
    PointsLedgerEvent, RevokeOutcome, RevokeRequest, RevokeSelection, SearchQuery,
    SelectionStatus, UserEventGroup,
};

#[cfg(feature = "auth")]
pub use auth::{TotpConfig, TotpVerifier};
#[cfg(feature = "store-sqlite")]
pub use ledger::SqliteLedgerStore;
#[cfg(feature = "http")]
pub use ledger::http::{LedgerHttpState, router};
