//! Points ledger: append-only events, balances derived by summation, and
//! audited administrative reversals.

pub mod balance;
pub mod config;
#[cfg(feature = "http")]
pub mod http;
pub mod memory_store;
pub mod observability;
#[cfg(any(feature = "otel", feature = "cli"))]
pub mod telemetry;
pub mod reconcile;
pub mod revoke;
pub mod search;
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
pub mod store;
mod types;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::audit::{AuditLogRecord, AuditSink};
use crate::auth::SecondFactor;
use crate::ids::generate_batch_id;
use crate::{LedgerError, Result};

pub use balance::{BalanceReducer, BalanceWatch};
pub use config::{ConfigError, LedgerConfig, SecondFactorConfig};
pub use memory_store::MemoryLedgerStore;
pub use observability::{Observability, ObservabilitySnapshot};
pub use reconcile::{DoubleReversal, MissingAudit};
pub use revoke::{
    AuditStatus, ReversedSelection, RevokeOutcome, RevokeRequest, RevokeSelection,
    SelectionResult, SelectionStatus,
};
pub use search::{SearchQuery, UserEventGroup, group_events_by_user};
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::{SqliteLedgerStore, SqliteStoreError};
pub use store::{EventFilter, LedgerStore};
pub use types::{
    EventId, LedgerAction, META_ACTOR, META_BATCH_ID, META_DEDUP_KEY, META_JUSTIFICATION,
    META_ORIGINAL_EVENT_IDS, META_ORIGINAL_REASON, Metadata, NewLedgerEvent, PointsLedgerEvent,
    REVERSAL_PREFIX, reversal_reason, sum_points,
};

const MIXED_REASON: &str = "MIXED";
const MANUAL_REASON: &str = "MANUAL";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOptions {
    /// Refuse event selections whose awards already carry a reversal.
    #[serde(default)]
    pub reject_double_reversal: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AwardOnce {
    Created(EventId),
    Existing(EventId),
}

impl AwardOnce {
    pub fn event_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[derive(Clone)]
pub struct PointsLedger {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    second_factor: Arc<dyn SecondFactor>,
    options: LedgerOptions,
    observability: Arc<Mutex<Observability>>,
}

impl std::fmt::Debug for PointsLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointsLedger")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PointsLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditSink>,
        second_factor: Arc<dyn SecondFactor>,
    ) -> Self {
        Self {
            store,
            audit,
            second_factor,
            options: LedgerOptions::default(),
            observability: Arc::new(Mutex::new(Observability::default())),
        }
    }

    pub fn with_options(mut self, options: LedgerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn audit_sink(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        match self.observability.lock() {
            Ok(guard) => guard.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }

    fn observe(&self, record: impl FnOnce(&mut Observability)) {
        let mut guard = match self.observability.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        record(&mut *guard);
    }

    pub async fn award(
        &self,
        user_id: &str,
        points: i64,
        reason_code: &str,
        metadata: Option<Metadata>,
    ) -> Result<EventId> {
        let new_event =
            NewLedgerEvent::award(user_id, points, reason_code, metadata.unwrap_or_default());
        new_event.validate()?;

        match self.store.append(new_event).await {
            Ok(event) => {
                self.observe(Observability::record_award);
                tracing::info!(
                    user_id = %event.user_id,
                    points = event.points,
                    reason_code = %event.reason_code,
                    event_id = %event.id,
                    "points awarded"
                );
                Ok(event.id)
            }
            Err(err) => {
                self.observe(Observability::record_award_failure);
                tracing::warn!(user_id, points, reason_code, error = %err, "award failed");
                Err(err.into())
            }
        }
    }

    /// For award triggers inside other flows: a failed award is logged and
    /// counted but never fails the caller.
    pub async fn award_or_log(
        &self,
        user_id: &str,
        points: i64,
        reason_code: &str,
        metadata: Option<Metadata>,
    ) -> Option<EventId> {
        match self.award(user_id, points, reason_code, metadata).await {
            Ok(id) => Some(id),
            Err(err) => {
                if err.is_validation() {
                    tracing::warn!(user_id, reason_code, error = %err, "award trigger rejected");
                }
                None
            }
        }
    }

    /// Awards at most once per `(user_id, dedup_key)`. Concurrent callers with
    /// the same key may both append; the store itself enforces no uniqueness.
    pub async fn award_once(
        &self,
        user_id: &str,
        points: i64,
        reason_code: &str,
        dedup_key: &str,
        metadata: Option<Metadata>,
    ) -> Result<AwardOnce> {
        let dedup_key = dedup_key.trim();
        if dedup_key.is_empty() {
            let id = self.award(user_id, points, reason_code, metadata).await?;
            return Ok(AwardOnce::Created(id));
        }
        if let Some(existing) = self.find_by_dedup_key(user_id, dedup_key).await? {
            tracing::debug!(user_id, dedup_key, event_id = %existing.id, "award already recorded");
            return Ok(AwardOnce::Existing(existing.id));
        }

        let mut metadata = metadata.unwrap_or_default();
        metadata.insert(
            META_DEDUP_KEY.to_string(),
            serde_json::Value::String(dedup_key.to_string()),
        );
        let id = self.award(user_id, points, reason_code, Some(metadata)).await?;
        Ok(AwardOnce::Created(id))
    }

    pub async fn find_by_dedup_key(
        &self,
        user_id: &str,
        dedup_key: &str,
    ) -> Result<Option<PointsLedgerEvent>> {
        let events = self
            .store
            .query(&EventFilter::for_user(user_id).with_action(LedgerAction::Award))
            .await?;
        Ok(events
            .into_iter()
            .find(|event| event.metadata_str(META_DEDUP_KEY) == Some(dedup_key)))
    }

    /// Sum of every event for the user. Unknown users have balance 0; the
    /// result may be negative.
    pub async fn get_balance(&self, user_id: &str) -> Result<i64> {
        let events = self.store.query(&EventFilter::for_user(user_id)).await?;
        self.observe(Observability::record_balance_read);
        sum_points(&events).ok_or_else(|| LedgerError::PointsOverflow {
            user_id: user_id.to_string(),
        })
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<PointsLedgerEvent>> {
        Ok(self.store.query(&EventFilter::for_user(user_id)).await?)
    }

    pub async fn watch_balance(&self, user_id: &str) -> Result<BalanceWatch> {
        BalanceWatch::start(Arc::clone(&self.store), user_id).await
    }

    pub async fn search_events(&self, query: &SearchQuery) -> Result<Vec<UserEventGroup>> {
        let filter = query.to_filter()?;
        let events = self.store.query(&filter).await?;
        self.observe(Observability::record_search);
        tracing::debug!(
            since_ms = ?query.since_ms,
            until_ms = ?query.until_ms,
            reason_code = ?filter.reason_code,
            matched = events.len(),
            "ledger search"
        );
        group_events_by_user(events)
    }

    /// Reverses each selection independently, then writes one audit entry
    /// for the batch if anything was reversed. Validation and second-factor
    /// failures reject the whole call before the store is touched.
    #[tracing::instrument(
        name = "points.revoke",
        skip_all,
        fields(actor = %request.actor, selections = request.selections.len())
    )]
    pub async fn revoke(&self, request: RevokeRequest) -> Result<RevokeOutcome> {
        request.validate()?;
        if !self.second_factor.validate(&request.auth_factor).await {
            self.observe(Observability::record_second_factor_rejected);
            tracing::warn!(actor = %request.actor, "revoke rejected: second factor invalid");
            return Err(LedgerError::SecondFactorRejected);
        }

        let batch_id = generate_batch_id();
        let justification = request.justification.trim();
        let mut results = Vec::with_capacity(request.selections.len());
        let mut reversed = Vec::new();
        let mut failed_user_ids = Vec::new();
        let mut total_points = 0i64;

        for selection in &request.selections {
            let user_id = selection.user_id().to_string();
            match self
                .reverse_selection(&batch_id, &request, justification, selection, total_points)
                .await
            {
                Ok(done) => {
                    // reverse_selection refuses amounts that would overflow the total.
                    total_points += done.amount;
                    self.observe(Observability::record_revoke_event);
                    results.push(SelectionResult {
                        user_id,
                        status: SelectionStatus::Reversed {
                            event_id: done.event_id.clone(),
                            amount: done.amount,
                        },
                    });
                    reversed.push(done);
                }
                Err(err) => {
                    self.observe(Observability::record_revoke_selection_failure);
                    tracing::warn!(
                        batch_id = %batch_id,
                        user_id = %user_id,
                        error = %err,
                        "revoke selection failed"
                    );
                    failed_user_ids.push(user_id.clone());
                    results.push(SelectionResult {
                        user_id,
                        status: SelectionStatus::Failed {
                            error: err.to_string(),
                        },
                    });
                }
            }
        }
        self.observe(Observability::record_revoke_batch);

        let audit = if reversed.is_empty() {
            AuditStatus::Skipped
        } else {
            let entry = revoke::revoke_audit_entry(
                &batch_id,
                request.actor.trim(),
                justification,
                &reversed,
                total_points,
                &failed_user_ids,
                false,
            );
            match self.audit.append_audit(entry).await {
                Ok(record) => {
                    self.observe(Observability::record_audit_entry);
                    AuditStatus::Written {
                        audit_entry_id: record.id,
                    }
                }
                Err(err) => {
                    self.observe(Observability::record_audit_failure);
                    tracing::error!(
                        batch_id = %batch_id,
                        error = %err,
                        "revoke audit write failed; events are in the ledger without an audit entry"
                    );
                    AuditStatus::Failed {
                        error: err.to_string(),
                    }
                }
            }
        };

        tracing::info!(
            batch_id = %batch_id,
            actor = %request.actor,
            reversed = reversed.len(),
            failed = failed_user_ids.len(),
            total_points,
            "revoke batch finished"
        );

        Ok(RevokeOutcome {
            batch_id,
            results,
            created_event_ids: reversed.into_iter().map(|done| done.event_id).collect(),
            total_points,
            audit,
        })
    }

    async fn reverse_selection(
        &self,
        batch_id: &str,
        request: &RevokeRequest,
        justification: &str,
        selection: &RevokeSelection,
        batch_total: i64,
    ) -> Result<ReversedSelection> {
        let batch_reason = request
            .batch_reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty());

        let mut metadata = Metadata::new();
        let (user_id, amount, reason) = match selection {
            RevokeSelection::Events { user_id, event_ids } => {
                let mut sum = 0i128;
                let mut reasons = BTreeSet::<String>::new();
                for event_id in event_ids {
                    let original = self.reversible_award(user_id, event_id).await?;
                    sum += i128::from(original.points);
                    reasons.insert(original.reason_code);
                }
                let amount = i64::try_from(sum).map_err(|_| LedgerError::PointsOverflow {
                    user_id: user_id.clone(),
                })?;
                if amount <= 0 {
                    return Err(LedgerError::InvalidAmount {
                        reason: format!("selected events for {user_id} sum to {amount}"),
                    });
                }

                let original_reason = if reasons.len() == 1 {
                    reasons.into_iter().next()
                } else {
                    None
                };
                if let Some(original_reason) = &original_reason {
                    metadata.insert(
                        META_ORIGINAL_REASON.to_string(),
                        serde_json::Value::String(original_reason.clone()),
                    );
                }
                metadata.insert(
                    META_ORIGINAL_EVENT_IDS.to_string(),
                    serde_json::json!(event_ids),
                );
                let reason = original_reason
                    .or_else(|| batch_reason.map(str::to_string))
                    .unwrap_or_else(|| MIXED_REASON.to_string());
                (user_id, amount, reason)
            }
            RevokeSelection::Amount {
                user_id,
                amount,
                reason_code,
            } => {
                let reason = reason_code
                    .as_deref()
                    .map(str::trim)
                    .filter(|reason| !reason.is_empty())
                    .or(batch_reason)
                    .unwrap_or(MANUAL_REASON)
                    .to_string();
                (user_id, *amount, reason)
            }
        };

        if batch_total.checked_add(amount).is_none() {
            return Err(LedgerError::InvalidAmount {
                reason: format!("batch total would exceed {} points", i64::MAX),
            });
        }

        metadata.insert(
            META_BATCH_ID.to_string(),
            serde_json::Value::String(batch_id.to_string()),
        );
        metadata.insert(
            META_ACTOR.to_string(),
            serde_json::Value::String(request.actor.trim().to_string()),
        );
        metadata.insert(
            META_JUSTIFICATION.to_string(),
            serde_json::Value::String(justification.to_string()),
        );

        let new_event = NewLedgerEvent::revoke(
            user_id.as_str(),
            amount,
            reversal_reason(&reason),
            metadata,
        );
        new_event.validate()?;
        let event = self.store.append(new_event).await?;
        tracing::info!(
            batch_id,
            user_id = %event.user_id,
            points = event.points,
            reason_code = %event.reason_code,
            event_id = %event.id,
            "points revoked"
        );

        Ok(ReversedSelection {
            user_id: event.user_id,
            amount,
            event_id: event.id,
        })
    }

    async fn reversible_award(&self, user_id: &str, event_id: &str) -> Result<PointsLedgerEvent> {
        let event = self
            .store
            .get(event_id)
            .await?
            .ok_or_else(|| LedgerError::EventNotFound(event_id.to_string()))?;
        if event.user_id != user_id {
            return Err(LedgerError::EventOwnerMismatch {
                event_id: event_id.to_string(),
                owner: event.user_id,
                user_id: user_id.to_string(),
            });
        }
        if event.action != LedgerAction::Award {
            return Err(LedgerError::NotAnAward(event_id.to_string()));
        }
        if self.options.reject_double_reversal {
            let prior = self.reversals_of(user_id, event_id).await?;
            if !prior.is_empty() {
                return Err(LedgerError::AlreadyReversed {
                    event_id: event_id.to_string(),
                    revoke_event_ids: prior.into_iter().map(|event| event.id).collect(),
                });
            }
        }
        Ok(event)
    }

    /// Revoke events for `user_id` that name `event_id` among their originals.
    pub async fn reversals_of(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Vec<PointsLedgerEvent>> {
        let revokes = self
            .store
            .query(&EventFilter::for_user(user_id).with_action(LedgerAction::Revoke))
            .await?;
        Ok(revokes
            .into_iter()
            .filter(|event| event.original_event_ids().contains(&event_id))
            .collect())
    }

    pub async fn find_double_reversals(
        &self,
        since_ms: Option<u64>,
        until_ms: Option<u64>,
    ) -> Result<Vec<DoubleReversal>> {
        let revokes = self.revokes_between(since_ms, until_ms).await?;
        let doubles = reconcile::find_double_reversals(&revokes);
        for double in &doubles {
            tracing::warn!(
                original_event_id = %double.original_event_id,
                user_id = %double.user_id,
                revoke_event_ids = ?double.revoke_event_ids,
                "award reversed more than once"
            );
        }
        Ok(doubles)
    }

    /// Revoke batches in the window whose audit entry never landed.
    pub async fn reconcile_audit(
        &self,
        since_ms: Option<u64>,
        until_ms: Option<u64>,
    ) -> Result<Vec<MissingAudit>> {
        let revokes = self.revokes_between(since_ms, until_ms).await?;
        if revokes.is_empty() {
            return Ok(Vec::new());
        }
        let audits = self
            .audit
            .list_audit_window(usize::MAX, since_ms, None)
            .await?;
        Ok(reconcile::missing_audit_entries(&revokes, &audits))
    }

    /// Writes a reconstructed audit entry for each batch `reconcile_audit`
    /// reports.
    pub async fn repair_audit(
        &self,
        since_ms: Option<u64>,
        until_ms: Option<u64>,
    ) -> Result<Vec<AuditLogRecord>> {
        let missing = self.reconcile_audit(since_ms, until_ms).await?;
        let mut written = Vec::with_capacity(missing.len());
        for gap in missing {
            let record = self.audit.append_audit(gap.entry).await?;
            self.observe(Observability::record_audit_entry);
            tracing::info!(
                batch_id = %gap.batch_id,
                audit_entry_id = record.id,
                events = gap.event_ids.len(),
                "audit entry reconstructed"
            );
            written.push(record);
        }
        Ok(written)
    }

    async fn revokes_between(
        &self,
        since_ms: Option<u64>,
        until_ms: Option<u64>,
    ) -> Result<Vec<PointsLedgerEvent>> {
        if let (Some(since_ms), Some(until_ms)) = (since_ms, until_ms) {
            if since_ms > until_ms {
                return Err(LedgerError::InvalidDateRange { since_ms, until_ms });
            }
        }
        let filter = EventFilter::default()
            .with_action(LedgerAction::Revoke)
            .between(since_ms, until_ms);
        Ok(self.store.query(&filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::clock::FixedClock;

    struct AcceptCode(&'static str);

    #[async_trait]
    impl SecondFactor for AcceptCode {
        async fn validate(&self, code: &str) -> bool {
            code == self.0
        }
    }

    fn ledger() -> (PointsLedger, MemoryLedgerStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(1_000));
        let store = MemoryLedgerStore::with_clock(clock.clone());
        let ledger = PointsLedger::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(AcceptCode("424242")),
        );
        (ledger, store, clock)
    }

    fn request(selections: Vec<RevokeSelection>) -> RevokeRequest {
        RevokeRequest {
            actor: "admin@example.com".to_string(),
            selections,
            justification: "duplicate grant".to_string(),
            auth_factor: "424242".to_string(),
            batch_reason: None,
        }
    }

    #[tokio::test]
    async fn award_then_balance() {
        let (ledger, _, _) = ledger();
        ledger.award("u1", 100, "WELCOME", None).await.expect("award");
        ledger.award("u1", 25, "PROMO", None).await.expect("award");
        assert_eq!(ledger.get_balance("u1").await.expect("balance"), 125);
        assert_eq!(ledger.get_balance("nobody").await.expect("balance"), 0);
    }

    #[tokio::test]
    async fn award_validation_touches_nothing() {
        let (ledger, store, _) = ledger();
        assert!(matches!(
            ledger.award("u1", 0, "WELCOME", None).await,
            Err(LedgerError::ZeroPoints)
        ));
        assert!(matches!(
            ledger.award("u1", 10, "", None).await,
            Err(LedgerError::EmptyReasonCode)
        ));
        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn award_once_deduplicates_by_key() {
        let (ledger, store, _) = ledger();
        let first = ledger
            .award_once("u1", 50, "REFERRAL", "ref:u9", None)
            .await
            .expect("award");
        let second = ledger
            .award_once("u1", 50, "REFERRAL", "ref:u9", None)
            .await
            .expect("award");
        assert!(first.is_created());
        assert_eq!(second, AwardOnce::Existing(first.event_id().to_string()));
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn revoke_events_uses_original_reason_and_writes_one_audit() {
        let (ledger, store, clock) = ledger();
        let a = ledger.award("u1", 150, "PROMO-X", None).await.expect("award");
        let b = ledger.award("u2", 20, "PROMO-X", None).await.expect("award");
        clock.advance(10);

        let outcome = ledger
            .revoke(request(vec![
                RevokeSelection::events("u1", vec![a.clone()]),
                RevokeSelection::events("u2", vec![b]),
            ]))
            .await
            .expect("revoke");

        assert!(outcome.is_complete());
        assert_eq!(outcome.total_points, 170);
        assert_eq!(outcome.created_event_ids.len(), 2);
        assert_eq!(store.audit_count(), 1);
        assert_eq!(ledger.get_balance("u1").await.expect("balance"), 0);

        let history = ledger.history("u1").await.expect("history");
        let revoke = &history[1];
        assert_eq!(revoke.reason_code, "REVERSAL:PROMO-X");
        assert_eq!(revoke.points, -150);
        assert_eq!(revoke.original_event_ids(), vec![a.as_str()]);
        assert_eq!(revoke.metadata_str(META_BATCH_ID), Some(outcome.batch_id.as_str()));
    }

    #[tokio::test]
    async fn second_factor_rejection_writes_nothing() {
        let (ledger, store, _) = ledger();
        let a = ledger.award("u1", 10, "R", None).await.expect("award");
        let mut req = request(vec![RevokeSelection::events("u1", vec![a])]);
        req.auth_factor = "000000".to_string();

        assert!(matches!(
            ledger.revoke(req).await,
            Err(LedgerError::SecondFactorRejected)
        ));
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.audit_count(), 0);
        assert_eq!(ledger.observability().second_factor_rejected, 1);
    }

    #[tokio::test]
    async fn failed_selection_is_reported_and_others_proceed() {
        let (ledger, store, _) = ledger();
        let a = ledger.award("u1", 40, "R", None).await.expect("award");

        let outcome = ledger
            .revoke(request(vec![
                RevokeSelection::events("u1", vec![a]),
                RevokeSelection::events("u2", vec!["evt_missing".to_string()]),
            ]))
            .await
            .expect("revoke");

        assert!(!outcome.is_complete());
        assert!(outcome.audit_entry_id().is_some());
        let failed: Vec<&str> = outcome.failed().map(|r| r.user_id.as_str()).collect();
        assert_eq!(failed, vec!["u2"]);
        assert_eq!(store.audit_count(), 1);
    }

    #[tokio::test]
    async fn nothing_reversed_means_no_audit() {
        let (ledger, store, _) = ledger();
        let outcome = ledger
            .revoke(request(vec![RevokeSelection::events(
                "u1",
                vec!["evt_missing".to_string()],
            )]))
            .await
            .expect("revoke");
        assert_eq!(outcome.audit, AuditStatus::Skipped);
        assert_eq!(store.audit_count(), 0);
    }

    #[tokio::test]
    async fn revoking_another_users_event_fails() {
        let (ledger, _, _) = ledger();
        let a = ledger.award("u1", 40, "R", None).await.expect("award");
        let outcome = ledger
            .revoke(request(vec![RevokeSelection::events("u2", vec![a])]))
            .await
            .expect("revoke");
        assert!(matches!(
            &outcome.results[0].status,
            SelectionStatus::Failed { error } if error.contains("belongs to u1")
        ));
    }

    #[tokio::test]
    async fn amount_revoke_can_drive_balance_negative() {
        let (ledger, _, _) = ledger();
        ledger.award("u1", 10, "R", None).await.expect("award");
        let outcome = ledger
            .revoke(request(vec![RevokeSelection::amount("u1", 25)]))
            .await
            .expect("revoke");
        assert!(outcome.is_complete());
        assert_eq!(ledger.get_balance("u1").await.expect("balance"), -15);
        let history = ledger.history("u1").await.expect("history");
        assert_eq!(history[1].reason_code, "REVERSAL:MANUAL");
    }

    #[tokio::test]
    async fn double_reversal_detected_and_optionally_refused() {
        let (ledger, _, _) = ledger();
        let a = ledger.award("u1", 30, "R", None).await.expect("award");
        for _ in 0..2 {
            ledger
                .revoke(request(vec![RevokeSelection::events("u1", vec![a.clone()])]))
                .await
                .expect("revoke");
        }
        let doubles = ledger.find_double_reversals(None, None).await.expect("scan");
        assert_eq!(doubles.len(), 1);
        assert_eq!(doubles[0].original_event_id, a);

        let strict = ledger.clone().with_options(LedgerOptions {
            reject_double_reversal: true,
        });
        let outcome = strict
            .revoke(request(vec![RevokeSelection::events("u1", vec![a])]))
            .await
            .expect("revoke");
        assert!(matches!(
            &outcome.results[0].status,
            SelectionStatus::Failed { error } if error.contains("already reversed")
        ));
    }

    #[tokio::test]
    async fn search_groups_matching_events() {
        let (ledger, _, clock) = ledger();
        ledger.award("u2", 5, "PROMO-X", None).await.expect("award");
        clock.advance(5);
        ledger.award("u1", 7, "PROMO-X", None).await.expect("award");
        ledger.award("u1", 9, "OTHER", None).await.expect("award");

        let groups = ledger
            .search_events(&SearchQuery::reason("PROMO-X"))
            .await
            .expect("search");
        let users: Vec<&str> = groups.iter().map(|g| g.user_id.as_str()).collect();
        assert_eq!(users, vec!["u1", "u2"]);
        assert_eq!(groups[0].subtotal, 7);
    }
}
