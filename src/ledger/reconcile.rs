use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::revoke::{ReversedSelection, revoke_audit_entry};
use super::{
    EventId, LedgerAction, META_ACTOR, META_BATCH_ID, META_JUSTIFICATION, PointsLedgerEvent,
};
use crate::audit::{AuditEntry, AuditLogRecord};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoubleReversal {
    pub original_event_id: EventId,
    pub user_id: String,
    pub revoke_event_ids: Vec<EventId>,
}

/// Original events referenced by more than one revoke, ordered by id.
pub fn find_double_reversals(events: &[PointsLedgerEvent]) -> Vec<DoubleReversal> {
    let mut by_original = BTreeMap::<&str, (&str, Vec<EventId>)>::new();
    for event in events.iter().filter(|e| e.action == LedgerAction::Revoke) {
        for original in event.original_event_ids() {
            by_original
                .entry(original)
                .or_insert_with(|| (event.user_id.as_str(), Vec::new()))
                .1
                .push(event.id.clone());
        }
    }

    by_original
        .into_iter()
        .filter(|(_, (_, revokes))| revokes.len() > 1)
        .map(|(original, (user_id, revoke_event_ids))| DoubleReversal {
            original_event_id: original.to_string(),
            user_id: user_id.to_string(),
            revoke_event_ids,
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissingAudit {
    pub batch_id: String,
    pub event_ids: Vec<EventId>,
    pub entry: AuditEntry,
}

/// Revoke batches with events in the ledger but no audit record. The
/// returned entries are rebuilt from event metadata.
pub fn missing_audit_entries(
    revokes: &[PointsLedgerEvent],
    audits: &[AuditLogRecord],
) -> Vec<MissingAudit> {
    let audited: BTreeSet<&str> = audits.iter().filter_map(AuditLogRecord::batch_id).collect();

    let mut batches = BTreeMap::<&str, Vec<&PointsLedgerEvent>>::new();
    for event in revokes.iter().filter(|e| e.action == LedgerAction::Revoke) {
        let Some(batch_id) = event.metadata_str(META_BATCH_ID) else {
            continue;
        };
        batches.entry(batch_id).or_default().push(event);
    }

    batches
        .into_iter()
        .filter(|(batch_id, _)| !audited.contains(batch_id))
        .filter_map(|(batch_id, events)| {
            let reversed_sum: i128 = events.iter().map(|e| -i128::from(e.points)).sum();
            let Ok(total_points) = i64::try_from(reversed_sum) else {
                tracing::warn!(batch_id, "revoke batch total out of range; audit not rebuilt");
                return None;
            };
            let first = events[0];
            let actor = first.metadata_str(META_ACTOR).unwrap_or("unknown");
            let justification = first.metadata_str(META_JUSTIFICATION).unwrap_or("");
            let reversed: Vec<ReversedSelection> = events
                .iter()
                .map(|event| ReversedSelection {
                    user_id: event.user_id.clone(),
                    amount: event.points.saturating_neg(),
                    event_id: event.id.clone(),
                })
                .collect();
            Some(MissingAudit {
                batch_id: batch_id.to_string(),
                event_ids: events.iter().map(|event| event.id.clone()).collect(),
                entry: revoke_audit_entry(
                    batch_id,
                    actor,
                    justification,
                    &reversed,
                    total_points,
                    &[],
                    true,
                ),
            })
        })
        .collect()
}
