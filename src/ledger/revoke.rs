use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::EventId;
use crate::LedgerError;
use crate::audit::{AuditEntry, POINTS_REVOKED};

/// What to reverse for one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevokeSelection {
    /// Net out these prior award events exactly.
    Events {
        user_id: String,
        event_ids: Vec<EventId>,
    },
    /// Free-standing deduction not linked to specific awards.
    Amount {
        user_id: String,
        amount: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_code: Option<String>,
    },
}

impl RevokeSelection {
    pub fn events(user_id: impl Into<String>, event_ids: Vec<EventId>) -> Self {
        Self::Events {
            user_id: user_id.into(),
            event_ids,
        }
    }

    pub fn amount(user_id: impl Into<String>, amount: i64) -> Self {
        Self::Amount {
            user_id: user_id.into(),
            amount,
            reason_code: None,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Events { user_id, .. } | Self::Amount { user_id, .. } => user_id,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RevokeRequest {
    pub actor: String,
    pub selections: Vec<RevokeSelection>,
    pub justification: String,
    pub auth_factor: String,
    /// Used in reversal reason codes when a selection has no single original reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_reason: Option<String>,
}

impl std::fmt::Debug for RevokeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevokeRequest")
            .field("actor", &self.actor)
            .field("selections", &self.selections)
            .field("justification", &self.justification)
            .field("auth_factor", &"<redacted>")
            .field("batch_reason", &self.batch_reason)
            .finish()
    }
}

impl RevokeRequest {
    /// Checks everything that can be checked without the store.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.selections.is_empty() {
            return Err(LedgerError::EmptySelections);
        }
        if self.justification.trim().is_empty() {
            return Err(LedgerError::EmptyJustification);
        }
        if self.actor.trim().is_empty() {
            return Err(LedgerError::EmptyActor);
        }

        let mut referenced = HashSet::<&str>::new();
        for selection in &self.selections {
            if selection.user_id().trim().is_empty() {
                return Err(LedgerError::EmptyUserId);
            }
            match selection {
                RevokeSelection::Events { event_ids, .. } => {
                    if event_ids.is_empty() {
                        return Err(LedgerError::InvalidAmount {
                            reason: format!(
                                "selection for {} references no events",
                                selection.user_id()
                            ),
                        });
                    }
                    for event_id in event_ids {
                        if !referenced.insert(event_id.as_str()) {
                            return Err(LedgerError::DuplicateEventReference(event_id.clone()));
                        }
                    }
                }
                RevokeSelection::Amount { amount, .. } => {
                    if *amount <= 0 {
                        return Err(LedgerError::InvalidAmount {
                            reason: format!(
                                "amount for {} must be positive, got {amount}",
                                selection.user_id()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SelectionStatus {
    Reversed { event_id: EventId, amount: i64 },
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub user_id: String,
    #[serde(flatten)]
    pub status: SelectionStatus,
}

impl SelectionResult {
    pub fn is_reversed(&self) -> bool {
        matches!(self.status, SelectionStatus::Reversed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    Written { audit_entry_id: i64 },
    /// Nothing was reversed, so there is nothing to audit.
    Skipped,
    /// Events were appended but the audit write failed; see `reconcile_audit`.
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevokeOutcome {
    pub batch_id: String,
    pub results: Vec<SelectionResult>,
    pub created_event_ids: Vec<EventId>,
    /// Positive total taken back across reversed selections.
    pub total_points: i64,
    pub audit: AuditStatus,
}

impl RevokeOutcome {
    pub fn audit_entry_id(&self) -> Option<i64> {
        match self.audit {
            AuditStatus::Written { audit_entry_id } => Some(audit_entry_id),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.results.iter().all(SelectionResult::is_reversed)
            && matches!(self.audit, AuditStatus::Written { .. })
    }

    pub fn failed(&self) -> impl Iterator<Item = &SelectionResult> {
        self.results.iter().filter(|result| !result.is_reversed())
    }
}

/// One reversed selection as it appears in the audit trail.
#[derive(Clone, Debug, PartialEq)]
pub struct ReversedSelection {
    pub user_id: String,
    pub amount: i64,
    pub event_id: EventId,
}

/// Builds the single audit entry for a reversal batch.
pub fn revoke_audit_entry(
    batch_id: &str,
    actor: &str,
    justification: &str,
    reversed: &[ReversedSelection],
    total_points: i64,
    failed_user_ids: &[String],
    reconstructed: bool,
) -> AuditEntry {
    let mut user_ids: Vec<&str> = reversed.iter().map(|s| s.user_id.as_str()).collect();
    user_ids.sort_unstable();
    user_ids.dedup();
    let user_count = user_ids.len();

    let mut description = format!(
        "Revoked {total_points} points from {user_count} user(s) [{}]: {justification}",
        user_ids.join(", ")
    );
    if !failed_user_ids.is_empty() {
        description.push_str(&format!(" (not reversed: {})", failed_user_ids.join(", ")));
    }
    if reconstructed {
        description.push_str(" (reconstructed from ledger events)");
    }

    let event_ids: Vec<&str> = reversed.iter().map(|s| s.event_id.as_str()).collect();
    AuditEntry {
        action: POINTS_REVOKED.to_string(),
        actor: actor.to_string(),
        description,
        payload: serde_json::json!({
            "batch_id": batch_id,
            "user_ids": user_ids,
            "user_count": user_count,
            "total_points": total_points,
            "justification": justification,
            "revoke_event_ids": event_ids,
            "failed_user_ids": failed_user_ids,
            "reconstructed": reconstructed,
        }),
    }
}
