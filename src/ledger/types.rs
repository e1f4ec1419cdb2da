use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::LedgerError;

pub type EventId = String;
pub type Metadata = BTreeMap<String, serde_json::Value>;

pub const META_DEDUP_KEY: &str = "dedup_key";
pub const META_BATCH_ID: &str = "batch_id";
pub const META_ACTOR: &str = "actor";
pub const META_JUSTIFICATION: &str = "justification";
pub const META_ORIGINAL_EVENT_IDS: &str = "original_event_ids";
pub const META_ORIGINAL_REASON: &str = "original_reason";

pub const REVERSAL_PREFIX: &str = "REVERSAL:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Award,
    Revoke,
}

impl LedgerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Award => "award",
            Self::Revoke => "revoke",
        }
    }
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerAction {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "award" => Ok(Self::Award),
            "revoke" => Ok(Self::Revoke),
            other => Err(LedgerError::InvalidAction(other.to_string())),
        }
    }
}

/// One immutable point change. Only stores construct these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointsLedgerEvent {
    pub id: EventId,
    pub user_id: String,
    pub points: i64,
    pub action: LedgerAction,
    pub reason_code: String,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl PointsLedgerEvent {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }

    /// Ids of the events this revoke offsets, if it recorded any.
    pub fn original_event_ids(&self) -> Vec<&str> {
        self.metadata
            .get(META_ORIGINAL_EVENT_IDS)
            .and_then(serde_json::Value::as_array)
            .map(|ids| ids.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// An event as submitted for append. There is no id or timestamp here; the
/// store assigns both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEvent {
    pub user_id: String,
    pub points: i64,
    pub action: LedgerAction,
    pub reason_code: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewLedgerEvent {
    pub fn award(
        user_id: impl Into<String>,
        points: i64,
        reason_code: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            points,
            action: LedgerAction::Award,
            reason_code: trimmed(reason_code.into()),
            metadata,
        }
    }

    pub fn revoke(
        user_id: impl Into<String>,
        amount: i64,
        reason_code: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            points: amount.saturating_neg(),
            action: LedgerAction::Revoke,
            reason_code: trimmed(reason_code.into()),
            metadata,
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.user_id.trim().is_empty() {
            return Err(LedgerError::EmptyUserId);
        }
        if self.points == 0 {
            return Err(LedgerError::ZeroPoints);
        }
        if self.reason_code.trim().is_empty() {
            return Err(LedgerError::EmptyReasonCode);
        }
        if self.reason_code.trim() != self.reason_code {
            return Err(LedgerError::PaddedReasonCode(self.reason_code.clone()));
        }
        if self.action == LedgerAction::Revoke && self.points > 0 {
            return Err(LedgerError::InvalidAmount {
                reason: "revoke events must carry negative points".to_string(),
            });
        }
        Ok(())
    }

    pub fn into_event(self, id: EventId, created_at_ms: u64) -> PointsLedgerEvent {
        PointsLedgerEvent {
            id,
            user_id: self.user_id,
            points: self.points,
            action: self.action,
            reason_code: self.reason_code,
            created_at_ms,
            metadata: self.metadata,
        }
    }
}

// Stored reason codes never carry surrounding whitespace; search matches them exactly.
fn trimmed(reason_code: String) -> String {
    if reason_code.trim().len() == reason_code.len() {
        reason_code
    } else {
        reason_code.trim().to_string()
    }
}

pub fn reversal_reason(reason: &str) -> String {
    format!("{REVERSAL_PREFIX}{reason}")
}

/// Exact sum of `points`, or `None` when the total does not fit in `i64`.
/// Accumulates in `i128`, so the result does not depend on event order.
pub fn sum_points<'a>(events: impl IntoIterator<Item = &'a PointsLedgerEvent>) -> Option<i64> {
    let total: i128 = events
        .into_iter()
        .map(|event| i128::from(event.points))
        .sum();
    i64::try_from(total).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_closed_set_only() {
        assert_eq!("award".parse::<LedgerAction>().unwrap(), LedgerAction::Award);
        assert_eq!(" revoke ".parse::<LedgerAction>().unwrap(), LedgerAction::Revoke);
        let err = "refund".parse::<LedgerAction>().unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAction(ref raw) if raw == "refund"));
    }

    #[test]
    fn action_rejects_unknown_value_when_deserialized() {
        let raw = r#"{"user_id":"u1","points":5,"action":"bonus","reason_code":"X"}"#;
        assert!(serde_json::from_str::<NewLedgerEvent>(raw).is_err());
    }

    #[test]
    fn validate_rejects_zero_points_and_empty_fields() {
        let event = NewLedgerEvent::award("u1", 0, "X", Metadata::new());
        assert!(matches!(event.validate(), Err(LedgerError::ZeroPoints)));

        let event = NewLedgerEvent::award("u1", 5, "  ", Metadata::new());
        assert!(matches!(event.validate(), Err(LedgerError::EmptyReasonCode)));

        let event = NewLedgerEvent::award("", 5, "X", Metadata::new());
        assert!(matches!(event.validate(), Err(LedgerError::EmptyUserId)));
    }

    #[test]
    fn award_trims_reason_code() {
        let event = NewLedgerEvent::award("u1", 5, " PROMO-X\t", Metadata::new());
        assert_eq!(event.reason_code, "PROMO-X");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn validate_rejects_padded_reason_code() {
        let mut event = NewLedgerEvent::award("u1", 5, "PROMO-X", Metadata::new());
        event.reason_code = " PROMO-X".to_string();
        assert!(matches!(
            event.validate(),
            Err(LedgerError::PaddedReasonCode(ref raw)) if raw == " PROMO-X"
        ));
    }

    #[test]
    fn sum_points_is_exact_near_the_limit() {
        let events = [
            NewLedgerEvent::award("u1", i64::MAX, "R", Metadata::new()).into_event("e1".into(), 1),
            NewLedgerEvent::award("u1", 1, "R", Metadata::new()).into_event("e2".into(), 2),
            NewLedgerEvent::award("u1", -1, "R", Metadata::new()).into_event("e3".into(), 3),
        ];
        assert_eq!(sum_points(&events), Some(i64::MAX));
        assert_eq!(sum_points(events.iter().rev()), Some(i64::MAX));
        assert_eq!(sum_points(&events[..2]), None);
    }

    #[test]
    fn negative_award_is_allowed() {
        let event = NewLedgerEvent::award("u1", -3, "ADJUST", Metadata::new());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn revoke_negates_amount() {
        let event = NewLedgerEvent::revoke("u1", 150, reversal_reason("PROMO-X"), Metadata::new());
        assert_eq!(event.points, -150);
        assert_eq!(event.reason_code, "REVERSAL:PROMO-X");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn original_event_ids_reads_metadata_array() {
        let mut metadata = Metadata::new();
        metadata.insert(
            META_ORIGINAL_EVENT_IDS.to_string(),
            serde_json::json!(["evt_a", "evt_b"]),
        );
        let event = NewLedgerEvent::revoke("u1", 10, "REVERSAL:X", metadata).into_event("evt_r".into(), 1);
        assert_eq!(event.original_event_ids(), vec!["evt_a", "evt_b"]);
    }
}
