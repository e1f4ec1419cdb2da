use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{EventFilter, PointsLedgerEvent, sum_points};
use crate::LedgerError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub since_ms: Option<u64>,
    #[serde(default)]
    pub until_ms: Option<u64>,
    #[serde(default)]
    pub reason_code: Option<String>,
}

impl SearchQuery {
    pub fn reason(reason_code: impl Into<String>) -> Self {
        Self {
            reason_code: Some(reason_code.into()),
            ..Self::default()
        }
    }

    pub fn between(mut self, since_ms: Option<u64>, until_ms: Option<u64>) -> Self {
        self.since_ms = since_ms;
        self.until_ms = until_ms;
        self
    }

    /// Blank reason codes mean "any reason". Others are trimmed, matching
    /// how awards and revokes store them.
    pub fn to_filter(&self) -> Result<EventFilter, LedgerError> {
        if let (Some(since_ms), Some(until_ms)) = (self.since_ms, self.until_ms) {
            if since_ms > until_ms {
                return Err(LedgerError::InvalidDateRange { since_ms, until_ms });
            }
        }
        let reason_code = self
            .reason_code
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);
        Ok(EventFilter {
            reason_code,
            since_ms: self.since_ms,
            until_ms: self.until_ms,
            ..EventFilter::default()
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserEventGroup {
    pub user_id: String,
    pub events: Vec<PointsLedgerEvent>,
    /// Sum over `events` only, not the user's lifetime balance.
    pub subtotal: i64,
}

/// Groups ordered by user id; events within a group by `created_at_ms`.
pub fn group_events_by_user(
    events: Vec<PointsLedgerEvent>,
) -> Result<Vec<UserEventGroup>, LedgerError> {
    let mut grouped = BTreeMap::<String, Vec<PointsLedgerEvent>>::new();
    for event in events {
        grouped.entry(event.user_id.clone()).or_default().push(event);
    }

    grouped
        .into_iter()
        .map(|(user_id, mut events)| {
            events.sort_by_key(|event| event.created_at_ms);
            let subtotal = sum_points(&events)
                .ok_or_else(|| LedgerError::PointsOverflow { user_id: user_id.clone() })?;
            Ok(UserEventGroup {
                user_id,
                events,
                subtotal,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Metadata, NewLedgerEvent};

    fn event(id: &str, user_id: &str, points: i64, reason: &str, ts: u64) -> PointsLedgerEvent {
        NewLedgerEvent::award(user_id, points, reason, Metadata::new()).into_event(id.to_string(), ts)
    }

    #[test]
    fn groups_by_user_with_subtotals() {
        let groups = group_events_by_user(vec![
            event("e3", "u2", 20, "R", 3),
            event("e1", "u1", 10, "R", 1),
            event("e2", "u1", 5, "R", 2),
        ])
        .expect("groups");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].user_id, "u1");
        assert_eq!(groups[0].subtotal, 15);
        let ids: Vec<&str> = groups[0].events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
        assert_eq!(groups[1].user_id, "u2");
        assert_eq!(groups[1].subtotal, 20);
    }

    #[test]
    fn orders_events_within_group_by_timestamp() {
        let groups = group_events_by_user(vec![
            event("late", "u1", 1, "R", 50),
            event("early", "u1", 1, "R", 10),
        ])
        .expect("groups");
        let ids: Vec<&str> = groups[0].events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_events_by_user(Vec::new()).expect("groups").is_empty());
    }

    #[test]
    fn subtotal_out_of_range_is_an_error() {
        let err = group_events_by_user(vec![
            event("e1", "u1", i64::MAX, "R", 1),
            event("e2", "u1", i64::MAX, "R", 2),
        ])
        .unwrap_err();
        assert!(matches!(err, LedgerError::PointsOverflow { ref user_id } if user_id == "u1"));
    }

    #[test]
    fn padded_reason_filter_matches_stored_code() {
        let filter = SearchQuery::reason(" PROMO-X ").to_filter().expect("filter");
        let stored = NewLedgerEvent::award("u1", 5, " PROMO-X", Metadata::new())
            .into_event("e1".to_string(), 1);
        assert!(filter.matches(&stored));
    }

    #[test]
    fn blank_reason_is_unfiltered() {
        let filter = SearchQuery::reason("  ").to_filter().expect("filter");
        assert_eq!(filter.reason_code, None);
        let filter = SearchQuery::reason("PROMO-X").to_filter().expect("filter");
        assert_eq!(filter.reason_code.as_deref(), Some("PROMO-X"));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = SearchQuery::default()
            .between(Some(20), Some(10))
            .to_filter()
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidDateRange {
                since_ms: 20,
                until_ms: 10
            }
        ));
    }
}
