use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub awards: u64,
    pub award_failures: u64,
    pub balance_reads: u64,
    pub searches: u64,
    pub revoke_batches: u64,
    pub revoke_events: u64,
    pub revoke_selection_failures: u64,
    pub second_factor_rejected: u64,
    pub audit_entries: u64,
    pub audit_failures: u64,
}

#[derive(Debug, Default)]
pub struct Observability {
    snapshot: ObservabilitySnapshot,
}

impl Observability {
    pub fn record_award(&mut self) {
        self.snapshot.awards = self.snapshot.awards.saturating_add(1);
    }

    pub fn record_award_failure(&mut self) {
        self.snapshot.award_failures = self.snapshot.award_failures.saturating_add(1);
    }

    pub fn record_balance_read(&mut self) {
        self.snapshot.balance_reads = self.snapshot.balance_reads.saturating_add(1);
    }

    pub fn record_search(&mut self) {
        self.snapshot.searches = self.snapshot.searches.saturating_add(1);
    }

    pub fn record_revoke_batch(&mut self) {
        self.snapshot.revoke_batches = self.snapshot.revoke_batches.saturating_add(1);
    }

    pub fn record_revoke_event(&mut self) {
        self.snapshot.revoke_events = self.snapshot.revoke_events.saturating_add(1);
    }

    pub fn record_revoke_selection_failure(&mut self) {
        self.snapshot.revoke_selection_failures =
            self.snapshot.revoke_selection_failures.saturating_add(1);
    }

    pub fn record_second_factor_rejected(&mut self) {
        self.snapshot.second_factor_rejected =
            self.snapshot.second_factor_rejected.saturating_add(1);
    }

    pub fn record_audit_entry(&mut self) {
        self.snapshot.audit_entries = self.snapshot.audit_entries.saturating_add(1);
    }

    pub fn record_audit_failure(&mut self) {
        self.snapshot.audit_failures = self.snapshot.audit_failures.saturating_add(1);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        self.snapshot.clone()
    }
}
