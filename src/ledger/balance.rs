use std::collections::HashSet;
use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{EventFilter, EventId, LedgerStore, PointsLedgerEvent};
use crate::LedgerError;

/// Running sum over one user's events: a snapshot from the store, then the
/// live feed. A live event the snapshot already counted is skipped once.
#[derive(Clone, Debug)]
pub struct BalanceReducer {
    user_id: String,
    balance: i128,
    // Snapshot ids not yet seen on the live feed.
    unmatched: HashSet<EventId>,
}

impl BalanceReducer {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: 0,
            unmatched: HashSet::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn balance(&self) -> Result<i64, LedgerError> {
        i64::try_from(self.balance).map_err(|_| LedgerError::PointsOverflow {
            user_id: self.user_id.clone(),
        })
    }

    /// Replaces the running sum with a fresh snapshot.
    pub fn seed<'a>(&mut self, events: impl IntoIterator<Item = &'a PointsLedgerEvent>) {
        self.balance = 0;
        self.unmatched.clear();
        for event in events {
            if event.user_id == self.user_id {
                self.balance += i128::from(event.points);
                self.unmatched.insert(event.id.clone());
            }
        }
    }

    /// Applies one live event. Returns whether the balance changed.
    pub fn fold(&mut self, event: &PointsLedgerEvent) -> bool {
        if event.user_id != self.user_id || self.unmatched.remove(&event.id) {
            return false;
        }
        self.balance += i128::from(event.points);
        true
    }

    pub fn snapshot_ids_pending(&self) -> usize {
        self.unmatched.len()
    }
}

/// Live balance for one user, fed by the store's subscription.
pub struct BalanceWatch {
    store: Arc<dyn LedgerStore>,
    receiver: broadcast::Receiver<PointsLedgerEvent>,
    reducer: BalanceReducer,
}

impl BalanceWatch {
    pub(crate) async fn start(
        store: Arc<dyn LedgerStore>,
        user_id: &str,
    ) -> Result<Self, LedgerError> {
        // Subscribe before the snapshot so nothing appended in between is missed.
        let receiver = store.subscribe();
        let mut watch = Self {
            store,
            receiver,
            reducer: BalanceReducer::new(user_id),
        };
        watch.resync().await?;
        Ok(watch)
    }

    pub fn user_id(&self) -> &str {
        self.reducer.user_id()
    }

    pub fn current(&self) -> Result<i64, LedgerError> {
        self.reducer.balance()
    }

    /// Waits for the next change to this user's balance.
    pub async fn changed(&mut self) -> Result<i64, LedgerError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.reducer.fold(&event) {
                        return self.reducer.balance();
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        user_id = %self.reducer.user_id(),
                        skipped,
                        "balance watch lagged; re-summing from store"
                    );
                    let before = self.reducer.balance;
                    self.resync().await?;
                    if self.reducer.balance != before {
                        return self.reducer.balance();
                    }
                }
                Err(RecvError::Closed) => return Err(LedgerError::SubscriptionClosed),
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<i64, LedgerError>> + Send {
        futures_util::stream::unfold(Some(self), |watch| async move {
            let mut watch = watch?;
            match watch.changed().await {
                Ok(balance) => Some((Ok(balance), Some(watch))),
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    async fn resync(&mut self) -> Result<(), LedgerError> {
        let events = self
            .store
            .query(&EventFilter::for_user(self.reducer.user_id()))
            .await?;
        self.reducer.seed(&events);
        Ok(())
    }
}
