#![cfg(feature = "store-sqlite")]

use std::sync::Arc;

use async_trait::async_trait;
use tradpoints::audit::{AuditExportFormat, AuditSink, render_audit_export, verify_audit_chain};
use tradpoints::{
    FixedClock, LedgerStore, PointsLedger, RevokeRequest, RevokeSelection, SearchQuery,
    SecondFactor, SqliteLedgerStore,
};

struct FixedCode;

#[async_trait]
impl SecondFactor for FixedCode {
    async fn validate(&self, code: &str) -> bool {
        code == "135790"
    }
}

fn ledger_for(store: &SqliteLedgerStore) -> PointsLedger {
    PointsLedger::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(FixedCode),
    )
}

#[tokio::test]
async fn events_and_audit_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("points.sqlite");
    let clock = Arc::new(FixedClock::new(10_000));

    let batch_id = {
        let store = SqliteLedgerStore::with_clock(&db_path, clock.clone());
        store.init().await.expect("init");
        let ledger = ledger_for(&store);
        let promo = ledger
            .award("u1", 150, "PROMO-X", None)
            .await
            .expect("award");
        ledger.award("u1", 40, "SIGNUP", None).await.expect("award");
        clock.advance(500);
        let outcome = ledger
            .revoke(RevokeRequest {
                actor: "ops".to_string(),
                selections: vec![RevokeSelection::events("u1", vec![promo])],
                justification: "duplicate grant".to_string(),
                auth_factor: "135790".to_string(),
                batch_reason: None,
            })
            .await
            .expect("revoke");
        assert!(outcome.is_complete());
        outcome.batch_id
    };

    let store = SqliteLedgerStore::new(&db_path);
    store.init().await.expect("init");
    let ledger = ledger_for(&store);

    assert_eq!(ledger.get_balance("u1").await.expect("balance"), 40);
    let history = ledger.history("u1").await.expect("history");
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].points, -150);
    assert_eq!(history[2].created_at_ms, 10_500);

    let audits = store.list_audit(10, None).await.expect("audit");
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].batch_id(), Some(batch_id.as_str()));
    assert!(ledger.reconcile_audit(None, None).await.expect("reconcile").is_empty());
}

#[tokio::test]
async fn search_respects_reason_and_inclusive_bounds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(FixedClock::new(1_000));
    let store = SqliteLedgerStore::with_clock(dir.path().join("points.sqlite"), clock.clone());
    store.init().await.expect("init");
    let ledger = ledger_for(&store);

    ledger.award("u1", 10, "R", None).await.expect("award");
    ledger.award("u1", 5, "S", None).await.expect("award");
    clock.set(2_000);
    ledger.award("u2", 20, "R", None).await.expect("award");
    clock.set(2_001);
    ledger.award("u3", 7, "R", None).await.expect("award");

    let groups = ledger
        .search_events(&SearchQuery::reason("R").between(Some(1_000), Some(2_000)))
        .await
        .expect("search");
    let summary: Vec<(&str, i64)> = groups
        .iter()
        .map(|group| (group.user_id.as_str(), group.subtotal))
        .collect();
    assert_eq!(summary, vec![("u1", 10), ("u2", 20)]);
}

#[tokio::test]
async fn exported_audit_chain_verifies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteLedgerStore::with_clock(
        dir.path().join("points.sqlite"),
        Arc::new(FixedClock::new(3_000)),
    );
    store.init().await.expect("init");
    let ledger = ledger_for(&store);

    for user in ["u1", "u2", "u3"] {
        ledger.award(user, 30, "R", None).await.expect("award");
        ledger
            .revoke(RevokeRequest {
                actor: "ops".to_string(),
                selections: vec![RevokeSelection::amount(user, 30)],
                justification: format!("clawback {user}"),
                auth_factor: "135790".to_string(),
                batch_reason: Some("CLAWBACK".to_string()),
            })
            .await
            .expect("revoke");
    }

    let logs = store
        .list_audit_window(100, None, None)
        .await
        .expect("window");
    assert_eq!(logs.len(), 3);
    let ids: Vec<i64> = logs.iter().map(|log| log.id).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

    let jsonl = render_audit_export(AuditExportFormat::Jsonl, logs).expect("render");
    assert_eq!(verify_audit_chain(&jsonl).expect("verify"), 3);

    let tampered = jsonl.replacen("clawback u2", "clawback u9", 1);
    assert!(verify_audit_chain(&tampered).is_err());
}

#[tokio::test]
async fn subscribers_see_sqlite_appends() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteLedgerStore::new(dir.path().join("points.sqlite"));
    store.init().await.expect("init");
    let mut receiver = store.subscribe();
    let ledger = ledger_for(&store);

    let id = ledger.award("u1", 12, "R", None).await.expect("award");
    let event = receiver.recv().await.expect("event");
    assert_eq!(event.id, id);
    assert_eq!(event.points, 12);
}
