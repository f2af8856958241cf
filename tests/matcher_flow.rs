use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use wagerdesk::error::CoreError;
use wagerdesk::live::ActivityFeed;
use wagerdesk::matcher::{EnqueueRequest, MatchingEngine};
use wagerdesk::model::{Customer, MatchStatus, QueueKind, QueueStatus};
use wagerdesk::store::{MatchFilter, MemoryStore, QueueFilter, Store};

// ── Helpers ─────────────────────────────────────────────────────────

fn customer(id: &str, balance: f64) -> Customer {
    Customer {
        customer_id: id.to_string(),
        agent_id: "AG1".to_string(),
        login: id.to_lowercase(),
        display_name: id.to_string(),
        phone: None,
        email: None,
        balance,
        pending_balance: 0.0,
        daily_pnl: [0.0; 7],
        last_ticket_at: None,
        last_verified_at: None,
        suspect_bot: false,
        zero_balance: false,
        active: true,
        sportsbook_suspended: false,
        casino_suspended: false,
    }
}

fn request(customer_id: &str, amount: f64, method: &str, priority: i32) -> EnqueueRequest {
    EnqueueRequest {
        customer_id: customer_id.to_string(),
        amount,
        payment_method: method.to_string(),
        payment_details: String::new(),
        priority,
        notes: None,
    }
}

async fn engine_with_customers(
    balances: &[(&str, f64)],
) -> (Arc<MemoryStore>, MatchingEngine) {
    let store = Arc::new(MemoryStore::new());
    for (id, balance) in balances {
        store.customer_upsert(&customer(id, *balance)).await.unwrap();
    }
    let engine = MatchingEngine::new(
        store.clone(),
        Arc::new(ActivityFeed::new()),
        Duration::from_secs(900),
    );
    (store, engine)
}

// ── Enqueue validation ──────────────────────────────────────────────

#[tokio::test]
async fn withdrawal_requires_available_balance() {
    let (_, engine) = engine_with_customers(&[("CUS1", 50.0)]).await;
    let err = engine
        .enqueue_withdrawal(request("CUS1", 100.0, "ACH", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn withdrawal_reserves_pending_balance() {
    let (store, engine) = engine_with_customers(&[("CUS1", 200.0)]).await;
    engine
        .enqueue_withdrawal(request("CUS1", 120.0, "ACH", 1))
        .await
        .unwrap();

    let c = store.customer_get("CUS1").await.unwrap().unwrap();
    assert_eq!(c.pending_balance, 120.0);
    assert_eq!(c.available_balance(), 80.0);

    // The reservation counts against the next withdrawal.
    let err = engine
        .enqueue_withdrawal(request("CUS1", 100.0, "ACH", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn non_positive_amounts_rejected() {
    let (_, engine) = engine_with_customers(&[("CUS1", 100.0)]).await;
    for amount in [0.0, -5.0] {
        let err = engine
            .enqueue_deposit(request("CUS1", amount, "ACH", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}

// ── Pairing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn pass_pairs_exact_candidate_and_leaves_the_rest() {
    let (store, engine) =
        engine_with_customers(&[("W1", 500.0), ("D1", 0.0), ("D2", 0.0)]).await;

    // Matching runs after every enqueue; the deposits arrive first so the
    // withdrawal pairs immediately on its own enqueue.
    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_deposit(request("D2", 150.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();

    let matches = store.matches_list(&MatchFilter::default()).await.unwrap();
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.amount, 100.0);
    assert_eq!(m.score, 75); // method + exact amount + full cover
    assert_eq!(m.status, MatchStatus::Pending);

    let withdrawal = store.queue_get(&m.withdrawal_id).await.unwrap().unwrap();
    let deposit = store.queue_get(&m.deposit_id).await.unwrap().unwrap();
    assert_eq!(withdrawal.status, QueueStatus::Matched);
    assert_eq!(deposit.status, QueueStatus::Matched);
    assert_eq!(deposit.customer_id, "D1");

    // The larger deposit is still waiting.
    let pending = store
        .queue_list(&QueueFilter {
            kind: Some(QueueKind::Deposit),
            status: Some(QueueStatus::Pending),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].customer_id, "D2");
}

#[tokio::test]
async fn incompatible_methods_never_match() {
    let (store, engine) = engine_with_customers(&[("W1", 500.0), ("D1", 0.0)]).await;
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_deposit(request("D1", 100.0, "WIRE", 1))
        .await
        .unwrap();

    for _ in 0..10 {
        engine.run_matching_pass().await.unwrap();
    }

    assert!(store
        .matches_list(&MatchFilter::default())
        .await
        .unwrap()
        .is_empty());
    let pending = store
        .queue_list(&QueueFilter {
            status: Some(QueueStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn matched_items_are_never_rematched() {
    let (store, engine) =
        engine_with_customers(&[("W1", 500.0), ("W2", 500.0), ("D1", 0.0)]).await;

    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W2", 100.0, "ACH", 1))
        .await
        .unwrap();
    for _ in 0..5 {
        engine.run_matching_pass().await.unwrap();
    }

    // One deposit can back only one withdrawal.
    let matches = store.matches_list(&MatchFilter::default()).await.unwrap();
    assert_eq!(matches.len(), 1);

    // No queue item is referenced by two live matches.
    let mut refs: HashMap<String, usize> = HashMap::new();
    for m in matches.iter().filter(|m| m.status != MatchStatus::Failed) {
        *refs.entry(m.withdrawal_id.clone()).or_default() += 1;
        *refs.entry(m.deposit_id.clone()).or_default() += 1;
    }
    assert!(refs.values().all(|&n| n == 1));
}

#[tokio::test]
async fn higher_priority_withdrawal_wins_the_scarce_deposit() {
    let (store, engine) =
        engine_with_customers(&[("W1", 500.0), ("W2", 500.0), ("D1", 0.0)]).await;

    // Enqueue deposits last so nothing pairs until the queue is full.
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W2", 100.0, "ACH", 5))
        .await
        .unwrap();
    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 1))
        .await
        .unwrap();

    let matches = store.matches_list(&MatchFilter::default()).await.unwrap();
    assert_eq!(matches.len(), 1);
    let w = store
        .queue_get(&matches[0].withdrawal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(w.customer_id, "W2");
}

// ── Completion workflow ─────────────────────────────────────────────

#[tokio::test]
async fn complete_match_moves_funds_and_releases_reservation() {
    let (store, engine) = engine_with_customers(&[("W1", 500.0), ("D1", 20.0)]).await;

    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();

    let m = store.matches_list(&MatchFilter::default()).await.unwrap()[0].clone();
    let done = engine.complete_match(&m.id, Some("paid out")).await.unwrap();
    assert_eq!(done.status, MatchStatus::Completed);
    assert!(done.completed_at.is_some());

    let w = store.customer_get("W1").await.unwrap().unwrap();
    assert_eq!(w.balance, 400.0);
    assert_eq!(w.pending_balance, 0.0);

    let d = store.customer_get("D1").await.unwrap().unwrap();
    assert_eq!(d.balance, 120.0);

    for id in [&done.withdrawal_id, &done.deposit_id] {
        let item = store.queue_get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
    }

    // Completing again is a conflict.
    let err = engine.complete_match(&m.id, None).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn oversized_deposit_requeues_its_remainder() {
    let (store, engine) = engine_with_customers(&[("W1", 500.0), ("D1", 0.0)]).await;

    // $100 deposited, only a $60 withdrawal to pair against.
    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 3))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W1", 60.0, "ACH", 1))
        .await
        .unwrap();

    let m = store.matches_list(&MatchFilter::default()).await.unwrap()[0].clone();
    assert_eq!(m.amount, 60.0);
    engine.complete_match(&m.id, None).await.unwrap();

    // The depositor is credited the transferred amount and keeps the
    // remainder queued: nothing vanishes.
    let d = store.customer_get("D1").await.unwrap().unwrap();
    assert_eq!(d.balance, 60.0);

    let pending = store
        .queue_list(&QueueFilter {
            kind: Some(QueueKind::Deposit),
            status: Some(QueueStatus::Pending),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    let carry = &pending[0];
    assert_eq!(carry.amount, 40.0);
    assert_eq!(carry.customer_id, "D1");
    assert_eq!(carry.priority, 3);
    assert_ne!(carry.id, m.deposit_id);

    // Credited plus requeued covers the full original deposit.
    assert_eq!(d.balance + carry.amount, 100.0);

    // The remainder is live: a second withdrawal pairs against it.
    store
        .customer_upsert(&customer("W2", 200.0))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W2", 40.0, "ACH", 1))
        .await
        .unwrap();
    let matches = store.matches_list(&MatchFilter::default()).await.unwrap();
    assert_eq!(matches.len(), 2);
    let second = matches.iter().find(|x| x.id != m.id).unwrap();
    assert_eq!(second.deposit_id, carry.id);
    assert_eq!(second.amount, 40.0);
}

#[tokio::test]
async fn retryable_failure_returns_items_to_pending() {
    let (store, engine) = engine_with_customers(&[("W1", 500.0), ("D1", 0.0)]).await;

    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();

    let m = store.matches_list(&MatchFilter::default()).await.unwrap()[0].clone();
    engine.fail_match(&m.id, "bank bounced", true).await.unwrap();

    for id in [&m.withdrawal_id, &m.deposit_id] {
        let item = store.queue_get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
    }
    // The reservation stays while the withdrawal is still live.
    let w = store.customer_get("W1").await.unwrap().unwrap();
    assert_eq!(w.pending_balance, 100.0);

    // The next pass pairs them again under a fresh match.
    let created = engine.run_matching_pass().await.unwrap();
    assert_eq!(created.len(), 1);
    assert_ne!(created[0].id, m.id);
}

#[tokio::test]
async fn terminal_failure_releases_the_reservation() {
    let (store, engine) = engine_with_customers(&[("W1", 500.0), ("D1", 0.0)]).await;

    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();

    let m = store.matches_list(&MatchFilter::default()).await.unwrap()[0].clone();
    engine.fail_match(&m.id, "fraud review", false).await.unwrap();

    for id in [&m.withdrawal_id, &m.deposit_id] {
        let item = store.queue_get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
    }
    let w = store.customer_get("W1").await.unwrap().unwrap();
    assert_eq!(w.pending_balance, 0.0);
    assert_eq!(w.balance, 500.0);
}

// ── Stale matches ───────────────────────────────────────────────────

#[tokio::test]
async fn stale_pending_matches_are_auto_failed() {
    let store = Arc::new(MemoryStore::new());
    for (id, balance) in [("W1", 500.0), ("D1", 0.0)] {
        store.customer_upsert(&customer(id, balance)).await.unwrap();
    }
    // Zero TTL: anything pending is immediately stale.
    let engine = MatchingEngine::new(
        store.clone(),
        Arc::new(ActivityFeed::new()),
        Duration::from_millis(0),
    );

    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();

    let reaped = engine.reap_stale().await.unwrap();
    assert_eq!(reaped, 1);

    let matches = store.matches_list(&MatchFilter::default()).await.unwrap();
    assert_eq!(matches[0].status, MatchStatus::Failed);
    assert_eq!(matches[0].note.as_deref(), Some("stale"));

    let pending = store
        .queue_list(&QueueFilter {
            status: Some(QueueStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
}

// ── Stats ───────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_count_by_status_per_queue() {
    let (_, engine) = engine_with_customers(&[("W1", 500.0), ("D1", 0.0), ("D2", 0.0)]).await;

    engine
        .enqueue_deposit(request("D1", 100.0, "ACH", 1))
        .await
        .unwrap();
    engine
        .enqueue_deposit(request("D2", 400.0, "WIRE", 1))
        .await
        .unwrap();
    engine
        .enqueue_withdrawal(request("W1", 100.0, "ACH", 1))
        .await
        .unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.withdrawals.matched, 1);
    assert_eq!(stats.deposits.matched, 1);
    assert_eq!(stats.deposits.pending, 1);
    assert!(stats.passes >= 3);
}
