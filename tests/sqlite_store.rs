use std::collections::HashSet;

use wagerdesk::model::{
    Agent, AgentPatch, AgentStatus, Customer, Match, MatchStatus, QueueItem, QueueKind,
    QueueStatus, Wager, WagerStatus, now_ms,
};
use wagerdesk::store::{QueueFilter, SqliteStore, Store, WagerFilter};

fn agent(id: &str) -> Agent {
    let mut permissions = HashSet::new();
    permissions.insert("settle".to_string());
    permissions.insert("payments".to_string());
    Agent {
        id: id.to_string(),
        display_name: format!("Agent {id}"),
        parent_id: None,
        status: AgentStatus::Active,
        can_place_bet: true,
        rate_internet: 0.1,
        rate_casino: 0.15,
        rate_sports: 0.2,
        rate_prop: 0.0,
        rate_live_casino: 0.05,
        credit_limit: 10_000.0,
        outstanding_credit: 2_500.0,
        permissions,
    }
}

fn customer(id: &str, balance: f64) -> Customer {
    Customer {
        customer_id: id.to_string(),
        agent_id: "AG1".to_string(),
        login: id.to_lowercase(),
        display_name: id.to_string(),
        phone: Some("555-0100".to_string()),
        email: None,
        balance,
        pending_balance: 0.0,
        daily_pnl: [1.0, -2.0, 0.0, 0.0, 3.5, 0.0, 0.0],
        last_ticket_at: Some(now_ms()),
        last_verified_at: None,
        suspect_bot: false,
        zero_balance: balance == 0.0,
        active: true,
        sportsbook_suspended: false,
        casino_suspended: false,
    }
}

fn wager(number: i64, customer: &str) -> Wager {
    Wager {
        wager_number: number,
        customer_id: customer.to_string(),
        agent_id: "AG1".to_string(),
        amount_wagered: 10.0,
        to_win: 25.0,
        description: "NFL spread".to_string(),
        placed_at: now_ms(),
        settlement_status: WagerStatus::Pending,
        settlement_amount: None,
        settled_at: None,
        settled_by: None,
    }
}

fn queue_item(id: &str, kind: QueueKind, customer: &str, amount: f64) -> QueueItem {
    QueueItem {
        id: id.to_string(),
        kind,
        customer_id: customer.to_string(),
        amount,
        payment_method: "ACH".to_string(),
        payment_details: String::new(),
        priority: 1,
        status: QueueStatus::Pending,
        created_at: now_ms(),
        matched_with: None,
        notes: None,
    }
}

fn pair(id: &str, withdrawal: &str, deposit: &str) -> Match {
    Match {
        id: id.to_string(),
        withdrawal_id: withdrawal.to_string(),
        deposit_id: deposit.to_string(),
        amount: 100.0,
        score: 75,
        status: MatchStatus::Pending,
        created_at: now_ms(),
        completed_at: None,
        note: None,
    }
}

#[tokio::test]
async fn agent_round_trips_including_permission_columns() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.agent_upsert(&agent("AG1")).await.unwrap();

    let loaded = store.agent_get("AG1").await.unwrap().unwrap();
    assert_eq!(loaded.display_name, "Agent AG1");
    assert_eq!(loaded.available_credit(), 7_500.0);
    assert!(loaded.permissions.contains("settle"));
    assert!(loaded.permissions.contains("payments"));
    assert!(!loaded.permissions.contains("casino"));

    // Patch swaps the permission set; columns translate back and forth.
    let mut new_perms = HashSet::new();
    new_perms.insert("casino".to_string());
    let patched = store
        .agent_update(
            "AG1",
            &AgentPatch {
                permissions: Some(new_perms),
                status: Some(AgentStatus::Suspended),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(patched.status, AgentStatus::Suspended);

    let reloaded = store.agent_get("AG1").await.unwrap().unwrap();
    assert!(reloaded.permissions.contains("casino"));
    assert!(!reloaded.permissions.contains("settle"));
}

#[tokio::test]
async fn customer_credit_returns_before_and_after() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.customer_upsert(&customer("CUS1", 100.0)).await.unwrap();

    let (before, after) = store.customer_credit("CUS1", 25.0).await.unwrap();
    assert_eq!((before, after), (100.0, 125.0));

    let (before, after) = store.customer_credit("CUS1", -125.0).await.unwrap();
    assert_eq!((before, after), (125.0, 0.0));

    let c = store.customer_get("CUS1").await.unwrap().unwrap();
    assert!(c.zero_balance);
    assert_eq!(c.daily_pnl[4], 3.5);
}

#[tokio::test]
async fn wager_settle_is_conditional_on_pending() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.wager_upsert(&wager(1, "CUS1")).await.unwrap();

    let first = store
        .wager_settle(1, WagerStatus::Win, 25.0, now_ms(), "op1")
        .await
        .unwrap();
    let second = store
        .wager_settle(1, WagerStatus::Loss, 0.0, now_ms(), "op2")
        .await
        .unwrap();
    assert!(first);
    assert!(!second);

    let w = store.wager_get(1).await.unwrap().unwrap();
    assert_eq!(w.settlement_status, WagerStatus::Win);
    assert_eq!(w.settled_by.as_deref(), Some("op1"));
}

#[tokio::test]
async fn terminal_wagers_survive_reingestion() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.wager_upsert(&wager(1, "CUS1")).await.unwrap();
    store
        .wager_settle(1, WagerStatus::Win, 25.0, now_ms(), "op1")
        .await
        .unwrap();

    // A fresh upstream row for the same wager must not reopen it.
    store.wager_upsert(&wager(1, "CUS1")).await.unwrap();
    let w = store.wager_get(1).await.unwrap().unwrap();
    assert_eq!(w.settlement_status, WagerStatus::Win);

    let pending = store
        .wagers_list(&WagerFilter {
            status: Some(WagerStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn match_pair_is_atomic_over_both_items() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .queue_insert(&queue_item("w1", QueueKind::Withdrawal, "CUS1", 100.0))
        .await
        .unwrap();
    store
        .queue_insert(&queue_item("d1", QueueKind::Deposit, "CUS2", 100.0))
        .await
        .unwrap();
    store
        .queue_insert(&queue_item("w2", QueueKind::Withdrawal, "CUS3", 100.0))
        .await
        .unwrap();

    assert!(store.match_pair(&pair("m1", "w1", "d1")).await.unwrap());

    // d1 is no longer pending: the second pairing aborts with no side
    // effects on w2.
    assert!(!store.match_pair(&pair("m2", "w2", "d1")).await.unwrap());
    let w2 = store.queue_get("w2").await.unwrap().unwrap();
    assert_eq!(w2.status, QueueStatus::Pending);
    assert!(store.match_get("m2").await.unwrap().is_none());

    let w1 = store.queue_get("w1").await.unwrap().unwrap();
    assert_eq!(w1.status, QueueStatus::Matched);
    assert_eq!(w1.matched_with.as_deref(), Some("d1"));
}

#[tokio::test]
async fn queue_list_orders_by_priority_then_age() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut low = queue_item("low", QueueKind::Withdrawal, "C1", 10.0);
    low.priority = 1;
    low.created_at = 1000;
    let mut high = queue_item("high", QueueKind::Withdrawal, "C2", 10.0);
    high.priority = 9;
    high.created_at = 2000;
    let mut old = queue_item("old", QueueKind::Withdrawal, "C3", 10.0);
    old.priority = 1;
    old.created_at = 500;

    for item in [&low, &high, &old] {
        store.queue_insert(item).await.unwrap();
    }

    let listed = store
        .queue_list(&QueueFilter {
            kind: Some(QueueKind::Withdrawal),
            status: Some(QueueStatus::Pending),
            limit: None,
        })
        .await
        .unwrap();
    let ids: Vec<&str> = listed.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["high", "old", "low"]);
}
