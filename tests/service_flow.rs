use std::collections::HashSet;
use std::sync::Arc;

use wagerdesk::auth::{AuthPrincipal, Role};
use wagerdesk::config::Config;
use wagerdesk::error::CoreError;
use wagerdesk::health::CheckStatus;
use wagerdesk::live::LiveEvent;
use wagerdesk::model::{Customer, SettlementType, Wager, WagerStatus, now_ms};
use wagerdesk::service::{Service, SettleRequest};
use wagerdesk::store::{MemoryStore, Store};

fn principal(role: Role, scope: Option<&str>) -> AuthPrincipal {
    AuthPrincipal {
        user_id: "u1".to_string(),
        username: "op1".to_string(),
        role,
        agent_scope: scope.map(|s| s.to_string()),
        permissions: HashSet::new(),
        issued_at: 0,
        expires_at: i64::MAX,
    }
}

fn seed_customer(id: &str, agent: &str, balance: f64) -> Customer {
    Customer {
        customer_id: id.to_string(),
        agent_id: agent.to_string(),
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

fn seed_wager(number: i64, customer: &str) -> Wager {
    Wager {
        wager_number: number,
        customer_id: customer.to_string(),
        agent_id: "AG1".to_string(),
        amount_wagered: 10.0,
        to_win: 25.0,
        description: "seed".to_string(),
        placed_at: now_ms(),
        settlement_status: WagerStatus::Pending,
        settlement_amount: None,
        settled_at: None,
        settled_by: None,
    }
}

async fn service_with_seed() -> (Arc<MemoryStore>, Service) {
    let store = Arc::new(MemoryStore::new());
    store
        .customer_upsert(&seed_customer("CUS1", "AG1", 100.0))
        .await
        .unwrap();
    store.wager_upsert(&seed_wager(777, "CUS1")).await.unwrap();
    let service = Service::new(Config::for_tests(), store.clone());
    (store, service)
}

// ── Role enforcement ────────────────────────────────────────────────

#[tokio::test]
async fn settle_requires_manager() {
    let (_, service) = service_with_seed().await;

    for role in [Role::Viewer, Role::Agent] {
        let err = service
            .settle(
                &principal(role, None),
                SettleRequest {
                    wager_number: 777,
                    settlement_type: SettlementType::Win,
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Auth(_)), "role {role:?} settled");
    }

    let outcome = service
        .settle(
            &principal(Role::Manager, None),
            SettleRequest {
                wager_number: 777,
                settlement_type: SettlementType::Win,
                note: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.balance_after, 125.0);
}

#[tokio::test]
async fn settle_writes_an_audit_row() {
    let (store, service) = service_with_seed().await;
    service
        .settle(
            &principal(Role::Admin, None),
            SettleRequest {
                wager_number: 777,
                settlement_type: SettlementType::Loss,
                note: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(store.audit_len().await, 1);
}

#[tokio::test]
async fn agent_scope_fences_other_subtrees() {
    let (_, service) = service_with_seed().await;

    // An agent-scoped token can only read its own subtree. Upstream is
    // unreachable in tests, so a permitted read degrades to local data —
    // the point is it does not fail with an auth error.
    let scoped = principal(Role::Agent, Some("AG1"));
    let ok = service
        .customers(
            &scoped,
            wagerdesk::service::CustomerQuery {
                agent_id: "AG1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ok.source, "local");

    let err = service
        .customers(
            &scoped,
            wagerdesk::service::CustomerQuery {
                agent_id: "AG2".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Auth(_)));
}

// ── Token round trip ────────────────────────────────────────────────

#[tokio::test]
async fn minted_tokens_verify_through_the_service() {
    let (_, service) = service_with_seed().await;

    let token = service
        .gate()
        .mint("u9", "ops-user", Role::Manager, None, &HashSet::new())
        .unwrap();
    let p = service.verify_token(&token).unwrap();
    assert_eq!(p.role, Role::Manager);
    assert_eq!(p.username, "ops-user");

    assert!(matches!(
        service.verify_token("not-a-token"),
        Err(CoreError::Auth(_))
    ));
}

// ── Health & snapshot ───────────────────────────────────────────────

#[tokio::test]
async fn healthy_system_reports_ok() {
    let (_, service) = service_with_seed().await;
    let report = service.health().await;
    assert_eq!(report.status, CheckStatus::Ok);
    assert!(report.score >= 90, "score {}", report.score);
    assert_eq!(report.checks.len(), 5);
}

#[tokio::test]
async fn snapshot_reflects_store_state() {
    let (_, service) = service_with_seed().await;
    let snapshot = service.build_snapshot().await.unwrap();
    assert_eq!(snapshot.kpi.active_players, 1);
    assert_eq!(snapshot.kpi.pending_count, 1); // the seeded pending wager
    assert_eq!(snapshot.kpi.total_liability, 25.0);
}

#[tokio::test]
async fn subscribe_live_starts_with_connected_then_snapshot() {
    let (_, service) = service_with_seed().await;
    let mut sub = service
        .subscribe_live(&principal(Role::Viewer, None))
        .await
        .unwrap();

    match sub.rx.recv().await {
        Some(LiveEvent::Connected { .. }) => {}
        other => panic!("expected connected, got {other:?}"),
    }
    match sub.rx.recv().await {
        Some(LiveEvent::Snapshot { snapshot }) => {
            assert_eq!(snapshot.kpi.active_players, 1);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn stats_are_readable_by_viewers() {
    let (_, service) = service_with_seed().await;
    let stats = service
        .stats(&principal(Role::Viewer, None))
        .await
        .unwrap();
    assert_eq!(stats.live.subscribers, 0);
    assert_eq!(stats.upstream.requests, 0);
}
