//! The typed inbound surface. Every method takes a verified
//! [`AuthPrincipal`] and a typed request, and returns a typed value or one
//! tagged [`CoreError`]. The HTTP layer on top of this is pure glue.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::{AuthGate, AuthPrincipal, Role, require, require_agent_scope};
use crate::cache::{CacheStats, TtlCache, spawn_sweeper};
use crate::config::Config;
use crate::error::{CoreError, CoreResult, UpstreamError};
use crate::health::{self, HealthReport};
use crate::live::{ActivityFeed, LiveFabric, LiveStats, Subscription, spawn_aggregator};
use crate::matcher::{EnqueueRequest, MatcherStats, MatchingEngine};
use crate::model::{
    Agent, AgentPatch, Customer, CustomerPatch, LiveSnapshot, Match, PendingItem, QueueItem,
    QueueStatus, SettlementType, Wager, WagerStatus, now_ms,
};
use crate::settlement::{BulkItem, BulkOutcome, SettleOutcome, SettlementEngine};
use crate::store::{AuditEntry, CustomerFilter, QueueFilter, Store, WagerFilter};
use crate::upstream::{CallOpts, UpstreamClient, UpstreamStats};

/// How many pending items the matcher may hold before health degrades.
const QUEUE_DEPTH_THRESHOLD: u64 = 100;

// ── Request / response types ────────────────────────────────────────

/// A read result with its provenance: served from the upstream, or from
/// the local store after the upstream failed.
#[derive(Debug, Clone, Serialize)]
pub struct Fetched<T> {
    pub data: T,
    pub source: &'static str,
    pub degraded: bool,
}

impl<T> Fetched<T> {
    fn upstream(data: T) -> Self {
        Fetched {
            data,
            source: "upstream",
            degraded: false,
        }
    }

    fn local(data: T) -> Self {
        Fetched {
            data,
            source: "local",
            degraded: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerQuery {
    pub agent_id: String,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionQuery {
    pub agent_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettleRequest {
    pub wager_number: i64,
    pub settlement_type: SettlementType,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkSettleRequest {
    pub items: Vec<BulkItem>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub upstream: UpstreamStats,
    pub matcher: MatcherStats,
    pub live: LiveStats,
}

// ── The service ─────────────────────────────────────────────────────

pub struct Service {
    config: Config,
    cache: Arc<TtlCache>,
    upstream: Arc<UpstreamClient>,
    store: Arc<dyn Store>,
    settlement: SettlementEngine,
    matcher: Arc<MatchingEngine>,
    fabric: Arc<LiveFabric>,
    activity: Arc<ActivityFeed>,
    gate: AuthGate,
}

impl Service {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let cache = Arc::new(TtlCache::new());
        let upstream = Arc::new(UpstreamClient::new(&config, cache.clone()));
        let activity = Arc::new(ActivityFeed::new());
        let matcher = Arc::new(MatchingEngine::new(
            store.clone(),
            activity.clone(),
            config.matcher_pending_ttl,
        ));
        let fabric = Arc::new(LiveFabric::new(config.live_subscriber_buffer));
        let gate = AuthGate::new(config.auth_secret.clone(), config.token_ttl);

        Service {
            settlement: SettlementEngine::new(store.clone()),
            cache,
            upstream,
            store,
            matcher,
            fabric,
            activity,
            gate,
            config,
        }
    }

    /// Spawn the long-running tasks: cache sweeper, matcher loop, live
    /// aggregator. All honor the shutdown signal at loop boundaries.
    pub fn spawn_background(
        self: &Arc<Self>,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let sweeper = spawn_sweeper(
            self.cache.clone(),
            self.config.cache_sweep_interval,
            shutdown.subscribe(),
        );
        let matcher = crate::matcher::spawn(
            self.matcher.clone(),
            self.config.matcher_tick,
            shutdown.subscribe(),
        );

        let svc = self.clone();
        let aggregator = spawn_aggregator(
            self.fabric.clone(),
            self.config.live_tick,
            self.config.live_shutdown_grace,
            shutdown.subscribe(),
            move || {
                let svc = svc.clone();
                async move { svc.build_snapshot().await }
            },
        );

        vec![sweeper, matcher, aggregator]
    }

    pub fn verify_token(&self, token: &str) -> CoreResult<AuthPrincipal> {
        self.gate.verify(token)
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    // ── Upstream-backed reads ───────────────────────────────────────

    /// Customer roster for an agent. Falls back to the local store when
    /// the upstream is out, marked `source=local`.
    pub async fn customers(
        &self,
        principal: &AuthPrincipal,
        query: CustomerQuery,
    ) -> CoreResult<Fetched<Vec<Customer>>> {
        require(principal, Role::Viewer)?;
        require_agent_scope(principal, &query.agent_id)?;

        let params = agent_params(&query.agent_id);
        match self.fetch_with_retry("getCustomerAdmin", &params).await {
            Ok(value) => {
                let customers: Vec<Customer> = serde_json::from_value(value)
                    .map_err(|e| CoreError::internal(format!("decoding customers: {e}")))?;
                self.ingest_customers(&customers).await?;
                Ok(Fetched::upstream(filter_customers(customers, &query)))
            }
            Err(err) => {
                tracing::warn!(error = %err, "customers degraded to local store");
                let customers = self
                    .store
                    .customers_list(&CustomerFilter {
                        agent: Some(query.agent_id.clone()),
                        search: query.search.clone(),
                        limit: query.limit,
                        offset: query.offset,
                        ..Default::default()
                    })
                    .await?;
                Ok(Fetched::local(customers))
            }
        }
    }

    /// The agent tree below an agent. Local fallback as for customers.
    pub async fn agents(
        &self,
        principal: &AuthPrincipal,
        agent_id: &str,
    ) -> CoreResult<Fetched<Vec<Agent>>> {
        require(principal, Role::Viewer)?;
        require_agent_scope(principal, agent_id)?;

        let params = agent_params(agent_id);
        match self.fetch_with_retry("getListAgenstByAgent", &params).await {
            Ok(value) => {
                let agents: Vec<Agent> = serde_json::from_value(value)
                    .map_err(|e| CoreError::internal(format!("decoding agents: {e}")))?;
                self.ingest_agents(&agents).await?;
                Ok(Fetched::upstream(agents))
            }
            Err(err) => {
                tracing::warn!(error = %err, "agents degraded to local store");
                let agents = self.store.agents_list(&Default::default()).await?;
                Ok(Fetched::local(agents))
            }
        }
    }

    /// Pending wagers for an agent, ingested into the local store on the
    /// way through.
    pub async fn pending_wagers(
        &self,
        principal: &AuthPrincipal,
        agent_id: &str,
    ) -> CoreResult<Fetched<Vec<Wager>>> {
        require(principal, Role::Viewer)?;
        require_agent_scope(principal, agent_id)?;

        let params = agent_params(agent_id);
        match self.fetch_with_retry("getPending", &params).await {
            Ok(value) => {
                let wagers: Vec<Wager> = serde_json::from_value(value)
                    .map_err(|e| CoreError::internal(format!("decoding wagers: {e}")))?;
                for wager in &wagers {
                    self.store.wager_upsert(wager).await?;
                }
                Ok(Fetched::upstream(wagers))
            }
            Err(err) => {
                tracing::warn!(error = %err, "pending wagers degraded to local store");
                let wagers = self
                    .store
                    .wagers_list(&WagerFilter {
                        agent: Some(agent_id.to_string()),
                        status: Some(WagerStatus::Pending),
                        ..Default::default()
                    })
                    .await?;
                Ok(Fetched::local(wagers))
            }
        }
    }

    /// Weekly figures envelope, passed through unnormalized. No local
    /// equivalent exists; upstream failure surfaces as such.
    pub async fn weekly_figures(
        &self,
        principal: &AuthPrincipal,
        agent_id: &str,
    ) -> CoreResult<Fetched<Value>> {
        require(principal, Role::Viewer)?;
        require_agent_scope(principal, agent_id)?;
        let params = agent_params(agent_id);
        let value = self
            .fetch_with_retry("getWeeklyFigureByAgentLite", &params)
            .await?;
        Ok(Fetched::upstream(value))
    }

    pub async fn customer_details(
        &self,
        principal: &AuthPrincipal,
        agent_id: &str,
        customer_id: &str,
    ) -> CoreResult<Fetched<Value>> {
        require(principal, Role::Viewer)?;
        require_agent_scope(principal, agent_id)?;
        let mut params = agent_params(agent_id);
        params.insert("customerID".to_string(), customer_id.to_string());
        let value = self.fetch_with_retry("getCustomerDetails", &params).await?;
        Ok(Fetched::upstream(value))
    }

    pub async fn transactions(
        &self,
        principal: &AuthPrincipal,
        query: TransactionQuery,
    ) -> CoreResult<Fetched<Value>> {
        require(principal, Role::Viewer)?;
        require_agent_scope(principal, &query.agent_id)?;
        let mut params = agent_params(&query.agent_id);
        if let Some(customer) = &query.customer_id {
            params.insert("customerID".to_string(), customer.clone());
        }
        if let Some(page) = query.page {
            params.insert("page".to_string(), page.to_string());
        }
        let value = self.fetch_with_retry("getTransactions", &params).await?;
        Ok(Fetched::upstream(value))
    }

    pub async fn live_activity(
        &self,
        principal: &AuthPrincipal,
        agent_id: &str,
    ) -> CoreResult<Fetched<Value>> {
        require(principal, Role::Viewer)?;
        require_agent_scope(principal, agent_id)?;
        let params = agent_params(agent_id);
        let value = self.fetch_with_retry("getLiveActivity", &params).await?;
        Ok(Fetched::upstream(value))
    }

    pub async fn agent_performance(
        &self,
        principal: &AuthPrincipal,
        agent_id: &str,
    ) -> CoreResult<Fetched<Value>> {
        require(principal, Role::Viewer)?;
        require_agent_scope(principal, agent_id)?;
        let params = agent_params(agent_id);
        let value = self.fetch_with_retry("getAgentPerformance", &params).await?;
        Ok(Fetched::upstream(value))
    }

    // ── Locally-owned writes ────────────────────────────────────────

    pub async fn agent_update(
        &self,
        principal: &AuthPrincipal,
        agent_id: &str,
        patch: AgentPatch,
    ) -> CoreResult<Agent> {
        require(principal, Role::Manager)?;
        let agent = self.store.agent_update(agent_id, &patch).await?;
        self.audit(principal, "agent", agent_id, "update", None).await;
        Ok(agent)
    }

    pub async fn customer_update(
        &self,
        principal: &AuthPrincipal,
        customer_id: &str,
        patch: CustomerPatch,
    ) -> CoreResult<Customer> {
        require(principal, Role::Manager)?;
        let customer = self.store.customer_update(customer_id, &patch).await?;
        self.audit(principal, "customer", customer_id, "update", None)
            .await;
        Ok(customer)
    }

    // ── Settlement ──────────────────────────────────────────────────

    pub async fn settle(
        &self,
        principal: &AuthPrincipal,
        req: SettleRequest,
    ) -> CoreResult<SettleOutcome> {
        require(principal, Role::Manager)?;
        let outcome = self
            .settlement
            .settle(
                req.wager_number,
                req.settlement_type,
                &principal.username,
                req.note,
                None,
            )
            .await?;

        self.activity.push(
            "settlement",
            format!(
                "wager {} settled {} for {:.2}",
                outcome.wager_number,
                outcome.settlement_type.as_str(),
                outcome.settlement_amount
            ),
        );
        self.audit(
            principal,
            "wager",
            &req.wager_number.to_string(),
            "settle",
            Some(outcome.settlement_type.as_str().to_string()),
        )
        .await;
        Ok(outcome)
    }

    pub async fn bulk_settle(
        &self,
        principal: &AuthPrincipal,
        req: BulkSettleRequest,
    ) -> CoreResult<BulkOutcome> {
        require(principal, Role::Manager)?;
        if req.items.is_empty() {
            return Err(CoreError::Validation("empty settlement batch".to_string()));
        }
        let outcome = self
            .settlement
            .bulk_settle(&req.items, &principal.username, req.note)
            .await?;

        self.activity.push(
            "settlement",
            format!(
                "batch {} settled {}/{} wagers",
                outcome.batch_id,
                outcome.completed_count,
                outcome.completed_count + outcome.failed_count
            ),
        );
        self.audit(
            principal,
            "settlement_batch",
            &outcome.batch_id,
            "bulk_settle",
            Some(format!("{} items", req.items.len())),
        )
        .await;
        Ok(outcome)
    }

    // ── Matching ────────────────────────────────────────────────────

    pub async fn enqueue_withdrawal(
        &self,
        principal: &AuthPrincipal,
        req: EnqueueRequest,
    ) -> CoreResult<QueueItem> {
        require(principal, Role::Agent)?;
        let item = self.matcher.enqueue_withdrawal(req).await?;
        self.audit(principal, "queue_item", &item.id, "enqueue_withdrawal", None)
            .await;
        Ok(item)
    }

    pub async fn enqueue_deposit(
        &self,
        principal: &AuthPrincipal,
        req: EnqueueRequest,
    ) -> CoreResult<QueueItem> {
        require(principal, Role::Agent)?;
        let item = self.matcher.enqueue_deposit(req).await?;
        self.audit(principal, "queue_item", &item.id, "enqueue_deposit", None)
            .await;
        Ok(item)
    }

    pub async fn run_matcher(&self, principal: &AuthPrincipal) -> CoreResult<Vec<Match>> {
        require(principal, Role::Manager)?;
        self.matcher.run_matching_pass().await
    }

    pub async fn start_match(&self, principal: &AuthPrincipal, match_id: &str) -> CoreResult<Match> {
        require(principal, Role::Manager)?;
        let m = self.matcher.start_match(match_id).await?;
        self.audit(principal, "match", match_id, "start", None).await;
        Ok(m)
    }

    pub async fn complete_match(
        &self,
        principal: &AuthPrincipal,
        match_id: &str,
        note: Option<&str>,
    ) -> CoreResult<Match> {
        require(principal, Role::Manager)?;
        let m = self.matcher.complete_match(match_id, note).await?;
        self.audit(
            principal,
            "match",
            match_id,
            "complete",
            Some(format!("amount {:.2}", m.amount)),
        )
        .await;
        Ok(m)
    }

    pub async fn fail_match(
        &self,
        principal: &AuthPrincipal,
        match_id: &str,
        reason: &str,
        retryable: bool,
    ) -> CoreResult<Match> {
        require(principal, Role::Manager)?;
        let m = self.matcher.fail_match(match_id, reason, retryable).await?;
        self.audit(
            principal,
            "match",
            match_id,
            "fail",
            Some(reason.to_string()),
        )
        .await;
        Ok(m)
    }

    pub async fn queue_items(
        &self,
        principal: &AuthPrincipal,
        filter: QueueFilter,
    ) -> CoreResult<Vec<QueueItem>> {
        require(principal, Role::Viewer)?;
        self.store.queue_list(&filter).await
    }

    // ── Stats, health, live ─────────────────────────────────────────

    pub async fn stats(&self, principal: &AuthPrincipal) -> CoreResult<ServiceStats> {
        require(principal, Role::Viewer)?;
        Ok(ServiceStats {
            cache: self.cache.stats(),
            upstream: self.upstream.stats(),
            matcher: self.matcher.stats().await?,
            live: self.fabric.stats(),
        })
    }

    /// Unauthenticated by design: load balancers and ops dashboards poll it.
    pub async fn health(&self) -> HealthReport {
        let store_ok = self.store.ping().await.is_ok();
        let matcher_stats = self.matcher.stats().await.unwrap_or(MatcherStats {
            withdrawals: Default::default(),
            deposits: Default::default(),
            passes: 0,
        });
        let lag = self.settlement.lag_ms().await.unwrap_or(None);

        health::compose(vec![
            health::store_check(store_ok),
            health::upstream_check(&self.upstream.breaker_snapshot()),
            health::cache_check(&self.cache.stats()),
            health::matcher_check(&matcher_stats, QUEUE_DEPTH_THRESHOLD),
            health::settlement_check(lag),
        ])
    }

    /// Register a live-push subscriber with a freshly-computed snapshot.
    pub async fn subscribe_live(&self, principal: &AuthPrincipal) -> CoreResult<Subscription> {
        require(principal, Role::Viewer)?;
        let initial = self.build_snapshot().await.ok();
        Ok(self.fabric.subscribe_with(initial))
    }

    /// One aggregation pass: KPIs and weekly figures from the store,
    /// pending items from the matcher queues, activities from the feed.
    pub async fn build_snapshot(&self) -> CoreResult<LiveSnapshot> {
        let customers = self
            .store
            .customers_list(&CustomerFilter {
                limit: Some(10_000),
                ..Default::default()
            })
            .await?;
        let pending_wagers = self
            .store
            .wagers_list(&WagerFilter {
                status: Some(WagerStatus::Pending),
                limit: Some(10_000),
                ..Default::default()
            })
            .await?;
        let pending_queue = self
            .store
            .queue_list(&QueueFilter {
                status: Some(QueueStatus::Pending),
                ..Default::default()
            })
            .await?;

        let mut kpi = crate::model::Kpi {
            active_players: customers.iter().filter(|c| c.active).count() as u64,
            pending_count: (pending_wagers.len() + pending_queue.len()) as u64,
            ..Default::default()
        };
        for c in &customers {
            kpi.revenue -= c.daily_pnl[0];
        }
        kpi.total_liability = pending_wagers.iter().map(|w| w.to_win).sum();

        let mut weekly = crate::model::Weekly::default();
        for c in &customers {
            for pl in c.daily_pnl {
                weekly.win -= pl;
                weekly.handle += pl.abs();
            }
        }
        weekly.volume = pending_wagers.iter().map(|w| w.amount_wagered).sum();
        weekly.bets = pending_wagers.len() as u64;

        let pending_items = pending_queue
            .iter()
            .take(LiveSnapshot::MAX_LIST)
            .map(|item| PendingItem {
                id: item.id.clone(),
                kind: item.kind.as_str().to_string(),
                customer_id: item.customer_id.clone(),
                amount: item.amount,
                created_at: item.created_at,
            })
            .collect();

        Ok(LiveSnapshot {
            timestamp: now_ms(),
            kpi,
            weekly,
            pending_items,
            activities: self.activity.recent(LiveSnapshot::MAX_LIST),
        })
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Cached upstream read with a small retry budget for transient
    /// failures. All registered operations are idempotent reads.
    async fn fetch_with_retry(
        &self,
        operation: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Value, UpstreamError> {
        let mut attempt = 0;
        loop {
            match self
                .upstream
                .call(operation, params, CallOpts::cached())
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < 2 => {
                    attempt += 1;
                    tracing::debug!(operation, attempt, "retrying upstream read");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Write-through ingestion. Balances come from the upstream; locally-
    /// owned fields (suspend flags, overrides) survive the refresh.
    async fn ingest_customers(&self, customers: &[Customer]) -> CoreResult<()> {
        for fresh in customers {
            let mut row = fresh.clone();
            if let Some(existing) = self.store.customer_get(&fresh.customer_id).await? {
                row.active = existing.active;
                row.sportsbook_suspended = existing.sportsbook_suspended;
                row.casino_suspended = existing.casino_suspended;
            }
            self.store.customer_upsert(&row).await?;
        }
        Ok(())
    }

    /// As above; the permission set and status overrides are local state.
    async fn ingest_agents(&self, agents: &[Agent]) -> CoreResult<()> {
        for fresh in agents {
            let mut row = fresh.clone();
            if let Some(existing) = self.store.agent_get(&fresh.id).await? {
                row.permissions = existing.permissions;
                row.status = existing.status;
            }
            self.store.agent_upsert(&row).await?;
        }
        Ok(())
    }

    async fn audit(
        &self,
        principal: &AuthPrincipal,
        entity: &str,
        entity_id: &str,
        action: &str,
        detail: Option<String>,
    ) {
        let entry = AuditEntry {
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            actor: principal.username.clone(),
            detail,
            created_at: now_ms(),
        };
        if let Err(err) = self.store.audit_append(&entry).await {
            tracing::warn!(error = %err, "audit append failed");
        }
    }
}

fn agent_params(agent_id: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("agentID".to_string(), agent_id.to_string());
    params.insert("agentOwner".to_string(), agent_id.to_string());
    params
}

fn filter_customers(mut customers: Vec<Customer>, query: &CustomerQuery) -> Vec<Customer> {
    if let Some(search) = &query.search {
        let needle = search.to_lowercase();
        customers.retain(|c| {
            c.customer_id.to_lowercase().contains(&needle)
                || c.login.to_lowercase().contains(&needle)
                || c.display_name.to_lowercase().contains(&needle)
        });
    }
    let offset = query.offset.unwrap_or(0).min(customers.len());
    let limit = query.limit.unwrap_or(usize::MAX);
    customers.into_iter().skip(offset).take(limit).collect()
}
