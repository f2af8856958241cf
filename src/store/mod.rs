//! Narrow, driver-agnostic interface to the local relational store. The
//! rest of the core depends on this trait only — implementations are
//! sqlite ([`SqliteStore`]) and an in-memory store used by tests
//! ([`MemoryStore`]). Every call is atomic with respect to concurrent
//! callers, and multi-row reads see a point-in-time snapshot.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::model::{
    Agent, AgentPatch, BatchStatus, Customer, CustomerPatch, Match, MatchStatus, QueueItem,
    QueueKind, QueueStatus, SettlementBatch, SettlementEntry, Wager, WagerStatus,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ── Filters & small row types ───────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub status: Option<crate::model::AgentStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    pub agent: Option<String>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct WagerFilter {
    pub agent: Option<String>,
    pub customer: Option<String>,
    pub status: Option<WagerStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SettlementFilter {
    pub wager_number: Option<i64>,
    pub batch_id: Option<String>,
    pub customer: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub kind: Option<QueueKind>,
    pub status: Option<QueueStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MatchFilter {
    pub status: Option<MatchStatus>,
    /// Only matches created at or before this timestamp (stale reaping).
    pub created_before: Option<i64>,
}

/// Totals applied when closing a settlement batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchTotals {
    pub completed_count: u32,
    pub failed_count: u32,
    pub total_settlement_amount: f64,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    pub actor: String,
    pub detail: Option<String>,
    pub created_at: i64,
}

// ── The adapter trait ───────────────────────────────────────────────

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> CoreResult<()>;

    // Agents
    async fn agents_list(&self, filter: &AgentFilter) -> CoreResult<Vec<Agent>>;
    async fn agent_get(&self, id: &str) -> CoreResult<Option<Agent>>;
    async fn agent_upsert(&self, agent: &Agent) -> CoreResult<()>;
    async fn agent_update(&self, id: &str, patch: &AgentPatch) -> CoreResult<Agent>;

    // Customers
    async fn customers_list(&self, filter: &CustomerFilter) -> CoreResult<Vec<Customer>>;
    async fn customer_get(&self, id: &str) -> CoreResult<Option<Customer>>;
    async fn customer_upsert(&self, customer: &Customer) -> CoreResult<()>;
    async fn customer_update(&self, id: &str, patch: &CustomerPatch) -> CoreResult<Customer>;
    /// Atomically add `amount` to the balance; returns (before, after).
    async fn customer_credit(&self, id: &str, amount: f64) -> CoreResult<(f64, f64)>;
    /// Atomically adjust the pending-balance reservation; clamped at zero.
    async fn customer_reserve(&self, id: &str, delta: f64) -> CoreResult<()>;

    // Wagers
    async fn wagers_list(&self, filter: &WagerFilter) -> CoreResult<Vec<Wager>>;
    async fn wager_get(&self, wager_number: i64) -> CoreResult<Option<Wager>>;
    async fn wager_upsert(&self, wager: &Wager) -> CoreResult<()>;
    /// Conditional terminal transition: succeeds only while the wager is
    /// still pending. `Ok(false)` means a concurrent settle won.
    async fn wager_settle(
        &self,
        wager_number: i64,
        status: WagerStatus,
        settlement_amount: f64,
        settled_at: i64,
        settled_by: &str,
    ) -> CoreResult<bool>;

    // Settlement log (append-only)
    async fn settlements_append(&self, entry: &SettlementEntry) -> CoreResult<()>;
    async fn settlements_list(&self, filter: &SettlementFilter) -> CoreResult<Vec<SettlementEntry>>;
    async fn last_settlement_at(&self) -> CoreResult<Option<i64>>;

    // Settlement batches
    async fn settlement_batch_create(&self, batch: &SettlementBatch) -> CoreResult<()>;
    async fn settlement_batch_get(&self, batch_id: &str) -> CoreResult<Option<SettlementBatch>>;
    async fn settlement_batch_complete(
        &self,
        batch_id: &str,
        totals: &BatchTotals,
    ) -> CoreResult<()>;

    // Payment queues
    async fn queue_insert(&self, item: &QueueItem) -> CoreResult<()>;
    async fn queue_get(&self, id: &str) -> CoreResult<Option<QueueItem>>;
    async fn queue_list(&self, filter: &QueueFilter) -> CoreResult<Vec<QueueItem>>;
    async fn queue_update_status(
        &self,
        id: &str,
        status: QueueStatus,
        matched_with: Option<&str>,
        notes: Option<&str>,
    ) -> CoreResult<()>;

    // Matches
    /// Atomic pairing: transitions both referenced items from `pending` to
    /// `matched` and inserts the match row, or does nothing and returns
    /// `Ok(false)` if either item moved in the meantime.
    async fn match_pair(&self, m: &Match) -> CoreResult<bool>;
    async fn match_get(&self, id: &str) -> CoreResult<Option<Match>>;
    async fn matches_list(&self, filter: &MatchFilter) -> CoreResult<Vec<Match>>;
    async fn match_update_status(
        &self,
        id: &str,
        status: MatchStatus,
        completed_at: Option<i64>,
        note: Option<&str>,
    ) -> CoreResult<()>;

    // Audit
    async fn audit_append(&self, entry: &AuditEntry) -> CoreResult<()>;
}
