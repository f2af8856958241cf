//! In-memory store used by unit and integration tests. One mutex over the
//! whole state gives the same per-call atomicity the sqlite adapter gets
//! from its connection lock.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::model::{
    Agent, AgentPatch, Customer, CustomerPatch, Match, MatchStatus, QueueItem, QueueStatus,
    SettlementBatch, SettlementEntry, Wager, WagerStatus,
};

use super::{
    AgentFilter, AuditEntry, BatchTotals, CustomerFilter, MatchFilter, QueueFilter,
    SettlementFilter, Store, WagerFilter,
};

#[derive(Default)]
struct MemInner {
    agents: HashMap<String, Agent>,
    customers: HashMap<String, Customer>,
    wagers: HashMap<i64, Wager>,
    settlements: Vec<SettlementEntry>,
    batches: HashMap<String, SettlementBatch>,
    queue: HashMap<String, QueueItem>,
    matches: HashMap<String, Match>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of audit rows written so far (test assertions).
    pub async fn audit_len(&self) -> usize {
        self.inner.lock().await.audit.len()
    }
}

fn queue_order(a: &QueueItem, b: &QueueItem) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn agents_list(&self, filter: &AgentFilter) -> CoreResult<Vec<Agent>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Agent> = inner
            .agents
            .values()
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| {
                filter
                    .search
                    .as_ref()
                    .is_none_or(|q| a.id.contains(q) || a.display_name.contains(q))
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn agent_get(&self, id: &str) -> CoreResult<Option<Agent>> {
        Ok(self.inner.lock().await.agents.get(id).cloned())
    }

    async fn agent_upsert(&self, agent: &Agent) -> CoreResult<()> {
        self.inner
            .lock()
            .await
            .agents
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn agent_update(&self, id: &str, patch: &AgentPatch) -> CoreResult<Agent> {
        let mut inner = self.inner.lock().await;
        let agent = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("agent '{id}'")))?;
        if let Some(name) = &patch.display_name {
            agent.display_name = name.clone();
        }
        if let Some(status) = patch.status {
            agent.status = status;
        }
        if let Some(can) = patch.can_place_bet {
            agent.can_place_bet = can;
        }
        if let Some(limit) = patch.credit_limit {
            agent.credit_limit = limit;
        }
        if let Some(perms) = &patch.permissions {
            agent.permissions = perms.clone();
        }
        Ok(agent.clone())
    }

    async fn customers_list(&self, filter: &CustomerFilter) -> CoreResult<Vec<Customer>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Customer> = inner
            .customers
            .values()
            .filter(|c| filter.agent.as_ref().is_none_or(|a| &c.agent_id == a))
            .filter(|c| filter.active.is_none_or(|v| c.active == v))
            .filter(|c| {
                filter.search.as_ref().is_none_or(|q| {
                    c.customer_id.contains(q) || c.login.contains(q) || c.display_name.contains(q)
                })
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));
        let offset = filter.offset.unwrap_or(0).min(out.len());
        let limit = filter.limit.unwrap_or(500);
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    async fn customer_get(&self, id: &str) -> CoreResult<Option<Customer>> {
        Ok(self.inner.lock().await.customers.get(id).cloned())
    }

    async fn customer_upsert(&self, customer: &Customer) -> CoreResult<()> {
        self.inner
            .lock()
            .await
            .customers
            .insert(customer.customer_id.clone(), customer.clone());
        Ok(())
    }

    async fn customer_update(&self, id: &str, patch: &CustomerPatch) -> CoreResult<Customer> {
        let mut inner = self.inner.lock().await;
        let customer = inner
            .customers
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("customer '{id}'")))?;
        if let Some(name) = &patch.display_name {
            customer.display_name = name.clone();
        }
        if let Some(phone) = &patch.phone {
            customer.phone = Some(phone.clone());
        }
        if let Some(email) = &patch.email {
            customer.email = Some(email.clone());
        }
        if let Some(active) = patch.active {
            customer.active = active;
        }
        if let Some(v) = patch.sportsbook_suspended {
            customer.sportsbook_suspended = v;
        }
        if let Some(v) = patch.casino_suspended {
            customer.casino_suspended = v;
        }
        Ok(customer.clone())
    }

    async fn customer_credit(&self, id: &str, amount: f64) -> CoreResult<(f64, f64)> {
        let mut inner = self.inner.lock().await;
        let customer = inner
            .customers
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("customer '{id}'")))?;
        let before = customer.balance;
        customer.balance += amount;
        customer.zero_balance = customer.balance == 0.0;
        Ok((before, customer.balance))
    }

    async fn customer_reserve(&self, id: &str, delta: f64) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        let customer = inner
            .customers
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("customer '{id}'")))?;
        customer.pending_balance = (customer.pending_balance + delta).max(0.0);
        Ok(())
    }

    async fn wagers_list(&self, filter: &WagerFilter) -> CoreResult<Vec<Wager>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Wager> = inner
            .wagers
            .values()
            .filter(|w| filter.agent.as_ref().is_none_or(|a| &w.agent_id == a))
            .filter(|w| filter.customer.as_ref().is_none_or(|c| &w.customer_id == c))
            .filter(|w| filter.status.is_none_or(|s| w.settlement_status == s))
            .cloned()
            .collect();
        out.sort_by_key(|w| w.wager_number);
        let offset = filter.offset.unwrap_or(0).min(out.len());
        let limit = filter.limit.unwrap_or(500);
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    async fn wager_get(&self, wager_number: i64) -> CoreResult<Option<Wager>> {
        Ok(self.inner.lock().await.wagers.get(&wager_number).cloned())
    }

    async fn wager_upsert(&self, wager: &Wager) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.wagers.get(&wager.wager_number) {
            // Terminal wagers are frozen; ingestion refreshes pending ones only.
            Some(existing) if existing.settlement_status.is_terminal() => {}
            _ => {
                inner.wagers.insert(wager.wager_number, wager.clone());
            }
        }
        Ok(())
    }

    async fn wager_settle(
        &self,
        wager_number: i64,
        status: WagerStatus,
        settlement_amount: f64,
        settled_at: i64,
        settled_by: &str,
    ) -> CoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(wager) = inner.wagers.get_mut(&wager_number) else {
            return Ok(false);
        };
        if wager.settlement_status != WagerStatus::Pending {
            return Ok(false);
        }
        wager.settlement_status = status;
        wager.settlement_amount = Some(settlement_amount);
        wager.settled_at = Some(settled_at);
        wager.settled_by = Some(settled_by.to_string());
        Ok(true)
    }

    async fn settlements_append(&self, entry: &SettlementEntry) -> CoreResult<()> {
        self.inner.lock().await.settlements.push(entry.clone());
        Ok(())
    }

    async fn settlements_list(&self, filter: &SettlementFilter) -> CoreResult<Vec<SettlementEntry>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<SettlementEntry> = inner
            .settlements
            .iter()
            .filter(|e| filter.wager_number.is_none_or(|w| e.wager_number == w))
            .filter(|e| {
                filter
                    .batch_id
                    .as_ref()
                    .is_none_or(|b| e.batch_id.as_ref() == Some(b))
            })
            .filter(|e| filter.customer.as_ref().is_none_or(|c| &e.customer_id == c))
            .cloned()
            .collect();
        out.reverse();
        out.truncate(filter.limit.unwrap_or(200));
        Ok(out)
    }

    async fn last_settlement_at(&self) -> CoreResult<Option<i64>> {
        let inner = self.inner.lock().await;
        Ok(inner.settlements.iter().map(|e| e.created_at).max())
    }

    async fn settlement_batch_create(&self, batch: &SettlementBatch) -> CoreResult<()> {
        self.inner
            .lock()
            .await
            .batches
            .insert(batch.batch_id.clone(), batch.clone());
        Ok(())
    }

    async fn settlement_batch_get(&self, batch_id: &str) -> CoreResult<Option<SettlementBatch>> {
        Ok(self.inner.lock().await.batches.get(batch_id).cloned())
    }

    async fn settlement_batch_complete(
        &self,
        batch_id: &str,
        totals: &BatchTotals,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        let batch = inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| CoreError::NotFound(format!("batch '{batch_id}'")))?;
        batch.completed_count = totals.completed_count;
        batch.failed_count = totals.failed_count;
        batch.total_settlement_amount = totals.total_settlement_amount;
        batch.status = totals.status;
        Ok(())
    }

    async fn queue_insert(&self, item: &QueueItem) -> CoreResult<()> {
        self.inner
            .lock()
            .await
            .queue
            .insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn queue_get(&self, id: &str) -> CoreResult<Option<QueueItem>> {
        Ok(self.inner.lock().await.queue.get(id).cloned())
    }

    async fn queue_list(&self, filter: &QueueFilter) -> CoreResult<Vec<QueueItem>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<QueueItem> = inner
            .queue
            .values()
            .filter(|i| filter.kind.is_none_or(|k| i.kind == k))
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        out.sort_by(queue_order);
        out.truncate(filter.limit.unwrap_or(1000));
        Ok(out)
    }

    async fn queue_update_status(
        &self,
        id: &str,
        status: QueueStatus,
        matched_with: Option<&str>,
        notes: Option<&str>,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .queue
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("queue item '{id}'")))?;
        item.status = status;
        if let Some(peer) = matched_with {
            item.matched_with = Some(peer.to_string());
        }
        if let Some(n) = notes {
            item.notes = Some(n.to_string());
        }
        Ok(())
    }

    async fn match_pair(&self, m: &Match) -> CoreResult<bool> {
        let mut inner = self.inner.lock().await;

        let both_pending = [&m.withdrawal_id, &m.deposit_id].iter().all(|id| {
            inner
                .queue
                .get(*id)
                .is_some_and(|i| i.status == QueueStatus::Pending)
        });
        if !both_pending {
            return Ok(false);
        }

        {
            let w = inner.queue.get_mut(&m.withdrawal_id).unwrap();
            w.status = QueueStatus::Matched;
            w.matched_with = Some(m.deposit_id.clone());
        }
        {
            let d = inner.queue.get_mut(&m.deposit_id).unwrap();
            d.status = QueueStatus::Matched;
            d.matched_with = Some(m.withdrawal_id.clone());
        }
        inner.matches.insert(m.id.clone(), m.clone());
        Ok(true)
    }

    async fn match_get(&self, id: &str) -> CoreResult<Option<Match>> {
        Ok(self.inner.lock().await.matches.get(id).cloned())
    }

    async fn matches_list(&self, filter: &MatchFilter) -> CoreResult<Vec<Match>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Match> = inner
            .matches
            .values()
            .filter(|m| filter.status.is_none_or(|s| m.status == s))
            .filter(|m| filter.created_before.is_none_or(|t| m.created_at <= t))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    async fn match_update_status(
        &self,
        id: &str,
        status: MatchStatus,
        completed_at: Option<i64>,
        note: Option<&str>,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        let m = inner
            .matches
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("match '{id}'")))?;
        m.status = status;
        if completed_at.is_some() {
            m.completed_at = completed_at;
        }
        if let Some(n) = note {
            m.note = Some(n.to_string());
        }
        Ok(())
    }

    async fn audit_append(&self, entry: &AuditEntry) -> CoreResult<()> {
        self.inner.lock().await.audit.push(entry.clone());
        Ok(())
    }
}
