//! The withdrawal/deposit matching engine: two priority queues, a scoring
//! matcher, and the completion workflow. The store is the primary copy of
//! queue state; passes work on point-in-time snapshots and commit pairings
//! through the store's conditional transition, so a lost race simply skips
//! that candidate.

pub mod score;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::live::ActivityFeed;
use crate::model::{Match, MatchStatus, QueueItem, QueueKind, QueueStatus, now_ms};
use crate::store::{MatchFilter, QueueFilter, Store};

pub use score::{best_candidate, score_pair};

/// Cap on how many items of each queue a single pass scans.
const SCAN_CAP: usize = 512;

#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    pub customer_id: String,
    pub amount: f64,
    pub payment_method: String,
    #[serde(default)]
    pub payment_details: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub matched: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_wait_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MatcherStats {
    pub withdrawals: QueueCounts,
    pub deposits: QueueCounts,
    pub passes: u64,
}

pub struct MatchingEngine {
    store: Arc<dyn Store>,
    activity: Arc<ActivityFeed>,
    pending_ttl: Duration,
    passes: AtomicU64,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn Store>, activity: Arc<ActivityFeed>, pending_ttl: Duration) -> Self {
        MatchingEngine {
            store,
            activity,
            pending_ttl,
            passes: AtomicU64::new(0),
        }
    }

    /// Queue a withdrawal. The customer must be able to cover the amount
    /// out of their available balance; the amount is reserved against
    /// `pending_balance` until the item completes or fails for good.
    pub async fn enqueue_withdrawal(&self, req: EnqueueRequest) -> CoreResult<QueueItem> {
        let item = self.build_item(QueueKind::Withdrawal, &req)?;
        let customer = self
            .store
            .customer_get(&req.customer_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("customer '{}'", req.customer_id)))?;
        if customer.available_balance() < req.amount {
            return Err(CoreError::Validation(format!(
                "available balance {:.2} below withdrawal amount {:.2}",
                customer.available_balance(),
                req.amount
            )));
        }

        self.store.queue_insert(&item).await?;
        self.store
            .customer_reserve(&req.customer_id, req.amount)
            .await?;
        self.activity.push(
            "withdrawal",
            format!("withdrawal {:.2} queued for {}", item.amount, item.customer_id),
        );

        self.pass_after_enqueue().await;
        Ok(item)
    }

    pub async fn enqueue_deposit(&self, req: EnqueueRequest) -> CoreResult<QueueItem> {
        let item = self.build_item(QueueKind::Deposit, &req)?;
        self.store
            .customer_get(&req.customer_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("customer '{}'", req.customer_id)))?;

        self.store.queue_insert(&item).await?;
        self.activity.push(
            "deposit",
            format!("deposit {:.2} queued for {}", item.amount, item.customer_id),
        );

        self.pass_after_enqueue().await;
        Ok(item)
    }

    fn build_item(&self, kind: QueueKind, req: &EnqueueRequest) -> CoreResult<QueueItem> {
        if !(req.amount > 0.0) {
            return Err(CoreError::Validation(format!(
                "{} amount must be positive",
                kind.as_str()
            )));
        }
        if req.payment_method.trim().is_empty() {
            return Err(CoreError::Validation("payment_method required".to_string()));
        }
        Ok(QueueItem {
            id: Uuid::new_v4().to_string(),
            kind,
            customer_id: req.customer_id.clone(),
            amount: req.amount,
            payment_method: req.payment_method.trim().to_string(),
            payment_details: req.payment_details.clone(),
            priority: req.priority,
            status: QueueStatus::Pending,
            created_at: now_ms(),
            matched_with: None,
            notes: req.notes.clone(),
        })
    }

    async fn pass_after_enqueue(&self) {
        if let Err(err) = self.run_matching_pass().await {
            tracing::warn!(error = %err, "matching pass after enqueue failed");
        }
    }

    /// One matching pass over snapshots of both queues. Returns the matches
    /// created. A candidate whose items moved underneath us is skipped; the
    /// next pass sees the refreshed state.
    pub async fn run_matching_pass(&self) -> CoreResult<Vec<Match>> {
        let withdrawals = self
            .store
            .queue_list(&QueueFilter {
                kind: Some(QueueKind::Withdrawal),
                status: Some(QueueStatus::Pending),
                limit: Some(SCAN_CAP),
            })
            .await?;
        let mut deposits = self
            .store
            .queue_list(&QueueFilter {
                kind: Some(QueueKind::Deposit),
                status: Some(QueueStatus::Pending),
                limit: Some(SCAN_CAP),
            })
            .await?;

        let mut created = Vec::new();
        for w in &withdrawals {
            let Some((d, pair_score)) = best_candidate(w, &deposits) else {
                continue;
            };
            let deposit_id = d.id.clone();
            let amount = w.amount.min(d.amount);

            let m = Match {
                id: Uuid::new_v4().to_string(),
                withdrawal_id: w.id.clone(),
                deposit_id: deposit_id.clone(),
                amount,
                score: pair_score,
                status: MatchStatus::Pending,
                created_at: now_ms(),
                completed_at: None,
                note: None,
            };

            if self.store.match_pair(&m).await? {
                deposits.retain(|x| x.id != deposit_id);
                self.activity.push(
                    "match",
                    format!(
                        "matched withdrawal {} with deposit {} for {:.2} (score {})",
                        m.withdrawal_id, m.deposit_id, m.amount, m.score
                    ),
                );
                created.push(m);
            }
        }

        self.passes.fetch_add(1, Ordering::Relaxed);
        Ok(created)
    }

    /// Operator started fulfillment: match and both items move to
    /// `processing`.
    pub async fn start_match(&self, match_id: &str) -> CoreResult<Match> {
        let m = self.get_match(match_id).await?;
        if m.status != MatchStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "match {match_id} is {}, expected pending",
                m.status.as_str()
            )));
        }
        self.store
            .match_update_status(match_id, MatchStatus::Processing, None, None)
            .await?;
        self.store
            .queue_update_status(&m.withdrawal_id, QueueStatus::Processing, None, None)
            .await?;
        self.store
            .queue_update_status(&m.deposit_id, QueueStatus::Processing, None, None)
            .await?;
        self.get_match(match_id).await
    }

    /// Finish a match: items complete, the withdrawal pays out (and its
    /// reservation is released), the deposit credits the transferred
    /// amount. A deposit larger than the match re-queues its uncredited
    /// remainder as a fresh pending deposit, so no value is lost. A match
    /// still in `pending` is started implicitly.
    pub async fn complete_match(&self, match_id: &str, note: Option<&str>) -> CoreResult<Match> {
        let m = self.get_match(match_id).await?;
        match m.status {
            MatchStatus::Pending => {
                self.start_match(match_id).await?;
            }
            MatchStatus::Processing => {}
            MatchStatus::Completed | MatchStatus::Failed => {
                return Err(CoreError::Conflict(format!(
                    "match {match_id} already {}",
                    m.status.as_str()
                )));
            }
        }

        let withdrawal = self.get_item(&m.withdrawal_id).await?;
        let deposit = self.get_item(&m.deposit_id).await?;

        self.store
            .match_update_status(match_id, MatchStatus::Completed, Some(now_ms()), note)
            .await?;
        self.store
            .queue_update_status(&m.withdrawal_id, QueueStatus::Completed, None, note)
            .await?;
        self.store
            .queue_update_status(&m.deposit_id, QueueStatus::Completed, None, note)
            .await?;

        // Funds movement happens in the store, not here: pay out the
        // withdrawal, release its reservation, credit the deposit for the
        // transferred amount.
        self.store
            .customer_credit(&withdrawal.customer_id, -m.amount)
            .await?;
        self.store
            .customer_reserve(&withdrawal.customer_id, -withdrawal.amount)
            .await?;
        self.store
            .customer_credit(&deposit.customer_id, m.amount)
            .await?;

        // Only m.amount of the deposit actually moved. The rest goes back
        // into the queue as its own pending deposit, keeping the original
        // arrival time so it does not lose its place in line.
        let remainder = deposit.amount - m.amount;
        if remainder > 0.0 {
            let carry = QueueItem {
                id: Uuid::new_v4().to_string(),
                kind: QueueKind::Deposit,
                customer_id: deposit.customer_id.clone(),
                amount: remainder,
                payment_method: deposit.payment_method.clone(),
                payment_details: deposit.payment_details.clone(),
                priority: deposit.priority,
                status: QueueStatus::Pending,
                created_at: deposit.created_at,
                matched_with: None,
                notes: Some(format!("remainder of deposit {}", deposit.id)),
            };
            self.store.queue_insert(&carry).await?;
            self.activity.push(
                "deposit",
                format!(
                    "deposit remainder {:.2} requeued for {}",
                    remainder, carry.customer_id
                ),
            );
        }

        self.activity.push(
            "match_completed",
            format!("match {} completed for {:.2}", match_id, m.amount),
        );
        self.get_match(match_id).await
    }

    /// Fail a match. Retryable failures return both items to `pending` for
    /// the next pass; terminal failures fail the items and release the
    /// withdrawal's reservation.
    pub async fn fail_match(
        &self,
        match_id: &str,
        reason: &str,
        retryable: bool,
    ) -> CoreResult<Match> {
        let m = self.get_match(match_id).await?;
        if matches!(m.status, MatchStatus::Completed | MatchStatus::Failed) {
            return Err(CoreError::Conflict(format!(
                "match {match_id} already {}",
                m.status.as_str()
            )));
        }

        self.store
            .match_update_status(match_id, MatchStatus::Failed, None, Some(reason))
            .await?;

        let item_status = if retryable {
            QueueStatus::Pending
        } else {
            QueueStatus::Failed
        };
        self.store
            .queue_update_status(&m.withdrawal_id, item_status, None, Some(reason))
            .await?;
        self.store
            .queue_update_status(&m.deposit_id, item_status, None, Some(reason))
            .await?;

        if !retryable {
            let withdrawal = self.get_item(&m.withdrawal_id).await?;
            self.store
                .customer_reserve(&withdrawal.customer_id, -withdrawal.amount)
                .await?;
        }

        self.activity.push(
            "match_failed",
            format!("match {match_id} failed: {reason}"),
        );
        self.get_match(match_id).await
    }

    /// Auto-fail matches stuck in `pending` beyond the configured TTL;
    /// their items go back to `pending` for re-matching.
    pub async fn reap_stale(&self) -> CoreResult<usize> {
        let cutoff = now_ms() - self.pending_ttl.as_millis() as i64;
        let stale = self
            .store
            .matches_list(&MatchFilter {
                status: Some(MatchStatus::Pending),
                created_before: Some(cutoff),
            })
            .await?;

        let mut reaped = 0;
        for m in &stale {
            match self.fail_match(&m.id, "stale", true).await {
                Ok(_) => reaped += 1,
                Err(err) => {
                    tracing::warn!(match_id = %m.id, error = %err, "failed to reap stale match")
                }
            }
        }
        Ok(reaped)
    }

    pub async fn stats(&self) -> CoreResult<MatcherStats> {
        Ok(MatcherStats {
            withdrawals: self.queue_counts(QueueKind::Withdrawal).await?,
            deposits: self.queue_counts(QueueKind::Deposit).await?,
            passes: self.passes.load(Ordering::Relaxed),
        })
    }

    async fn queue_counts(&self, kind: QueueKind) -> CoreResult<QueueCounts> {
        let items = self
            .store
            .queue_list(&QueueFilter {
                kind: Some(kind),
                status: None,
                limit: Some(100_000),
            })
            .await?;

        let mut counts = QueueCounts::default();
        let now = now_ms();
        let mut pending_wait: i64 = 0;
        for item in &items {
            match item.status {
                QueueStatus::Pending => {
                    counts.pending += 1;
                    pending_wait += (now - item.created_at).max(0);
                }
                QueueStatus::Matched => counts.matched += 1,
                QueueStatus::Processing => counts.processing += 1,
                QueueStatus::Completed => counts.completed += 1,
                QueueStatus::Failed => counts.failed += 1,
            }
        }
        if counts.pending > 0 {
            counts.avg_wait_ms = pending_wait / counts.pending as i64;
        }
        Ok(counts)
    }

    async fn get_match(&self, id: &str) -> CoreResult<Match> {
        self.store
            .match_get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("match '{id}'")))
    }

    async fn get_item(&self, id: &str) -> CoreResult<QueueItem> {
        self.store
            .queue_get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("queue item '{id}'")))
    }
}

/// Spawn the periodic matcher: one pass plus a stale-match sweep per tick,
/// exiting at the tick boundary after shutdown.
pub fn spawn(
    engine: Arc<MatchingEngine>,
    tick: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = engine.run_matching_pass().await {
                        tracing::warn!(error = %err, "matching pass failed");
                    }
                    if let Err(err) = engine.reap_stale().await {
                        tracing::warn!(error = %err, "stale reap failed");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}
