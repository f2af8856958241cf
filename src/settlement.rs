//! Settlement of wagers and the append-only ledger. The exactly-one-winner
//! guarantee under concurrent settles rests on the store's conditional
//! transition out of `pending`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::{
    BatchStatus, SettlementBatch, SettlementEntry, SettlementType, WagerStatus, now_ms,
};
use crate::store::{BatchTotals, SettlementFilter, Store};

/// What a successful settle did.
#[derive(Debug, Clone, Serialize)]
pub struct SettleOutcome {
    pub wager_number: i64,
    pub customer_id: String,
    pub settlement_type: SettlementType,
    pub settlement_amount: f64,
    pub balance_before: f64,
    pub balance_after: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkItem {
    pub wager_number: i64,
    pub settlement_type: SettlementType,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkItemResult {
    pub wager_number: i64,
    pub ok: bool,
    pub error: Option<String>,
    pub settlement_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub batch_id: String,
    pub results: Vec<BulkItemResult>,
    pub completed_count: u32,
    pub failed_count: u32,
    pub total_settlement_amount: f64,
    pub status: BatchStatus,
}

pub struct SettlementEngine {
    store: Arc<dyn Store>,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        SettlementEngine { store }
    }

    /// Settle one wager. Win pays `to_win`; push and void return the stake;
    /// loss credits nothing. Exactly one of two concurrent settles on the
    /// same wager succeeds; the loser sees `conflict`.
    pub async fn settle(
        &self,
        wager_number: i64,
        settlement_type: SettlementType,
        settled_by: &str,
        note: Option<String>,
        batch_id: Option<String>,
    ) -> CoreResult<SettleOutcome> {
        let wager = self
            .store
            .wager_get(wager_number)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("wager {wager_number}")))?;

        if wager.settlement_status != WagerStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "wager {wager_number} already settled as {}",
                wager.settlement_status.as_str()
            )));
        }

        // Fail before touching the wager if the account is unknown.
        self.store
            .customer_get(&wager.customer_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("customer '{}'", wager.customer_id)))?;

        let settlement_amount = wager.payout_for(settlement_type);
        let settled_at = now_ms();

        let won = self
            .store
            .wager_settle(
                wager_number,
                settlement_type.terminal_status(),
                settlement_amount,
                settled_at,
                settled_by,
            )
            .await?;
        if !won {
            return Err(CoreError::Conflict(format!(
                "wager {wager_number} settled concurrently"
            )));
        }

        let (balance_before, balance_after) = if settlement_amount > 0.0 {
            self.store
                .customer_credit(&wager.customer_id, settlement_amount)
                .await?
        } else {
            let customer = self
                .store
                .customer_get(&wager.customer_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("customer '{}'", wager.customer_id)))?;
            (customer.balance, customer.balance)
        };

        self.store
            .settlements_append(&SettlementEntry {
                wager_number,
                customer_id: wager.customer_id.clone(),
                agent_id: wager.agent_id.clone(),
                settlement_type: settlement_type.as_str().to_string(),
                original_amount: wager.amount_wagered,
                settlement_amount,
                balance_before,
                balance_after,
                settled_by: settled_by.to_string(),
                batch_id,
                note,
                created_at: settled_at,
            })
            .await?;

        tracing::info!(
            wager_number,
            customer = %wager.customer_id,
            settlement = settlement_type.as_str(),
            amount = settlement_amount,
            "wager settled"
        );

        Ok(SettleOutcome {
            wager_number,
            customer_id: wager.customer_id,
            settlement_type,
            settlement_amount,
            balance_before,
            balance_after,
        })
    }

    /// Settle a list of wagers under one batch. Items are processed
    /// sequentially and fail independently; the batch row ends `completed`
    /// unless every item failed.
    pub async fn bulk_settle(
        &self,
        items: &[BulkItem],
        settled_by: &str,
        batch_note: Option<String>,
    ) -> CoreResult<BulkOutcome> {
        let batch_id = Uuid::new_v4().to_string();
        self.store
            .settlement_batch_create(&SettlementBatch {
                batch_id: batch_id.clone(),
                created_by: settled_by.to_string(),
                created_at: now_ms(),
                total_count: items.len() as u32,
                completed_count: 0,
                failed_count: 0,
                total_settlement_amount: 0.0,
                status: BatchStatus::Open,
            })
            .await?;

        let mut results = Vec::with_capacity(items.len());
        let mut completed: u32 = 0;
        let mut total_amount = 0.0;

        for item in items {
            let note = item.note.clone().or_else(|| batch_note.clone());
            match self
                .settle(
                    item.wager_number,
                    item.settlement_type,
                    settled_by,
                    note,
                    Some(batch_id.clone()),
                )
                .await
            {
                Ok(outcome) => {
                    completed += 1;
                    total_amount += outcome.settlement_amount;
                    results.push(BulkItemResult {
                        wager_number: item.wager_number,
                        ok: true,
                        error: None,
                        settlement_amount: outcome.settlement_amount,
                    });
                }
                Err(err) => {
                    results.push(BulkItemResult {
                        wager_number: item.wager_number,
                        ok: false,
                        error: Some(err.to_string()),
                        settlement_amount: 0.0,
                    });
                }
            }
        }

        let failed = items.len() as u32 - completed;
        let status = if completed == 0 && !items.is_empty() {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };

        self.store
            .settlement_batch_complete(
                &batch_id,
                &BatchTotals {
                    completed_count: completed,
                    failed_count: failed,
                    total_settlement_amount: total_amount,
                    status,
                },
            )
            .await?;

        Ok(BulkOutcome {
            batch_id,
            results,
            completed_count: completed,
            failed_count: failed,
            total_settlement_amount: total_amount,
            status,
        })
    }

    /// Milliseconds since the last ledger append; `None` for an empty log.
    pub async fn lag_ms(&self) -> CoreResult<Option<i64>> {
        Ok(self
            .store
            .last_settlement_at()
            .await?
            .map(|at| (now_ms() - at).max(0)))
    }

    pub async fn ledger_for(&self, wager_number: i64) -> CoreResult<Vec<SettlementEntry>> {
        self.store
            .settlements_list(&SettlementFilter {
                wager_number: Some(wager_number),
                ..Default::default()
            })
            .await
    }
}
