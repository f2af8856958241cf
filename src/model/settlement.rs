use serde::{Deserialize, Serialize};

/// One row of the append-only settlement log. Never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEntry {
    pub wager_number: i64,
    pub customer_id: String,
    pub agent_id: String,
    pub settlement_type: String,
    pub original_amount: f64,
    pub settlement_amount: f64,
    pub balance_before: f64,
    pub balance_after: f64,
    pub settled_by: String,
    pub batch_id: Option<String>,
    pub note: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Open,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Open => "open",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(BatchStatus::Open),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementBatch {
    pub batch_id: String,
    pub created_by: String,
    pub created_at: i64,
    pub total_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub total_settlement_amount: f64,
    pub status: BatchStatus,
}
