use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Withdrawal,
    Deposit,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Withdrawal => "withdrawal",
            QueueKind::Deposit => "deposit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "withdrawal" => Some(QueueKind::Withdrawal),
            "deposit" => Some(QueueKind::Deposit),
            _ => None,
        }
    }
}

/// Queue item status. Transitions are strictly
/// pending → matched → processing → (completed | failed),
/// with the one exception that a failed match returns its items to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Matched,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Matched => "matched",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "matched" => Some(QueueStatus::Matched),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub kind: QueueKind,
    pub customer_id: String,
    pub amount: f64,
    pub payment_method: String,
    pub payment_details: String,
    pub priority: i32,
    pub status: QueueStatus,
    pub created_at: i64,
    pub matched_with: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Processing => "processing",
            MatchStatus::Completed => "completed",
            MatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MatchStatus::Pending),
            "processing" => Some(MatchStatus::Processing),
            "completed" => Some(MatchStatus::Completed),
            "failed" => Some(MatchStatus::Failed),
            _ => None,
        }
    }
}

/// A pairing of one withdrawal with one deposit. At most one non-failed
/// match may reference any queue item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub withdrawal_id: String,
    pub deposit_id: String,
    pub amount: f64,
    pub score: i32,
    pub status: MatchStatus,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub note: Option<String>,
}
