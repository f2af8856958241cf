use serde::{Deserialize, Serialize};

/// Headline numbers for the dashboard KPI row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Kpi {
    pub revenue: f64,
    pub active_players: u64,
    pub pending_count: u64,
    pub total_liability: f64,
}

/// This week's aggregate figures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Weekly {
    pub handle: f64,
    pub win: f64,
    pub volume: f64,
    pub bets: u64,
}

/// A recent operational event shown in the activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub at: i64,
    pub kind: String,
    pub message: String,
}

/// One item awaiting operator attention (a pending wager or queue item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingItem {
    pub id: String,
    pub kind: String,
    pub customer_id: String,
    pub amount: f64,
    pub created_at: i64,
}

/// Point-in-time aggregate published by the live fabric. Consumed read-only;
/// timestamps are monotonic per subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub timestamp: i64,
    pub kpi: Kpi,
    pub weekly: Weekly,
    pub pending_items: Vec<PendingItem>,
    pub activities: Vec<Activity>,
}

impl LiveSnapshot {
    /// Bound the feed lists to the wire limit.
    pub const MAX_LIST: usize = 10;

    pub fn truncate_lists(&mut self) {
        self.pending_items.truncate(Self::MAX_LIST);
        self.activities.truncate(Self::MAX_LIST);
    }
}
