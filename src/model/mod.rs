pub mod agent;
pub mod customer;
pub mod queue;
pub mod settlement;
pub mod snapshot;
pub mod wager;

pub use agent::{Agent, AgentPatch, AgentStatus};
pub use customer::{Customer, CustomerPatch};
pub use queue::{Match, MatchStatus, QueueItem, QueueKind, QueueStatus};
pub use settlement::{BatchStatus, SettlementBatch, SettlementEntry};
pub use snapshot::{Activity, Kpi, LiveSnapshot, PendingItem, Weekly};
pub use wager::{SettlementType, Wager, WagerStatus};

/// Current wall-clock time as unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
