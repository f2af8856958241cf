use serde::{Deserialize, Serialize};

/// A player account as seen by operators. The upstream is authoritative for
/// balances; suspend flags and overrides are locally owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    pub agent_id: String,
    pub login: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,

    pub balance: f64,
    pub pending_balance: f64,

    /// Profit/loss per day, most recent day first.
    pub daily_pnl: [f64; 7],

    pub last_ticket_at: Option<i64>,
    pub last_verified_at: Option<i64>,

    pub suspect_bot: bool,
    pub zero_balance: bool,
    pub active: bool,
    pub sportsbook_suspended: bool,
    pub casino_suspended: bool,
}

impl Customer {
    pub fn available_balance(&self) -> f64 {
        self.balance - self.pending_balance
    }
}

/// Locally-patchable customer fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerPatch {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub active: Option<bool>,
    pub sportsbook_suspended: Option<bool>,
    pub casino_suspended: Option<bool>,
}
