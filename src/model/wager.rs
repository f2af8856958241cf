use serde::{Deserialize, Serialize};

/// Settlement state of a wager. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerStatus {
    Pending,
    Win,
    Loss,
    Push,
    Void,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "pending",
            WagerStatus::Win => "win",
            WagerStatus::Loss => "loss",
            WagerStatus::Push => "push",
            WagerStatus::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WagerStatus::Pending),
            "win" => Some(WagerStatus::Win),
            "loss" => Some(WagerStatus::Loss),
            "push" => Some(WagerStatus::Push),
            "void" => Some(WagerStatus::Void),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WagerStatus::Pending)
    }
}

/// The outcome an operator applies to a pending wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementType {
    Win,
    Loss,
    Push,
    Void,
}

impl SettlementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementType::Win => "win",
            SettlementType::Loss => "loss",
            SettlementType::Push => "push",
            SettlementType::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win" => Some(SettlementType::Win),
            "loss" => Some(SettlementType::Loss),
            "push" => Some(SettlementType::Push),
            "void" => Some(SettlementType::Void),
            _ => None,
        }
    }

    pub fn terminal_status(&self) -> WagerStatus {
        match self {
            SettlementType::Win => WagerStatus::Win,
            SettlementType::Loss => WagerStatus::Loss,
            SettlementType::Push => WagerStatus::Push,
            SettlementType::Void => WagerStatus::Void,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub wager_number: i64,
    pub customer_id: String,
    pub agent_id: String,
    pub amount_wagered: f64,
    pub to_win: f64,
    pub description: String,
    pub placed_at: i64,
    pub settlement_status: WagerStatus,
    pub settlement_amount: Option<f64>,
    pub settled_at: Option<i64>,
    pub settled_by: Option<String>,
}

impl Wager {
    /// Amount credited back to the customer for a given outcome.
    /// Win pays the quoted to-win; push and void return the stake.
    pub fn payout_for(&self, settlement: SettlementType) -> f64 {
        match settlement {
            SettlementType::Win => self.to_win,
            SettlementType::Loss => 0.0,
            SettlementType::Push | SettlementType::Void => self.amount_wagered,
        }
    }
}
