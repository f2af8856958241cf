use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Suspended,
    Closed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Suspended => "suspended",
            AgentStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AgentStatus::Active),
            "suspended" => Some(AgentStatus::Suspended),
            "closed" => Some(AgentStatus::Closed),
            _ => None,
        }
    }
}

/// A book agent. The upstream owns the hierarchy and rates; the permission
/// set and status overrides are managed locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub parent_id: Option<String>,
    pub status: AgentStatus,
    pub can_place_bet: bool,

    pub rate_internet: f64,
    pub rate_casino: f64,
    pub rate_sports: f64,
    pub rate_prop: f64,
    pub rate_live_casino: f64,

    pub credit_limit: f64,
    pub outstanding_credit: f64,

    pub permissions: HashSet<String>,
}

impl Agent {
    pub fn available_credit(&self) -> f64 {
        (self.credit_limit - self.outstanding_credit).max(0.0)
    }
}

/// Fields of an agent that may be patched locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPatch {
    pub display_name: Option<String>,
    pub status: Option<AgentStatus>,
    pub can_place_bet: Option<bool>,
    pub credit_limit: Option<f64>,
    pub permissions: Option<HashSet<String>>,
}

/// Walk the parent chain from `start`, returning the ordered list of agent
/// ids from the starting agent up to the root. A visited set guards against
/// cycles in corrupt hierarchy data; the walk stops rather than looping.
pub fn parent_chain<'a, F>(start: &str, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<&'a Agent>,
{
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(start.to_string());

    while let Some(id) = current {
        if !seen.insert(id.clone()) {
            break;
        }
        chain.push(id.clone());
        current = lookup(&id).and_then(|a| a.parent_id.clone());
    }

    chain
}
