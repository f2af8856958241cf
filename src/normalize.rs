//! Converters from upstream envelope rows and local rows into the canonical
//! model. Normalizers are total: unknown fields are ignored, malformed
//! values coerce to safe defaults, and only records missing identity fields
//! are dropped (and counted).

use std::collections::HashSet;

use serde_json::Value;

use crate::model::{Agent, AgentStatus, Customer, Wager, WagerStatus};

/// Outcome counters for one normalization run over a list envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub total: usize,
    pub accepted: usize,
    pub dropped: usize,
}

// ── Value coercion ──────────────────────────────────────────────────

/// Trim fixed-width padding; `None` for missing or all-whitespace values.
pub fn clean_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The single Y/N/0/1 rule: `Y`, `y`, `1`, numeric 1 and `true` are true;
/// everything else, including absent, is false.
pub fn flag(v: &Value) -> bool {
    match v {
        Value::String(s) => matches!(s.trim(), "Y" | "y" | "1"),
        Value::Number(n) => n.as_i64() == Some(1),
        Value::Bool(b) => *b,
        _ => false,
    }
}

/// Coerce a wire number (native or string, possibly comma-grouped) to f64.
pub fn num(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().replace(',', "").parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// A monetary amount, rounded to cents.
pub fn money(v: &Value) -> f64 {
    (num(v) * 100.0).round() / 100.0
}

/// Epoch-milliseconds timestamp; accepts native numbers and numeric strings.
pub fn epoch_ms(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Split a human-readable hierarchy string ("A / B / C") into an ordered
/// list, outermost first.
pub fn split_chain(s: &str) -> Vec<String> {
    s.split('/')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}

// ── Permission columns ──────────────────────────────────────────────

/// Upstream Y/N permission columns and the canonical permission each maps
/// to. The core only ever sees the set; the columns exist at this boundary
/// and in the sqlite adapter.
pub const PERMISSION_COLUMNS: &[(&str, &str)] = &[
    ("AllowAddCustomer", "add_customer"),
    ("AllowDeleteBets", "delete_bets"),
    ("AllowSettle", "settle"),
    ("AllowPayments", "payments"),
    ("AllowLiveBetting", "live_betting"),
    ("AllowCasino", "casino"),
    ("AllowPropBuilder", "prop_builder"),
];

pub fn permissions_from_row(row: &Value) -> HashSet<String> {
    PERMISSION_COLUMNS
        .iter()
        .filter(|(col, _)| flag(&row[*col]))
        .map(|(_, perm)| perm.to_string())
        .collect()
}

// ── Entity converters ───────────────────────────────────────────────

/// Agent row from the upstream agent list. Requires `AgentID`.
pub fn agent(row: &Value) -> Option<Agent> {
    let id = clean_str(&row["AgentID"])?;

    let chain = clean_str(&row["Master"])
        .map(|s| split_chain(&s))
        .unwrap_or_default();
    let parent_id = chain.last().filter(|p| **p != id).cloned();

    let status = if flag(&row["Closed"]) {
        AgentStatus::Closed
    } else if flag(&row["Active"]) {
        AgentStatus::Active
    } else {
        AgentStatus::Suspended
    };

    Some(Agent {
        display_name: clean_str(&row["Name"]).unwrap_or_else(|| id.clone()),
        parent_id,
        status,
        can_place_bet: flag(&row["CanPlaceBet"]),
        rate_internet: rate(&row["RateInternet"]),
        rate_casino: rate(&row["RateCasino"]),
        rate_sports: rate(&row["RateSports"]),
        rate_prop: rate(&row["RateProp"]),
        rate_live_casino: rate(&row["RateLiveCasino"]),
        credit_limit: money(&row["CreditLimit"]).max(0.0),
        outstanding_credit: money(&row["Outstanding"]).max(0.0),
        permissions: permissions_from_row(row),
        id,
    })
}

/// Customer row from the upstream customer list. Requires `CustomerID` and
/// `AgentID`.
pub fn customer(row: &Value) -> Option<Customer> {
    let customer_id = clean_str(&row["CustomerID"])?;
    let agent_id = clean_str(&row["AgentID"])?;

    let mut daily_pnl = [0.0_f64; 7];
    for (i, slot) in daily_pnl.iter_mut().enumerate() {
        *slot = money(&row[format!("Day{}PL", i + 1)]);
    }

    let balance = money(&row["CurrentBalance"]);
    let pending_balance = money(&row["PendingWagerBalance"]).max(0.0);

    Some(Customer {
        login: clean_str(&row["Login"]).unwrap_or_else(|| customer_id.clone()),
        display_name: clean_str(&row["Name"]).unwrap_or_default(),
        phone: clean_str(&row["Phone"]),
        email: clean_str(&row["Email"]),
        balance,
        pending_balance,
        daily_pnl,
        last_ticket_at: epoch_ms(&row["LastTicket"]),
        last_verified_at: epoch_ms(&row["LastVerDateTime"]),
        suspect_bot: flag(&row["SuspectedBot"]),
        zero_balance: balance == 0.0,
        active: flag(&row["Active"]),
        sportsbook_suspended: flag(&row["SuspendSportsbook"]),
        casino_suspended: flag(&row["SuspendCasino"]),
        customer_id,
        agent_id,
    })
}

/// Pending wager row. Requires `TicketNumber` and `CustomerID`. A missing
/// `ToWinAmount` coerces to 0 for display; settlement never reads it for
/// push or void, which return the stake.
pub fn wager(row: &Value) -> Option<Wager> {
    let wager_number = epoch_ms(&row["TicketNumber"])?;
    let customer_id = clean_str(&row["CustomerID"])?;

    Some(Wager {
        wager_number,
        agent_id: clean_str(&row["AgentID"]).unwrap_or_default(),
        amount_wagered: money(&row["AmountWagered"]).max(0.0),
        to_win: money(&row["ToWinAmount"]).max(0.0),
        description: clean_str(&row["ShortDesc"]).unwrap_or_default(),
        placed_at: epoch_ms(&row["PlacedDateTime"]).unwrap_or(0),
        settlement_status: WagerStatus::Pending,
        settlement_amount: None,
        settled_at: None,
        settled_by: None,
        customer_id,
    })
}

fn rate(v: &Value) -> f64 {
    num(v).clamp(0.0, 1.0)
}

// ── List envelopes ──────────────────────────────────────────────────

fn list<T>(envelope: &Value, convert: impl Fn(&Value) -> Option<T>) -> (Vec<T>, NormalizeReport) {
    let rows = envelope.as_array().map(|a| a.as_slice()).unwrap_or(&[]);
    let mut out = Vec::with_capacity(rows.len());
    let mut report = NormalizeReport {
        total: rows.len(),
        ..Default::default()
    };

    for row in rows {
        match convert(row) {
            Some(item) => {
                out.push(item);
                report.accepted += 1;
            }
            None => report.dropped += 1,
        }
    }

    if report.dropped > 0 {
        tracing::warn!(
            dropped = report.dropped,
            total = report.total,
            "dropped rows missing identity fields"
        );
    }

    (out, report)
}

pub fn agents(envelope: &Value) -> (Vec<Agent>, NormalizeReport) {
    list(envelope, agent)
}

pub fn customers(envelope: &Value) -> (Vec<Customer>, NormalizeReport) {
    list(envelope, customer)
}

pub fn wagers(envelope: &Value) -> (Vec<Wager>, NormalizeReport) {
    list(envelope, wager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flag_single_rule() {
        assert!(flag(&json!("Y")));
        assert!(flag(&json!("1")));
        assert!(flag(&json!(1)));
        assert!(flag(&json!(true)));
        assert!(!flag(&json!("N")));
        assert!(!flag(&json!("0")));
        assert!(!flag(&json!("yes")));
        assert!(!flag(&Value::Null));
    }

    #[test]
    fn num_handles_comma_grouped_strings() {
        assert_eq!(num(&json!("1,234.50")), 1234.5);
        assert_eq!(num(&json!(" 42 ")), 42.0);
        assert_eq!(num(&json!("garbage")), 0.0);
    }

    #[test]
    fn split_chain_trims_and_drops_empties() {
        assert_eq!(split_chain("A / B / C"), vec!["A", "B", "C"]);
        assert_eq!(split_chain(" A //B "), vec!["A", "B"]);
        assert!(split_chain("  ").is_empty());
    }

    #[test]
    fn customer_requires_identity_fields() {
        let (out, report) = customers(&json!([
            {
                "CustomerID": " CUS100   ",
                "AgentID": "AG1",
                "Login": "cus100",
                "Name": "Some Player",
                "CurrentBalance": "1,500.00",
                "PendingWagerBalance": 250,
                "Active": "Y",
                "SuspendCasino": "N",
                "Day1PL": "-25.00"
            },
            { "Login": "orphan" }
        ]));

        assert_eq!(report, NormalizeReport { total: 2, accepted: 1, dropped: 1 });
        let c = &out[0];
        assert_eq!(c.customer_id, "CUS100");
        assert_eq!(c.balance, 1500.0);
        assert_eq!(c.available_balance(), 1250.0);
        assert_eq!(c.daily_pnl[0], -25.0);
        assert!(c.active);
        assert!(!c.casino_suspended);
    }

    #[test]
    fn agent_parent_comes_from_chain_tail() {
        let a = agent(&json!({
            "AgentID": "LEAF",
            "Name": "Leaf Agent",
            "Master": "ROOT / MID",
            "Active": "Y",
            "CanPlaceBet": "1",
            "CreditLimit": "10,000",
            "Outstanding": 2500,
            "AllowSettle": "Y",
            "AllowPayments": "N"
        }))
        .unwrap();

        assert_eq!(a.parent_id.as_deref(), Some("MID"));
        assert_eq!(a.status, AgentStatus::Active);
        assert_eq!(a.available_credit(), 7500.0);
        assert!(a.permissions.contains("settle"));
        assert!(!a.permissions.contains("payments"));
    }

    #[test]
    fn wager_missing_to_win_is_zero() {
        let w = wager(&json!({
            "TicketNumber": 777,
            "CustomerID": "CUS1",
            "AmountWagered": "10.00"
        }))
        .unwrap();

        assert_eq!(w.to_win, 0.0);
        assert_eq!(w.settlement_status, WagerStatus::Pending);
    }
}
