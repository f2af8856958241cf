//! Static registry of upstream operations. Adding an operation means adding
//! one row here: subpath, required defaults, envelope shape, cache TTL and
//! the normalizer applied before the result is cached. A row without its
//! own TTL inherits the configured default (`CACHE_DEFAULT_TTL_MS`).

use std::time::Duration;

use serde_json::{Value, json};

/// Which field(s) of the upstream JSON carry the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// `LIST`
    List,
    /// `INFO.LIST`
    InfoList,
    /// `GENERAL` and `EXTRA`, returned together
    GeneralExtra,
    /// `GENERAL`
    General,
    /// `PENDING`
    Pending,
    /// `TRANSACTIONS` with `TOTAL` and `PAGE`
    Transactions,
    /// `ACTIVITY`
    Activity,
    /// `CUSTOMER`
    Customer,
}

/// Canonical conversion applied to the extracted payload before caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    None,
    Agents,
    Customers,
    Wagers,
}

pub struct OperationSpec {
    pub name: &'static str,
    pub subpath: &'static str,
    /// Operation-specific form fields sent with every call, on top of the
    /// common `operation`/`agentID`/`agentOwner`/`agentSite`/`RRO`/`token`.
    pub defaults: &'static [(&'static str, &'static str)],
    pub envelope: Envelope,
    pub normalizer: Normalizer,
    /// Cache TTL for this operation; `None` inherits the configured
    /// default.
    pub cache_ttl: Option<Duration>,
}

pub const OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "getCustomerAdmin",
        subpath: "getCustomerAdmin",
        defaults: &[],
        envelope: Envelope::List,
        normalizer: Normalizer::Customers,
        cache_ttl: None,
    },
    OperationSpec {
        name: "getWeeklyFigureByAgentLite",
        subpath: "getWeeklyFigureByAgentLite",
        defaults: &[("week", "0")],
        envelope: Envelope::GeneralExtra,
        normalizer: Normalizer::None,
        cache_ttl: Some(Duration::from_secs(60)),
    },
    OperationSpec {
        name: "getPending",
        subpath: "getPending",
        defaults: &[],
        envelope: Envelope::Pending,
        normalizer: Normalizer::Wagers,
        cache_ttl: Some(Duration::from_secs(10)),
    },
    OperationSpec {
        name: "getCustomerDetails",
        subpath: "getCustomerDetails",
        defaults: &[],
        envelope: Envelope::Customer,
        normalizer: Normalizer::None,
        cache_ttl: Some(Duration::from_secs(60)),
    },
    OperationSpec {
        name: "getTransactions",
        subpath: "getTransactions",
        defaults: &[("page", "1")],
        envelope: Envelope::Transactions,
        normalizer: Normalizer::None,
        cache_ttl: None,
    },
    OperationSpec {
        name: "getLiveActivity",
        subpath: "getLiveActivity",
        defaults: &[],
        envelope: Envelope::Activity,
        normalizer: Normalizer::None,
        cache_ttl: Some(Duration::from_secs(5)),
    },
    OperationSpec {
        name: "getListAgenstByAgent",
        subpath: "getListAgenstByAgent",
        defaults: &[],
        envelope: Envelope::General,
        normalizer: Normalizer::Agents,
        cache_ttl: Some(Duration::from_secs(300)),
    },
    OperationSpec {
        name: "getAgentPerformance",
        subpath: "getAgentPerformance",
        defaults: &[],
        envelope: Envelope::InfoList,
        normalizer: Normalizer::None,
        cache_ttl: None,
    },
];

pub fn lookup(operation: &str) -> Option<&'static OperationSpec> {
    OPERATIONS.iter().find(|spec| spec.name == operation)
}

/// Pull the payload named by the envelope shape out of the response body.
/// A missing field yields `Null`; list normalizers treat that as empty.
pub fn extract(envelope: Envelope, body: &Value) -> Value {
    match envelope {
        Envelope::List => body["LIST"].clone(),
        Envelope::InfoList => body["INFO"]["LIST"].clone(),
        Envelope::GeneralExtra => json!({
            "GENERAL": body["GENERAL"],
            "EXTRA": body["EXTRA"],
        }),
        Envelope::General => body["GENERAL"].clone(),
        Envelope::Pending => body["PENDING"].clone(),
        Envelope::Transactions => json!({
            "TRANSACTIONS": body["TRANSACTIONS"],
            "TOTAL": body["TOTAL"],
            "PAGE": body["PAGE"],
        }),
        Envelope::Activity => body["ACTIVITY"].clone(),
        Envelope::Customer => body["CUSTOMER"].clone(),
    }
}

/// Apply the registered canonical conversion. Pass-through operations keep
/// the extracted payload as-is.
pub fn normalize(normalizer: Normalizer, value: Value) -> Value {
    match normalizer {
        Normalizer::None => value,
        Normalizer::Agents => {
            let (agents, _) = crate::normalize::agents(&value);
            serde_json::to_value(agents).unwrap_or(Value::Null)
        }
        Normalizer::Customers => {
            let (customers, _) = crate::normalize::customers(&value);
            serde_json::to_value(customers).unwrap_or(Value::Null)
        }
        Normalizer::Wagers => {
            let (wagers, _) = crate::normalize::wagers(&value);
            serde_json::to_value(wagers).unwrap_or(Value::Null)
        }
    }
}
