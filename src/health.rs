//! Health & metrics composition: each subsystem contributes one check with
//! a status and a 0–100 score; the report carries a weighted mean score and
//! the worst individual status. The JSON shape is consumed by dashboards,
//! so field names are load-bearing.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::matcher::MatcherStats;
use crate::model::now_ms;
use crate::upstream::BreakerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub score: u32,
    pub weight: u32,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: CheckStatus,
    pub score: u32,
    pub checks: Vec<Check>,
    pub at: i64,
}

/// Weighted mean of scores, worst status overall.
pub fn compose(checks: Vec<Check>) -> HealthReport {
    let total_weight: u32 = checks.iter().map(|c| c.weight).sum();
    let weighted: u64 = checks
        .iter()
        .map(|c| c.score as u64 * c.weight as u64)
        .sum();
    let score = if total_weight == 0 {
        100
    } else {
        (weighted / total_weight as u64) as u32
    };
    let status = checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(CheckStatus::Ok);

    HealthReport {
        status,
        score,
        checks,
        at: now_ms(),
    }
}

pub fn store_check(reachable: bool) -> Check {
    Check {
        name: "store",
        status: if reachable {
            CheckStatus::Ok
        } else {
            CheckStatus::Error
        },
        score: if reachable { 100 } else { 0 },
        weight: 30,
        detail: if reachable {
            "reachable".to_string()
        } else {
            "unreachable".to_string()
        },
    }
}

pub fn upstream_check(breakers: &[BreakerSnapshot]) -> Check {
    let open: Vec<&str> = breakers
        .iter()
        .filter(|b| b.open)
        .map(|b| b.operation.as_str())
        .collect();

    let (status, score, detail) = if open.is_empty() {
        (CheckStatus::Ok, 100, "all operations closed".to_string())
    } else if open.len() * 2 < breakers.len().max(1) {
        (
            CheckStatus::Warning,
            60,
            format!("breaker open: {}", open.join(", ")),
        )
    } else {
        (
            CheckStatus::Error,
            20,
            format!("breaker open: {}", open.join(", ")),
        )
    };

    Check {
        name: "upstream",
        status,
        score,
        weight: 25,
        detail,
    }
}

pub fn cache_check(stats: &CacheStats) -> Check {
    let lookups = stats.hits + stats.misses;
    let (status, score) = if lookups < 10 {
        (CheckStatus::Ok, 100)
    } else {
        let score = (stats.hit_rate * 100.0).round() as u32;
        if stats.hit_rate >= 0.4 {
            (CheckStatus::Ok, score)
        } else {
            (CheckStatus::Warning, score)
        }
    };

    Check {
        name: "cache",
        status,
        score,
        weight: 15,
        detail: format!(
            "{} entries, hit rate {:.0}%",
            stats.size,
            stats.hit_rate * 100.0
        ),
    }
}

/// Queue depth against an operational threshold.
pub fn matcher_check(stats: &MatcherStats, depth_threshold: u64) -> Check {
    let depth = stats.withdrawals.pending + stats.deposits.pending;
    let (status, score) = if depth < depth_threshold {
        (CheckStatus::Ok, 100 - (depth * 20 / depth_threshold.max(1)) as u32)
    } else if depth < depth_threshold * 2 {
        (CheckStatus::Warning, 50)
    } else {
        (CheckStatus::Error, 10)
    };

    Check {
        name: "matcher",
        status,
        score,
        weight: 15,
        detail: format!("{depth} pending items, {} passes", stats.passes),
    }
}

/// Seconds since the ledger last moved. An empty ledger is healthy.
pub fn settlement_check(lag_ms: Option<i64>) -> Check {
    let (status, score, detail) = match lag_ms {
        None => (CheckStatus::Ok, 100, "no settlements yet".to_string()),
        Some(lag) => {
            let secs = lag / 1000;
            if secs < 600 {
                (CheckStatus::Ok, 100, format!("last append {secs}s ago"))
            } else if secs < 3600 {
                (CheckStatus::Warning, 60, format!("last append {secs}s ago"))
            } else {
                (CheckStatus::Error, 20, format!("last append {secs}s ago"))
            }
        }
    };

    Check {
        name: "settlement",
        status,
        score,
        weight: 15,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_status_is_the_worst_individual() {
        let report = compose(vec![
            store_check(true),
            settlement_check(Some(5_000)),
            Check {
                name: "cache",
                status: CheckStatus::Warning,
                score: 30,
                weight: 15,
                detail: String::new(),
            },
        ]);
        assert_eq!(report.status, CheckStatus::Warning);
    }

    #[test]
    fn score_is_weight_averaged() {
        let report = compose(vec![
            Check {
                name: "a",
                status: CheckStatus::Ok,
                score: 100,
                weight: 75,
                detail: String::new(),
            },
            Check {
                name: "b",
                status: CheckStatus::Ok,
                score: 0,
                weight: 25,
                detail: String::new(),
            },
        ]);
        assert_eq!(report.score, 75);
    }

    #[test]
    fn store_outage_is_an_error() {
        let report = compose(vec![store_check(false)]);
        assert_eq!(report.status, CheckStatus::Error);
        assert_eq!(report.score, 0);
    }

    #[test]
    fn cold_cache_is_not_penalized() {
        let check = cache_check(&CacheStats {
            size: 0,
            hits: 1,
            misses: 2,
            hit_rate: 1.0 / 3.0,
        });
        assert_eq!(check.status, CheckStatus::Ok);
        assert_eq!(check.score, 100);
    }
}
