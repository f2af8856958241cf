//! Pair scoring for the withdrawal/deposit matcher.

use crate::model::QueueItem;

/// Score a (withdrawal, deposit) candidate. `None` means the pair is
/// rejected outright: mismatched payment methods, or a deposit too small
/// to cover the withdrawal.
pub fn score_pair(w: &QueueItem, d: &QueueItem) -> Option<i32> {
    if w.payment_method != d.payment_method {
        return None;
    }
    if w.amount > d.amount {
        return None;
    }

    let mut score = 20; // same payment method
    score += proximity_bonus((w.amount - d.amount).abs());
    score += 25; // deposit fully covers the withdrawal
    Some(score)
}

fn proximity_bonus(diff: f64) -> i32 {
    if diff < 10.0 {
        30
    } else if diff < 50.0 {
        20
    } else if diff < 100.0 {
        10
    } else {
        0
    }
}

/// Pick the best deposit for `w` from an ordered snapshot. Ties break by
/// smaller amount difference, then earlier `created_at`, then lower id —
/// deterministic across runs.
pub fn best_candidate<'a>(w: &QueueItem, deposits: &'a [QueueItem]) -> Option<(&'a QueueItem, i32)> {
    let mut best: Option<(&QueueItem, i32)> = None;

    for d in deposits {
        let Some(score) = score_pair(w, d) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((current, current_score)) => {
                let diff = (w.amount - d.amount).abs();
                let current_diff = (w.amount - current.amount).abs();
                score > current_score
                    || (score == current_score
                        && (diff < current_diff
                            || (diff == current_diff
                                && (d.created_at < current.created_at
                                    || (d.created_at == current.created_at
                                        && d.id < current.id)))))
            }
        };
        if better {
            best = Some((d, score));
        }
    }

    best
}
