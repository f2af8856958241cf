//! Per-operation circuit breaker over a rolling failure window. While an
//! operation is open, calls fail fast without touching the network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Default)]
struct OpState {
    failures: VecDeque<Instant>,
    open_until: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub operation: String,
    pub open: bool,
    pub recent_failures: usize,
}

pub struct Breaker {
    max_fails: u32,
    window: Duration,
    cooldown: Duration,
    states: Mutex<HashMap<String, OpState>>,
}

impl Breaker {
    pub fn new(max_fails: u32, window: Duration, cooldown: Duration) -> Self {
        Breaker {
            max_fails,
            window,
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// True while the operation is inside its cool-down. The open flag
    /// clears itself once the cool-down elapses.
    pub fn is_open(&self, operation: &str) -> bool {
        let mut states = self.states.lock().unwrap();
        let Some(state) = states.get_mut(operation) else {
            return false;
        };
        match state.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                state.open_until = None;
                state.failures.clear();
                false
            }
            None => false,
        }
    }

    /// Record one failure; opens the breaker when the rolling window fills.
    pub fn record_failure(&self, operation: &str) {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(operation.to_string()).or_default();
        let now = Instant::now();

        while state
            .failures
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            state.failures.pop_front();
        }

        state.failures.push_back(now);
        if state.failures.len() >= self.max_fails as usize && state.open_until.is_none() {
            state.open_until = Some(now + self.cooldown);
            tracing::warn!(
                operation,
                failures = state.failures.len(),
                cooldown_ms = self.cooldown.as_millis() as u64,
                "upstream breaker opened"
            );
        }
    }

    /// A success clears the rolling window.
    pub fn record_success(&self, operation: &str) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(operation) {
            state.failures.clear();
            state.open_until = None;
        }
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let states = self.states.lock().unwrap();
        let now = Instant::now();
        let mut out: Vec<BreakerSnapshot> = states
            .iter()
            .map(|(op, state)| BreakerSnapshot {
                operation: op.clone(),
                open: state.open_until.is_some_and(|until| now < until),
                recent_failures: state.failures.len(),
            })
            .collect();
        out.sort_by(|a, b| a.operation.cmp(&b.operation));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> Breaker {
        Breaker::new(3, Duration::from_secs(60), Duration::from_millis(50))
    }

    #[test]
    fn opens_after_threshold_within_window() {
        let b = breaker();
        assert!(!b.is_open("getPending"));
        b.record_failure("getPending");
        b.record_failure("getPending");
        assert!(!b.is_open("getPending"));
        b.record_failure("getPending");
        assert!(b.is_open("getPending"));
    }

    #[test]
    fn closes_again_after_cooldown() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure("op");
        }
        assert!(b.is_open("op"));
        std::thread::sleep(Duration::from_millis(70));
        assert!(!b.is_open("op"));
    }

    #[test]
    fn success_resets_the_window() {
        let b = breaker();
        b.record_failure("op");
        b.record_failure("op");
        b.record_success("op");
        b.record_failure("op");
        b.record_failure("op");
        assert!(!b.is_open("op"));
    }

    #[test]
    fn operations_are_independent() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure("a");
        }
        assert!(b.is_open("a"));
        assert!(!b.is_open("b"));
    }
}
