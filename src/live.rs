//! The live-push fabric: one aggregator task computes snapshots on a fixed
//! tick and offers them to every subscriber without blocking. A slow
//! subscriber loses snapshots (never order); nobody else notices.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::CoreResult;
use crate::model::{Activity, LiveSnapshot, now_ms};

const ACTIVITY_FEED_CAP: usize = 50;

/// Rolling feed of recent operational events (matches, settlements, queue
/// activity). Writers push fire-and-forget; the aggregator reads the tail.
#[derive(Default)]
pub struct ActivityFeed {
    inner: Mutex<VecDeque<Activity>>,
}

impl ActivityFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: &str, message: String) {
        let mut feed = self.inner.lock().unwrap();
        feed.push_front(Activity {
            at: now_ms(),
            kind: kind.to_string(),
            message,
        });
        feed.truncate(ACTIVITY_FEED_CAP);
    }

    /// Most recent first.
    pub fn recent(&self, n: usize) -> Vec<Activity> {
        let feed = self.inner.lock().unwrap();
        feed.iter().take(n).cloned().collect()
    }
}

/// What flows to a subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Connected { at: i64 },
    Snapshot { snapshot: LiveSnapshot },
    Shutdown { at: i64 },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LiveStats {
    pub subscribers: usize,
    pub ticks: u64,
    pub slow_consumer_drops: u64,
}

pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<LiveEvent>,
}

pub struct LiveFabric {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<LiveEvent>>>,
    last_snapshot: Mutex<Option<LiveSnapshot>>,
    next_id: AtomicU64,
    buffer: usize,
    ticks: AtomicU64,
    slow_drops: AtomicU64,
}

impl LiveFabric {
    pub fn new(buffer: usize) -> Self {
        LiveFabric {
            subscribers: Mutex::new(HashMap::new()),
            last_snapshot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            ticks: AtomicU64::new(0),
            slow_drops: AtomicU64::new(0),
        }
    }

    /// Register a subscriber. The channel starts with a `connected` event
    /// and the most recent snapshot, if one exists.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with(None)
    }

    /// Register a subscriber with a freshly-computed initial snapshot
    /// (falls back to the last published one).
    pub fn subscribe_with(&self, initial: Option<LiveSnapshot>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let _ = tx.try_send(LiveEvent::Connected { at: now_ms() });
        let first = initial.or_else(|| self.last_snapshot.lock().unwrap().clone());
        if let Some(snapshot) = first {
            let _ = tx.try_send(LiveEvent::Snapshot { snapshot });
        }

        self.subscribers.lock().unwrap().insert(id, tx);
        tracing::debug!(subscriber = id, "live subscriber connected");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.lock().unwrap().remove(&id).is_some() {
            tracing::debug!(subscriber = id, "live subscriber disconnected");
        }
    }

    /// Offer a snapshot to every subscriber. Full buffers drop this
    /// snapshot for that subscriber only; closed channels unregister.
    pub fn publish(&self, snapshot: LiveSnapshot) {
        *self.last_snapshot.lock().unwrap() = Some(snapshot.clone());
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<(u64, mpsc::Sender<LiveEvent>)> = {
            let subs = self.subscribers.lock().unwrap();
            subs.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut gone = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(LiveEvent::Snapshot {
                snapshot: snapshot.clone(),
            }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.slow_drops.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(subscriber = id, "slow consumer, snapshot dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(id),
            }
        }

        if !gone.is_empty() {
            let mut subs = self.subscribers.lock().unwrap();
            for id in gone {
                subs.remove(&id);
            }
        }
    }

    /// Broadcast the terminal event and drop every subscriber channel.
    pub fn shutdown(&self) {
        let mut subs = self.subscribers.lock().unwrap();
        let at = now_ms();
        for tx in subs.values() {
            let _ = tx.try_send(LiveEvent::Shutdown { at });
        }
        subs.clear();
    }

    pub fn stats(&self) -> LiveStats {
        LiveStats {
            subscribers: self.subscribers.lock().unwrap().len(),
            ticks: self.ticks.load(Ordering::Relaxed),
            slow_consumer_drops: self.slow_drops.load(Ordering::Relaxed),
        }
    }
}

/// Spawn the single-writer aggregator. `produce` reads whatever it needs
/// (cache, store, matcher) and must not block on subscribers — publishing
/// is non-blocking by construction.
pub fn spawn_aggregator<F, Fut>(
    fabric: Arc<LiveFabric>,
    tick: Duration,
    grace: Duration,
    mut shutdown: broadcast::Receiver<()>,
    produce: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = CoreResult<LiveSnapshot>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match produce().await {
                        Ok(mut snapshot) => {
                            snapshot.truncate_lists();
                            fabric.publish(snapshot);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "snapshot aggregation failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    fabric.shutdown();
                    // Give transports a moment to flush the terminal event.
                    tokio::time::sleep(grace.min(Duration::from_secs(2))).await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Kpi, Weekly};

    fn snapshot(ts: i64) -> LiveSnapshot {
        LiveSnapshot {
            timestamp: ts,
            kpi: Kpi::default(),
            weekly: Weekly::default(),
            pending_items: Vec::new(),
            activities: Vec::new(),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_but_fast_one_keeps_up() {
        let fabric = LiveFabric::new(4);
        let mut fast = fabric.subscribe();
        let mut slow = fabric.subscribe();

        // Drain the connected events.
        assert!(matches!(fast.rx.recv().await, Some(LiveEvent::Connected { .. })));
        assert!(matches!(slow.rx.recv().await, Some(LiveEvent::Connected { .. })));

        for i in 0..10 {
            fabric.publish(snapshot(i));
            // The fast subscriber drains every tick; the slow one never does.
            match fast.rx.recv().await {
                Some(LiveEvent::Snapshot { snapshot }) => assert_eq!(snapshot.timestamp, i),
                other => panic!("unexpected event: {other:?}"),
            }
        }

        // The slow subscriber got at most its buffer capacity, in order.
        let mut seen = Vec::new();
        while let Ok(event) = slow.rx.try_recv() {
            if let LiveEvent::Snapshot { snapshot } = event {
                seen.push(snapshot.timestamp);
            }
        }
        assert!(seen.len() <= 4, "slow subscriber buffered {}", seen.len());
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted, "snapshots arrived out of order");
        assert!(fabric.stats().slow_consumer_drops >= 6);
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_slot() {
        let fabric = LiveFabric::new(2);
        let sub = fabric.subscribe();
        assert_eq!(fabric.stats().subscribers, 1);
        fabric.unsubscribe(sub.id);
        assert_eq!(fabric.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_publish() {
        let fabric = LiveFabric::new(2);
        let sub = fabric.subscribe();
        drop(sub.rx);
        fabric.publish(snapshot(1));
        assert_eq!(fabric.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn shutdown_sends_terminal_event_and_closes() {
        let fabric = LiveFabric::new(4);
        let mut sub = fabric.subscribe();
        let _ = sub.rx.recv().await; // connected

        fabric.shutdown();
        match sub.rx.recv().await {
            Some(LiveEvent::Shutdown { .. }) => {}
            other => panic!("expected shutdown, got {other:?}"),
        }
        // Sender side dropped: the stream ends.
        assert!(sub.rx.recv().await.is_none());
        assert_eq!(fabric.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn late_subscriber_gets_last_snapshot_on_connect() {
        let fabric = LiveFabric::new(4);
        fabric.publish(snapshot(41));
        fabric.publish(snapshot(42));

        let mut sub = fabric.subscribe();
        assert!(matches!(sub.rx.recv().await, Some(LiveEvent::Connected { .. })));
        match sub.rx.recv().await {
            Some(LiveEvent::Snapshot { snapshot }) => assert_eq!(snapshot.timestamp, 42),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
