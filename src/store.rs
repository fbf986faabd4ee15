//! Shared detection state.
//!
//! `DetectionStore::new()` returns the only `DetectionPublisher` together with
//! a cloneable read handle. The publisher belongs to the detection loop; every
//! other consumer reads snapshots or subscribes to them. Each publish replaces
//! the previous detections wholesale.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::detect::Detection;

/// The latest published detection set.
#[derive(Clone, Debug)]
pub struct DetectionSnapshot {
    detections: Arc<[Detection]>,
    last_update: SystemTime,
    sequence: u64,
    object_counts: Arc<BTreeMap<String, usize>>,
}

impl DetectionSnapshot {
    fn initial() -> Self {
        Self {
            detections: Arc::from(Vec::new()),
            last_update: SystemTime::now(),
            sequence: 0,
            object_counts: Arc::new(BTreeMap::new()),
        }
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn last_update(&self) -> SystemTime {
        self.last_update
    }

    /// Milliseconds since the Unix epoch of the last publish.
    pub fn last_update_ms(&self) -> u64 {
        self.last_update
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Number of publishes that produced this snapshot; 0 before the first.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn has_detections(&self) -> bool {
        !self.detections.is_empty()
    }

    /// Occurrences per class name.
    pub fn object_counts(&self) -> &BTreeMap<String, usize> {
        &self.object_counts
    }
}

/// Count detections per class.
pub fn object_counts(detections: &[Detection]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for detection in detections {
        *counts.entry(detection.class.clone()).or_insert(0) += 1;
    }
    counts
}

/// JSON view served to external display surfaces.
#[derive(Debug, Serialize)]
pub struct SnapshotView<'a> {
    pub detections: &'a [Detection],
    pub last_update_ms: u64,
    pub object_counts: &'a BTreeMap<String, usize>,
    pub has_detections: bool,
}

impl<'a> From<&'a DetectionSnapshot> for SnapshotView<'a> {
    fn from(snapshot: &'a DetectionSnapshot) -> Self {
        Self {
            detections: snapshot.detections(),
            last_update_ms: snapshot.last_update_ms(),
            object_counts: snapshot.object_counts(),
            has_detections: snapshot.has_detections(),
        }
    }
}

struct StoreInner {
    current: DetectionSnapshot,
    subscribers: Vec<Sender<DetectionSnapshot>>,
}

type SharedInner = Arc<Mutex<StoreInner>>;

fn lock(inner: &SharedInner) -> MutexGuard<'_, StoreInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read side of the store. Cheap to clone.
#[derive(Clone)]
pub struct DetectionStore {
    inner: SharedInner,
}

/// Write side of the store. Exactly one exists per store.
pub struct DetectionPublisher {
    inner: SharedInner,
}

impl DetectionStore {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (DetectionPublisher, DetectionStore) {
        let inner = Arc::new(Mutex::new(StoreInner {
            current: DetectionSnapshot::initial(),
            subscribers: Vec::new(),
        }));
        (
            DetectionPublisher {
                inner: inner.clone(),
            },
            DetectionStore { inner },
        )
    }

    pub fn snapshot(&self) -> DetectionSnapshot {
        lock(&self.inner).current.clone()
    }

    /// Subscribe to every future publish, starting from the current state.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut inner = lock(&self.inner);
        inner.subscribers.push(tx);
        Subscription {
            current: inner.current.clone(),
            updates: rx,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }
}

impl DetectionPublisher {
    /// Replace the shared detections and notify subscribers.
    pub fn publish(&self, detections: Vec<Detection>) -> DetectionSnapshot {
        let mut inner = lock(&self.inner);
        let snapshot = DetectionSnapshot {
            object_counts: Arc::new(object_counts(&detections)),
            detections: Arc::from(detections),
            last_update: SystemTime::now(),
            sequence: inner.current.sequence + 1,
        };
        inner.current = snapshot.clone();
        inner
            .subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        log::debug!(
            "published {} detections (update #{}, {} subscribers)",
            snapshot.detections.len(),
            snapshot.sequence,
            inner.subscribers.len()
        );
        snapshot
    }

    pub fn store(&self) -> DetectionStore {
        DetectionStore {
            inner: self.inner.clone(),
        }
    }
}

/// A consumer's view of the store: the latest snapshot plus pending updates.
pub struct Subscription {
    current: DetectionSnapshot,
    updates: Receiver<DetectionSnapshot>,
}

impl Subscription {
    pub fn current(&self) -> &DetectionSnapshot {
        &self.current
    }

    /// Next pending update, if any, without blocking.
    pub fn try_next(&mut self) -> Option<DetectionSnapshot> {
        let snapshot = self.updates.try_recv().ok()?;
        self.current = snapshot.clone();
        Some(snapshot)
    }

    /// Wait up to `timeout` for the next update.
    ///
    /// Returns `None` on timeout or when the publisher is gone.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<DetectionSnapshot> {
        match self.updates.recv_timeout(timeout) {
            Ok(snapshot) => {
                self.current = snapshot.clone();
                Some(snapshot)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Consume all pending updates in publish order.
    pub fn drain(&mut self) -> Vec<DetectionSnapshot> {
        let updates: Vec<_> = self.updates.try_iter().collect();
        if let Some(last) = updates.last() {
            self.current = last.clone();
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class: &str) -> Detection {
        Detection {
            class: class.to_string(),
            confidence: 0.9,
            bbox: vec![0.0, 0.0, 10.0, 10.0],
            quadrant: "1".to_string(),
        }
    }

    #[test]
    fn object_counts_per_class() {
        let counts = object_counts(&[detection("a"), detection("a"), detection("b")]);
        let expected: BTreeMap<String, usize> =
            [("a".to_string(), 2), ("b".to_string(), 1)].into_iter().collect();
        assert_eq!(counts, expected);
    }

    #[test]
    fn publishing_empty_replaces_and_stamps() {
        let (publisher, store) = DetectionStore::new();
        let before = store.snapshot();
        assert_eq!(before.sequence(), 0);

        publisher.publish(vec![detection("cup")]);
        let first = store.snapshot();
        assert!(first.has_detections());

        publisher.publish(Vec::new());
        let second = store.snapshot();
        assert_eq!(second.sequence(), 2);
        assert!(!second.has_detections());
        assert!(second.object_counts().is_empty());
        assert!(second.last_update() >= first.last_update());
    }

    #[test]
    fn every_subscriber_sees_every_publish() {
        let (publisher, store) = DetectionStore::new();
        let mut summary = store.subscribe();
        let mut list = store.subscribe();

        publisher.publish(vec![detection("a")]);
        publisher.publish(vec![detection("b"), detection("b")]);

        for sub in [&mut summary, &mut list] {
            let seen: Vec<u64> = sub.drain().iter().map(|s| s.sequence()).collect();
            assert_eq!(seen, vec![1, 2]);
            assert_eq!(sub.current().object_counts()["b"], 2);
        }
    }

    #[test]
    fn subscription_starts_from_current_state() {
        let (publisher, store) = DetectionStore::new();
        publisher.publish(vec![detection("cup")]);

        let mut late = store.subscribe();
        assert_eq!(late.current().sequence(), 1);
        assert!(late.try_next().is_none());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let (publisher, store) = DetectionStore::new();
        let kept = store.subscribe();
        drop(store.subscribe());
        assert_eq!(store.subscriber_count(), 2);

        publisher.publish(Vec::new());
        assert_eq!(store.subscriber_count(), 1);
        drop(kept);
    }
}
