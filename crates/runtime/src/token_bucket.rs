//! Sliding-window token/request bucket ported from
//! `original_source/.../token_bucket.py`'s `AsyncTokenBucket`.
//!
//! Every reservation is tagged with a monotonically increasing event id so a
//! caller can refund exactly the tokens it reserved, even when the bucket is
//! shared across many concurrent callers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

struct Event {
    at: Instant,
    weight: u64,
    id: u64,
}

struct Inner {
    events: VecDeque<Event>,
    in_window: u64,
    next_id: u64,
}

/// Sliding-window bucket holding `capacity` units per `window`.
pub struct AsyncTokenBucket {
    capacity: u64,
    window: Duration,
    inner: Mutex<Inner>,
}

impl AsyncTokenBucket {
    pub fn new(capacity: u64, window: Duration) -> Self {
        Self {
            capacity,
            window,
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                in_window: 0,
                next_id: 0,
            }),
        }
    }

    fn purge_old(inner: &mut Inner, now: Instant, window: Duration) {
        while let Some(front) = inner.events.front() {
            if now.duration_since(front.at) >= window {
                let ev = inner.events.pop_front().unwrap();
                inner.in_window = inner.in_window.saturating_sub(ev.weight);
            } else {
                break;
            }
        }
    }

    /// Block until `weight` units fit in the window, then reserve them and
    /// return the event id identifying this reservation.
    pub async fn acquire(&self, weight: u64) -> u64 {
        loop {
            let sleep_for = {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                Self::purge_old(&mut inner, now, self.window);

                if inner.in_window + weight <= self.capacity {
                    let id = inner.next_id;
                    inner.next_id += 1;
                    inner.events.push_back(Event {
                        at: now,
                        weight,
                        id,
                    });
                    inner.in_window += weight;
                    return id;
                }

                let oldest = inner.events.front().map(|e| e.at).unwrap_or(now);
                let elapsed = now.duration_since(oldest);
                self.window.saturating_sub(elapsed) + Duration::from_secs(1)
            };
            sleep(sleep_for).await;
        }
    }

    /// Refund up to `weight` units from the reservation named by `event_id`.
    /// A refund against an already-expired event is a no-op, so callers can
    /// never over-refund.
    pub async fn credit_by_id(&self, event_id: u64, weight: u64) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::purge_old(&mut inner, now, self.window);

        if let Some(idx) = inner.events.iter().rposition(|e| e.id == event_id) {
            let refund = weight.min(inner.events[idx].weight);
            inner.in_window = inner.in_window.saturating_sub(refund);
            if refund == inner.events[idx].weight {
                inner.events.remove(idx);
            } else {
                inner.events[idx].weight -= refund;
            }
        }
    }

    /// Total units currently occupying the sliding window.
    pub async fn current_load(&self) -> u64 {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::purge_old(&mut inner, now, self.window);
        inner.in_window
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_stays_within_capacity() {
        let bucket = AsyncTokenBucket::new(10, Duration::from_millis(200));
        let id1 = bucket.acquire(6).await;
        assert_eq!(bucket.current_load().await, 6);
        let id2 = bucket.acquire(4).await;
        assert_eq!(bucket.current_load().await, 10);
        bucket.credit_by_id(id1, 6).await;
        assert_eq!(bucket.current_load().await, 4);
        bucket.credit_by_id(id2, 4).await;
        assert_eq!(bucket.current_load().await, 0);
    }

    #[tokio::test]
    async fn credit_on_expired_event_is_noop() {
        let bucket = AsyncTokenBucket::new(10, Duration::from_millis(50));
        let id = bucket.acquire(5).await;
        sleep(Duration::from_millis(120)).await;
        assert_eq!(bucket.current_load().await, 0);
        bucket.credit_by_id(id, 5).await;
        assert_eq!(bucket.current_load().await, 0);
    }

    #[tokio::test]
    async fn acquire_blocks_until_capacity_frees() {
        let bucket = AsyncTokenBucket::new(5, Duration::from_millis(100));
        let _id = bucket.acquire(5).await;
        let start = Instant::now();
        let _second = bucket.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn partial_credit_shrinks_event_without_dropping_it() {
        let bucket = AsyncTokenBucket::new(10, Duration::from_millis(500));
        let id = bucket.acquire(8).await;
        bucket.credit_by_id(id, 3).await;
        assert_eq!(bucket.current_load().await, 5);
    }
}
