//! Animation Queue
//!
//! Bounded FIFO between the generator (producer) and the display controller
//! (consumer). Built on a tokio bounded channel: `put` waits while the queue
//! is full, `get` waits while it is empty. No other locking is involved.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::animation::Animation;

/// The queue's receiving side is gone
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("animation queue is closed")]
pub struct QueueClosed;

/// Bounded animation buffer
pub struct AnimationQueue {
    tx: mpsc::Sender<Animation>,
    rx: Mutex<mpsc::Receiver<Animation>>,
    enqueued: AtomicU64,
}

impl AnimationQueue {
    /// Create a queue holding at most `capacity` animations (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Enqueue, waiting for free capacity
    pub async fn put(&self, mut animation: Animation) -> Result<(), QueueClosed> {
        animation.mark_queued();
        self.tx.send(animation).await.map_err(|_| QueueClosed)?;
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Dequeue, waiting until an animation is available
    ///
    /// Returns `None` only if the queue has been closed and drained.
    pub async fn get(&self) -> Option<Animation> {
        self.rx.lock().await.recv().await
    }

    /// Dequeue without waiting
    pub fn try_get(&self) -> Option<Animation> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Animations currently waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting animations
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Animations accepted since creation
    #[must_use]
    pub fn total_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimationId, AnimationStatus};
    use std::sync::Arc;
    use std::time::Duration;

    fn animation(n: u32) -> Animation {
        let id = AnimationId::new(format!("anim_{n}_1000"));
        Animation::new(id.clone(), "src", id.as_str(), format!("idea {n}"))
    }

    #[tokio::test]
    async fn test_fifo_order_and_status() {
        let queue = AnimationQueue::new(2);
        queue.put(animation(1)).await.unwrap();
        queue.put(animation(2)).await.unwrap();
        assert_eq!(queue.len(), 2);

        let first = queue.get().await.unwrap();
        assert_eq!(first.id.as_str(), "anim_1_1000");
        assert_eq!(first.status(), AnimationStatus::Queued);
        assert_eq!(queue.try_get().unwrap().id.as_str(), "anim_2_1000");
        assert!(queue.try_get().is_none());
        assert_eq!(queue.total_enqueued(), 2);
    }

    #[tokio::test]
    async fn test_put_blocks_when_full() {
        let queue = Arc::new(AnimationQueue::new(1));
        queue.put(animation(1)).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.put(animation(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        queue.get().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_get_waits_for_item() {
        let queue = Arc::new(AnimationQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.put(animation(7)).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.description, "idea 7");
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let queue = AnimationQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.is_empty());
    }
}
