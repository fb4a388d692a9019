//! Priority queue (spec §4.F) — generalizes the source's `ThreadSafeDeque`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::sync::Mutex;

use crate::error::BalancerError;

/// A request waiting for placement. `completion` is signalled with the
/// chosen backend URL once the dispatch loop admits it, or an error if the
/// request can never be placed (e.g. its model has no backends at all).
pub struct QueueEntry {
    pub msg_id: i64,
    pub agent_name: String,
    pub prompt_len: f64,
    pub priority: f64,
    pub start_time: DateTime<Utc>,
    pub completion: oneshot::Sender<Result<String, BalancerError>>,
}

/// Cheap, clonable view of a queue entry's dispatch-relevant fields —
/// lets the dispatch loop peek the head without consuming it.
#[derive(Debug, Clone)]
pub struct QueuePeek {
    pub msg_id: i64,
    pub agent_name: String,
    pub prompt_len: f64,
}

/// Thread-safe double-ended queue of waiting requests, sorted on demand.
pub struct PriorityQueue {
    inner: Mutex<VecDeque<QueueEntry>>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push_back(&self, entry: QueueEntry) {
        self.inner.lock().await.push_back(entry);
    }

    pub async fn pop_front(&self) -> Option<QueueEntry> {
        self.inner.lock().await.pop_front()
    }

    pub async fn peek_front(&self) -> Option<QueuePeek> {
        self.inner.lock().await.front().map(|e| QueuePeek {
            msg_id: e.msg_id,
            agent_name: e.agent_name.clone(),
            prompt_len: e.prompt_len,
        })
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Reorders by `(priority asc, start_time asc)`. The balancer calls this
    /// every dispatch tick so the head always reflects current priorities.
    pub async fn sort_by_priority(&self) {
        let mut guard = self.inner.lock().await;
        guard
            .make_contiguous()
            .sort_by(|a, b| a.priority.total_cmp(&b.priority).then(a.start_time.cmp(&b.start_time)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        msg_id: i64,
        priority: f64,
        start_time: DateTime<Utc>,
    ) -> (QueueEntry, oneshot::Receiver<Result<String, BalancerError>>) {
        let (tx, rx) = oneshot::channel();
        (
            QueueEntry {
                msg_id,
                agent_name: "writer".to_string(),
                prompt_len: 10.0,
                priority,
                start_time,
                completion: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn sort_by_priority_orders_ascending_then_by_arrival() {
        let queue = PriorityQueue::new();
        let t0 = Utc::now();

        let (e1, _r1) = entry(1, 2.0, t0);
        let (e2, _r2) = entry(2, 1.0, t0 + chrono::Duration::milliseconds(5));
        let (e3, _r3) = entry(3, 1.0, t0);

        queue.push_back(e1).await;
        queue.push_back(e2).await;
        queue.push_back(e3).await;

        queue.sort_by_priority().await;

        let first = queue.pop_front().await.unwrap();
        assert_eq!(first.msg_id, 3);
        let second = queue.pop_front().await.unwrap();
        assert_eq!(second.msg_id, 2);
        let third = queue.pop_front().await.unwrap();
        assert_eq!(third.msg_id, 1);
    }

    #[tokio::test]
    async fn peek_front_does_not_consume() {
        let queue = PriorityQueue::new();
        let (e1, _r1) = entry(1, 1.0, Utc::now());
        queue.push_back(e1).await;

        let peek = queue.peek_front().await.unwrap();
        assert_eq!(peek.msg_id, 1);
        assert_eq!(queue.len().await, 1);
    }
}
