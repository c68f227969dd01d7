//! The single-consumer operation queue (`SPEC_FULL.md` §4.6, component C6).
//!
//! Conceptually a consumer task draining an `mpsc::UnboundedReceiver<Operation>`
//! (§5) — but the coalescing rules in §4.6 need to peek at and drop/replace
//! already-queued operations before they're popped, which a raw `mpsc`
//! channel can't do. So the queue is a `tokio::sync::Mutex`-guarded
//! `VecDeque` instead; this mutex only ever guards queue bookkeeping, never
//! the `ConversationSet` itself (§5's "no `Arc<Mutex<_>>` around the set"
//! still holds).

pub mod operations;

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

pub use operations::{Operation, OperationKind};

struct QueueState {
    queue: VecDeque<Operation>,
    running: bool,
    stopped: bool,
}

pub struct OperationQueue {
    state: Mutex<QueueState>,
    has_work: Notify,
    went_idle: Notify,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                running: false,
                stopped: false,
            }),
            has_work: Notify::new(),
            went_idle: Notify::new(),
        }
    }

    /// Re-arm a queue that previously had `stop_processing` called on it, so
    /// a restarted `Monitor` can enqueue work again.
    pub async fn reset(&self) {
        self.state.lock().await.stopped = false;
    }

    /// Enqueue `op`, applying the §4.6 coalescing rules.
    pub async fn add(&self, op: Operation) {
        let mut state = self.state.lock().await;
        if state.stopped {
            return;
        }

        match &op {
            Operation::FillWindow { is_insert: false } => {
                if state
                    .queue
                    .iter()
                    .any(|queued| queued.kind() == OperationKind::FillWindow)
                {
                    debug!("coalescing duplicate FillWindow");
                    return;
                }
            }
            Operation::Reseed { .. } => {
                let had_stale = state
                    .queue
                    .iter()
                    .any(|queued| queued.kind() == OperationKind::Reseed);
                if had_stale {
                    debug!("superseding stale Reseed");
                    state.queue.retain(|queued| queued.kind() != OperationKind::Reseed);
                }
            }
            _ => {}
        }

        state.queue.push_back(op);
        drop(state);
        self.has_work.notify_one();
    }

    /// Pop the next operation, waiting for work to arrive. Returns `None`
    /// once `stop_processing` has been requested — queued-but-unstarted
    /// operations are never popped after that point (they're dropped by the
    /// subsequent `clear`, not executed).
    pub async fn pop(&self) -> Option<Operation> {
        loop {
            let mut state = self.state.lock().await;
            if state.stopped {
                return None;
            }
            if let Some(op) = state.queue.pop_front() {
                state.running = true;
                return Some(op);
            }
            drop(state);
            self.has_work.notified().await;
        }
    }

    /// Called by the consumer after an operation's `execute` future resolves,
    /// before looping back to `pop` again.
    pub async fn mark_idle(&self) {
        let mut state = self.state.lock().await;
        state.running = false;
        drop(state);
        self.went_idle.notify_one();
    }

    pub async fn clear(&self) {
        self.state.lock().await.queue.clear();
    }

    /// True while at least one operation is queued or running — the
    /// "progress monitor" state from §4.6.
    pub async fn is_processing(&self) -> bool {
        let state = self.state.lock().await;
        state.running || !state.queue.is_empty()
    }

    pub async fn has(&self, kind: OperationKind) -> bool {
        self.state
            .lock()
            .await
            .queue
            .iter()
            .any(|queued| queued.kind() == kind)
    }

    /// Await the in-flight operation (if any), then drop everything still
    /// queued without executing it.
    pub async fn stop_processing(&self) {
        {
            let mut state = self.state.lock().await;
            state.stopped = true;
        }
        self.has_work.notify_waiters();

        loop {
            let still_running = self.state.lock().await.running;
            if !still_running {
                break;
            }
            self.went_idle.notified().await;
        }

        self.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_fill_window_is_dropped() {
        let q = OperationQueue::new();
        q.add(Operation::FillWindow { is_insert: false }).await;
        q.add(Operation::FillWindow { is_insert: false }).await;
        let mut count = 0;
        while q.has(OperationKind::FillWindow).await {
            q.pop().await;
            count += 1;
            q.mark_idle().await;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn reseed_supersedes_prior_reseed() {
        let q = OperationQueue::new();
        q.add(Operation::Reseed { reason: "first".into() }).await;
        q.add(Operation::Append { ids: vec![] }).await;
        q.add(Operation::Reseed { reason: "second".into() }).await;

        let first = q.pop().await.unwrap();
        assert!(matches!(first, Operation::Append { .. }));
        q.mark_idle().await;

        let second = q.pop().await.unwrap();
        match second {
            Operation::Reseed { reason } => assert_eq!(reason, "second"),
            other => panic!("expected Reseed, got {other:?}"),
        }
        q.mark_idle().await;
    }

    #[tokio::test]
    async fn append_and_remove_are_never_coalesced() {
        let q = OperationQueue::new();
        q.add(Operation::Append { ids: vec![] }).await;
        q.add(Operation::Append { ids: vec![] }).await;
        assert!(q.pop().await.is_some());
        q.mark_idle().await;
        assert!(q.pop().await.is_some());
    }

    #[tokio::test]
    async fn stop_processing_drains_without_running() {
        let q = OperationQueue::new();
        q.add(Operation::LocalLoad).await;
        q.add(Operation::Append { ids: vec![] }).await;

        // Simulate the consumer having already popped the first op.
        let op = q.pop().await.unwrap();
        assert!(matches!(op, Operation::LocalLoad));

        let stop = q.stop_processing();
        q.mark_idle().await;
        stop.await;

        assert!(q.pop().await.is_none());
    }
}
