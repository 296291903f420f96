//! Best-effort progress observation.
//!
//! The orchestrator publishes copies of the current generation into a bounded
//! queue. When the consumer falls behind, the oldest snapshot is evicted so
//! the producer never blocks. The consumer can stop the run cooperatively by
//! clearing the liveness flag; the orchestrator checks it between steps.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::grid::Grid;

/// Default number of snapshots held before the oldest is dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Direction the engine was stepping when a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A copy of engine state at one point of a run.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub direction: Direction,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Steps completed within this chunk.
    pub iteration: u16,
    pub total_iterations: u16,
    pub current: Grid,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Snapshot>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
    alive: AtomicBool,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A consumer that panicked leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Producer-side handle. Cheap to clone; all clones share one queue.
#[derive(Debug, Clone)]
pub struct Observer {
    shared: Arc<Shared>,
    stride: u16,
}

impl Observer {
    /// Create an observer holding at most `capacity` pending snapshots
    /// (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                ready: Condvar::new(),
                capacity: capacity.max(1),
                alive: AtomicBool::new(true),
                dropped: AtomicU64::new(0),
            }),
            stride: 1,
        }
    }

    /// Publish every `stride` steps (and always at the end of a chunk).
    pub fn with_stride(mut self, stride: u16) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn stride(&self) -> u16 {
        self.stride
    }

    /// Whether a snapshot should be taken after `iteration` of `total` steps.
    pub fn wants(&self, iteration: u16, total: u16) -> bool {
        iteration == total || iteration % self.stride == 0
    }

    /// `false` once the consumer (or anyone) has cancelled the run.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Ask the run to stop at the next step boundary.
    pub fn cancel(&self) {
        self.shared.alive.store(false, Ordering::Release);
        self.close();
    }

    /// Snapshots evicted because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Enqueue without blocking. Returns `false` if an older snapshot was
    /// evicted to make room or the queue is closed.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }
        let mut kept_all = true;
        while state.items.len() >= self.shared.capacity {
            state.items.pop_front();
            kept_all = false;
        }
        state.items.push_back(snapshot);
        drop(state);

        if !kept_all {
            let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                warn!(dropped = total, "observer is falling behind; dropping snapshots");
            }
        }
        self.shared.ready.notify_one();
        kept_all
    }

    /// Block until a snapshot is available. `None` once the queue is closed
    /// and drained.
    pub fn recv(&self) -> Option<Snapshot> {
        let mut state = self.shared.lock();
        loop {
            if let Some(s) = state.items.pop_front() {
                return Some(s);
            }
            if state.closed {
                return None;
            }
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Stop accepting snapshots and wake the consumer.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.ready.notify_all();
    }

    /// Run `on_snapshot` on a dedicated thread until the queue closes.
    ///
    /// Returning `false` from the callback cancels the run.
    pub fn spawn<F>(&self, mut on_snapshot: F) -> JoinHandle<()>
    where
        F: FnMut(Snapshot) -> bool + Send + 'static,
    {
        let rx = self.clone();
        thread::spawn(move || {
            while let Some(snapshot) = rx.recv() {
                if !on_snapshot(snapshot) {
                    rx.cancel();
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(i: usize) -> Snapshot {
        Snapshot {
            direction: Direction::Forward,
            chunk_index: i,
            total_chunks: 100,
            iteration: 0,
            total_iterations: 0,
            current: Vec::new(),
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let obs = Observer::new(3);
        for i in 0..5 {
            obs.publish(snap(i));
        }
        assert_eq!(obs.dropped(), 2);
        obs.close();
        let seen: Vec<usize> = std::iter::from_fn(|| obs.recv())
            .map(|s| s.chunk_index)
            .collect();
        assert_eq!(seen, vec![2, 3, 4]);
    }

    #[test]
    fn closed_queue_refuses_snapshots() {
        let obs = Observer::new(2);
        obs.close();
        assert!(!obs.publish(snap(0)));
        assert!(obs.recv().is_none());
        assert!(obs.is_alive());
    }

    #[test]
    fn consumer_can_cancel() {
        let obs = Observer::new(4);
        let handle = obs.spawn(|s| s.chunk_index < 1);
        obs.publish(snap(0));
        obs.publish(snap(1));
        handle.join().unwrap();
        assert!(!obs.is_alive());
    }

    #[test]
    fn consumer_sees_everything_when_it_keeps_up() {
        let obs = Observer::new(DEFAULT_QUEUE_CAPACITY);
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = obs.spawn(move |s| {
            tx.send(s.chunk_index).unwrap();
            true
        });
        for i in 0..DEFAULT_QUEUE_CAPACITY {
            obs.publish(snap(i));
        }
        obs.close();
        handle.join().unwrap();
        let got: Vec<usize> = rx.iter().collect();
        assert_eq!(got, (0..DEFAULT_QUEUE_CAPACITY).collect::<Vec<_>>());
    }

    #[test]
    fn stride_selects_steps() {
        let obs = Observer::new(1).with_stride(4);
        assert!(obs.wants(4, 10));
        assert!(!obs.wants(5, 10));
        assert!(obs.wants(10, 10));
    }
}
