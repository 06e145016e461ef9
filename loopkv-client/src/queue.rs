//! Cross-thread hand-off queues between callers and the event loop.
//!
//! A queue starts closed. The event loop opens both queues once connected and
//! closes them during shutdown; closing drains atomically, so an item is either
//! seen by the loop or rejected back to the producer, never stranded.

use std::collections::VecDeque;
use std::mem;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::command::Dispatch;

struct QueueState<T> {
    items: VecDeque<T>,
    open: bool,
}

/// Mutex-guarded FIFO paired with a wakeup signal for the event loop.
pub(crate) struct SignalQueue<T> {
    state: Mutex<QueueState<T>>,
    wakeup: Notify,
}

impl<T> SignalQueue<T> {
    pub(crate) fn new() -> Self {
        SignalQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                open: false,
            }),
            wakeup: Notify::new(),
        }
    }

    pub(crate) fn open(&self) {
        self.state.lock().open = true;
    }

    /// Enqueues and signals the loop. Hands the item back if the queue is closed.
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        {
            let mut state = self.state.lock();
            if !state.open {
                return Err(item);
            }
            state.items.push_back(item);
        }
        self.wakeup.notify_one();
        Ok(())
    }

    pub(crate) fn drain(&self) -> VecDeque<T> {
        mem::take(&mut self.state.lock().items)
    }

    /// Rejects further pushes and returns whatever was queued.
    pub(crate) fn close(&self) -> VecDeque<T> {
        let mut state = self.state.lock();
        state.open = false;
        mem::take(&mut state.items)
    }

    /// Resolves after the next push. A push with no waiter leaves a permit.
    pub(crate) async fn notified(&self) {
        self.wakeup.notified().await
    }
}

/// Commands waiting to be registered by the loop.
pub(crate) type SubmissionQueue = SignalQueue<Box<dyn Dispatch>>;

/// Work for the loop's free step.
pub(crate) enum Retirement {
    /// A finished auto-free command, moved here by the loop itself.
    Completed(Box<dyn Dispatch>),
    /// A caller dropped the handle of a sync or looping command.
    Released(u64),
}

pub(crate) type FreeQueue = SignalQueue<Retirement>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn closed_queue_hands_items_back() {
        let queue = SignalQueue::new();
        assert_eq!(queue.push(1), Err(1));
        queue.open();
        assert_eq!(queue.push(2), Ok(()));
        assert_eq!(queue.push(3), Ok(()));
        assert_eq!(queue.close(), VecDeque::from(vec![2, 3]));
        assert_eq!(queue.push(4), Err(4));
        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn push_before_wait_leaves_a_permit() {
        let queue = Arc::new(SignalQueue::new());
        queue.open();
        queue.push("x").unwrap();
        tokio::time::timeout(Duration::from_millis(100), queue.notified())
            .await
            .expect("permit stored by push");
        assert_eq!(queue.drain(), VecDeque::from(vec!["x"]));
    }

    #[tokio::test]
    async fn push_from_another_thread_wakes_the_waiter() {
        let queue = Arc::new(SignalQueue::new());
        queue.open();
        let producer = queue.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(7u64).unwrap();
        });
        tokio::time::timeout(Duration::from_secs(2), queue.notified())
            .await
            .expect("woken by push");
        assert_eq!(queue.drain(), VecDeque::from(vec![7]));
        thread.join().unwrap();
    }
}
