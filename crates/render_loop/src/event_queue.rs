//! Control → render mailbox
//!
//! A FIFO guarded by a parking_lot mutex with a condvar for the blocking pop.
//! Only the owning render thread ever waits on it, so a post wakes at most one waiter.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    waiting: bool,
}

pub struct RenderThreadEventQueue<T> {
    state: Mutex<QueueState<T>>,
    condition: Condvar,
}

impl<T> Default for RenderThreadEventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RenderThreadEventQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                waiting: false,
            }),
            condition: Condvar::new(),
        }
    }

    pub fn post(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        if state.waiting {
            self.condition.notify_one();
        }
    }

    /// Pop the front item. With `wait`, blocks until one arrives.
    pub fn take(&self, wait: bool) -> Option<T> {
        let mut state = self.state.lock();
        if wait {
            while state.items.is_empty() {
                state.waiting = true;
                self.condition.wait(&mut state);
                state.waiting = false;
            }
        }
        state.items.pop_front()
    }

    pub fn has_more(&self) -> bool {
        !self.state.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_more()
    }
}
