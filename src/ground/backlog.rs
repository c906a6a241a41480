//! Bounded single-consumer queue that drops its oldest item when full
//!
//! Sits between the demultiplexer and one sink writer, so a stalled sink
//! loses its oldest frames instead of holding up the demultiplexer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct State<T> {
    items: VecDeque<T>,
    sender_closed: bool,
    receiver_closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer half, owned by the demultiplexer
pub struct BacklogSender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half, owned by a sink writer
pub struct BacklogReceiver<T> {
    shared: Arc<Shared<T>>,
}

/// Outcome of [`BacklogSender::push`]
#[derive(Debug, PartialEq, Eq)]
pub enum Pushed<T> {
    Queued,
    /// Queued after evicting this oldest item
    Evicted(T),
    /// The receiver is gone; the item is handed back
    Closed(T),
}

pub fn backlog<T>(capacity: usize) -> (BacklogSender<T>, BacklogReceiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::with_capacity(capacity),
            sender_closed: false,
            receiver_closed: false,
        }),
        notify: Notify::new(),
        capacity,
    });

    (
        BacklogSender { shared: Arc::clone(&shared) },
        BacklogReceiver { shared },
    )
}

impl<T> BacklogSender<T> {
    /// Enqueue without ever waiting
    pub fn push(&self, item: T) -> Pushed<T> {
        let outcome = {
            let mut state = self.shared.lock();
            if state.receiver_closed {
                return Pushed::Closed(item);
            }

            let evicted = if state.items.len() >= self.shared.capacity {
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);

            match evicted {
                Some(old) => Pushed::Evicted(old),
                None => Pushed::Queued,
            }
        };

        self.shared.notify.notify_one();
        outcome
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for BacklogSender<T> {
    fn drop(&mut self) {
        self.shared.lock().sender_closed = true;
        self.shared.notify.notify_one();
    }
}

impl<T> BacklogReceiver<T> {
    /// Next item; `None` once the sender is gone and the queue is drained
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.sender_closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }
}

impl<T> Drop for BacklogReceiver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.receiver_closed = true;
        state.items.clear();
    }
}
