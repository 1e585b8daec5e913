//! Signal subscriptions: bounded per-watcher queues fed by the connection's
//! dispatch path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use crate::connection::Connection;
use crate::error::Result;
use crate::filter::MatchRule;
use crate::message::Message;
use crate::object_path::ObjectPathBuf;
use crate::value::Value;

/// Default queue capacity of a watcher.
pub(crate) const DEFAULT_CAPACITY: usize = 20;

/// A decoded signal delivered to a watcher.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Notification {
    /// The unique name of the emitting peer.
    pub sender: Option<String>,
    /// The object path the signal was emitted from.
    pub path: Option<ObjectPathBuf>,
    /// The interface the signal belongs to.
    pub interface: Option<String>,
    /// The signal name.
    pub member: Option<String>,
    /// The decoded body arguments.
    pub body: Vec<Value>,
    /// Set when at least one notification following this one was dropped
    /// because the watcher's queue was full.
    pub overflow: bool,
}

struct QueueState {
    queue: VecDeque<Notification>,
    filters: Vec<(u64, MatchRule)>,
    capacity: usize,
    closed: bool,
}

/// State shared between a [`Watcher`] handle and the connection's dispatch
/// path, which holds only a weak reference.
pub(crate) struct WatcherShared {
    state: Mutex<QueueState>,
    wake: Notify,
    next_filter: AtomicU64,
}

impl WatcherShared {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                filters: Vec::new(),
                capacity,
                closed: false,
            }),
            wake: Notify::new(),
            next_filter: AtomicU64::new(0),
        }
    }

    /// Whether any of the watcher's filters accepts the signal.
    pub(crate) fn accepts(&self, message: &Message, body: &[Value]) -> bool {
        let state = self.state.lock().unwrap();
        state.filters.iter().any(|(_, rule)| rule.matches(message, body))
    }

    /// Queue a notification, recording overflow when the queue is full.
    ///
    /// A full queue marks the most recently queued notification instead of
    /// growing: `overflow` on a delivered notification therefore means that
    /// at least one notification after it was discarded.
    pub(crate) fn enqueue(&self, notification: Notification) {
        {
            let mut state = self.state.lock().unwrap();

            if state.closed {
                return;
            }

            if state.queue.len() >= state.capacity {
                if let Some(last) = state.queue.back_mut() {
                    last.overflow = true;
                }

                return;
            }

            state.queue.push_back(notification);
        }

        self.wake.notify_one();
    }

    /// Close the queue, waking a pending receiver.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();

            if state.closed {
                return;
            }

            state.closed = true;
        }

        self.wake.notify_one();
    }

    fn add_filter(&self, rule: MatchRule) -> u64 {
        let id = self.next_filter.fetch_add(1, Ordering::Relaxed);
        self.state.lock().unwrap().filters.push((id, rule));
        id
    }

    fn remove_filter(&self, id: u64) {
        self.state.lock().unwrap().filters.retain(|(n, _)| *n != id);
    }

    fn take_filters(&self) -> Vec<(u64, MatchRule)> {
        std::mem::take(&mut self.state.lock().unwrap().filters)
    }

    /// Pop one notification, or report whether the queue is closed.
    fn poll_pop(&self) -> PopResult {
        let mut state = self.state.lock().unwrap();

        match state.queue.pop_front() {
            Some(notification) => PopResult::Item(notification),
            None if state.closed => PopResult::Closed,
            None => PopResult::Empty,
        }
    }
}

enum PopResult {
    Item(Notification),
    Empty,
    Closed,
}

/// A subscription to signals matching a set of filters.
///
/// Created through [`Connection::watcher`], initially active with no
/// filters. Notifications queue up to the watcher's capacity; when the
/// consumer falls behind, the newest queued notification is flagged with
/// [`Notification::overflow`] and later signals are dropped until the queue
/// drains.
///
/// [`Connection::watcher`]: crate::Connection::watcher
pub struct Watcher {
    connection: Connection,
    shared: Arc<WatcherShared>,
    id: u64,
    closed: bool,
}

impl Watcher {
    pub(crate) fn new(connection: Connection, shared: Arc<WatcherShared>, id: u64) -> Self {
        Self {
            connection,
            shared,
            id,
            closed: false,
        }
    }

    /// Register a filter with the bus and this watcher.
    ///
    /// The filter only becomes active locally once the bus has accepted the
    /// corresponding match rule, so the two sides cannot diverge. The
    /// returned handle removes the filter again.
    pub async fn add_match(&self, rule: MatchRule) -> Result<MatchGuard> {
        let rendered = rule.render();
        self.connection.add_match(&rendered).await?;
        let filter = self.shared.add_filter(rule);

        Ok(MatchGuard {
            connection: self.connection.clone(),
            shared: Arc::downgrade(&self.shared),
            filter,
            rule: rendered,
            removed: AtomicBool::new(false),
        })
    }

    /// Receive the next notification.
    ///
    /// Returns `None` once the watcher has been closed and its queue has
    /// drained.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            let wake = self.shared.wake.notified();

            match self.shared.poll_pop() {
                PopResult::Item(notification) => return Some(notification),
                PopResult::Closed => return None,
                PopResult::Empty => {}
            }

            wake.await;
        }
    }

    /// Close the watcher, unsubscribing its remaining filters.
    ///
    /// Notifications already queued can still be received; calling this a
    /// second time is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.connection.unregister_watcher(self.id);

        for (_, rule) in self.shared.take_filters() {
            // Best effort: the connection may already be gone.
            _ = self.connection.remove_match(&rule.render()).await;
        }

        self.shared.close();
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if !self.closed {
            self.connection.unregister_watcher(self.id);
            self.shared.close();
        }
    }
}

/// Removal handle for a filter added with [`Watcher::add_match`].
pub struct MatchGuard {
    connection: Connection,
    shared: Weak<WatcherShared>,
    filter: u64,
    rule: String,
    removed: AtomicBool,
}

impl MatchGuard {
    /// The canonical rule string this guard covers.
    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Unsubscribe from the bus and drop the local filter.
    ///
    /// Removing twice is a no-op.
    pub async fn remove(&self) -> Result<()> {
        if self.removed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(shared) = self.shared.upgrade() {
            shared.remove_filter(self.filter);
        }

        self.connection.remove_match(&self.rule).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Notification, PopResult, WatcherShared, DEFAULT_CAPACITY};

    fn notification(n: u32) -> Notification {
        Notification {
            sender: None,
            path: None,
            interface: None,
            member: Some(format!("Signal{n}")),
            body: Vec::new(),
            overflow: false,
        }
    }

    #[test]
    fn queue_overflow_marks_newest() {
        let shared = Arc::new(WatcherShared::new(DEFAULT_CAPACITY));

        for n in 0..25 {
            shared.enqueue(notification(n));
        }

        let mut received = Vec::new();

        while let PopResult::Item(n) = shared.poll_pop() {
            received.push(n);
        }

        assert_eq!(received.len(), DEFAULT_CAPACITY);

        for n in &received[..DEFAULT_CAPACITY - 1] {
            assert!(!n.overflow);
        }

        assert!(received[DEFAULT_CAPACITY - 1].overflow);
        assert_eq!(
            received[DEFAULT_CAPACITY - 1].member.as_deref(),
            Some("Signal19")
        );
    }

    #[test]
    fn queue_drains_after_close() {
        let shared = Arc::new(WatcherShared::new(4));

        shared.enqueue(notification(0));
        shared.enqueue(notification(1));
        shared.close();

        assert!(matches!(shared.poll_pop(), PopResult::Item(..)));
        assert!(matches!(shared.poll_pop(), PopResult::Item(..)));
        assert!(matches!(shared.poll_pop(), PopResult::Closed));
    }

    #[test]
    fn enqueue_after_close_is_dropped() {
        let shared = Arc::new(WatcherShared::new(4));

        shared.close();
        shared.enqueue(notification(0));

        assert!(matches!(shared.poll_pop(), PopResult::Closed));
    }
}
