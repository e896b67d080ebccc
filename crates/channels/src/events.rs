//! Bounded inbound event queue with drop-oldest semantics.
//!
//! Monitors push from the transport's receive path and must never block on
//! a slow consumer; when the queue is full the oldest event is dropped and
//! counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use oc_domain::inbound::InboundMessage;

pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

pub struct EventQueue {
    inner: Mutex<VecDeque<InboundMessage>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an event, dropping the oldest queued one when full. Never
    /// blocks.
    pub fn push(&self, message: InboundMessage) {
        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    tracing::warn!(dropped, capacity = self.capacity, "inbound queue full; dropping oldest");
                }
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Await the next event.
    pub async fn pop(&self) -> InboundMessage {
        loop {
            if let Some(message) = self.inner.lock().pop_front() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<InboundMessage> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::inbound::{ChatType, SenderRef};
    use oc_domain::ChannelId;

    fn msg(text: &str) -> InboundMessage {
        InboundMessage {
            channel: ChannelId::Web,
            account_id: "default".into(),
            chat_type: ChatType::Direct,
            conversation_id: "c1".into(),
            group_id: None,
            thread_id: None,
            sender: SenderRef::default(),
            text: text.into(),
            message_id: None,
            event_name: None,
            was_mentioned: false,
            timestamp_ms: None,
        }
    }

    #[tokio::test]
    async fn fifo_order() {
        let q = EventQueue::new(8);
        q.push(msg("a"));
        q.push(msg("b"));
        assert_eq!(q.pop().await.text, "a");
        assert_eq!(q.pop().await.text, "b");
    }

    #[test]
    fn drops_oldest_when_full() {
        let q = EventQueue::new(2);
        q.push(msg("a"));
        q.push(msg("b"));
        q.push(msg("c"));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.try_pop().unwrap().text, "b");
        assert_eq!(q.try_pop().unwrap().text, "c");
        assert!(q.try_pop().is_none());
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let q = std::sync::Arc::new(EventQueue::new(4));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await.text });
        tokio::task::yield_now().await;
        q.push(msg("late"));
        assert_eq!(waiter.await.unwrap(), "late");
    }
}
