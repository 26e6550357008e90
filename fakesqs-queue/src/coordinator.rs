//! Queue coordinator
//!
//! Owns the [`QueueStore`] together with the running send/delete counters
//! and the waiter tables. Every mutation runs under one lock and finishes by
//! releasing the waiters whose target it just hit.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::rendezvous::{RendezvousError, RendezvousGroup, Wait};
use crate::store::{MessageBody, MessageId, QueueStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),
}

/// A message handed out by a receive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub body: MessageBody,
    pub receive_count: u32,
    pub sent_at: i64,
}

impl ReceivedMessage {
    pub fn receipt_handle(&self) -> String {
        self.id.to_string()
    }
}

/// Point-in-time view of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueAttributes {
    pub visible: usize,
    pub in_flight: usize,
    pub sent: u64,
    pub deleted: u64,
}

#[derive(Default)]
struct Inner {
    store: QueueStore,
    sent_count: u64,
    deleted_count: u64,
    message_waiters: HashMap<u64, RendezvousGroup>,
    delete_waiters: HashMap<u64, RendezvousGroup>,
    drain_waiter: Option<RendezvousGroup>,
}

impl Inner {
    fn send(&mut self, body: MessageBody, now_millis: i64) -> Result<MessageId, QueueError> {
        let id = self.store.send(body, now_millis);
        self.sent_count += 1;
        self.check_waiters()?;
        Ok(id)
    }

    fn delete(&mut self, receipt_handle: &str) -> Result<bool, QueueError> {
        let removed = match receipt_handle.parse::<MessageId>() {
            Ok(id) => self.store.delete(&id),
            Err(e) => {
                debug!(error = %e, "Delete with malformed receipt handle ignored");
                false
            }
        };
        if removed {
            self.deleted_count += 1;
        }
        self.check_waiters()?;
        Ok(removed)
    }

    /// Release waiters keyed exactly at the current counts.
    ///
    /// Targets that were jumped over stay registered; callers arriving late
    /// are served by the fast path in the `wait_for_*` methods instead.
    ///
    /// Every matching waiter is released before the first misuse error is
    /// returned.
    fn check_waiters(&mut self) -> Result<(), QueueError> {
        let mut result = Ok(());

        if let Some(mut waiter) = self.delete_waiters.remove(&self.deleted_count) {
            debug!(count = self.deleted_count, "Delete count reached");
            result = result.and(waiter.done());
        }

        if let Some(mut waiter) = self.message_waiters.remove(&self.sent_count) {
            debug!(count = self.sent_count, "Sent count reached");
            result = result.and(waiter.done());
        }

        if self.store.is_empty() {
            if let Some(mut waiter) = self.drain_waiter.take() {
                debug!("Queue drained");
                result = result.and(waiter.done());
            }
        }

        result.map_err(QueueError::from)
    }
}


/// Single queue with counters and rendezvous hooks.
#[derive(Default)]
pub struct QueueCoordinator {
    inner: Mutex<Inner>,
}

impl QueueCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, body: MessageBody) -> Result<MessageId, QueueError> {
        self.inner.lock().send(body, now_millis())
    }

    /// Send each body in turn; every send runs its own waiter check.
    pub fn send_batch(&self, bodies: Vec<MessageBody>) -> Result<Vec<MessageId>, QueueError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        bodies
            .into_iter()
            .map(|body| inner.send(body, now))
            .collect()
    }

    pub fn receive(&self, max_count: usize, visibility_timeout: Duration) -> Vec<ReceivedMessage> {
        self.receive_at(max_count, visibility_timeout, now_millis())
    }

    /// Receive up to `max_count` messages visible at `now_millis`, hiding
    /// each for `visibility_timeout`.
    pub fn receive_at(
        &self,
        max_count: usize,
        visibility_timeout: Duration,
        now_millis: i64,
    ) -> Vec<ReceivedMessage> {
        let mut inner = self.inner.lock();
        let mut received = Vec::new();

        while received.len() < max_count {
            let Some(id) = inner.store.scan_visible(now_millis).map(|r| r.id) else {
                break;
            };
            let Some(record) = inner.store.mark_received(&id, now_millis, visibility_timeout)
            else {
                break;
            };
            received.push(ReceivedMessage {
                id: record.id,
                body: record.body.clone(),
                receive_count: record.receive_count,
                sent_at: record.sent_at,
            });
        }

        info!(count = received.len(), "Received messages");
        received
    }

    /// Delete by receipt handle. Unknown or malformed handles return `false`.
    pub fn delete(&self, receipt_handle: &str) -> Result<bool, QueueError> {
        self.inner.lock().delete(receipt_handle)
    }

    pub fn delete_batch<S: AsRef<str>>(
        &self,
        receipt_handles: &[S],
    ) -> Result<Vec<bool>, QueueError> {
        let mut inner = self.inner.lock();
        receipt_handles
            .iter()
            .map(|handle| inner.delete(handle.as_ref()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<MessageBody> {
        self.inner.lock().store.snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().store.is_empty()
    }

    pub fn sent_count(&self) -> u64 {
        self.inner.lock().sent_count
    }

    pub fn deleted_count(&self) -> u64 {
        self.inner.lock().deleted_count
    }

    pub fn attributes(&self) -> QueueAttributes {
        self.attributes_at(now_millis())
    }

    pub fn attributes_at(&self, now_millis: i64) -> QueueAttributes {
        let inner = self.inner.lock();
        let (visible, in_flight) = inner.store.counts(now_millis);
        QueueAttributes {
            visible,
            in_flight,
            sent: inner.sent_count,
            deleted: inner.deleted_count,
        }
    }

    /// Resolves once at least `count` messages have been sent.
    ///
    /// The waiter is registered when this is called, not when the returned
    /// future is first polled. The lock is never held across the await.
    pub fn wait_for_sent_count(&self, count: u64) -> Wait {
        let mut inner = self.inner.lock();
        if inner.sent_count >= count {
            return RendezvousGroup::new().wait();
        }
        debug!(count, "Waiting for sent count");
        inner
            .message_waiters
            .entry(count)
            .or_insert_with(|| RendezvousGroup::with_count(1))
            .wait()
    }

    /// Resolves once at least `count` deletes have removed a message.
    pub fn wait_for_deleted_count(&self, count: u64) -> Wait {
        let mut inner = self.inner.lock();
        if inner.deleted_count >= count {
            return RendezvousGroup::new().wait();
        }
        debug!(count, "Waiting for deleted count");
        inner
            .delete_waiters
            .entry(count)
            .or_insert_with(|| RendezvousGroup::with_count(1))
            .wait()
    }

    /// Resolves once the queue holds no messages.
    pub fn wait_for_drain(&self) -> Wait {
        let mut inner = self.inner.lock();
        if inner.store.is_empty() {
            return RendezvousGroup::new().wait();
        }
        debug!(pending = inner.store.len(), "Waiting for drain");
        inner
            .drain_waiter
            .get_or_insert_with(|| RendezvousGroup::with_count(1))
            .wait()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
