//! In-memory message store

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Width of the coarse time bucket embedded in message ids, in milliseconds.
const ID_BUCKET_MILLIS: i64 = 10_000;

/// Identifier of a stored message, also used as its receipt handle.
///
/// Orders by coarse send time, then by a per-queue sequence number, so
/// iteration order matches send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    bucket: i64,
    seq: u64,
    nonce: Uuid,
}

impl MessageId {
    fn new(now_millis: i64, seq: u64) -> Self {
        Self {
            bucket: now_millis / ID_BUCKET_MILLIS,
            seq,
            nonce: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:016x}-{}", self.bucket, self.seq, self.nonce.simple())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidMessageId(pub String);

impl fmt::Display for InvalidMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message id: {}", self.0)
    }
}

impl std::error::Error for InvalidMessageId {}

impl FromStr for MessageId {
    type Err = InvalidMessageId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMessageId(s.to_string());

        let mut parts = s.splitn(3, '-');
        let (Some(bucket), Some(seq), Some(nonce)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        Ok(Self {
            bucket: bucket.parse().map_err(|_| invalid())?,
            seq: u64::from_str_radix(seq, 16).map_err(|_| invalid())?,
            nonce: Uuid::try_parse(nonce).map_err(|_| invalid())?,
        })
    }
}

/// A typed string attribute attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttribute {
    pub data_type: String,
    pub string_value: String,
}

impl MessageAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: "String".to_string(),
            string_value: value.into(),
        }
    }
}

/// Caller-supplied payload of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    pub body: String,
    pub attributes: BTreeMap<String, MessageAttribute>,
}

impl MessageBody {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: MessageAttribute) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

impl From<&str> for MessageBody {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: MessageId,
    pub body: MessageBody,
    /// Epoch millis before which the record is hidden; 0 means visible.
    pub visible_at: i64,
    pub receive_count: u32,
    pub sent_at: i64,
}

impl MessageRecord {
    pub fn is_visible(&self, now_millis: i64) -> bool {
        now_millis > self.visible_at
    }
}

/// Ordered map of in-flight messages keyed by id.
#[derive(Debug, Default)]
pub struct QueueStore {
    messages: BTreeMap<MessageId, MessageRecord>,
    next_seq: u64,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, body: MessageBody, now_millis: i64) -> MessageId {
        let id = MessageId::new(now_millis, self.next_seq);
        self.next_seq += 1;

        self.messages.insert(
            id,
            MessageRecord {
                id,
                body,
                visible_at: 0,
                receive_count: 0,
                sent_at: now_millis,
            },
        );

        info!(message_id = %id, "Sent message");
        id
    }

    /// Oldest record that is visible at `now_millis`.
    pub fn scan_visible(&self, now_millis: i64) -> Option<&MessageRecord> {
        self.messages
            .values()
            .find(|record| record.is_visible(now_millis))
    }

    /// Hide `id` for `timeout` starting at `now_millis`.
    ///
    /// Returns the updated record, or `None` if the id is unknown.
    pub fn mark_received(
        &mut self,
        id: &MessageId,
        now_millis: i64,
        timeout: Duration,
    ) -> Option<&MessageRecord> {
        let record = self.messages.get_mut(id)?;
        let timeout_millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        record.visible_at = now_millis.saturating_add(timeout_millis);
        record.receive_count += 1;

        debug!(message_id = %id, visible_at = record.visible_at, "Marked message received");
        Some(record)
    }

    /// Remove `id`. Unknown ids are a no-op and return `false`.
    pub fn delete(&mut self, id: &MessageId) -> bool {
        let removed = self.messages.remove(id).is_some();
        if removed {
            info!(message_id = %id, "Deleted message");
        } else {
            debug!(message_id = %id, "Delete of unknown message ignored");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Bodies of all stored messages in id order.
    pub fn snapshot(&self) -> Vec<MessageBody> {
        self.messages
            .values()
            .map(|record| record.body.clone())
            .collect()
    }

    /// Visible and hidden message counts at `now_millis`.
    pub fn counts(&self, now_millis: i64) -> (usize, usize) {
        let visible = self
            .messages
            .values()
            .filter(|record| record.is_visible(now_millis))
            .count();
        (visible, self.messages.len() - visible)
    }
}
