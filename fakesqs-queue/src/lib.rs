//! Single in-memory SQS queue for fakesqs
//!
//! Provides:
//! - Message store with visibility timeouts and strict send order
//! - SendMessage, SendMessageBatch, ReceiveMessage, DeleteMessage, DeleteMessageBatch
//! - Rendezvous hooks for sent count, deleted count and drain

pub mod coordinator;
pub mod handlers;
pub mod rendezvous;
pub mod store;

#[cfg(test)]
mod coordinator_tests;

pub use coordinator::{QueueAttributes, QueueCoordinator, QueueError, ReceivedMessage};
pub use handlers::{handle_request, router, QueueSettings, SqsAction, SqsState};
pub use rendezvous::{RendezvousError, RendezvousGroup, Wait};
pub use store::{InvalidMessageId, MessageAttribute, MessageBody, MessageId};
