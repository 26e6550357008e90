//! Tests for the queue coordinator

use crate::coordinator::*;
use crate::rendezvous::Wait;
use crate::store::MessageBody;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// TEST HELPERS
// =============================================================================

const NOW: i64 = 1_700_000_000_000;
const GENEROUS: Duration = Duration::from_secs(300);

fn queue_with(bodies: &[&str]) -> QueueCoordinator {
    let queue = QueueCoordinator::new();
    for body in bodies {
        queue.send(MessageBody::new(*body)).unwrap();
    }
    queue
}

fn bodies(messages: &[ReceivedMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.body.body.as_str()).collect()
}

async fn resolves(wait: Wait) -> bool {
    tokio::time::timeout(Duration::from_millis(50), wait)
        .await
        .is_ok()
}

// =============================================================================
// SEND / RECEIVE / DELETE
// =============================================================================

mod delivery_tests {
    use super::*;

    #[test]
    fn test_receive_from_empty_queue() {
        let queue = QueueCoordinator::new();
        assert!(queue.receive_at(10, GENEROUS, NOW).is_empty());
    }

    #[test]
    fn test_every_message_received_exactly_once() {
        let sent: Vec<String> = (0..25).map(|i| format!("message-{}", i)).collect();
        let queue = QueueCoordinator::new();
        for body in &sent {
            queue.send(MessageBody::new(body.as_str())).unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..sent.len() {
            received.extend(queue.receive_at(1, GENEROUS, NOW));
        }
        assert!(queue.receive_at(10, GENEROUS, NOW).is_empty());

        let unique: HashSet<String> = received.iter().map(|m| m.body.body.clone()).collect();
        assert_eq!(received.len(), sent.len());
        assert_eq!(unique, sent.into_iter().collect());
    }

    #[test]
    fn test_receive_respects_max_count() {
        let queue = queue_with(&["a", "b", "c"]);

        let first = queue.receive_at(2, GENEROUS, NOW);
        assert_eq!(bodies(&first), vec!["a", "b"]);

        let second = queue.receive_at(2, GENEROUS, NOW);
        assert_eq!(bodies(&second), vec!["c"]);
    }

    #[test]
    fn test_receive_order_follows_send_order_within_one_bucket() {
        // Ids embed a strict sequence number, so ordering within a single
        // coarse time bucket is exact rather than random.
        let names: Vec<String> = (0..50).map(|i| format!("m{:02}", i)).collect();
        let queue = QueueCoordinator::new();
        for name in &names {
            queue.send(MessageBody::new(name.as_str())).unwrap();
        }

        let received = queue.receive_at(10, GENEROUS, NOW);
        let expected: Vec<&str> = names.iter().take(10).map(String::as_str).collect();
        assert_eq!(bodies(&received), expected);
    }

    #[test]
    fn test_unacknowledged_message_is_redelivered() {
        let queue = queue_with(&["retry me"]);
        let timeout = Duration::from_secs(2);

        let first = queue.receive_at(1, timeout, NOW);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);

        assert!(queue.receive_at(1, timeout, NOW + 1_000).is_empty());

        let again = queue.receive_at(1, timeout, NOW + 2_001);
        assert_eq!(bodies(&again), vec!["retry me"]);
        assert_eq!(again[0].id, first[0].id);
        assert_eq!(again[0].receive_count, 2);
    }

    #[test]
    fn test_deleted_message_is_never_redelivered() {
        let queue = queue_with(&["done"]);
        let timeout = Duration::from_secs(1);

        let received = queue.receive_at(1, timeout, NOW);
        assert!(queue.delete(&received[0].receipt_handle()).unwrap());

        assert!(queue.receive_at(1, timeout, NOW + 60_000).is_empty());
    }

    #[test]
    fn test_hidden_older_message_is_skipped() {
        let queue = queue_with(&["old"]);
        queue.receive_at(1, GENEROUS, NOW);
        queue.send(MessageBody::new("new")).unwrap();

        let received = queue.receive_at(10, GENEROUS, NOW + 1);
        assert_eq!(bodies(&received), vec!["new"]);
    }

    #[test]
    fn test_delete_unknown_handle_is_noop() {
        let queue = queue_with(&["keep"]);
        let waiter = queue.wait_for_deleted_count(1);

        let never_issued = "170000000-0000000000000063-0123456789abcdef0123456789abcdef";
        assert!(!queue.delete(never_issued).unwrap());
        assert!(!queue.delete("garbage").unwrap());

        assert_eq!(queue.deleted_count(), 0);
        assert_eq!(queue.len(), 1);
        assert!(!waiter.is_ready());
    }

    #[test]
    fn test_double_delete_counts_once() {
        let queue = queue_with(&["once"]);
        let handle = queue.receive_at(1, GENEROUS, NOW)[0].receipt_handle();

        assert!(queue.delete(&handle).unwrap());
        assert!(!queue.delete(&handle).unwrap());
        assert_eq!(queue.deleted_count(), 1);
    }

    #[test]
    fn test_batches() {
        let queue = QueueCoordinator::new();
        let ids = queue
            .send_batch(vec![MessageBody::new("x"), MessageBody::new("y")])
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(queue.sent_count(), 2);

        let handles: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let results = queue
            .delete_batch(&[handles[0].as_str(), "missing", handles[1].as_str()])
            .unwrap();
        assert_eq!(results, vec![true, false, true]);
        assert_eq!(queue.deleted_count(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_snapshot_and_attributes() {
        let queue = queue_with(&["a", "b"]);
        queue.receive_at(1, GENEROUS, NOW);

        let snapshot: Vec<String> = queue.snapshot().into_iter().map(|b| b.body).collect();
        assert_eq!(snapshot, vec!["a", "b"]);

        let attributes = queue.attributes_at(NOW + 1);
        assert_eq!(attributes.visible, 1);
        assert_eq!(attributes.in_flight, 1);
        assert_eq!(attributes.sent, 2);
        assert_eq!(attributes.deleted, 0);
    }
}

// =============================================================================
// WAITERS
// =============================================================================

mod waiter_tests {
    use super::*;

    #[tokio::test]
    async fn test_waits_on_fresh_queue_are_immediate() {
        let queue = QueueCoordinator::new();
        assert!(queue.wait_for_sent_count(0).is_ready());
        assert!(queue.wait_for_deleted_count(0).is_ready());
        assert!(queue.wait_for_drain().is_ready());
        assert!(resolves(queue.wait_for_drain()).await);
    }

    #[tokio::test]
    async fn test_sent_waiter_released_by_exact_send() {
        let queue = QueueCoordinator::new();
        let mut waiter = Box::pin(queue.wait_for_sent_count(3));

        queue.send(MessageBody::new("1")).unwrap();
        queue.send(MessageBody::new("2")).unwrap();
        assert!(futures::poll!(waiter.as_mut()).is_pending());

        queue.send(MessageBody::new("3")).unwrap();
        assert!(futures::poll!(waiter.as_mut()).is_ready());
    }

    #[tokio::test]
    async fn test_jumped_over_target_is_only_satisfied_by_fast_path() {
        let queue = QueueCoordinator::new();
        queue
            .send_batch((0..5).map(|i| MessageBody::new(i.to_string())).collect())
            .unwrap();

        // Registered after the count already passed 2.
        assert!(queue.wait_for_sent_count(2).is_ready());
        assert!(!queue.wait_for_sent_count(6).is_ready());
    }

    #[tokio::test]
    async fn test_same_target_shares_one_waiter() {
        let queue = Arc::new(queue_with(&["a"]));
        let first = queue.wait_for_deleted_count(1);
        let second = queue.wait_for_deleted_count(1);

        let handle = queue.receive_at(1, GENEROUS, NOW)[0].receipt_handle();
        assert!(queue.delete(&handle).unwrap());

        let (a, b) = tokio::join!(resolves(first), resolves(second));
        assert!(a && b);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_released_by_one_delete() {
        let queue = Arc::new(queue_with(&["a"]));

        let tasks: Vec<_> = (0..2)
            .map(|_| tokio::spawn(queue.wait_for_deleted_count(1)))
            .collect();
        tokio::task::yield_now().await;
        assert!(tasks.iter().all(|t| !t.is_finished()));

        let handle = queue.receive_at(1, GENEROUS, NOW)[0].receipt_handle();
        queue.delete(&handle).unwrap();

        for task in tasks {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .expect("waiter was not released")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_drain_waiter_released_when_last_message_deleted() {
        let queue = queue_with(&["a", "b"]);
        let mut drained = Box::pin(queue.wait_for_drain());

        let received = queue.receive_at(10, GENEROUS, NOW);
        queue.delete(&received[0].receipt_handle()).unwrap();
        assert!(futures::poll!(drained.as_mut()).is_pending());

        queue.delete(&received[1].receipt_handle()).unwrap();
        assert!(futures::poll!(drained.as_mut()).is_ready());
    }

    #[tokio::test]
    async fn test_drain_without_waiter_is_harmless() {
        let queue = queue_with(&["a"]);
        let handle = queue.receive_at(1, GENEROUS, NOW)[0].receipt_handle();
        assert!(queue.delete(&handle).unwrap());
        assert!(queue.is_empty());

        // A later drain registration goes through a fresh waiter.
        queue.send(MessageBody::new("b")).unwrap();
        assert!(!queue.wait_for_drain().is_ready());
    }

    #[tokio::test]
    async fn test_waiter_does_not_block_other_operations() {
        let queue = Arc::new(QueueCoordinator::new());

        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_sent_count(1).await })
        };
        tokio::task::yield_now().await;

        // Would deadlock if the waiter kept the lock while suspended.
        queue.send(MessageBody::new("go")).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter was not released")
            .unwrap();
    }

    #[tokio::test]
    async fn test_scenario_send_receive_delete_drain() {
        let queue = QueueCoordinator::new();
        let sent = queue.wait_for_sent_count(3);

        for body in ["A", "B", "C"] {
            queue.send(MessageBody::new(body)).unwrap();
        }
        assert!(resolves(sent).await);

        let received = queue.receive_at(10, GENEROUS, NOW);
        assert_eq!(bodies(&received), vec!["A", "B", "C"]);
        assert!(received.windows(2).all(|w| w[0].id < w[1].id));

        let drained = queue.wait_for_drain();
        for message in &received {
            assert!(queue.delete(&message.receipt_handle()).unwrap());
        }
        assert!(resolves(drained).await);
        assert!(queue.receive_at(10, GENEROUS, NOW + 1).is_empty());
    }
}
