//! One-shot counter barrier
//!
//! A [`RendezvousGroup`] holds a non-negative counter. Observers call
//! [`RendezvousGroup::wait`] and are released together once the counter
//! drains to zero. A group that has released its observers is finished and
//! must not be reused.

use futures::future::{FutureExt, Shared};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Misuse of a rendezvous group. These are programming errors in the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendezvousError {
    #[error("rendezvous group misuse: group is reused after release")]
    Reused,
    #[error("rendezvous group misuse: negative counter ({0})")]
    NegativeCounter(i64),
}

type Release = Shared<oneshot::Receiver<()>>;

enum State {
    /// No observer is blocked.
    Open,
    /// One or more observers share `pending`.
    Blocked {
        release: oneshot::Sender<()>,
        pending: Release,
    },
    Finished,
}

/// Counter-based barrier releasing every blocked observer in one step.
pub struct RendezvousGroup {
    counter: i64,
    state: State,
}

impl Default for RendezvousGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl RendezvousGroup {
    pub fn new() -> Self {
        Self {
            counter: 0,
            state: State::Open,
        }
    }

    /// Create a group whose counter starts at `count`.
    pub fn with_count(count: u32) -> Self {
        Self {
            counter: i64::from(count),
            state: State::Open,
        }
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished)
    }

    pub fn has_observers(&self) -> bool {
        matches!(self.state, State::Blocked { .. })
    }

    /// Adjust the counter by `delta`.
    ///
    /// When the counter reaches zero while observers are blocked, the group
    /// finishes and all of them are released. On error the counter is left
    /// untouched.
    pub fn add(&mut self, delta: i64) -> Result<(), RendezvousError> {
        if self.is_finished() {
            return Err(RendezvousError::Reused);
        }

        let next = self.counter + delta;
        if next < 0 {
            return Err(RendezvousError::NegativeCounter(next));
        }
        self.counter = next;

        if self.counter > 0 || !self.has_observers() {
            return Ok(());
        }

        if let State::Blocked { release, .. } = std::mem::replace(&mut self.state, State::Finished)
        {
            debug!("Releasing rendezvous observers");
            // Observers may have given up on their futures already.
            let _ = release.send(());
        }
        Ok(())
    }

    pub fn done(&mut self) -> Result<(), RendezvousError> {
        self.add(-1)
    }

    /// Future resolving once the counter drains to zero.
    ///
    /// Resolves immediately when the counter is already zero. Concurrent
    /// callers all receive the same pending completion.
    pub fn wait(&mut self) -> Wait {
        if self.counter == 0 {
            return Wait { pending: None };
        }

        let pending = match &self.state {
            State::Blocked { pending, .. } => pending.clone(),
            State::Open | State::Finished => {
                let (release, rx) = oneshot::channel();
                let pending = rx.shared();
                self.state = State::Blocked {
                    release,
                    pending: pending.clone(),
                };
                pending
            }
        };

        Wait {
            pending: Some(pending),
        }
    }
}

/// Future returned by [`RendezvousGroup::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait {
    pending: Option<Release>,
}

impl Wait {
    /// Whether this wait completes without suspending.
    pub fn is_ready(&self) -> bool {
        self.pending.is_none()
    }
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.get_mut().pending.as_mut() {
            None => Poll::Ready(()),
            // A dropped sender means the group itself went away; nothing is
            // left to wait for.
            Some(pending) => Pin::new(pending).poll(cx).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn resolves(wait: Wait) -> bool {
        tokio::time::timeout(Duration::from_millis(50), wait)
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn test_wait_on_fresh_group_is_immediate() {
        let mut group = RendezvousGroup::new();
        let wait = group.wait();
        assert!(wait.is_ready());
        assert!(resolves(wait).await);
    }

    #[tokio::test]
    async fn test_wait_blocks_until_done() {
        let mut group = RendezvousGroup::with_count(1);
        let wait = group.wait();
        assert!(!wait.is_ready());

        let handle = tokio::spawn(wait);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        group.done().unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("observer was not released")
            .unwrap();
        assert!(group.is_finished());
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_release() {
        let mut group = RendezvousGroup::with_count(2);
        let first = group.wait();
        let second = group.wait();

        group.done().unwrap();
        assert!(!group.is_finished());

        group.done().unwrap();
        assert!(group.is_finished());
        assert!(resolves(first).await);
        assert!(resolves(second).await);
    }

    #[tokio::test]
    async fn test_reaching_zero_without_observers_keeps_group_open() {
        let mut group = RendezvousGroup::with_count(1);
        group.done().unwrap();
        assert!(!group.is_finished());

        // Still usable as long as nobody was released.
        group.add(1).unwrap();
        let wait = group.wait();
        group.done().unwrap();
        assert!(resolves(wait).await);
    }

    #[test]
    fn test_negative_counter_is_rejected() {
        let mut group = RendezvousGroup::new();
        assert_eq!(group.done(), Err(RendezvousError::NegativeCounter(-1)));
        assert_eq!(group.counter(), 0);
    }

    #[test]
    fn test_reuse_after_release_is_rejected() {
        let mut group = RendezvousGroup::with_count(1);
        let _wait = group.wait();
        group.done().unwrap();

        assert_eq!(group.add(1), Err(RendezvousError::Reused));
        assert_eq!(group.done(), Err(RendezvousError::Reused));
    }

    #[tokio::test]
    async fn test_wait_after_finish_is_immediate() {
        let mut group = RendezvousGroup::with_count(1);
        let _first = group.wait();
        group.done().unwrap();

        let late = group.wait();
        assert!(late.is_ready());
        assert!(resolves(late).await);
    }

    #[tokio::test]
    async fn test_dropping_group_releases_observers() {
        let mut group = RendezvousGroup::with_count(1);
        let wait = group.wait();
        drop(group);
        assert!(resolves(wait).await);
    }
}
