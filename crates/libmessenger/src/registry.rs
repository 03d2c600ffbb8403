//! Shared broadcast registry: the set of sessions eligible for fan-out.
//!
//! The registry holds only `mpsc::Sender` clones, never session state. A
//! session's lifetime is owned by its connection task; removal from the
//! registry always precedes session teardown.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Stable handle identifying one live connection.
pub type SessionId = Uuid;

struct Member {
    login: String,
    tx: mpsc::Sender<String>,
}

/// Process-wide set of logged-in sessions.
///
/// Membership invariant: a session is present iff it has completed login and
/// has not since logged out or disconnected. `join` and `leave` are
/// idempotent.
#[derive(Default)]
pub struct Registry {
    members: DashMap<SessionId, Member>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the fan-out set. Re-joining overwrites the existing
    /// entry (last login wins).
    pub fn join(&self, id: SessionId, login: &str, tx: mpsc::Sender<String>) {
        self.members.insert(
            id,
            Member {
                login: login.to_string(),
                tx,
            },
        );
    }

    /// Remove a session. No-op when absent.
    pub fn leave(&self, id: &SessionId) {
        self.members.remove(id);
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.members.contains_key(id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Enqueue `text` on every member's outbound queue.
    ///
    /// Iteration order is unspecified and carries no cross-recipient delivery
    /// guarantee. A per-member failure never aborts the sweep: a full queue
    /// drops the frame for that member only, a closed queue belongs to a
    /// session whose own task is already tearing down.
    pub fn broadcast(&self, text: &str) {
        for entry in self.members.iter() {
            let member = entry.value();
            match member.tx.try_send(text.to_string()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(login = %member.login, "outbound queue full, dropping frame");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(login = %member.login, "outbound queue closed, member departing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(8)
    }

    #[test]
    fn join_and_leave() {
        let registry = Registry::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = channel();

        registry.join(id, "alice", tx);
        assert!(registry.contains(&id));
        assert_eq!(registry.member_count(), 1);

        registry.leave(&id);
        assert!(!registry.contains(&id));

        // Removing an absent member is a no-op, never an error.
        registry.leave(&id);
        assert_eq!(registry.member_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.join(Uuid::new_v4(), "a", tx_a);
        registry.join(Uuid::new_v4(), "b", tx_b);

        registry.broadcast("hello everyone");

        assert_eq!(rx_a.recv().await.unwrap(), "hello everyone");
        assert_eq!(rx_b.recv().await.unwrap(), "hello everyone");
    }

    #[tokio::test]
    async fn broadcast_preserves_per_member_order() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::channel(64);
        registry.join(Uuid::new_v4(), "a", tx);

        for i in 0..50 {
            registry.broadcast(&format!("m{i}"));
        }
        for i in 0..50 {
            assert_eq!(rx.recv().await.unwrap(), format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn full_queue_drops_only_for_that_member() {
        let registry = Registry::new();
        let (tx_slow, mut rx_slow) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(8);
        registry.join(Uuid::new_v4(), "slow", tx_slow);
        registry.join(Uuid::new_v4(), "ok", tx_ok);

        registry.broadcast("first");
        registry.broadcast("second"); // slow's queue is full here

        assert_eq!(rx_slow.recv().await.unwrap(), "first");
        assert_eq!(rx_ok.recv().await.unwrap(), "first");
        assert_eq!(rx_ok.recv().await.unwrap(), "second");
        assert!(rx_slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_does_not_abort_fanout() {
        let registry = Registry::new();
        let (tx_dead, rx_dead) = channel();
        let (tx_live, mut rx_live) = channel();
        registry.join(Uuid::new_v4(), "dead", tx_dead);
        registry.join(Uuid::new_v4(), "live", tx_live);
        drop(rx_dead);

        registry.broadcast("still here");
        assert_eq!(rx_live.recv().await.unwrap(), "still here");
    }
}
