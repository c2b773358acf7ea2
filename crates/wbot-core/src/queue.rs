//! Bounded-retry queue for outbound actions.
//!
//! Producers (usually handlers, via the orchestrator) enqueue typed
//! operations; the orchestrator drains the queue once per tick. Transient
//! network failures and stale-session failures keep an action pending until
//! a fixed attempt ceiling, anything else drops it immediately. Every
//! executed action is followed by a pacing delay to throttle the outbound
//! request rate.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::{
    domain::{PostId, UserId},
    errors::Error,
    model::Visibility,
    Result,
};

/// A queued outbound operation.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundOp {
    Post { content: String, visible: Visibility },
    Repost { id: PostId, content: String },
    Comment { id: PostId, content: String },
    Like { id: PostId },
    SendMessage { to: UserId, content: String },
    Delete { id: PostId },
}

impl OutboundOp {
    /// Coalescing key: two pending actions with the same key are redundant
    /// requests for the same target.
    fn dup_key(&self) -> DupKey {
        match self {
            OutboundOp::Post { content, .. } => DupKey::Post(content.clone()),
            OutboundOp::Repost { id, .. } => DupKey::Repost(id.0),
            OutboundOp::Comment { id, .. } => DupKey::Comment(id.0),
            OutboundOp::Like { id } => DupKey::Like(id.0),
            OutboundOp::SendMessage { to, .. } => DupKey::Message(to.0),
            OutboundOp::Delete { id } => DupKey::Delete(id.0),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            OutboundOp::Post { .. } => "post",
            OutboundOp::Repost { .. } => "repost",
            OutboundOp::Comment { .. } => "comment",
            OutboundOp::Like { .. } => "like",
            OutboundOp::SendMessage { .. } => "send-message",
            OutboundOp::Delete { .. } => "delete",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum DupKey {
    Post(String),
    Repost(i64),
    Comment(i64),
    Like(i64),
    Message(i64),
    Delete(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ActionStatus {
    Pending,
    Running,
    Succeeded,
    FailedTransient,
    Exhausted,
}

#[derive(Debug)]
struct Action {
    op: OutboundOp,
    status: ActionStatus,
    attempts: u32,
}

/// Sequentially drained action list with bounded retry.
pub struct ActionQueue {
    actions: Vec<Action>,
    retry_ceiling: u32,
    pacing: Duration,
}

impl ActionQueue {
    pub fn new(retry_ceiling: u32, pacing: Duration) -> Self {
        Self {
            actions: Vec::new(),
            retry_ceiling,
            pacing,
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Queue an operation. A duplicate of an already-pending action is
    /// dropped (logged, not an error).
    pub fn enqueue(&mut self, op: OutboundOp) {
        let key = op.dup_key();
        let duplicate = self.actions.iter().any(|a| {
            matches!(a.status, ActionStatus::Pending | ActionStatus::Running)
                && a.op.dup_key() == key
        });
        if duplicate {
            tracing::info!(op = op.describe(), "duplicate action already pending, ignoring");
            return;
        }
        self.actions.push(Action {
            op,
            status: ActionStatus::Pending,
            attempts: 0,
        });
    }

    /// One pass over the current list. Removal happens after the pass so
    /// the list is never mutated mid-iteration; transient failures below
    /// the ceiling go back to pending for the next drain.
    pub async fn drain<F, Fut>(&mut self, mut exec: F)
    where
        F: FnMut(OutboundOp) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for action in self.actions.iter_mut() {
            if action.status != ActionStatus::Pending {
                continue;
            }
            action.status = ActionStatus::Running;
            action.attempts += 1;
            match exec(action.op.clone()).await {
                Ok(()) => {
                    tracing::debug!(op = action.op.describe(), "action succeeded");
                    action.status = ActionStatus::Succeeded;
                }
                // A stale session keeps the action too: the next tick
                // re-runs login before the retry.
                Err(err)
                    if (err.is_transient() || matches!(err, Error::Auth(_)))
                        && action.attempts < self.retry_ceiling =>
                {
                    tracing::warn!(
                        op = action.op.describe(),
                        attempts = action.attempts,
                        error = %err,
                        "action failed, will retry next drain"
                    );
                    action.status = ActionStatus::FailedTransient;
                }
                Err(err) => {
                    tracing::warn!(
                        op = action.op.describe(),
                        attempts = action.attempts,
                        error = %err,
                        "action dropped"
                    );
                    action.status = ActionStatus::Exhausted;
                }
            }
            sleep(self.pacing).await;
        }

        self.actions.retain_mut(|a| match a.status {
            ActionStatus::Succeeded | ActionStatus::Exhausted => false,
            ActionStatus::FailedTransient => {
                a.status = ActionStatus::Pending;
                true
            }
            _ => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> ActionQueue {
        ActionQueue::new(5, Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn successful_action_is_removed() {
        let mut q = queue();
        q.enqueue(OutboundOp::Like { id: PostId(1) });
        let calls = AtomicUsize::new(0);
        q.drain(|_op| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(q.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_exhausts_after_exactly_five_attempts() {
        let mut q = queue();
        q.enqueue(OutboundOp::Repost {
            id: PostId(2),
            content: "fwd".to_string(),
        });
        let calls = AtomicUsize::new(0);
        let mut drains = 0;
        while !q.is_empty() {
            q.drain(|_op| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::TransientNetwork("503".to_string())) }
            })
            .await;
            drains += 1;
            assert!(drains <= 10, "queue never emptied");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(drains, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failure_drops_immediately() {
        let mut q = queue();
        q.enqueue(OutboundOp::Delete { id: PostId(3) });
        let calls = AtomicUsize::new(0);
        q.drain(|_op| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NotFound("gone".to_string())) }
        })
        .await;
        assert!(q.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_keeps_action_for_the_next_drain() {
        let mut q = queue();
        q.enqueue(OutboundOp::Comment {
            id: PostId(9),
            content: "hi".to_string(),
        });
        q.drain(|_op| async { Err(Error::Auth("token rejected".to_string())) })
            .await;
        // Still queued: the orchestrator re-logs in before the next pass.
        assert_eq!(q.len(), 1);

        let calls = AtomicUsize::new(0);
        q.drain(|_op| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(q.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_pending_enqueue_is_coalesced() {
        let mut q = queue();
        q.enqueue(OutboundOp::Repost {
            id: PostId(4),
            content: "a".to_string(),
        });
        q.enqueue(OutboundOp::Repost {
            id: PostId(4),
            content: "b".to_string(),
        });
        assert_eq!(q.len(), 1);

        // A different target is not a duplicate.
        q.enqueue(OutboundOp::Repost {
            id: PostId(5),
            content: "c".to_string(),
        });
        assert_eq!(q.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn same_target_can_be_requeued_after_completion() {
        let mut q = queue();
        q.enqueue(OutboundOp::Like { id: PostId(6) });
        q.drain(|_op| async { Ok(()) }).await;
        assert!(q.is_empty());
        q.enqueue(OutboundOp::Like { id: PostId(6) });
        assert_eq!(q.len(), 1);
    }
}
