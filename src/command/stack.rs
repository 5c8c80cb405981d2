// Stack - LIFO of queues for one session

use crate::command::queue::QueueId;
use crate::command::session::SessionId;

/// Nested queues of one session, innermost last.
///
/// The root queue is always present and is never popped.
#[derive(Debug, Clone)]
pub struct Stack {
    session: SessionId,
    queues: Vec<QueueId>,
}

impl Stack {
    pub fn new(session: SessionId, root: QueueId) -> Self {
        Self {
            session,
            queues: vec![root],
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The queue new commands land in
    pub fn peek(&self) -> QueueId {
        // Never empty: the root is seeded in `new` and `pop` refuses it.
        self.queues[self.queues.len() - 1]
    }

    pub fn root(&self) -> QueueId {
        self.queues[0]
    }

    pub fn push(&mut self, queue: QueueId) {
        self.queues.push(queue);
    }

    pub fn pop(&mut self) -> Option<QueueId> {
        if self.queues.len() > 1 {
            self.queues.pop()
        } else {
            None
        }
    }

    /// Drop `queue` from wherever it sits above the root
    pub(crate) fn remove(&mut self, queue: QueueId) -> bool {
        match self.queues.iter().skip(1).position(|q| *q == queue) {
            Some(pos) => {
                self.queues.remove(pos + 1);
                true
            }
            None => false,
        }
    }

    /// Number of nested queues above the root
    pub fn depth(&self) -> usize {
        self.queues.len() - 1
    }

    pub fn queues(&self) -> &[QueueId] {
        &self.queues
    }
}
