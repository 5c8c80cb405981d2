// CommandEngine - sessions, nested scoping and the global critical section

use crate::command::commands::{Command, CommandBody, PeriodHandle, UndoablePeriod};
use crate::command::config::EngineConfig;
use crate::command::queue::{Queue, QueueArena, QueueId};
use crate::command::session::SessionId;
use crate::command::stack::Stack;
use crate::command::trait_def::{CommandError, CommandResult};
use crate::messaging::{EventBus, QueueAction};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

type EngineCell = RefCell<EngineState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyMode {
    Apply,
    Reapply,
}

/// Everything guarded by the engine lock.
///
/// Borrows of this state are never held while user code (command bodies,
/// hooks, listeners) runs, so that code may re-enter the engine.
struct EngineState {
    queues: QueueArena,
    stacks: HashMap<SessionId, Stack>,
    /// Session whose stack is currently active, process-wide
    active: SessionId,
    /// Session each thread last activated
    thread_sessions: HashMap<ThreadId, SessionId>,
    /// Open non-undoable scopes per thread
    non_undoable: HashMap<ThreadId, usize>,
    /// > 0 while an undoable period is being replayed or reverted
    replay_depth: usize,
    strict_enqueue: bool,
    max_history: usize,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        let mut state = Self {
            queues: QueueArena::new(),
            stacks: HashMap::new(),
            active: SessionId::DEFAULT,
            thread_sessions: HashMap::new(),
            non_undoable: HashMap::new(),
            replay_depth: 0,
            strict_enqueue: config.strict_enqueue_during_revert,
            max_history: config.max_history,
        };
        state.ensure_stack(SessionId::DEFAULT);
        state
    }

    fn ensure_stack(&mut self, session: SessionId) -> &mut Stack {
        let queues = &mut self.queues;
        self.stacks
            .entry(session)
            .or_insert_with(|| Stack::new(session, queues.alloc()))
    }

    /// Make the calling thread's session the active one
    fn sync_thread(&mut self) {
        let wanted = self
            .thread_sessions
            .get(&thread::current().id())
            .copied()
            .unwrap_or(SessionId::DEFAULT);
        if wanted != self.active {
            self.ensure_stack(wanted);
            tracing::trace!(from = %self.active, to = %wanted, "switching active session");
            self.active = wanted;
        }
    }

    fn active_queue(&mut self) -> (SessionId, QueueId) {
        let session = self.active;
        let queue = self.ensure_stack(session).peek();
        (session, queue)
    }

    fn queue(&self, id: QueueId) -> CommandResult<&Queue> {
        self.queues
            .get(id)
            .ok_or_else(|| CommandError::InvalidState("queue was released".into()))
    }

    fn queue_mut(&mut self, id: QueueId) -> CommandResult<&mut Queue> {
        self.queues
            .get_mut(id)
            .ok_or_else(|| CommandError::InvalidState("queue was released".into()))
    }

    fn non_undoable_open(&self) -> bool {
        self.non_undoable
            .get(&thread::current().id())
            .is_some_and(|depth| *depth > 0)
    }

    fn replaying(&self) -> bool {
        self.replay_depth > 0
    }

    fn release_stack(&mut self, stack: Stack) {
        // The root owns every nested queue; anything already released is
        // skipped by the arena's generation check.
        self.queues.release_all(stack.queues().iter().copied());
    }
}

struct EngineInner {
    state: ReentrantMutex<EngineCell>,
    events: EventBus,
}

/// Process-wide command orchestrator.
///
/// Owns one undo/redo history (a [`Stack`] of queues) per session and
/// serializes every operation behind a single reentrant lock: no two command
/// bodies ever run at the same time, across all sessions. The handle is
/// cheap to clone and is what collaborators keep to submit their mutations.
///
/// Each thread works on the session it last [activated](Self::activate)
/// (the built-in [`SessionId::DEFAULT`] if it never did).
///
/// # Example
/// ```no_run
/// use cmdq::{Command, CommandEngine};
/// use std::sync::{Arc, Mutex};
///
/// let engine = CommandEngine::new();
/// let value = Arc::new(Mutex::new(0));
///
/// let (a, r) = (value.clone(), value.clone());
/// engine
///     .enqueue_and_run(Command::from_fn(
///         move |_| {
///             *a.lock().unwrap() += 1;
///             Ok(())
///         },
///         move |_| {
///             *r.lock().unwrap() -= 1;
///             Ok(())
///         },
///     ))
///     .unwrap();
///
/// engine.undo_last().unwrap();
/// assert_eq!(*value.lock().unwrap(), 0);
/// ```
#[derive(Clone)]
pub struct CommandEngine {
    inner: Arc<EngineInner>,
}

impl CommandEngine {
    /// Create a new engine with default settings
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: ReentrantMutex::new(RefCell::new(EngineState::new(&config))),
                events: EventBus::new(config.notifications_enabled),
            }),
        }
    }

    /// Take the global lock and re-establish the calling thread's session
    fn lock(&self) -> ReentrantMutexGuard<'_, EngineCell> {
        let guard = self.inner.state.lock();
        guard.borrow_mut().sync_thread();
        guard
    }

    fn notify(&self, action: QueueAction, session: SessionId) {
        tracing::trace!(%session, %action, "queue event");
        self.inner.events.publish(action, session);
    }

    // ------------------------------------------------------------------
    // Configuration and notifications
    // ------------------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.inner.events.set_enabled(enabled);
    }

    pub fn notifications_enabled(&self) -> bool {
        self.inner.events.is_enabled()
    }

    /// Choose between raising [`CommandError::EnqueueDuringRevert`] (strict,
    /// the default) and silently dropping a command submitted from inside a
    /// revert body.
    pub fn set_strict_enqueue_during_revert(&self, strict: bool) {
        let guard = self.inner.state.lock();
        guard.borrow_mut().strict_enqueue = strict;
    }

    pub fn strict_enqueue_during_revert(&self) -> bool {
        let guard = self.inner.state.lock();
        let strict = guard.borrow().strict_enqueue;
        strict
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Make `session` the calling thread's active session, creating its
    /// history on first use. [`SessionId::DEFAULT`] selects the built-in
    /// session.
    ///
    /// The binding is kept until [`release_thread`](Self::release_thread);
    /// short-lived threads should call it before exiting.
    pub fn activate(&self, session: SessionId) {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        state.ensure_stack(session);
        state.thread_sessions.insert(thread::current().id(), session);
        state.active = session;
        tracing::debug!(%session, "session activated");
    }

    pub fn activate_default(&self) {
        self.activate(SessionId::DEFAULT);
    }

    /// Session the calling thread works on
    pub fn current_session(&self) -> SessionId {
        let guard = self.inner.state.lock();
        let session = guard
            .borrow()
            .thread_sessions
            .get(&thread::current().id())
            .copied()
            .unwrap_or(SessionId::DEFAULT);
        session
    }

    /// Forget the calling thread's session and period bookkeeping
    pub fn release_thread(&self) {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        let id = thread::current().id();
        state.thread_sessions.remove(&id);
        state.non_undoable.remove(&id);
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let guard = self.inner.state.lock();
        let sessions = guard.borrow().stacks.keys().copied().collect();
        sessions
    }

    /// Discard a session's entire history, including any open nested
    /// queues, and reseed it with an empty root queue.
    ///
    /// This is the recovery path after a command body failed half way.
    pub fn reset_session(&self, session: SessionId) {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        if let Some(stack) = state.stacks.remove(&session) {
            state.release_stack(stack);
        }
        state.ensure_stack(session);
        tracing::debug!(%session, "session reset");
    }

    /// Drop a session. The built-in session cannot be removed.
    pub fn remove_session(&self, session: SessionId) -> bool {
        if session.is_default() {
            return false;
        }
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        let Some(stack) = state.stacks.remove(&session) else {
            return false;
        };
        state.release_stack(stack);
        state.thread_sessions.retain(|_, s| *s != session);
        if state.active == session {
            state.active = SessionId::DEFAULT;
        }
        tracing::debug!(%session, "session removed");
        true
    }

    /// Drop every command of a session's root queue.
    ///
    /// # Errors
    /// Returns `InvalidState` while a nested queue of that session is open
    /// (inside a command body or an undoable period).
    pub fn clear_history(&self, session: SessionId) -> CommandResult<()> {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        let Some(stack) = state.stacks.get(&session) else {
            return Ok(());
        };
        if stack.depth() > 0 {
            return Err(CommandError::InvalidState(
                "cannot clear history while a nested queue is open".into(),
            ));
        }
        let root = stack.root();
        let released = state.queue_mut(root)?.clear();
        state.queues.release_all(released);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queue inspection
    // ------------------------------------------------------------------

    fn inspect<R>(&self, session: SessionId, f: impl FnOnce(&Queue) -> R) -> Option<R> {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        let stack = state.stacks.get(&session)?;
        state.queues.get(stack.peek()).map(f)
    }

    /// True if the session's active queue has a command after its cursor
    pub fn can_do(&self, session: SessionId) -> bool {
        self.inspect(session, Queue::can_do).unwrap_or(false)
    }

    /// True if the session's active queue has an applied command
    pub fn can_undo(&self, session: SessionId) -> bool {
        self.inspect(session, Queue::can_undo).unwrap_or(false)
    }

    pub fn undo_description(&self, session: SessionId) -> Option<String> {
        self.inspect(session, Queue::undo_description).flatten()
    }

    pub fn redo_description(&self, session: SessionId) -> Option<String> {
        self.inspect(session, Queue::redo_description).flatten()
    }

    /// Number of commands (applied and undone) in the session's active queue
    pub fn history_len(&self, session: SessionId) -> usize {
        self.inspect(session, Queue::len).unwrap_or(0)
    }

    /// Number of nested queues currently open above the session's root
    pub fn stack_depth(&self, session: SessionId) -> usize {
        let guard = self.inner.state.lock();
        let depth = guard.borrow().stacks.get(&session).map_or(0, Stack::depth);
        depth
    }

    /// Queues alive in the arena, nested ones included
    pub fn live_queues(&self) -> usize {
        let guard = self.inner.state.lock();
        let live = guard.borrow().queues.live();
        live
    }

    // ------------------------------------------------------------------
    // Queue control
    // ------------------------------------------------------------------

    /// Append a command after the active queue's cursor without running it.
    ///
    /// Returns `Ok(false)` when the command was dropped: during an undoable
    /// period replay, or during a revert under the lenient policy.
    ///
    /// # Errors
    /// `EnqueueDuringRevert` when submitted from a revert body under the
    /// strict policy.
    pub fn enqueue(&self, command: Command) -> CommandResult<bool> {
        let guard = self.lock();
        let (session, queue) = guard.borrow_mut().active_queue();
        self.enqueue_on(&guard, session, queue, command)
    }

    /// Enqueue a command and apply it immediately.
    ///
    /// Inside a non-undoable period the command is dequeued right after it
    /// ran, leaving no undo trail.
    ///
    /// # Errors
    /// Anything `enqueue` reports, plus errors from the command body, which
    /// propagate unchanged. A failing body is not rolled back.
    pub fn enqueue_and_run(&self, command: Command) -> CommandResult<bool> {
        let guard = self.lock();
        let (session, queue) = guard.borrow_mut().active_queue();
        if !self.enqueue_on(&guard, session, queue, command)? {
            return Ok(false);
        }
        self.apply_next(&guard, session, queue, ApplyMode::Apply)?;
        let fire_and_forget = guard.borrow().non_undoable_open();
        if fire_and_forget {
            self.dequeue_last_applied(&guard, session, queue)?;
        }
        Ok(true)
    }

    /// Apply the next enqueued command of the active queue, if any
    pub fn apply_pending(&self) -> CommandResult<bool> {
        let guard = self.lock();
        let (session, queue) = guard.borrow_mut().active_queue();
        self.apply_next(&guard, session, queue, ApplyMode::Apply)
    }

    /// Revert the last applied command of the active queue.
    ///
    /// Returns `Ok(false)` when there is nothing to undo.
    pub fn undo_last(&self) -> CommandResult<bool> {
        let guard = self.lock();
        let (session, queue) = guard.borrow_mut().active_queue();
        let _flag = UndoInProgress::raise(&guard, queue)?;
        self.revert_previous(&guard, session, queue)
    }

    /// Reapply the first undone command of the active queue.
    ///
    /// Returns `Ok(false)` when there is nothing to redo.
    pub fn redo_last(&self) -> CommandResult<bool> {
        let guard = self.lock();
        let (session, queue) = guard.borrow_mut().active_queue();
        self.apply_next(&guard, session, queue, ApplyMode::Reapply)
    }

    // ------------------------------------------------------------------
    // Non-undoable periods
    // ------------------------------------------------------------------

    /// Open a scope in which `enqueue_and_run` leaves no undo trail.
    /// Scopes nest per thread.
    pub fn begin_non_undoable_period(&self) {
        let guard = self.lock();
        *guard
            .borrow_mut()
            .non_undoable
            .entry(thread::current().id())
            .or_insert(0) += 1;
    }

    /// Close the innermost non-undoable scope of the calling thread.
    /// Returns false if none was open.
    pub fn end_non_undoable_period(&self) -> bool {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        let id = thread::current().id();
        match state.non_undoable.get_mut(&id) {
            Some(depth) if *depth > 1 => {
                *depth -= 1;
                true
            }
            Some(_) => {
                state.non_undoable.remove(&id);
                true
            }
            None => {
                tracing::warn!("non-undoable period ended without a matching begin");
                false
            }
        }
    }

    pub fn in_non_undoable_period(&self) -> bool {
        let guard = self.lock();
        let open = guard.borrow().non_undoable_open();
        open
    }

    /// Run `body` inside a non-undoable period, holding the engine lock for
    /// the whole block. The period is closed on every exit path.
    pub fn perform_non_undoable<R>(&self, body: impl FnOnce(&CommandEngine) -> R) -> R {
        let _lock = self.lock();
        self.begin_non_undoable_period();
        let _scope = NonUndoableScope { engine: self };
        body(self)
    }

    // ------------------------------------------------------------------
    // Undoable periods
    // ------------------------------------------------------------------

    /// Start grouping everything submitted on this thread's session into one
    /// undo/redo step.
    ///
    /// Returns `Ok(None)` when the marker could not be enqueued (during a
    /// replay, or during a revert under the lenient policy).
    pub fn begin_undoable_period(&self, period: UndoablePeriod) -> CommandResult<Option<PeriodHandle>> {
        let guard = self.lock();
        let (session, queue) = guard.borrow_mut().active_queue();
        let description = period.description().to_owned();
        if !self.enqueue_on(&guard, session, queue, period.into_command())? {
            return Ok(None);
        }
        self.apply_next(&guard, session, queue, ApplyMode::Apply)?;
        let nested = guard
            .borrow()
            .queue(queue)?
            .last_applied_nested()
            .ok_or_else(|| CommandError::InvalidState("undoable period marker vanished".into()))?;
        tracing::debug!(%session, %description, "undoable period opened");
        Ok(Some(PeriodHandle {
            session,
            parent: queue,
            nested,
            description,
        }))
    }

    /// Close a period opened by [`begin_undoable_period`](Self::begin_undoable_period).
    ///
    /// # Errors
    /// `UnbalancedPeriod` if the period's queue is not the innermost open
    /// queue of its session.
    pub fn end_undoable_period(&self, period: &PeriodHandle) -> CommandResult<()> {
        let guard = self.lock();
        let on_top = guard
            .borrow()
            .stacks
            .get(&period.session)
            .is_some_and(|stack| stack.peek() == period.nested);
        if !on_top {
            return Err(CommandError::UnbalancedPeriod {
                description: period.description.clone(),
            });
        }
        self.pop_nested(&guard, period.session, period.nested);

        {
            // Commands undone inside the period are not part of it.
            let mut state = guard.borrow_mut();
            let released = state.queue_mut(period.nested)?.truncate_after_cursor();
            state.queues.release_all(released);
        }

        let drop_marker = {
            let state = guard.borrow();
            let marker_is_last = state.queue(period.parent)?.last_applied_nested() == Some(period.nested);
            state.non_undoable_open() && marker_is_last
        };
        if drop_marker {
            self.dequeue_last_applied(&guard, period.session, period.parent)?;
        }
        tracing::debug!(session = %period.session, description = %period.description, "undoable period closed");
        Ok(())
    }

    /// Run `body` as one undoable period. The period is ended even when the
    /// body fails; the body's error takes precedence.
    pub fn perform_undoable_period<R>(
        &self,
        period: UndoablePeriod,
        body: impl FnOnce(&CommandEngine) -> CommandResult<R>,
    ) -> CommandResult<R> {
        let _lock = self.lock();
        let handle = self.begin_undoable_period(period)?;
        let result = body(self);
        let ended = match handle {
            Some(handle) => self.end_undoable_period(&handle),
            None => Ok(()),
        };
        let value = result?;
        ended?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Queue state machine
    // ------------------------------------------------------------------

    fn enqueue_on(
        &self,
        cell: &EngineCell,
        session: SessionId,
        queue: QueueId,
        command: Command,
    ) -> CommandResult<bool> {
        {
            let mut state = cell.borrow_mut();
            if state.replaying() {
                tracing::trace!(%session, description = command.description(), "enqueue ignored during period replay");
                return Ok(false);
            }
            if state.queue(queue)?.undo_in_progress() {
                if state.strict_enqueue {
                    return Err(CommandError::EnqueueDuringRevert {
                        session,
                        description: command.description().to_owned(),
                    });
                }
                tracing::debug!(%session, description = command.description(), "enqueue dropped: undo in progress");
                return Ok(false);
            }

            // Fire-and-forget commands never evict undoable history.
            let trim_to = match state.stacks.get(&session) {
                Some(stack) if stack.root() == queue && state.max_history > 0 && !state.non_undoable_open() => {
                    Some(state.max_history)
                }
                _ => None,
            };
            let nested = state.queues.alloc();
            let target = state.queue_mut(queue)?;
            let mut released = target.truncate_after_cursor();
            target.append(command, nested);
            if let Some(max) = trim_to {
                released.extend(target.trim_front(max));
            }
            state.queues.release_all(released);
        }
        self.notify(QueueAction::Enqueued, session);
        Ok(true)
    }

    fn apply_next(
        &self,
        cell: &EngineCell,
        session: SessionId,
        queue: QueueId,
        mode: ApplyMode,
    ) -> CommandResult<bool> {
        let (index, nested, command) = {
            let mut state = cell.borrow_mut();
            let target = state.queue_mut(queue)?;
            let Some(index) = target.next_index() else {
                return Ok(false);
            };
            let (Some(nested), Some(command)) = (target.nested_at(index), target.checkout(index)) else {
                return Err(CommandError::InvalidState("command is already executing".into()));
            };
            target.set_cursor(Some(index));
            (index, nested, command)
        };

        let replay = mode == ApplyMode::Reapply && command.is_period();
        let mut slot = CheckedOut::new(cell, queue, index, command, replay);
        let command = slot.command();
        command.hooks.before_apply();
        let result = self.run_apply(cell, session, nested, command, mode);
        if result.is_ok() {
            command.hooks.after_apply();
        }
        drop(slot);
        result?;

        let action = match mode {
            ApplyMode::Apply => QueueAction::Applied,
            ApplyMode::Reapply => QueueAction::RedoPerformed,
        };
        self.notify(action, session);
        Ok(true)
    }

    fn run_apply(
        &self,
        cell: &EngineCell,
        session: SessionId,
        nested: QueueId,
        command: &mut Command,
        mode: ApplyMode,
    ) -> CommandResult<()> {
        match &mut command.body {
            CommandBody::Period => {
                if mode == ApplyMode::Reapply {
                    let _scope = self.push_scoped(cell, session, nested)?;
                    self.replay_forward(cell, session, nested)
                } else {
                    // Stays pushed until end_undoable_period.
                    self.push_nested(cell, session, nested)?;
                    Ok(())
                }
            }
            CommandBody::Action(body) => {
                // A command with nothing recorded has nothing to replay and
                // runs its own body instead.
                let replay = if mode == ApplyMode::Reapply {
                    let state = cell.borrow();
                    let recorded = !state.queue(nested)?.is_empty();
                    state.replaying() && recorded
                } else {
                    false
                };
                let _scope = self.push_scoped(cell, session, nested)?;
                if replay {
                    self.replay_forward(cell, session, nested)
                } else {
                    body.apply(self)
                }
            }
        }
    }

    fn replay_forward(&self, cell: &EngineCell, session: SessionId, queue: QueueId) -> CommandResult<()> {
        while self.apply_next(cell, session, queue, ApplyMode::Reapply)? {}
        Ok(())
    }

    fn revert_previous(&self, cell: &EngineCell, session: SessionId, queue: QueueId) -> CommandResult<bool> {
        let (index, nested, command) = {
            let mut state = cell.borrow_mut();
            let target = state.queue_mut(queue)?;
            let Some(index) = target.cursor() else {
                return Ok(false);
            };
            let (Some(nested), Some(command)) = (target.nested_at(index), target.checkout(index)) else {
                return Err(CommandError::InvalidState("command is already executing".into()));
            };
            (index, nested, command)
        };

        let replay = command.is_period();
        let mut slot = CheckedOut::new(cell, queue, index, command, replay);
        let command = slot.command();
        command.hooks.before_revert();
        let result = self.run_revert(cell, session, nested, command);
        if result.is_ok() {
            command.hooks.after_revert();
        }
        drop(slot);
        result?;

        if let Some(target) = cell.borrow_mut().queues.get_mut(queue) {
            target.set_cursor(index.checked_sub(1));
        }
        self.notify(QueueAction::UndoPerformed, session);
        Ok(true)
    }

    fn run_revert(
        &self,
        cell: &EngineCell,
        session: SessionId,
        nested: QueueId,
        command: &mut Command,
    ) -> CommandResult<()> {
        let pushed = cell.borrow().queue(nested)?.is_pushed();
        if pushed {
            self.pop_nested(cell, session, nested);
        }

        while self.revert_previous(cell, session, nested)? {}

        {
            let mut state = cell.borrow_mut();
            // Kept during replay so the period can roll the same commands forward.
            if !state.replaying() {
                let released = state.queue_mut(nested)?.clear();
                state.queues.release_all(released);
            }
        }

        match &mut command.body {
            CommandBody::Action(body) => body.revert(self),
            CommandBody::Period => Ok(()),
        }
    }

    fn dequeue_last_applied(&self, cell: &EngineCell, session: SessionId, queue: QueueId) -> CommandResult<bool> {
        {
            let mut state = cell.borrow_mut();
            let Some(nested) = state.queue_mut(queue)?.remove_last_applied() else {
                return Ok(false);
            };
            state.queues.release(nested);
        }
        self.notify(QueueAction::Dequeued, session);
        Ok(true)
    }

    fn push_nested(&self, cell: &EngineCell, session: SessionId, queue: QueueId) -> CommandResult<bool> {
        {
            let mut state = cell.borrow_mut();
            let target = state.queue_mut(queue)?;
            if target.is_pushed() {
                return Ok(false);
            }
            target.set_pushed(true);
            state.ensure_stack(session).push(queue);
        }
        self.notify(QueueAction::QueuePushed, session);
        Ok(true)
    }

    fn push_scoped<'a>(
        &'a self,
        cell: &'a EngineCell,
        session: SessionId,
        queue: QueueId,
    ) -> CommandResult<NestedScope<'a>> {
        let pushed = self.push_nested(cell, session, queue)?;
        Ok(NestedScope {
            engine: self,
            cell,
            session,
            queue,
            pushed,
        })
    }

    fn pop_nested(&self, cell: &EngineCell, session: SessionId, queue: QueueId) -> bool {
        {
            let mut state = cell.borrow_mut();
            match state.queues.get_mut(queue) {
                Some(target) if target.is_pushed() => target.set_pushed(false),
                _ => return false,
            }
            let Some(stack) = state.stacks.get_mut(&session) else {
                return false;
            };
            if stack.peek() == queue {
                stack.pop();
            } else {
                tracing::warn!(%session, "nested queue popped out of order");
                stack.remove(queue);
            }
        }
        self.notify(QueueAction::QueuePopped, session);
        true
    }
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        f.debug_struct("CommandEngine")
            .field("sessions", &state.stacks.len())
            .field("active", &state.active)
            .field("live_queues", &state.queues.live())
            .field("replay_depth", &state.replay_depth)
            .finish()
    }
}

/// A command taken out of its queue slot while its body runs.
///
/// Dropping puts the command back (unless the queue was released meanwhile)
/// and closes the replay scope it opened.
struct CheckedOut<'a> {
    cell: &'a EngineCell,
    queue: QueueId,
    index: usize,
    command: Option<Command>,
    replay: bool,
}

impl<'a> CheckedOut<'a> {
    fn new(cell: &'a EngineCell, queue: QueueId, index: usize, command: Command, replay: bool) -> Self {
        if replay {
            cell.borrow_mut().replay_depth += 1;
        }
        Self {
            cell,
            queue,
            index,
            command: Some(command),
            replay,
        }
    }

    fn command(&mut self) -> &mut Command {
        match self.command.as_mut() {
            Some(command) => command,
            None => unreachable!("command is only taken back on drop"),
        }
    }
}

impl Drop for CheckedOut<'_> {
    fn drop(&mut self) {
        let orphan = {
            let mut state = self.cell.borrow_mut();
            if self.replay {
                state.replay_depth -= 1;
            }
            match (self.command.take(), state.queues.get_mut(self.queue)) {
                (Some(command), Some(queue)) => {
                    queue.restore(self.index, command);
                    None
                }
                (command, _) => command,
            }
        };
        // Dropped outside the borrow: user closures may own engine handles.
        drop(orphan);
    }
}

/// Pops a nested queue pushed for the duration of a command body
struct NestedScope<'a> {
    engine: &'a CommandEngine,
    cell: &'a EngineCell,
    session: SessionId,
    queue: QueueId,
    pushed: bool,
}

impl Drop for NestedScope<'_> {
    fn drop(&mut self) {
        if self.pushed {
            self.engine.pop_nested(self.cell, self.session, self.queue);
        }
    }
}

/// Raises a queue's undo-in-progress flag and restores it on drop
struct UndoInProgress<'a> {
    cell: &'a EngineCell,
    queue: QueueId,
    previous: bool,
}

impl<'a> UndoInProgress<'a> {
    fn raise(cell: &'a EngineCell, queue: QueueId) -> CommandResult<Self> {
        let previous = cell.borrow_mut().queue_mut(queue)?.set_undo_in_progress(true);
        Ok(Self { cell, queue, previous })
    }
}

impl Drop for UndoInProgress<'_> {
    fn drop(&mut self) {
        if let Some(queue) = self.cell.borrow_mut().queues.get_mut(self.queue) {
            queue.set_undo_in_progress(self.previous);
        }
    }
}

struct NonUndoableScope<'a> {
    engine: &'a CommandEngine,
}

impl Drop for NonUndoableScope<'_> {
    fn drop(&mut self) {
        self.engine.end_non_undoable_period();
    }
}
